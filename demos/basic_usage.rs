// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic site-store usage example.
//!
//! Demonstrates:
//! 1. Starting a manager over SQLite files (no Docker needed)
//! 2. Writing messages, a photo, a quote and visits
//! 3. Paging and cached counts
//! 4. Reading the health report
//! 5. Migrating records left in the fallback store
//! 6. Displaying metrics
//! 7. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=site_store=debug cargo run --example basic_usage
//! ```

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use tracing_subscriber::EnvFilter;

use site_store::model::{Message, NewMessage, NewPhoto, NewQuote, NewVisit, QueryOptions};
use site_store::{ManagerState, RepositoryManager, StoreConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("site_store=info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║             site-store: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the manager
    // ─────────────────────────────────────────────────────────────────────────
    let dir = tempfile::tempdir()?;
    let config = StoreConfig {
        remote_url: Some(format!("sqlite://{}?mode=rwc", dir.path().join("site.db").display())),
        local_path: Some(dir.path().join("fallback.db").display().to_string()),
        bootstrap_schema: true,
        ..Default::default()
    };

    let mut manager = RepositoryManager::new(config);
    println!("📦 State: {}", manager.state());
    manager.initialize().await?;
    assert_eq!(manager.state(), ManagerState::Ready);
    println!("   ✅ Manager ready! State: {}", manager.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Write some content
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Writing content...");
    let messages = manager.messages()?;
    for (content, color) in [
        ("Lovely site!", "#ff6f61"),
        ("Greetings from Lisbon", "6b5b95"),
        ("The photos are great", "#88B04B"),
    ] {
        let created = messages.create(NewMessage::new(content, color)).await?;
        println!("   └─ {} {} ({:?})", created.value.color, created.value.content, created.source);
    }

    let photo = manager
        .photos()?
        .create(NewPhoto::new("https://images.example.com/harbour.jpg").caption("Harbour at dusk"))
        .await?;
    println!("   └─ photo {} ({:?})", photo.value.id, photo.source);

    manager.quotes()?.create(NewQuote::new("Make it work, then make it fast.")).await?;

    let visits = manager.visits()?;
    let first = visits.record(NewVisit::new("198.51.100.4", Some("demo/1.0"))).await?;
    let repeat = visits.record(NewVisit::new("198.51.100.4", Some("demo/1.0"))).await?;
    println!("   └─ visit counted: {} then {}", first.value, repeat.value);

    // Validation errors carry every failed check
    if let Err(e) = messages.create(NewMessage::new("", "not-a-color")).await {
        println!("   └─ rejected: {} {:?}", e, e.reasons());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Page and cached reads
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Reading back...");
    let page = messages.find_all(&QueryOptions::page(1, 2)).await?.value;
    println!(
        "   └─ page {}/{}: {} items, has_next={}",
        page.page,
        page.total_pages(),
        page.items.len(),
        page.has_next
    );

    let cached = manager.cached()?;
    for _ in 0..3 {
        cached.message_count().await?;
    }
    println!("   └─ messages={} visits={}", cached.message_count().await?, cached.visit_count().await?);
    if let Some(quote) = cached.random_quote().await? {
        println!("   └─ quote: \"{}\"", quote.text);
    }
    if let Some(cache) = manager.cache() {
        let stats = cache.stats();
        println!("   └─ cache hit rate {:.0}% ({} entries)", stats.hit_rate * 100.0, stats.entry_count);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Health
    // ─────────────────────────────────────────────────────────────────────────
    let health = manager.health_report().await;
    println!("\n🩺 Health: remote={} fallback={} serving={}", health.remote_reachable, health.fallback_available, health.is_serving());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Migrate records written during an outage
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🚚 Migrating fallback data...");
    if let Some(fallback) = manager.fallback_store() {
        fallback
            .create(Message {
                id: "local-demo".into(),
                content: "Written while the database was down".into(),
                color: "#FFA500".into(),
                created_at: 1_700_000_000_000,
                updated_at: 1_700_000_000_000,
            })
            .await?;
    }

    let migration = manager.migration().await?;
    let mut progress = migration.subscribe();
    let watcher = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = progress.borrow_and_update().clone();
            println!("   └─ [{:>3}%] {}: {}", p.percent, p.stage, p.message);
            if p.stage.is_terminal() {
                break;
            }
        }
    });
    let report = migration.run().await?;
    let _ = watcher.await;
    println!(
        "   ✅ {} migrated, {} discarded, {} failed, {} cleaned",
        report.migrated.total(),
        report.discarded,
        report.failed,
        report.cleaned
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 7. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    manager.shutdown().await;
    println!("\n🛑 Shutdown complete! State: {}", manager.state());

    Ok(())
}

/// Dump captured metrics, one line per series
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = Vec::new();
    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        let rendered = match value {
            DebugValue::Counter(v) => format!("{}", v),
            DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("count={} sum={:.4}", samples.len(), sum)
            }
        };
        lines.push(format!("{}{} = {}", key.name(), label_str, rendered));
    }
    lines.sort();

    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {}", line);
    }
}
