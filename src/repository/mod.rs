// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed repositories over the remote store, degrading to the fallback store.
//!
//! Every operation follows the same contract:
//!
//! 1. Validate input. Validation failures are reported immediately with all
//!    reasons and are never retried.
//! 2. Run against the remote store through the [`RetryEngine`], each call
//!    bounded by the configured timeout.
//! 3. If retries are exhausted on a retryable failure and a fallback store is
//!    configured, run the same operation against it; the result is tagged
//!    [`DataSource::Fallback`].
//! 4. Otherwise map the failure to a [`RepoError`] whose `Display` is a
//!    localized, non-technical message.
//!
//! [`RetryEngine`]: crate::resilience::retry::RetryEngine
//! [`DataSource::Fallback`]: crate::resilience::fallback::DataSource::Fallback

pub mod cached;
pub mod error;
pub mod message;
pub mod photo;
pub mod quote;
pub mod schema;
pub mod table;
pub mod visit;

pub use cached::CachedReads;
pub use error::{Locale, RepoError};
pub use message::MessageRepository;
pub use photo::PhotoRepository;
pub use quote::QuoteRepository;
pub use schema::bootstrap_schema;
pub use table::RepoContext;
pub use visit::VisitRepository;
