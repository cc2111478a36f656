// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage boundaries.
//!
//! - [`traits::RemoteStore`]: the primary relational store ([`sql::SqlRemoteStore`])
//! - [`traits::KeyValueStore`]: the local persistent medium
//!   ([`sqlite_kv::SqliteKvStore`], [`memory::InMemoryKvStore`])

pub mod memory;
pub mod sql;
pub mod sqlite_kv;
pub mod traits;
