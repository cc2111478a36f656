// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failure handling: classification, retry, fallback, health and locks.

pub mod classify;
pub mod error_log;
pub mod fallback;
pub mod health;
pub mod lock;
pub mod retry;
