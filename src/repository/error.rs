// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Errors at the repository boundary.
//!
//! `Display` of a [`RepoError`] is the message shown to site visitors: stable,
//! localized and free of store internals. Raw store errors are only logged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::validation::ValidationErrors;
use crate::resilience::classify::ErrorKind;
use crate::resilience::retry::Classified;
use crate::storage::traits::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Zh,
}

/// Visitor-facing text for an error kind.
pub fn user_message(kind: ErrorKind, locale: Locale) -> &'static str {
    match (kind, locale) {
        (ErrorKind::Network, Locale::En) => "The service is temporarily unreachable. Please try again later.",
        (ErrorKind::Network, Locale::Zh) => "服务暂时无法连接，请稍后再试。",
        (ErrorKind::RemoteStore, Locale::En) => "We could not save or load your data. Please try again.",
        (ErrorKind::RemoteStore, Locale::Zh) => "数据读取或保存失败，请重试。",
        (ErrorKind::Validation, Locale::En) => "Some of the information provided is invalid.",
        (ErrorKind::Validation, Locale::Zh) => "提交的信息无效。",
        (ErrorKind::Permission, Locale::En) => "You do not have permission to do that.",
        (ErrorKind::Permission, Locale::Zh) => "您没有执行此操作的权限。",
        (ErrorKind::RateLimit, Locale::En) => "Too many requests. Please wait a moment and try again.",
        (ErrorKind::RateLimit, Locale::Zh) => "请求过于频繁，请稍后再试。",
        (ErrorKind::Unknown, Locale::En) => "Something unexpected happened. Please try again later.",
        (ErrorKind::Unknown, Locale::Zh) => "发生了意外错误，请稍后再试。",
    }
}

fn not_found_message(locale: Locale) -> &'static str {
    match locale {
        Locale::En => "The requested item could not be found.",
        Locale::Zh => "未找到请求的内容。",
    }
}

fn conflict_reason(locale: Locale) -> &'static str {
    match locale {
        Locale::En => "record: conflicts with an existing record",
        Locale::Zh => "记录：与已有记录冲突",
    }
}

fn rejected_reason(locale: Locale) -> &'static str {
    match locale {
        Locale::En => "record: rejected by the data store",
        Locale::Zh => "记录：数据存储拒绝了该内容",
    }
}

fn unsupported_message(locale: Locale) -> &'static str {
    match locale {
        Locale::En => "This operation is not supported.",
        Locale::Zh => "不支持此操作。",
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepoError {
    /// Input rejected before any store call. `reasons` lists every failed check.
    #[error("{message}")]
    Validation { message: String, reasons: Vec<String> },

    #[error("{message}")]
    NotFound { message: String, id: String },

    #[error("{message}")]
    Unsupported { message: String, operation: &'static str },

    /// The store failed and no fallback could serve the request.
    #[error("{message}")]
    Store {
        message: String,
        kind: ErrorKind,
        attempts: usize,
    },
}

impl RepoError {
    pub fn validation(errors: ValidationErrors, locale: Locale) -> Self {
        Self::with_reasons(errors.reasons(), locale)
    }

    pub fn with_reasons(reasons: Vec<String>, locale: Locale) -> Self {
        RepoError::Validation {
            message: user_message(ErrorKind::Validation, locale).to_string(),
            reasons,
        }
    }

    pub fn not_found(id: &str, locale: Locale) -> Self {
        RepoError::NotFound {
            message: not_found_message(locale).to_string(),
            id: id.to_string(),
        }
    }

    pub fn unsupported(operation: &'static str, locale: Locale) -> Self {
        RepoError::Unsupported {
            message: unsupported_message(locale).to_string(),
            operation,
        }
    }

    /// Map an operation's final classified error. Store text never reaches
    /// the result; the caller logs it.
    pub fn from_classified(failure: &Classified, id: Option<&str>, locale: Locale) -> Self {
        match &failure.error {
            StoreError::NotFound => Self::not_found(id.unwrap_or_default(), locale),
            StoreError::Constraint(_) => Self::with_reasons(vec![conflict_reason(locale).to_string()], locale),
            StoreError::Invalid(_) => Self::with_reasons(vec![rejected_reason(locale).to_string()], locale),
            _ => RepoError::Store {
                message: user_message(failure.classification.kind, locale).to_string(),
                kind: failure.classification.kind,
                attempts: failure.attempts,
            },
        }
    }

    /// Stable kind for callers that branch on the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepoError::Validation { .. } | RepoError::NotFound { .. } => ErrorKind::Validation,
            RepoError::Unsupported { .. } => ErrorKind::Validation,
            RepoError::Store { kind, .. } => *kind,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RepoError::Validation { message, .. }
            | RepoError::NotFound { message, .. }
            | RepoError::Unsupported { message, .. }
            | RepoError::Store { message, .. } => message,
        }
    }

    /// Validation reasons; empty for other errors.
    pub fn reasons(&self) -> &[String] {
        match self {
            RepoError::Validation { reasons, .. } => reasons,
            _ => &[],
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, RepoError::Validation { .. })
    }
}
