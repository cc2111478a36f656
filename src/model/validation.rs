// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Field validation helpers.
//!
//! Validators collect every failure rather than stopping at the first, so a
//! caller can report all problems with an input at once.

use serde::Serialize;
use thiserror::Error;

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

/// All failed checks for one input.
#[derive(Error, Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[error("{}", self.summary())]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &'static str, reason: impl Into<String>) -> Self {
        let mut errs = Self::new();
        errs.add(field, reason);
        errs
    }

    pub fn add(&mut self, field: &'static str, reason: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            reason: reason.into(),
        });
    }

    /// Record `reason` unless `ok` holds.
    pub fn check(&mut self, ok: bool, field: &'static str, reason: impl Into<String>) {
        if !ok {
            self.add(field, reason);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    /// `Ok(value)` when nothing failed.
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }

    pub fn reasons(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.reason))
            .collect()
    }

    pub fn summary(&self) -> String {
        self.reasons().join("; ")
    }
}

/// Length in Unicode scalar values.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Required text: non-blank, at most `max` chars. Both checks apply to the
/// trimmed value, which is what gets stored.
pub fn check_text(errs: &mut ValidationErrors, field: &'static str, value: &str, max: usize) {
    let value = value.trim();
    if value.is_empty() {
        errs.add(field, "must not be empty");
        return;
    }
    let len = char_len(value);
    errs.check(len <= max, field, format!("must be at most {} characters (got {})", max, len));
}

/// Normalize a `#RRGGBB` color. The leading `#` is optional on input; the
/// result is upper-case with `#`.
pub fn normalize_color(input: &str) -> Result<String, String> {
    let trimmed = input.trim();
    let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("'{}' is not a #RRGGBB color", input));
    }
    Ok(format!("#{}", hex.to_ascii_uppercase()))
}

/// `http(s)://host/...` or `data:image/<type>;base64,...`.
pub fn check_image_url(url: &str) -> Result<(), String> {
    let url = url.trim();
    if url.is_empty() {
        return Err("must not be empty".to_string());
    }
    if let Some(rest) = url.strip_prefix("data:image/") {
        let (mime, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| "data URL must be base64 encoded".to_string())?;
        if mime.is_empty() || !mime.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
            return Err(format!("unsupported image type '{}'", mime));
        }
        if payload.is_empty() {
            return Err("data URL has no payload".to_string());
        }
        return Ok(());
    }
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| "must be an http(s) URL or an image data URL".to_string())?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host = host.rsplit('@').next().unwrap_or(host);
    let host_name = host.split(':').next().unwrap_or("");
    if host_name.is_empty() || host_name.chars().any(char::is_whitespace) {
        return Err("URL has no host".to_string());
    }
    if url.chars().any(char::is_whitespace) {
        return Err("URL must not contain whitespace".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_every_failure() {
        let mut errs = ValidationErrors::new();
        check_text(&mut errs, "content", "   ", 200);
        errs.check(false, "color", "bad");
        assert_eq!(errs.errors.len(), 2);
        assert_eq!(errs.to_string(), "content: must not be empty; color: bad");
    }

    #[test]
    fn test_text_length_counts_chars() {
        let mut errs = ValidationErrors::new();
        check_text(&mut errs, "content", &"你".repeat(200), 200);
        assert!(errs.is_empty());

        check_text(&mut errs, "content", &"你".repeat(201), 200);
        assert_eq!(errs.errors.len(), 1);
    }

    #[test]
    fn test_text_length_ignores_surrounding_whitespace() {
        let mut errs = ValidationErrors::new();
        check_text(&mut errs, "content", &format!("  {}\n", "a".repeat(200)), 200);
        assert!(errs.is_empty());
    }

    #[test]
    fn test_normalize_color() {
        assert_eq!(normalize_color("#ff8800").unwrap(), "#FF8800");
        assert_eq!(normalize_color("a1b2c3").unwrap(), "#A1B2C3");
        assert!(normalize_color("#fff").is_err());
        assert!(normalize_color("#GGGGGG").is_err());
        assert!(normalize_color("").is_err());
    }

    #[test]
    fn test_image_urls() {
        assert!(check_image_url("https://example.com/a.png").is_ok());
        assert!(check_image_url("http://cdn.example.com:8080/x?y=1").is_ok());
        assert!(check_image_url("data:image/png;base64,iVBORw0KGgo=").is_ok());
        assert!(check_image_url("data:image/svg+xml;base64,PHN2Zz4=").is_ok());

        assert!(check_image_url("ftp://example.com/a.png").is_err());
        assert!(check_image_url("https:///a.png").is_err());
        assert!(check_image_url("data:text/html;base64,PGI+").is_err());
        assert!(check_image_url("data:image/png;base64,").is_err());
        assert!(check_image_url("https://exa mple.com").is_err());
    }
}
