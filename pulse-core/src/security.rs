//! Encryption seam for message bodies at rest, plus the helpers that keep
//! sensitive text out of error replies and logs.
//!
//! The store only ever talks to [`SecurityService`]; swapping the
//! pass-through for a real cipher is a change at construction time.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;

use regex::Regex;

/// Symmetric transform applied to message bodies before they are stored.
pub trait SecurityService: Send + Sync {
    /// Encrypt plaintext into a form safe for storage.
    fn encrypt(&self, text: &str) -> String;

    /// Reverse of [`SecurityService::encrypt`].
    fn decrypt(&self, encrypted: &str) -> String;

    /// Overwrite a sensitive buffer once it is no longer needed.
    fn scrub(&self, sensitive: &mut String);
}

/// Identity implementation: bodies are stored as-is.
///
/// Warns once per instance so nobody mistakes it for real encryption.
#[derive(Debug, Default)]
pub struct PassthroughSecurity {
    warned: AtomicBool,
}

impl PassthroughSecurity {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecurityService for PassthroughSecurity {
    fn encrypt(&self, text: &str) -> String {
        if !self.warned.swap(true, Ordering::Relaxed) {
            log::warn!(
                "PassthroughSecurity in use: message bodies are NOT encrypted at rest"
            );
        }
        text.to_string()
    }

    fn decrypt(&self, encrypted: &str) -> String {
        encrypted.to_string()
    }

    fn scrub(&self, sensitive: &mut String) {
        // NUL bytes keep the buffer valid UTF-8 while overwriting in place.
        let zeroed = "\0".repeat(sensitive.len());
        sensitive.replace_range(.., &zeroed);
        sensitive.clear();
    }
}

/// Reduce an error to something safe to hand across a process boundary:
/// the first line of its message, with stack traces and detail stripped.
pub fn sanitize_error(err: impl Display) -> String {
    let text = err.to_string();
    match text.lines().next().map(str::trim_end) {
        Some(first) if !first.is_empty() => first.to_string(),
        _ => "An error occurred".to_string(),
    }
}

static LONG_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]{20,}""#).expect("static regex"));

/// Replace quoted strings of 20+ characters (likely message bodies) with
/// `"[REDACTED]"` so they can be logged.
pub fn redact_for_log(text: &str) -> String {
    LONG_QUOTED.replace_all(text, r#""[REDACTED]""#).into_owned()
}
