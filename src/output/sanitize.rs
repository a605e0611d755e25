//! Terminal escape sequence stripping.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::config::DecodePolicy;

/// Raw chunk could not be decoded as UTF-8.
#[derive(Debug, Error)]
#[error("invalid UTF-8 in response chunk at byte {valid_up_to} ({len} bytes)")]
pub struct DecodeError {
    /// Offset of the first invalid byte
    pub valid_up_to: usize,
    /// Length of the chunk
    pub len: usize,
}

/// SGR color/style sequences and OSC 0 window-title sequences.
fn escape_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\x1b\[.*?m|\x1b\]0;.*?\x07").expect("escape pattern is valid")
    })
}

/// Strip color/style and window-title sequences from decoded text.
///
/// Applied per chunk. A sequence split across two chunks survives in both
/// halves.
pub fn sanitize(text: &str) -> String {
    escape_pattern().replace_all(text, "").into_owned()
}

/// Decode one raw chunk according to the configured policy.
pub fn decode_chunk(raw: &[u8], policy: DecodePolicy) -> Result<String, DecodeError> {
    match policy {
        DecodePolicy::Strict => std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| DecodeError {
                valid_up_to: e.valid_up_to(),
                len: raw.len(),
            }),
        DecodePolicy::Lossy => Ok(String::from_utf8_lossy(raw).into_owned()),
    }
}
