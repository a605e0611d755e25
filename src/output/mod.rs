//! Output handling for session responses.
//!
//! Raw bytes from the peer are decoded, stripped of terminal escape
//! sequences, and appended to a per-session transcript.

mod capture;
mod sanitize;

pub use capture::CapturedOutput;
pub use sanitize::{decode_chunk, sanitize, DecodeError};
