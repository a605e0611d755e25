//! Per-session transcript.

use std::sync::{Arc, RwLock};

/// Ordered, append-only log of cleaned output fragments for one session.
///
/// Cloning shares the same underlying log.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    fragments: Arc<RwLock<Vec<String>>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cleaned fragment.
    pub fn push(&self, fragment: String) {
        self.fragments
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(fragment);
    }

    /// Number of fragments captured so far.
    pub fn len(&self) -> usize {
        self.fragments.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the fragments in receipt order.
    pub fn fragments(&self) -> Vec<String> {
        self.fragments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Concatenation of every fragment captured so far.
    pub fn transcript(&self) -> String {
        self.fragments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .concat()
    }
}
