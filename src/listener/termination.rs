//! Turn termination strategies.
//!
//! The wire carries no end-of-response marker, so the end of a turn is
//! inferred. A receive timeout always ends a turn; the configured strategy
//! can end it earlier.

use crate::config::TurnTermination;

impl TurnTermination {
    /// Whether `chunk` ends the turn before it is captured.
    ///
    /// Under the echo-duplicate heuristic two byte-identical consecutive raw
    /// chunks mean the stream has stalled for this turn.
    pub fn repeats(&self, previous: &[u8], chunk: &[u8]) -> bool {
        matches!(self, TurnTermination::EchoDuplicate) && previous == chunk
    }

    /// Whether the cleaned output of the turn so far completes it.
    ///
    /// Only a marker ending inside the last `appended` bytes counts; earlier
    /// output was checked when it arrived.
    pub fn reached(&self, turn_output: &str, appended: usize) -> bool {
        match self {
            TurnTermination::Sentinel { marker } => {
                let overlap = marker.len().saturating_sub(1);
                let mut start = turn_output.len().saturating_sub(appended + overlap);
                while !turn_output.is_char_boundary(start) {
                    start -= 1;
                }
                turn_output[start..].contains(marker.as_str())
            }
            _ => false,
        }
    }

    /// Short name for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnTermination::EchoDuplicate => "echo_duplicate",
            TurnTermination::IdleTimeout => "idle_timeout",
            TurnTermination::Sentinel { .. } => "sentinel",
        }
    }
}
