/// Listener metrics with revlistd_* prefix.
///
/// Recorded through the `metrics` facade; they are no-ops until the binary
/// embedding the library installs a recorder.
pub mod counters {
    use metrics::{counter, gauge};

    // ============================================================================
    // LISTENER RECORDING FUNCTIONS
    // ============================================================================

    pub fn accept_error() {
        counter!("revlistd_accept_errors_total").increment(1);
    }

    pub fn session_opened() {
        counter!("revlistd_sessions_total", "status" => "opened").increment(1);
        gauge!("revlistd_sessions_active").increment(1.0);
    }

    pub fn session_closed(reason: &'static str) {
        counter!("revlistd_sessions_total", "status" => "closed", "reason" => reason).increment(1);
        gauge!("revlistd_sessions_active").decrement(1.0);
    }

    // ============================================================================
    // SESSION RECORDING FUNCTIONS
    // ============================================================================

    pub fn turn_completed(strategy: &'static str) {
        counter!("revlistd_turns_total", "termination" => strategy).increment(1);
    }

    pub fn bytes_received(bytes: usize) {
        counter!("revlistd_received_bytes_total").increment(bytes as u64);
    }

    // ============================================================================
    // STAGE RECORDING FUNCTIONS
    // ============================================================================

    pub fn inject_attempt(success: bool) {
        let result = if success { "sent" } else { "failed" };
        counter!("revlistd_injections_total", "result" => result).increment(1);
    }
}
