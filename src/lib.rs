//! revlistd: reverse-connection listener.
//!
//! Accepts connections from remote agents and either drives each one with an
//! interactive command/response session or parks it for a one-shot payload.

pub mod bootstrap;
pub mod config;
pub mod listener;
pub mod output;
pub mod telemetry;
