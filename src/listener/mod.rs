//! Listener module for accepting reverse connections.
//!
//! - The acceptor binds once and accepts on its own task
//! - Every accepted connection takes the next registry slot
//! - Interactive mode runs one session task per connection
//! - Stage mode parks connections for single-target injection

mod acceptor;
mod connection;
mod hooks;
mod registry;
mod session;
mod source;
mod termination;

pub use acceptor::{InjectOutcome, Listener, ListenerError};
pub use connection::Connection;
pub use hooks::{ConnectHook, ErrorHook, ListenerHooks, ResponseHook};
pub use registry::{SessionRegistry, SessionSlot, SharedSessionRegistry};
pub use session::{CloseReason, Session, SessionContext, SessionError, SessionState};
pub use source::{
    ChannelCommands, CommandSource, CommandSourceFactory, FnCommands, PromptCommands,
    ScriptedCommands,
};
