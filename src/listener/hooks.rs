//! Operator callbacks fired by the listener and its sessions.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use super::session::SessionError;

/// Called with the peer address of every accepted connection.
pub type ConnectHook = Arc<dyn Fn(SocketAddr) + Send + Sync>;

/// Called after each turn with the session index and the raw chunks received.
pub type ResponseHook = Arc<dyn Fn(usize, &[Vec<u8>]) + Send + Sync>;

/// Called when a session closes because of an error.
pub type ErrorHook = Arc<dyn Fn(usize, &SessionError) + Send + Sync>;

/// Callbacks fixed at listener construction.
#[derive(Clone, Default)]
pub struct ListenerHooks {
    on_connect: Option<ConnectHook>,
    on_response: Option<ResponseHook>,
    on_error: Option<ErrorHook>,
}

impl ListenerHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(f));
        self
    }

    pub fn on_response<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &[Vec<u8>]) + Send + Sync + 'static,
    {
        self.on_response = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &SessionError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn connected(&self, peer: SocketAddr) {
        if let Some(hook) = &self.on_connect {
            hook(peer);
        }
    }

    pub(crate) fn response(&self, index: usize, raw: &[Vec<u8>]) {
        if let Some(hook) = &self.on_response {
            hook(index, raw);
        }
    }

    pub(crate) fn error(&self, index: usize, error: &SessionError) {
        if let Some(hook) = &self.on_error {
            hook(index, error);
        }
    }
}

impl fmt::Debug for ListenerHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHooks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_response", &self.on_response.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
