//! Session registry indexed by arrival order.
//!
//! Slots are appended by the accept loop and never removed, so an index
//! always names the same connection. Closing a session tombstones its slot.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::debug;

use crate::output::CapturedOutput;
use crate::telemetry::counters;

use super::connection::Connection;
use super::session::CloseReason;

/// One registry slot.
#[derive(Debug)]
pub struct SessionSlot {
    connection: Arc<Connection>,
    output: CapturedOutput,
    closed: AtomicBool,
}

impl SessionSlot {
    pub fn index(&self) -> usize {
        self.connection.index()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer_addr()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Transcript sink for this session.
    pub fn output(&self) -> &CapturedOutput {
        &self.output
    }

    pub fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// Registry of every session accepted by one listener
pub struct SessionRegistry {
    slots: RwLock<Vec<Arc<SessionSlot>>>,
}

impl SessionRegistry {
    /// Create a new session registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an accepted connection in the next slot
    pub async fn register(&self, peer_addr: SocketAddr, stream: TcpStream) -> Arc<SessionSlot> {
        let mut slots = self.slots.write().await;
        let index = slots.len();

        let slot = Arc::new(SessionSlot {
            connection: Arc::new(Connection::new(index, peer_addr, stream)),
            output: CapturedOutput::new(),
            closed: AtomicBool::new(false),
        });
        slots.push(slot.clone());

        debug!(index, peer = %peer_addr, "session registered");
        slot
    }

    /// Tombstone a slot. Returns false if it was already closed or unknown.
    pub async fn unregister(&self, index: usize) -> bool {
        let slots = self.slots.read().await;

        match slots.get(index) {
            Some(slot) if !slot.closed.swap(true, Ordering::SeqCst) => {
                debug!(index, "session unregistered");
                true
            }
            _ => false,
        }
    }

    /// Get a slot by arrival index
    pub async fn get(&self, index: usize) -> Option<Arc<SessionSlot>> {
        self.slots.read().await.get(index).cloned()
    }

    /// Number of sessions ever registered
    pub async fn count(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Number of sessions not yet closed
    pub async fn live_count(&self) -> usize {
        self.slots
            .read()
            .await
            .iter()
            .filter(|slot| slot.is_live())
            .count()
    }

    /// Force-close and tombstone every live connection
    pub async fn close_all(&self) -> usize {
        let live: Vec<Arc<SessionSlot>> = {
            let slots = self.slots.read().await;
            slots.iter().filter(|slot| slot.is_live()).cloned().collect()
        };

        for slot in &live {
            slot.closed.store(true, Ordering::SeqCst);
            // session tasks report their own closure
            if slot.connection.initiate_close().await {
                counters::session_closed(CloseReason::Shutdown.as_str());
            }
        }

        live.len()
    }

    /// Transcript captured for one session
    pub async fn transcript(&self, index: usize) -> Option<String> {
        self.get(index).await.map(|slot| slot.output.transcript())
    }

    /// Transcripts of every session, concatenated in arrival order
    pub async fn transcript_all(&self) -> String {
        self.slots
            .read()
            .await
            .iter()
            .map(|slot| slot.output.transcript())
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }
}

/// Shared session registry type
pub type SharedSessionRegistry = Arc<SessionRegistry>;
