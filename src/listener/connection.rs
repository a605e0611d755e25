//! Accepted connection handle.

use std::fmt;
use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::debug;

/// One accepted TCP connection.
///
/// The stream is either taken by an interactive session or stays parked here
/// for payload injection. Force-closing drops a parked stream and signals the
/// owning session through the close channel.
pub struct Connection {
    /// Arrival index
    index: usize,

    /// Peer address
    peer_addr: SocketAddr,

    /// Underlying stream (taken by session)
    stream: Mutex<Option<TcpStream>>,

    /// Close signal
    close_tx: watch::Sender<bool>,
}

impl Connection {
    /// Create a new connection.
    pub fn new(index: usize, peer_addr: SocketAddr, stream: TcpStream) -> Self {
        let (close_tx, _) = watch::channel(false);

        Self {
            index,
            peer_addr,
            stream: Mutex::new(Some(stream)),
            close_tx,
        }
    }

    /// Get arrival index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Get peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Take the underlying stream (for session to use).
    pub async fn take_stream(&self) -> Option<TcpStream> {
        self.stream.lock().await.take()
    }

    /// Lock the parked stream, if still present.
    pub async fn lock_stream(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.stream.lock().await
    }

    /// Receiver that flips to `true` when the connection is force-closed.
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    /// Check if connection is closing.
    pub fn is_closing(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// Force-close the connection.
    ///
    /// Returns true if a parked stream was dropped here, false if a session
    /// owns the stream or it is already gone.
    pub async fn initiate_close(&self) -> bool {
        self.close_tx.send_replace(true);

        let dropped = self.stream.lock().await.take().is_some();
        if dropped {
            debug!(index = self.index, peer = %self.peer_addr, "parked stream dropped");
        }
        dropped
    }
}

/// Resolve once `rx` reports a force-close, or its connection is gone.
pub(crate) async fn closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closing| *closing).await;
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("index", &self.index)
            .field("peer_addr", &self.peer_addr)
            .field("closing", &self.is_closing())
            .finish()
    }
}
