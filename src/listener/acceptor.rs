//! TCP acceptor for incoming agent connections.
//!
//! Binds at construction, accepts on a dedicated task once started, and
//! spawns one session task per connection in interactive mode.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::bootstrap::{cancelled, Event, EventBus, SharedBus, Shutdown, ShutdownState};
use crate::config::{ListenerConfig, ListenerMode};
use crate::telemetry::counters;

use super::connection::closed;
use super::hooks::ListenerHooks;
use super::registry::{SessionRegistry, SessionSlot, SharedSessionRegistry};
use super::session::{Session, SessionContext};
use super::source::{CommandSourceFactory, PromptCommands};

/// Listener error types.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("listener already started")]
    AlreadyStarted,

    #[error("listener is not running")]
    NotRunning,

    #[error("no session at index {index} ({count} registered)")]
    UnknownSession { index: usize, count: usize },

    #[error("session {index} has no parked connection")]
    SessionUnavailable { index: usize },

    #[error("session {index} was force-closed during injection")]
    Interrupted { index: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result of a single-target payload send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    /// No connection has ever been accepted; nothing was touched
    NoSessions,
    /// Payload written once
    Sent { index: usize, bytes: usize },
}

type TaskList = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Listener for reverse connections.
pub struct Listener {
    /// Listener configuration
    config: Arc<ListenerConfig>,

    /// Bound address (resolved port)
    local_addr: SocketAddr,

    /// Bound socket, moved into the accept task by `start`
    socket: Mutex<Option<TcpListener>>,

    /// Session registry
    registry: SharedSessionRegistry,

    /// Shutdown handle
    shutdown: Arc<Shutdown>,

    /// Lifecycle events
    bus: SharedBus,

    /// Operator callbacks
    hooks: ListenerHooks,

    /// Per-session command sources
    commands: CommandSourceFactory,

    /// Accept task
    accept_task: Mutex<Option<JoinHandle<()>>>,

    /// Session tasks
    session_tasks: TaskList,
}

impl Listener {
    /// Bind the listening socket.
    ///
    /// Sessions pull commands from an interactive stdin prompt unless
    /// `commands` is given.
    pub async fn bind(
        config: ListenerConfig,
        hooks: ListenerHooks,
        commands: Option<CommandSourceFactory>,
    ) -> Result<Self, ListenerError> {
        let address = config.bind_addr();
        let socket = TcpListener::bind(address)
            .await
            .map_err(|source| ListenerError::Bind { address, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| ListenerError::Bind { address, source })?;

        debug!(address = %local_addr, mode = ?config.mode, "listener bound");

        Ok(Self {
            config: Arc::new(config),
            local_addr,
            socket: Mutex::new(Some(socket)),
            registry: SessionRegistry::new(),
            shutdown: Shutdown::new(),
            bus: EventBus::new(256),
            hooks,
            commands: commands.unwrap_or_else(|| PromptCommands::factory("Enter command: ")),
            accept_task: Mutex::new(None),
            session_tasks: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Get bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get listener configuration.
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Get session registry.
    pub fn registry(&self) -> &SharedSessionRegistry {
        &self.registry
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Check if the accept loop should be running.
    pub fn is_running(&self) -> bool {
        self.shutdown.is_running()
    }

    /// Start the accept loop.
    pub fn start(&self) -> Result<(), ListenerError> {
        let socket = lock(&self.socket)
            .take()
            .ok_or(ListenerError::AlreadyStarted)?;

        if !self.shutdown.is_running() {
            return Err(ListenerError::NotRunning);
        }

        let accept = AcceptLoop {
            socket,
            config: self.config.clone(),
            registry: self.registry.clone(),
            shutdown: self.shutdown.subscribe(),
            bus: self.bus.clone(),
            hooks: self.hooks.clone(),
            commands: self.commands.clone(),
            session_tasks: self.session_tasks.clone(),
        };

        info!(
            address = %self.local_addr,
            mode = ?self.config.mode,
            once = self.config.once,
            "listener started"
        );
        self.bus.publish(Event::ListenerStarted {
            address: self.local_addr,
        });

        let handle = tokio::spawn(accept.run());
        *lock(&self.accept_task) = Some(handle);
        Ok(())
    }

    /// Stop accepting, force-close every connection, and wait for every
    /// spawned task.
    pub async fn stop(&self) {
        self.shutdown.start_drain();

        let closed = self.registry.close_all().await;
        if closed > 0 {
            info!(count = closed, "force-closing connections");
        }

        let accept = lock(&self.accept_task).take();
        if let Some(handle) = accept {
            if let Err(e) = handle.await {
                error!(error = %e, "accept task failed");
            }
        }

        // accept loop is gone, nothing appends anymore; catch any connection
        // registered while it was winding down
        self.registry.close_all().await;

        let sessions: Vec<JoinHandle<()>> = lock(&self.session_tasks).drain(..).collect();
        for handle in sessions {
            if let Err(e) = handle.await {
                error!(error = %e, "session task failed");
            }
        }

        // never started: release the socket too
        lock(&self.socket).take();

        self.shutdown.terminate();
        self.bus.publish(Event::ListenerStopped);
        info!(address = %self.local_addr, "listener stopped");
    }

    /// Send one payload to the connection accepted `index`-th.
    ///
    /// Drains stray buffered bytes first (best effort), writes the payload
    /// once and leaves the connection parked until `stop`. A force-close
    /// (`stop`) abandons a write the agent is not reading.
    pub async fn inject(&self, payload: &[u8], index: usize) -> Result<InjectOutcome, ListenerError> {
        let count = self.registry.count().await;
        if count == 0 {
            info!("no clients have connected yet");
            return Ok(InjectOutcome::NoSessions);
        }

        if !self.shutdown.is_running() {
            return Err(ListenerError::NotRunning);
        }

        let slot = self
            .registry
            .get(index)
            .await
            .ok_or(ListenerError::UnknownSession { index, count })?;

        let mut close = slot.connection().close_signal();
        let mut guard = slot.connection().lock_stream().await;
        let stream = guard
            .as_mut()
            .ok_or(ListenerError::SessionUnavailable { index })?;

        // the stream lock is held throughout; stop() waits on it
        let sent = tokio::select! {
            biased;

            _ = closed(&mut close) => None,
            result = async {
                flush_stray(stream, &self.config).await;
                stream.write_all(payload).await?;
                stream.flush().await
            } => Some(result),
        };
        drop(guard);

        counters::inject_attempt(matches!(sent, Some(Ok(()))));
        let Some(result) = sent else {
            warn!(index, "injection interrupted by force-close");
            return Err(ListenerError::Interrupted { index });
        };
        result?;

        info!(index, peer = %slot.peer_addr(), bytes = payload.len(), "payload injected");
        self.bus.publish(Event::PayloadInjected {
            index,
            bytes: payload.len(),
        });

        Ok(InjectOutcome::Sent {
            index,
            bytes: payload.len(),
        })
    }

    /// Transcript captured for one session.
    pub async fn transcript(&self, index: usize) -> Option<String> {
        self.registry.transcript(index).await
    }

    /// Transcripts of every session, in arrival order.
    pub async fn transcript_all(&self) -> String {
        self.registry.transcript_all().await
    }

    /// Number of sessions ever accepted.
    pub async fn session_count(&self) -> usize {
        self.registry.count().await
    }

    /// Number of sessions not yet closed.
    pub async fn live_sessions(&self) -> usize {
        self.registry.live_count().await
    }
}

/// Accept task state.
struct AcceptLoop {
    socket: TcpListener,
    config: Arc<ListenerConfig>,
    registry: SharedSessionRegistry,
    shutdown: watch::Receiver<ShutdownState>,
    bus: SharedBus,
    hooks: ListenerHooks,
    commands: CommandSourceFactory,
    session_tasks: TaskList,
}

impl AcceptLoop {
    async fn run(mut self) {
        let accept_timeout = self.config.accept_timeout;

        loop {
            let accepted = tokio::select! {
                biased;

                _ = cancelled(&mut self.shutdown) => {
                    debug!("accept loop shutting down");
                    break;
                }

                result = timeout(accept_timeout, self.socket.accept()) => result,
            };

            match accepted {
                // poll tick, not an error
                Err(_) => continue,
                Ok(Ok((stream, peer_addr))) => self.handle_accept(stream, peer_addr).await,
                Ok(Err(e)) => {
                    error!(error = %e, "accept error");
                    counters::accept_error();
                }
            }
        }
    }

    /// Handle an accepted connection.
    async fn handle_accept(&self, stream: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = configure_socket(&stream) {
            warn!(peer = %peer_addr, error = %e, "socket configuration failed");
        }

        let slot = self.registry.register(peer_addr, stream).await;
        let index = slot.index();

        info!(index, peer = %peer_addr, "connection accepted");
        counters::session_opened();
        self.bus.publish(Event::SessionOpened {
            index,
            peer: peer_addr,
        });
        self.hooks.connected(peer_addr);

        match self.config.mode {
            ListenerMode::Stage => debug!(index, "connection parked for injection"),
            ListenerMode::Interactive => self.spawn_session(slot).await,
        }
    }

    /// Spawn the session task for a registered slot.
    async fn spawn_session(&self, slot: Arc<SessionSlot>) {
        let index = slot.index();
        let peer = slot.peer_addr();

        let Some(stream) = slot.connection().take_stream().await else {
            warn!(index, "connection closed before session start");
            return;
        };

        let ctx = SessionContext {
            index,
            peer,
            config: self.config.clone(),
            output: slot.output().clone(),
            hooks: self.hooks.clone(),
            bus: self.bus.clone(),
            shutdown: self.shutdown.clone(),
            close: slot.connection().close_signal(),
        };
        let source = (self.commands)(index, peer);

        let registry = self.registry.clone();
        let bus = self.bus.clone();
        let span = info_span!("session", index, peer = %peer);

        let handle = tokio::spawn(
            async move {
                let mut session = Session::new(ctx, stream, source);
                let reason = session.run().await;
                drop(session);

                registry.unregister(index).await;
                bus.publish(Event::SessionClosed {
                    index,
                    peer,
                    reason,
                });
                counters::session_closed(reason.as_str());

                info!(%reason, "connection closed");
            }
            .instrument(span),
        );

        let mut tasks = lock(&self.session_tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
        trace!(tasks = tasks.len(), "session task spawned");
    }
}

/// Best-effort receive to discard bytes the agent sent before the payload.
async fn flush_stray(stream: &mut TcpStream, config: &ListenerConfig) {
    let mut scratch = vec![0u8; config.recv_buffer];

    match timeout(config.recv_timeout, stream.read(&mut scratch)).await {
        Ok(Ok(n)) => debug!(discarded = n, "stray bytes flushed"),
        Ok(Err(e)) => debug!(error = %e, "flush receive failed"),
        Err(_) => trace!("nothing to flush"),
    }
}

/// Configure TCP socket options.
fn configure_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
