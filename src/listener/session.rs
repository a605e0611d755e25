//! Interactive session state machine.
//!
//! One session drives one accepted connection: pull a command, send it as a
//! line, then drain whatever the peer sends back until the turn looks over.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

use crate::bootstrap::{cancelled, Event, SharedBus, ShutdownState};
use crate::config::ListenerConfig;
use crate::output::{decode_chunk, sanitize, CapturedOutput, DecodeError};
use crate::telemetry::counters;

use super::connection::closed;
use super::hooks::ListenerHooks;
use super::source::CommandSource;

/// Session error types.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl SessionError {
    fn close_reason(&self) -> CloseReason {
        match self {
            SessionError::Io(_) => CloseReason::Io,
            SessionError::Decode(_) => CloseReason::Decode,
        }
    }
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting on the command source
    AwaitingCommand,
    /// Writing the command line
    Sending,
    /// First receive of the turn
    AwaitingResponse,
    /// Draining the rest of the turn
    Processing,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::AwaitingCommand => write!(f, "AWAITING_COMMAND"),
            SessionState::Sending => write!(f, "SENDING"),
            SessionState::AwaitingResponse => write!(f, "AWAITING_RESPONSE"),
            SessionState::Processing => write!(f, "PROCESSING"),
            SessionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Why a session reached `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Single-cycle session finished its turn
    Once,
    /// Peer closed the connection
    PeerClosed,
    /// Command source returned no more commands
    SourceExhausted,
    /// Listener stopped or the connection was force-closed
    Shutdown,
    /// Unrecoverable I/O error
    Io,
    /// Response bytes were not valid text
    Decode,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Once => "once",
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::SourceExhausted => "source_exhausted",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Io => "io",
            CloseReason::Decode => "decode",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a session needs from its listener.
pub struct SessionContext {
    /// Arrival index
    pub index: usize,
    /// Peer address
    pub peer: SocketAddr,
    /// Listener configuration
    pub config: Arc<ListenerConfig>,
    /// Transcript sink
    pub output: CapturedOutput,
    /// Operator callbacks
    pub hooks: ListenerHooks,
    /// Lifecycle events
    pub bus: SharedBus,
    /// Listener-wide cancellation
    pub shutdown: watch::Receiver<ShutdownState>,
    /// Per-connection force-close
    pub close: watch::Receiver<bool>,
}

/// Outcome of one bounded receive.
enum Receive {
    Data(Vec<u8>),
    Timeout,
    Closed,
    Aborted,
    Failed(io::Error),
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnEnd {
    Idle,
    Repeated,
    Sentinel,
    PeerClosed,
    Aborted,
    Failed,
}

/// Command/response session over any byte stream.
pub struct Session<S> {
    ctx: SessionContext,
    stream: S,
    source: Box<dyn CommandSource>,
    state: SessionState,
    turns: u64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(ctx: SessionContext, stream: S, source: Box<dyn CommandSource>) -> Self {
        Self {
            ctx,
            stream,
            source,
            state: SessionState::AwaitingCommand,
            turns: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Completed command/response cycles.
    pub fn turns(&self) -> u64 {
        self.turns
    }

    pub fn output(&self) -> &CapturedOutput {
        &self.ctx.output
    }

    /// Run the session until it closes.
    ///
    /// Errors close only this session; they are reported through the error
    /// hook and folded into the returned reason.
    pub async fn run(&mut self) -> CloseReason {
        let reason = match self.run_loop().await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(error = %e, "session ended with error");
                self.ctx.hooks.error(self.ctx.index, &e);
                e.close_reason()
            }
        };

        if let Err(e) = self.stream.shutdown().await {
            trace!(error = %e, "stream shutdown failed");
        }
        self.set_state(SessionState::Closed);

        reason
    }

    /// Main session loop.
    async fn run_loop(&mut self) -> Result<CloseReason, SessionError> {
        let mut buf = vec![0u8; self.ctx.config.recv_buffer];

        loop {
            self.set_state(SessionState::AwaitingCommand);

            let command = tokio::select! {
                biased;

                _ = cancelled(&mut self.ctx.shutdown) => return Ok(CloseReason::Shutdown),
                _ = closed(&mut self.ctx.close) => return Ok(CloseReason::Shutdown),
                command = self.source.next_command() => command,
            };

            let Some(command) = command else {
                debug!("command source exhausted");
                return Ok(CloseReason::SourceExhausted);
            };

            self.set_state(SessionState::Sending);
            tokio::select! {
                biased;

                _ = closed(&mut self.ctx.close) => return Ok(CloseReason::Shutdown),
                result = send_line(&mut self.stream, &command) => result?,
            }
            trace!(command = %command, "command sent");

            self.set_state(SessionState::AwaitingResponse);
            let first = match self.receive(&mut buf).await {
                Receive::Data(chunk) => chunk,
                Receive::Timeout => {
                    trace!("no reply yet");
                    continue;
                }
                Receive::Closed => {
                    debug!("connection closed by peer");
                    return Ok(CloseReason::PeerClosed);
                }
                Receive::Aborted => return Ok(CloseReason::Shutdown),
                Receive::Failed(e) => return Err(e.into()),
            };

            self.set_state(SessionState::Processing);
            let (raw, end) = self.drain(first, &mut buf).await?;

            self.turns += 1;
            let bytes: usize = raw.iter().map(Vec::len).sum();
            debug!(
                turn = self.turns,
                chunks = raw.len(),
                bytes,
                end = ?end,
                "turn drained"
            );
            counters::turn_completed(self.ctx.config.termination.as_str());
            self.ctx.bus.publish(Event::TurnCompleted {
                index: self.ctx.index,
                chunks: raw.len(),
                bytes,
            });
            self.ctx.hooks.response(self.ctx.index, &raw);

            match end {
                TurnEnd::PeerClosed => return Ok(CloseReason::PeerClosed),
                TurnEnd::Aborted => return Ok(CloseReason::Shutdown),
                _ => {}
            }

            if self.ctx.config.once {
                return Ok(CloseReason::Once);
            }

            let delay = self.ctx.config.turn_delay;
            tokio::select! {
                biased;

                _ = cancelled(&mut self.ctx.shutdown) => return Ok(CloseReason::Shutdown),
                _ = closed(&mut self.ctx.close) => return Ok(CloseReason::Shutdown),
                _ = sleep(delay) => {}
            }
        }
    }

    /// Capture the first chunk and keep receiving until the turn ends.
    ///
    /// A chunk that ends the turn by repetition is neither captured nor
    /// returned.
    async fn drain(
        &mut self,
        first: Vec<u8>,
        buf: &mut [u8],
    ) -> Result<(Vec<Vec<u8>>, TurnEnd), SessionError> {
        let mut raw: Vec<Vec<u8>> = Vec::new();
        let mut turn_output = String::new();
        let mut chunk = first;

        let end = loop {
            let text = sanitize(&decode_chunk(&chunk, self.ctx.config.decode)?);
            counters::bytes_received(chunk.len());
            let appended = text.len();
            turn_output.push_str(&text);
            self.ctx.output.push(text);
            raw.push(chunk);

            if self.ctx.config.termination.reached(&turn_output, appended) {
                break TurnEnd::Sentinel;
            }

            match self.receive(buf).await {
                Receive::Data(next) => {
                    let repeated = raw
                        .last()
                        .is_some_and(|prev| self.ctx.config.termination.repeats(prev, &next));
                    if repeated {
                        break TurnEnd::Repeated;
                    }
                    chunk = next;
                }
                Receive::Timeout => break TurnEnd::Idle,
                Receive::Closed => break TurnEnd::PeerClosed,
                Receive::Aborted => break TurnEnd::Aborted,
                Receive::Failed(e) => {
                    warn!(error = %e, "receive failed while draining");
                    break TurnEnd::Failed;
                }
            }
        };

        Ok((raw, end))
    }

    /// One receive bounded by the configured timeout.
    async fn receive(&mut self, buf: &mut [u8]) -> Receive {
        let recv_timeout = self.ctx.config.recv_timeout;

        tokio::select! {
            biased;

            _ = closed(&mut self.ctx.close) => Receive::Aborted,
            result = timeout(recv_timeout, self.stream.read(buf)) => match result {
                Err(_) => Receive::Timeout,
                Ok(Ok(0)) => Receive::Closed,
                Ok(Ok(n)) => Receive::Data(buf[..n].to_vec()),
                Ok(Err(e)) => Receive::Failed(e),
            },
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            trace!(from = %self.state, to = %state, "state transition");
            self.state = state;
        }
    }
}

/// Write a command followed by a newline, in full.
async fn send_line<S>(stream: &mut S, command: &str) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut line = Vec::with_capacity(command.len() + 1);
    line.extend_from_slice(command.as_bytes());
    line.push(b'\n');

    stream.write_all(&line).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, ReadBuf};

    use crate::bootstrap::{EventBus, Shutdown};
    use crate::config::{DecodePolicy, TurnTermination};
    use crate::listener::source::{ChannelCommands, ScriptedCommands};

    type Turns = Arc<Mutex<Vec<Vec<Vec<u8>>>>>;

    struct Harness<S = DuplexStream> {
        session: Session<S>,
        client: DuplexStream,
        shutdown: Arc<Shutdown>,
        close_tx: watch::Sender<bool>,
        turns: Turns,
        errors: Arc<Mutex<Vec<String>>>,
    }

    fn config() -> ListenerConfig {
        ListenerConfig {
            recv_timeout: Duration::from_millis(100),
            turn_delay: Duration::from_millis(10),
            ..ListenerConfig::default()
        }
    }

    fn harness(config: ListenerConfig, source: impl CommandSource + 'static) -> Harness {
        harness_over(config, source, |server| server)
    }

    /// Harness whose session reads through `wrap(server side)`.
    fn harness_over<S, W>(
        config: ListenerConfig,
        source: impl CommandSource + 'static,
        wrap: W,
    ) -> Harness<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
        W: FnOnce(DuplexStream) -> S,
    {
        let (server, client) = tokio::io::duplex(1024);
        let shutdown = Shutdown::new();
        let (close_tx, close_rx) = watch::channel(false);
        let turns: Turns = Arc::default();
        let errors: Arc<Mutex<Vec<String>>> = Arc::default();

        let hooks = {
            let turns = turns.clone();
            let errors = errors.clone();
            ListenerHooks::new()
                .on_response(move |_, raw| turns.lock().unwrap().push(raw.to_vec()))
                .on_error(move |_, e| errors.lock().unwrap().push(e.to_string()))
        };

        let ctx = SessionContext {
            index: 0,
            peer: "127.0.0.1:40000".parse().unwrap(),
            config: Arc::new(config),
            output: CapturedOutput::new(),
            hooks,
            bus: EventBus::new(16),
            shutdown: shutdown.subscribe(),
            close: close_rx,
        };

        Harness {
            session: Session::new(ctx, wrap(server), Box::new(source)),
            client,
            shutdown,
            close_tx,
            turns,
            errors,
        }
    }

    /// Read one command line from the client side.
    async fn read_command(client: &mut DuplexStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            client.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                return String::from_utf8(line).unwrap();
            }
            line.push(byte[0]);
        }
    }

    async fn read_rest(client: &mut DuplexStream) -> Vec<u8> {
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        rest
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_duplicate_stops_drain() {
        let config = ListenerConfig {
            recv_buffer: 4,
            ..config()
        };
        let mut h = harness(config, ScriptedCommands::new(["cat"]));
        let mut client = h.client;
        let turns = h.turns;

        let peer = async move {
            assert_eq!(read_command(&mut client).await, "cat");
            client.write_all(b"abcdEFGHEFGHEFGH").await.unwrap();
            read_rest(&mut client).await
        };

        let (reason, rest) = tokio::join!(h.session.run(), peer);

        assert_eq!(reason, CloseReason::Once);
        assert!(rest.is_empty());
        assert_eq!(h.session.output().transcript(), "abcdEFGH");
        assert_eq!(
            *turns.lock().unwrap(),
            vec![vec![b"abcd".to_vec(), b"EFGH".to_vec()]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_strategy_keeps_repeats() {
        let config = ListenerConfig {
            recv_buffer: 4,
            termination: TurnTermination::IdleTimeout,
            ..config()
        };
        let mut h = harness(config, ScriptedCommands::new(["cat"]));
        let mut client = h.client;

        let peer = async move {
            read_command(&mut client).await;
            client.write_all(b"EFGHEFGH").await.unwrap();
            read_rest(&mut client).await
        };

        let (reason, _) = tokio::join!(h.session.run(), peer);

        assert_eq!(reason, CloseReason::Once);
        assert_eq!(h.session.output().transcript(), "EFGHEFGH");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentinel_ends_turn() {
        let config = ListenerConfig {
            recv_buffer: 4,
            termination: TurnTermination::Sentinel {
                marker: "__END__".into(),
            },
            ..config()
        };
        let mut h = harness(config, ScriptedCommands::new(["ls; echo __END__"]));
        let mut client = h.client;

        let peer = async move {
            read_command(&mut client).await;
            client.write_all(b"line__END__tail").await.unwrap();
            read_rest(&mut client).await
        };

        let (reason, _) = tokio::join!(h.session.run(), peer);

        assert_eq!(reason, CloseReason::Once);
        assert_eq!(h.session.output().transcript(), "line__END__t");
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_sends_single_command() {
        let mut h = harness(config(), ScriptedCommands::new(["id", "whoami"]));
        let mut client = h.client;

        let peer = async move {
            assert_eq!(read_command(&mut client).await, "id");
            client.write_all(b"uid=0(root)\n").await.unwrap();
            read_rest(&mut client).await
        };

        let (reason, rest) = tokio::join!(h.session.run(), peer);

        assert_eq!(reason, CloseReason::Once);
        assert!(rest.is_empty(), "second command must not be sent");
        assert_eq!(h.session.state(), SessionState::Closed);
        assert_eq!(h.session.turns(), 1);
        assert_eq!(h.session.output().transcript(), "uid=0(root)\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_until_source_exhausted() {
        let config = ListenerConfig {
            once: false,
            ..config()
        };
        let mut h = harness(config, ScriptedCommands::new(["a", "b"]));
        let client = h.client;
        let turns = h.turns;

        let peer = async move {
            let (read, mut write) = tokio::io::split(client);
            let mut lines = BufReader::new(read).lines();
            while let Some(line) = lines.next_line().await.unwrap() {
                write
                    .write_all(format!("got {line}\n").as_bytes())
                    .await
                    .unwrap();
            }
        };

        let (reason, _) = tokio::join!(h.session.run(), peer);

        assert_eq!(reason, CloseReason::SourceExhausted);
        assert_eq!(h.session.turns(), 2);
        assert_eq!(h.session.output().transcript(), "got a\ngot b\n");
        assert_eq!(h.session.output().fragments(), vec!["got a\n", "got b\n"]);
        assert_eq!(turns.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_to_awaiting_command() {
        let mut h = harness(config(), ScriptedCommands::new(["first", "second"]));
        let mut client = h.client;

        let peer = async move {
            assert_eq!(read_command(&mut client).await, "first");
            // no reply to the first command
            assert_eq!(read_command(&mut client).await, "second");
            client.write_all(b"ok").await.unwrap();
            read_rest(&mut client).await
        };

        let (reason, rest) = tokio::join!(h.session.run(), peer);

        assert_eq!(reason, CloseReason::Once);
        assert!(rest.is_empty());
        assert_eq!(h.session.turns(), 1);
        assert_eq!(h.session.output().transcript(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_close_ends_session() {
        let mut h = harness(config(), ScriptedCommands::new(["exit"]));
        let mut client = h.client;
        let turns = h.turns;

        let peer = async move {
            read_command(&mut client).await;
            drop(client);
        };

        let (reason, _) = tokio::join!(h.session.run(), peer);

        assert_eq!(reason, CloseReason::PeerClosed);
        assert!(turns.lock().unwrap().is_empty());
        assert!(h.session.output().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_is_sanitized_but_raw_kept() {
        let mut h = harness(config(), ScriptedCommands::new(["ls --color"]));
        let mut client = h.client;
        let turns = h.turns;

        let peer = async move {
            read_command(&mut client).await;
            client
                .write_all(b"\x1b]0;root@box\x07\x1b[01;34mbin\x1b[0m\n")
                .await
                .unwrap();
            read_rest(&mut client).await
        };

        let (reason, _) = tokio::join!(h.session.run(), peer);

        assert_eq!(reason, CloseReason::Once);
        assert_eq!(h.session.output().transcript(), "bin\n");
        assert_eq!(
            turns.lock().unwrap()[0],
            vec![b"\x1b]0;root@box\x07\x1b[01;34mbin\x1b[0m\n".to_vec()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_error_closes_session() {
        let mut h = harness(config(), ScriptedCommands::new(["cat /bin/sh"]));
        let mut client = h.client;
        let errors = h.errors;
        let turns = h.turns;

        let peer = async move {
            read_command(&mut client).await;
            client.write_all(b"\x7fELF\xff\xfe").await.unwrap();
            read_rest(&mut client).await
        };

        let (reason, _) = tokio::join!(h.session.run(), peer);

        assert_eq!(reason, CloseReason::Decode);
        assert_eq!(h.session.state(), SessionState::Closed);
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(errors.lock().unwrap()[0].contains("invalid UTF-8"));
        assert!(turns.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lossy_decode_keeps_session() {
        let config = ListenerConfig {
            decode: DecodePolicy::Lossy,
            ..config()
        };
        let mut h = harness(config, ScriptedCommands::new(["cat"]));
        let mut client = h.client;
        let errors = h.errors;

        let peer = async move {
            read_command(&mut client).await;
            client.write_all(b"ok\xff").await.unwrap();
            read_rest(&mut client).await
        };

        let (reason, _) = tokio::join!(h.session.run(), peer);

        assert_eq!(reason, CloseReason::Once);
        assert!(errors.lock().unwrap().is_empty());
        assert_eq!(h.session.output().transcript(), "ok\u{fffd}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_command_wait() {
        let (tx, source) = ChannelCommands::channel(1);
        let mut h = harness(config(), source);
        let shutdown = h.shutdown.clone();

        let stopper = async move {
            sleep(Duration::from_secs(5)).await;
            shutdown.start_drain();
        };

        let (reason, _) = tokio::join!(h.session.run(), stopper);

        assert_eq!(reason, CloseReason::Shutdown);
        assert_eq!(h.session.state(), SessionState::Closed);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_close_interrupts_receive() {
        let config = ListenerConfig {
            recv_timeout: Duration::from_secs(60),
            ..config()
        };
        let mut h = harness(config, ScriptedCommands::new(["sleep 600"]));
        let mut client = h.client;
        let close_tx = h.close_tx;

        let peer = async move {
            read_command(&mut client).await;
            sleep(Duration::from_millis(10)).await;
            close_tx.send_replace(true);
            read_rest(&mut client).await
        };

        let started = tokio::time::Instant::now();
        let (reason, _) = tokio::join!(h.session.run(), peer);

        assert_eq!(reason, CloseReason::Shutdown);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    /// Stream whose `fail_on`-th data read is replaced by a reset error.
    struct FlakyRead {
        inner: DuplexStream,
        reads: usize,
        fail_on: usize,
    }

    impl AsyncRead for FlakyRead {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            let before = buf.filled().len();

            match Pin::new(&mut this.inner).poll_read(cx, buf) {
                Poll::Ready(Ok(())) if buf.filled().len() > before => {
                    this.reads += 1;
                    if this.reads == this.fail_on {
                        buf.set_filled(before);
                        return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()));
                    }
                    Poll::Ready(Ok(()))
                }
                other => other,
            }
        }
    }

    impl AsyncWrite for FlakyRead {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_flush(cx)
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_error_while_draining_ends_only_the_turn() {
        let config = ListenerConfig {
            once: false,
            ..config()
        };
        let mut h = harness_over(config, ScriptedCommands::new(["a", "b"]), |inner| FlakyRead {
            inner,
            reads: 0,
            fail_on: 2,
        });
        let mut client = h.client;
        let turns = h.turns;
        let errors = h.errors;

        let peer = async move {
            assert_eq!(read_command(&mut client).await, "a");
            client.write_all(b"one").await.unwrap();
            sleep(Duration::from_millis(10)).await;
            // consumed by the failing read
            client.write_all(b"lost").await.unwrap();

            assert_eq!(read_command(&mut client).await, "b");
            client.write_all(b"two").await.unwrap();
            read_rest(&mut client).await
        };

        let (reason, _) = tokio::join!(h.session.run(), peer);

        assert_eq!(reason, CloseReason::SourceExhausted);
        assert_eq!(h.session.turns(), 2);
        assert_eq!(h.session.output().transcript(), "onetwo");
        assert_eq!(
            *turns.lock().unwrap(),
            vec![vec![b"one".to_vec()], vec![b"two".to_vec()]]
        );
        assert!(errors.lock().unwrap().is_empty());
    }
}
