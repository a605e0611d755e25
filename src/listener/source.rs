//! Command sources for interactive sessions.

use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Supplies the next command for a session.
///
/// `None` means the source is exhausted and the session closes. Sessions race
/// this call against shutdown, so implementations may wait indefinitely.
#[async_trait]
pub trait CommandSource: Send {
    async fn next_command(&mut self) -> Option<String>;
}

/// Builds a command source for each accepted session (index, peer).
pub type CommandSourceFactory =
    Arc<dyn Fn(usize, SocketAddr) -> Box<dyn CommandSource> + Send + Sync>;

/// Fixed list of commands, replayed in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCommands {
    queue: VecDeque<String>,
}

impl ScriptedCommands {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: commands.into_iter().map(Into::into).collect(),
        }
    }

    /// Factory giving every session its own copy of the script.
    pub fn factory(commands: Vec<String>) -> CommandSourceFactory {
        Arc::new(move |_: usize, _: SocketAddr| -> Box<dyn CommandSource> {
            Box::new(ScriptedCommands::new(commands.clone()))
        })
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

#[async_trait]
impl CommandSource for ScriptedCommands {
    async fn next_command(&mut self) -> Option<String> {
        self.queue.pop_front()
    }
}

/// Commands pushed by a separate producer over a channel.
pub struct ChannelCommands {
    rx: mpsc::Receiver<String>,
}

impl ChannelCommands {
    /// Create a source and the sender that feeds it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl CommandSource for ChannelCommands {
    async fn next_command(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Pull-based callback.
pub struct FnCommands<F> {
    f: F,
}

impl<F> FnCommands<F>
where
    F: FnMut() -> Option<String> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> CommandSource for FnCommands<F>
where
    F: FnMut() -> Option<String> + Send,
{
    async fn next_command(&mut self) -> Option<String> {
        (self.f)()
    }
}

/// Interactive operator prompt on stdin.
///
/// A dedicated OS thread reads lines into a channel. It is never joined, so a
/// read blocked on the terminal does not hold up runtime shutdown. All
/// sessions share the one queue so buffered input is never split between
/// them.
#[derive(Clone)]
pub struct PromptCommands {
    prompt: String,
    lines: Arc<Mutex<ChannelCommands>>,
}

impl PromptCommands {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self::from_reader(prompt, io::BufReader::new(io::stdin()))
    }

    /// Prompt fed by any line reader instead of stdin.
    pub fn from_reader<R>(prompt: impl Into<String>, reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, lines) = ChannelCommands::channel(16);
        spawn_line_reader(reader, tx);

        Self {
            prompt: prompt.into(),
            lines: Arc::new(Mutex::new(lines)),
        }
    }

    /// Factory sharing one prompt across every session.
    pub fn factory(prompt: impl Into<String>) -> CommandSourceFactory {
        let shared = PromptCommands::new(prompt);
        Arc::new(move |_: usize, _: SocketAddr| -> Box<dyn CommandSource> {
            Box::new(shared.clone())
        })
    }
}

impl Default for PromptCommands {
    fn default() -> Self {
        Self::new("Enter command: ")
    }
}

#[async_trait]
impl CommandSource for PromptCommands {
    async fn next_command(&mut self) -> Option<String> {
        let mut lines = self.lines.lock().await;

        let mut stdout = tokio::io::stdout();
        if stdout.write_all(self.prompt.as_bytes()).await.is_ok() {
            let _ = stdout.flush().await;
        }

        lines.next_command().await
    }
}

/// Forward lines from `reader` until EOF, a read error, or every receiver is
/// gone.
fn spawn_line_reader<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: BufRead + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name("revlistd-prompt".into())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read command from stdin");
                        break;
                    }
                }
            }
        });

    // dropping tx leaves the prompt exhausted
    if let Err(e) = spawned {
        warn!(error = %e, "failed to start prompt reader");
    }
}
