use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, span, warn, Instrument, Level};

use crate::config::{CommandSourceKind, Config, ListenerMode};
use crate::listener::{InjectOutcome, Listener, ListenerHooks, ScriptedCommands};
use crate::output::sanitize;

use super::events::Event;

/// Main revlistd server
///
/// Runs one listener from configuration until SIGINT/SIGTERM, then stops it
/// and reports what was captured.
pub struct Server {
    /// Configuration
    config: Arc<Config>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Run the server until shutdown
    pub async fn run(self) -> Result<()> {
        let span = span!(Level::INFO, "revlistd", version = env!("CARGO_PKG_VERSION"));
        self.serve().instrument(span).await
    }

    async fn serve(self) -> Result<()> {
        let commands = match self.config.commands.source {
            CommandSourceKind::Prompt => None,
            CommandSourceKind::Script => {
                Some(ScriptedCommands::factory(self.config.commands.script.clone()))
            }
        };

        let listener = Listener::bind(self.config.listener.clone(), operator_hooks(), commands)
            .await
            .context("failed to start listener")?;

        let events = listener.subscribe();
        listener.start()?;

        match self.config.listener.mode {
            ListenerMode::Interactive => wait_for_shutdown().await,
            ListenerMode::Stage => {
                let payload = self.load_payload().await?;
                tokio::select! {
                    _ = wait_for_shutdown() => {}
                    result = stage_first(&listener, events, &payload) => {
                        match result {
                            Ok(outcome) => info!(?outcome, "stage sent"),
                            Err(e) => error!(error = %e, "stage failed"),
                        }
                        wait_for_shutdown().await;
                    }
                }
            }
        }

        info!("shutdown signal received, stopping listener");
        listener.stop().await;

        let transcript = listener.transcript_all().await;
        info!(
            sessions = listener.session_count().await,
            captured_bytes = transcript.len(),
            "revlistd stopped"
        );

        Ok(())
    }

    async fn load_payload(&self) -> Result<Vec<u8>> {
        let path = self
            .config
            .commands
            .payload
            .as_deref()
            .context("stage mode requires commands.payload")?;

        tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read payload file: {path}"))
    }
}

/// Hooks that echo session activity to the operator console.
fn operator_hooks() -> ListenerHooks {
    ListenerHooks::new()
        .on_connect(|peer| info!(peer = %peer, "agent connected"))
        .on_response(|index, raw| {
            let mut stdout = std::io::stdout().lock();
            for chunk in raw {
                let text = sanitize(&String::from_utf8_lossy(chunk));
                let _ = stdout.write_all(text.as_bytes());
            }
            let _ = stdout.flush();
            tracing::debug!(index, chunks = raw.len(), "response printed");
        })
        .on_error(|index, e| warn!(index, error = %e, "session failed"))
}

/// Wait for the first connection and send it the payload.
async fn stage_first(
    listener: &Listener,
    mut events: broadcast::Receiver<Event>,
    payload: &[u8],
) -> Result<InjectOutcome> {
    loop {
        match events.recv().await {
            Ok(Event::SessionOpened { index: 0, .. }) => break,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => {
                if listener.session_count().await > 0 {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                anyhow::bail!("listener event bus closed");
            }
        }
    }

    Ok(listener.inject(payload, 0).await?)
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("received SIGTERM");
        }
    }
}
