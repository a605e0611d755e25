use anyhow::Result;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::info;

use revlistd::bootstrap::Server;
use revlistd::config::{Config, ListenerMode};
use revlistd::telemetry::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "revlistd")]
#[command(author, version, about = "Reverse-connection listener for remote shells")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    address: Option<IpAddr>,

    /// Bind port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Keep sessions open across commands instead of one round-trip
    #[arg(long)]
    continuous: bool,

    /// Park connections and send this file to the first one
    #[arg(long, value_name = "FILE")]
    stage: Option<String>,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(address) = args.address {
        config.listener.address = address;
    }
    if let Some(port) = args.port {
        config.listener.port = port;
    }
    if args.continuous {
        config.listener.once = false;
    }
    if let Some(payload) = args.stage {
        config.listener.mode = ListenerMode::Stage;
        config.commands.payload = Some(payload);
    }
    config.validate()?;

    init_tracing(&TracingConfig {
        service_name: "revlistd".to_string(),
        log_level: config.settings.log_level.clone(),
        json_logs: config.settings.json_logs,
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %config.listener.bind_addr(),
        mode = ?config.listener.mode,
        once = config.listener.once,
        "starting revlistd"
    );

    // Validate only mode
    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    Server::new(config).run().await
}
