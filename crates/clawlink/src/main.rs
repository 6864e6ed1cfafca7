//! clawlink - realtime connection CLI
//!
//! Connects to a realtime endpoint, keeps the link alive and logs every
//! session update the server pushes.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use claw_realtime::{
    BroadcastBus, ConnectionEvent, ConnectionManager, ManagerConfig, SessionEventKind,
    WebSocketTransport,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "clawlink")]
#[command(about = "Clawbernetes realtime connection client")]
#[command(version)]
struct Cli {
    /// Log as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and log session updates until interrupted
    Connect {
        /// Realtime endpoint (ws:// or wss://)
        #[arg(long, env = "CLAWLINK_URL")]
        url: Option<String>,

        /// Path to a JSON config file
        #[arg(short, long, env = "CLAWLINK_CONFIG")]
        config: Option<PathBuf>,

        /// Give up after this many consecutive failures
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Backoff base delay in milliseconds
        #[arg(long)]
        base_delay_ms: Option<u64>,

        /// Backoff ceiling in milliseconds
        #[arg(long)]
        max_delay_ms: Option<u64>,

        /// Heartbeat interval in milliseconds
        #[arg(long)]
        heartbeat_ms: Option<u64>,
    },

    /// List session update tags and the channels they are published on
    Channels,

    /// Print a sample config file
    InitConfig {
        /// Realtime endpoint
        #[arg(long, default_value = "wss://localhost:18790/realtime")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json)?;

    match cli.command {
        Commands::Connect {
            url,
            config,
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            heartbeat_ms,
        } => {
            let mut config = match (config, url) {
                (Some(path), url) => {
                    let mut config = ManagerConfig::from_file(&path)?;
                    if let Some(url) = url {
                        config.url = url;
                    }
                    config
                }
                (None, Some(url)) => ManagerConfig::new(url),
                (None, None) => anyhow::bail!("either --url or --config is required"),
            };

            if let Some(attempts) = max_attempts {
                config.reconnect.max_attempts = attempts;
            }
            if let Some(ms) = base_delay_ms {
                config.reconnect.base_delay_ms = ms;
            }
            if let Some(ms) = max_delay_ms {
                config.reconnect.max_delay_ms = ms;
            }
            if let Some(ms) = heartbeat_ms {
                config.heartbeat_interval_ms = ms;
            }
            config.validate()?;

            connect(config).await?;
        }

        Commands::Channels => channels(),

        Commands::InitConfig { url } => {
            let config = ManagerConfig::new(url);
            config.validate()?;
            println!("{}", config.to_json()?);
        }
    }

    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("claw_realtime=info,clawlink=info"))?;

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}

async fn connect(config: ManagerConfig) -> anyhow::Result<()> {
    info!(
        url = %config.url,
        max_attempts = config.reconnect.max_attempts,
        heartbeat_ms = config.heartbeat_interval_ms,
        "starting clawlink"
    );

    let bus = Arc::new(BroadcastBus::new());
    for kind in SessionEventKind::ALL {
        let mut subscription = bus.on(kind.channel());
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let payload = serde_json::Value::Object(event.payload);
                info!(
                    channel = subscription.channel(),
                    session_id = %event.session_id,
                    %payload,
                    "session update"
                );
            }
        });
    }

    let manager = ConnectionManager::start(config, WebSocketTransport::new(), bus);
    tokio::spawn(log_events(manager.subscribe()));

    tokio::select! {
        outcome = manager.connect() => match outcome {
            Ok(true) => info!("connected"),
            Ok(false) => warn!("connect returned without a link"),
            Err(e) => {
                error!(error = %e, "giving up");
                manager.shutdown().await;
                anyhow::bail!(e);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            manager.shutdown().await;
            return Ok(());
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    manager.shutdown().await;
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<ConnectionEvent>) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::StateChanged { from, to }) => {
                info!(%from, %to, "connection state changed");
            }
            Ok(ConnectionEvent::ReconnectScheduled { attempt, delay }) => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            }
            Ok(ConnectionEvent::ReconnectFailed { attempts }) => {
                error!(attempts, "reconnect attempts exhausted");
            }
            Ok(ConnectionEvent::HeartbeatSent { at }) => {
                tracing::debug!(%at, "heartbeat");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "connection event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn channels() {
    println!("Session update channels:");
    println!();
    for kind in SessionEventKind::ALL {
        println!("  {:<20} {}", kind.as_str(), kind.channel());
    }
}
