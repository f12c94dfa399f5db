//! # presence
//!
//! Presence server and interactive client binary.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use presence_client::{ClientConfig, ClientEvent, ClientEventKind, SubscriptionClient};
use presence_server::{ServerConfig, SubscribeServer};
use presence_settings::{ClientSettings, PresenceSettings, ServerSettings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for the listener to stop.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Presence subscription server and client.
#[derive(Parser, Debug)]
#[command(name = "presence", about = "Presence subscription server and client")]
struct Cli {
    /// Settings file (default `~/.presence/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the subscription server.
    Server {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
        /// Heartbeat period in milliseconds; 0 disables heartbeating.
        #[arg(long)]
        heartbeat_interval: Option<i64>,
        /// Subscribe delay in milliseconds.
        #[arg(long)]
        subscribe_delay: Option<u64>,
        /// Unsubscribe delay in milliseconds.
        #[arg(long)]
        unsubscribe_delay: Option<u64>,
    },
    /// Run the interactive client: `s` subscribe, `u` unsubscribe, `c` count, `q` quit.
    Client {
        /// WebSocket URL of the server.
        #[arg(long)]
        server_address: Option<String>,
        /// Do not log heartbeat messages.
        #[arg(long)]
        silence_heartbeat: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// One keystroke of the interactive client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClientCommand {
    Subscribe,
    Unsubscribe,
    Count,
    Quit,
}

/// Every recognised letter on `line`, in order, case-insensitively.
/// Other characters are ignored.
fn parse_commands(line: &str) -> Vec<ClientCommand> {
    line.trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            's' => Some(ClientCommand::Subscribe),
            'u' => Some(ClientCommand::Unsubscribe),
            'c' => Some(ClientCommand::Count),
            'q' => Some(ClientCommand::Quit),
            _ => None,
        })
        .collect()
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<PresenceSettings> {
    let path = path.cloned().unwrap_or_else(presence_settings::settings_path);
    presence_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn server_config(settings: &ServerSettings) -> ServerConfig {
    ServerConfig {
        host: settings.host.clone(),
        heartbeat_interval_ms: settings.heartbeat_interval_ms,
        subscribe_delay_ms: settings.subscribe_delay_ms,
        unsubscribe_delay_ms: settings.unsubscribe_delay_ms,
        ..ServerConfig::default()
    }
}

fn client_config(settings: &ClientSettings) -> ClientConfig {
    ClientConfig {
        server_address: settings.server_address.clone(),
        silence_heartbeat: settings.silence_heartbeat,
        ..ClientConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(args.log_format);
    let mut settings = load_settings(args.settings.as_ref())?;

    match args.command {
        Command::Server {
            host,
            port,
            heartbeat_interval,
            subscribe_delay,
            unsubscribe_delay,
        } => {
            let server = &mut settings.server;
            if let Some(host) = host {
                server.host = host;
            }
            if let Some(port) = port {
                server.port = port;
            }
            if let Some(ms) = heartbeat_interval {
                server.heartbeat_interval_ms = ms;
            }
            if let Some(ms) = subscribe_delay {
                server.subscribe_delay_ms = ms;
            }
            if let Some(ms) = unsubscribe_delay {
                server.unsubscribe_delay_ms = ms;
            }
            run_server(&settings.server).await
        }
        Command::Client {
            server_address,
            silence_heartbeat,
        } => {
            if let Some(address) = server_address {
                settings.client.server_address = address;
            }
            settings.client.silence_heartbeat |= silence_heartbeat;
            run_client(&settings.client).await
        }
    }
}

async fn run_server(settings: &ServerSettings) -> Result<()> {
    let server = SubscribeServer::new(server_config(settings));
    let addr = server
        .listen(settings.port)
        .await
        .context("Failed to bind server")?;
    tracing::info!("Presence server listening on ws://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.graceful_shutdown();
    if !server.drain(DRAIN_TIMEOUT).await {
        tracing::warn!("listener did not stop within {DRAIN_TIMEOUT:?}");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_client(settings: &ClientSettings) -> Result<()> {
    let client = SubscriptionClient::new(client_config(settings));
    client.on(ClientEventKind::Subscribed, |event| println!("{event:?}"));
    client.on(ClientEventKind::Unsubscribed, |event| println!("{event:?}"));
    client.on(ClientEventKind::Count, |event| println!("{event:?}"));
    client.on(ClientEventKind::ProtocolError, |event| println!("{event:?}"));

    let mut events = client.events();
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", settings.server_address))?;
    println!("Connected. Commands: s = subscribe, u = unsubscribe, c = count, q = quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else { break };
                let mut quit = false;
                for command in parse_commands(&line) {
                    let sent = match command {
                        ClientCommand::Subscribe => client.subscribe(),
                        ClientCommand::Unsubscribe => client.unsubscribe(),
                        ClientCommand::Count => client.subscribers_count(),
                        ClientCommand::Quit => {
                            quit = true;
                            break;
                        }
                    };
                    if let Err(e) = sent {
                        tracing::warn!(error = %e, "command not sent");
                    }
                }
                if quit {
                    break;
                }
            }
            event = events.recv() => {
                if let Ok(ClientEvent::Close { code, reason }) = event {
                    println!("Connection closed ({code}) {reason}");
                    return Ok(());
                }
            }
        }
    }

    if client.close().is_ok() {
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            while let Ok(event) = events.recv().await {
                if matches!(event, ClientEvent::Close { .. }) {
                    break;
                }
            }
        })
        .await;
    }
    Ok(())
}
