use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use saylimit::agent::{ConsoleAgent, SourceAgent, TargetAgent};
use saylimit::config::AppConfig;
use saylimit::event::{DispatchOutcome, EventBus, EventHandler, SayEvent, DEFAULT_PRIORITY, SAY_EVENT};
use saylimit::ratelimit::RateLimiter;
use saylimit::store::{JsonFileStore, KeyValueStore, MemoryStore};

/// Rate limited chat over stdin. Each line is `source: message`.
#[derive(Parser, Debug)]
#[command(name = "saylimit", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

/// Answers every message that gets past the limiter.
struct EchoHandler;

#[async_trait]
impl EventHandler for EchoHandler {
    async fn handle(&self, event: &SayEvent) {
        let reply = format!("{} said: {}", event.source.id, event.message);
        if let Err(e) = event.target.say(&reply).await {
            warn!(error = %e, "Failed to reply");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    info!("Starting saylimit");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(args.config.as_deref())?;
    info!(
        max_messages = %config.rate_limit.max_messages,
        window_millis = %config.rate_limit.window_millis,
        "Configuration loaded"
    );

    let store: Arc<dyn KeyValueStore> = match &config.storage.path {
        Some(path) => {
            let store = JsonFileStore::open(path).await?;
            info!(path = %store.path().display(), "History is kept in a JSON file");
            Arc::new(store)
        }
        None => {
            info!("No storage path configured, history is kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let target: Arc<dyn TargetAgent> = Arc::new(ConsoleAgent::new(
        &config.agent.id,
        &config.agent.name,
        &config.agent.owner_id,
    ));

    let bus = EventBus::new();
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), store));
    limiter.install(&bus);
    bus.subscribe(SAY_EVENT, Arc::new(EchoHandler), DEFAULT_PRIORITY);
    info!("Rate limiter installed");

    tokio::select! {
        result = read_messages(&bus, target) => result?,
        _ = shutdown_signal() => {}
    }

    limiter.flush().await;
    info!("saylimit stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the conversation
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn read_messages(bus: &EventBus, target: Arc<dyn TargetAgent>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let Some((source, message)) = parse_line(&line) else {
            if !line.trim().is_empty() {
                warn!(line = %line, "Expected 'source: message'");
            }
            continue;
        };

        let event = SayEvent::new(SourceAgent::new(source), target.clone(), message);
        match bus.dispatch(&event).await {
            DispatchOutcome::Delivered { .. } => info!(source = %source, "Message delivered"),
            DispatchOutcome::Aborted { .. } => info!(source = %source, "Message suppressed"),
        }
    }

    info!("End of input");
    Ok(())
}

/// Split `source: message`. The source must not be empty.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let (source, message) = line.split_once(':')?;
    let source = source.trim();
    if source.is_empty() {
        return None;
    }
    Some((source, message.trim()))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
