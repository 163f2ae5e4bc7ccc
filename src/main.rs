mod broker;
mod cli;
mod client;
mod ipc;
mod pipeline;
mod room;
mod store;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

use broker::state::{BrokerConfig, BrokerState};
use pipeline::HandlerKind;
use pipeline::buffered::BufferedHandler;
use pipeline::pubsub::PubSubHandler;
use room::registry::RoomRegistry;
use store::memory::MemoryStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            handler,
            ring_capacity,
            max_content_len,
            poll_timeout_secs,
            presence_refresh_secs,
            presence_staleness_secs,
            socket,
        } => {
            let config = BrokerConfig {
                handler,
                ring_capacity: ring_capacity as usize,
                max_content_len,
                poll_timeout: Duration::from_secs(poll_timeout_secs),
                presence_refresh: Duration::from_secs(presence_refresh_secs),
                presence_staleness: Duration::from_secs(presence_staleness_secs),
                socket_path: socket,
            };
            if let Err(e) = serve(config).await {
                tracing::error!(error = %e, "broker failed");
                eprintln!("chatroomd serve: {e}");
                std::process::exit(1);
            }
        }
        Command::Client { socket, action } => {
            if let Err(e) = client::run(socket, action).await {
                tracing::error!(error = %e, "client failed");
                eprintln!("chatroomd client: {e}");
                std::process::exit(1);
            }
        }
    }
}

/// Wire the configured handler variant over one registry and store.
async fn serve(config: BrokerConfig) -> Result<(), broker::BrokerError> {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(RoomRegistry::new(config.ring_capacity));
    match config.handler {
        HandlerKind::Buffered => {
            let handler = BufferedHandler::new(
                Arc::clone(&registry),
                Arc::clone(&store),
                config.max_content_len,
            );
            broker::run(BrokerState::new(config, registry, store, handler)).await
        }
        HandlerKind::Pubsub => {
            let handler = PubSubHandler::new(
                Arc::clone(&registry),
                Arc::clone(&store),
                config.max_content_len,
            );
            broker::run(BrokerState::new(config, registry, store, handler)).await
        }
    }
}
