//! CLI for topiq
//!
//! Subcommands:
//! - `server`: run the broker
//! - `client`: run a small example client (useful for smoke tests)

use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use topiq_broker::{Broker, Credentials};
use topiq_config::load_config;
use topiq_persistence::MessageStore;
use topiq_transport::start_server;
use topiq_wire::WireFormat;
use tracing::{error, info};

mod client;
mod monitor;

#[derive(Parser)]
#[command(name = "topiq")]
enum Command {
    /// Start the broker
    Server,
    /// Run the example client (auth, topic, subscribe, publish, ack)
    Client {
        /// Broker address to connect to
        #[arg(long, default_value = "127.0.0.1:9845")]
        addr: String,
        /// Topic to subscribe and publish to
        #[arg(long, default_value = "chat")]
        topic: String,
        #[arg(long, default_value = "")]
        user: String,
        #[arg(long, default_value = "")]
        password: String,
        /// Use the compact binary encoding instead of the textual one
        #[arg(long)]
        binary: bool,
    },
}

#[tokio::main]
async fn main() {
    topiq_utils::logging::init("info");

    let cmd = Command::parse();

    let result = match cmd {
        Command::Server => run_server().await,
        Command::Client {
            addr,
            topic,
            user,
            password,
            binary,
        } => {
            let format = if binary {
                WireFormat::Binary
            } else {
                WireFormat::Text
            };
            client::run(&addr, &topic, &user, &password, format).await
        }
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_config()?;
    info!(
        protocol = %settings.server.protocol,
        host = %settings.server.host,
        port = settings.server.port,
        in_memory = settings.storage.in_memory,
        "starting broker"
    );

    let store = MessageStore::open(
        &settings.storage.path,
        settings.storage.in_memory,
        WireFormat::Text,
    )?;

    let broker = match Credentials::from_parts(&settings.auth.user, &settings.auth.password) {
        Some(credentials) => Broker::new_with_auth(store, credentials),
        None => Broker::new(store),
    };
    let broker = Arc::new(Mutex::new(broker));

    tokio::spawn(Broker::start_redelivery_loop(
        broker.clone(),
        Duration::from_secs(settings.broker.redelivery_interval_secs),
    ));

    if let Some(stats_port) = settings.server.stats_port {
        let stats_addr = format!("{}:{}", settings.server.host, stats_port);
        tokio::spawn(monitor::start(stats_addr, broker.clone()));
    }

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    tokio::select! {
        result = start_server(&addr, broker) => {
            result?;
            error!("broker exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, exiting");
        }
    }

    Ok(())
}
