#![forbid(unsafe_code)]
//! Ember node daemon

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use embercore::config::load_config;
use embercore::network::BackendKind;
use embercore::node::Node;
use embercore::persistence::{LedgerSink, MemoryLedger, SqliteLedger};

#[derive(Parser, Debug)]
#[command(name = "ember-node", about = "Ember dev node", version)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level: debug, info, warn, error
    #[arg(short, long, default_value = "info")]
    level: String,

    /// Transport backend
    #[arg(short, long, default_value = "tcp")]
    backend: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level: tracing::Level = args.level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = load_config(&args.config)?;
    let backend_kind: BackendKind = args.backend.parse()?;

    let ledger: Arc<dyn LedgerSink> = match SqliteLedger::open(&config.database.path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(
                "cannot open ledger at {}: {e}; falling back to in-memory sink",
                config.database.path
            );
            Arc::new(MemoryLedger::new())
        }
    };

    let node = Node::new(config, ledger, backend_kind);
    info!("starting ember node");

    let stop = node.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            stop.set();
        }
    });

    node.run().await?;
    Ok(())
}
