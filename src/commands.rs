//! Client command handlers.
//!
//! These are the commands used by clients and wallets; they read node state
//! and answer through the originating session's response channel. They are
//! not part of the core node protocol.

use serde_json::{json, Map, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::network::backend::Connector;
use crate::node::{epoch_now, NodeContext};
use crate::protocol::Envelope;

pub struct ClientCommands {
    context: Arc<NodeContext>,
}

impl ClientCommands {
    pub const COMMANDS: &'static [&'static str] = &["statusjson"];

    pub fn new(context: Arc<NodeContext>) -> Self {
        Self { context }
    }

    pub async fn process_legacy(
        &self,
        envelope: &Envelope,
        connector: &mut dyn Connector,
    ) -> Result<()> {
        match envelope.command.as_str() {
            "statusjson" => connector.send_legacy(&self.status()).await,
            other => {
                warn!("unhandled client command '{other}' from {}", connector.ip());
                Ok(())
            }
        }
    }

    /// The full node status object. Every key is always present; `regnet`
    /// appears only when regtest mode is active.
    pub fn status(&self) -> Value {
        let network = &self.context.config.network;
        let revealed_address = if network.reveal_address {
            format!("{}:{}", network.bind_address, network.port)
        } else {
            "private".to_string()
        };
        let blocks = self
            .context
            .ledger
            .last_block()
            .ok()
            .flatten()
            .map_or(0, |(height, _)| height);
        let connections = self.context.peers.lock().expect("peers lock").len();

        let mut status = Map::new();
        status.insert("protocolversion".into(), json!(network.version));
        status.insert("address".into(), json!(revealed_address));
        status.insert("walletversion".into(), json!(env!("CARGO_PKG_VERSION")));
        status.insert("testnet".into(), json!(network.testnet));
        status.insert("blocks".into(), json!(blocks));
        status.insert("timeoffset".into(), json!(0));
        status.insert("connections".into(), json!(connections));
        status.insert("connections_list".into(), json!(self.context.peer_list()));
        status.insert("difficulty".into(), json!(-1));
        status.insert(
            "threads".into(),
            json!(self.context.sessions.load(Ordering::SeqCst)),
        );
        status.insert("uptime".into(), json!(self.context.uptime_secs()));
        status.insert("consensus".into(), json!([]));
        status.insert("consensus_percent".into(), json!(50));
        status.insert(
            "server_timestamp".into(),
            json!(format!("{:.2}", epoch_now())),
        );
        if network.regnet {
            status.insert("regnet".into(), json!(true));
        }
        Value::Object(status)
    }
}
