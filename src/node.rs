//! Node orchestrator: owns the backend lifecycle, the outgoing-dial manager
//! loop and the command dispatch table.
//!
//! The stop signal and the outgoing-peer table are fields of an explicitly
//! passed context, never globals, so tests can run several independent
//! nodes side by side.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::block::{validation, Block};
use crate::commands::ClientCommands;
use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::network::backend::{
    create_backend, BackendKind, ComBackend, CommandHandler, Connector, Dispatch, SessionState,
};
use crate::persistence::LedgerSink;
use crate::protocol::{Envelope, ACK};
use crate::transaction::Transaction;

/// Core protocol commands this node knows about. Reserved names without a
/// handler are logged and ignored rather than answered.
const RESERVED_COMMANDS: &[&str] = &[
    "version",
    "getversion",
    "hello",
    "mempool",
    "block",
    "peers",
    "blocksync",
];

/// Process-wide cooperative stop: single writer, many readers, set once.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; the first call wakes every waiter.
    pub fn set(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once the signal is set, however long that takes.
    pub async fn notified(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_set() {
            return;
        }
        notified.await;
    }

    /// Cooperative sleep. Returns true when the stop signal fired during
    /// the wait, so callers can wind down without finishing the interval.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.notified() => true,
        }
    }
}

/// Epoch seconds with sub-second precision.
pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

/// State shared between the orchestrator, the dispatcher and the client
/// command handlers.
pub struct NodeContext {
    pub config: Config,
    pub ledger: Arc<dyn LedgerSink>,
    /// Raw mempool intake; admission policy lives in a higher layer.
    pub mempool: Mutex<Vec<Transaction>>,
    /// Outgoing-peer table: address -> session state.
    pub peers: Mutex<HashMap<String, SessionState>>,
    /// Live session counter, shared with the backend.
    pub sessions: Arc<AtomicUsize>,
    pub stop: StopSignal,
    pub started_at: Instant,
}

impl NodeContext {
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn peer_list(&self) -> Vec<String> {
        self.peers
            .lock()
            .expect("peers lock")
            .keys()
            .cloned()
            .collect()
    }
}

/// Inbound command dispatch: one entry per registered command, reserved
/// names ignored, everything else a warning.
struct Dispatcher {
    context: Arc<NodeContext>,
    client_commands: ClientCommands,
}

#[async_trait::async_trait]
impl CommandHandler for Dispatcher {
    fn has_params(&self, command: &str) -> bool {
        matches!(command, "version" | "mempool" | "block")
    }

    async fn handle(
        &self,
        envelope: Envelope,
        connector: &mut dyn Connector,
    ) -> Result<Dispatch> {
        match envelope.command.as_str() {
            "version" => self.handle_version(&envelope, connector).await,
            "getversion" => {
                connector
                    .send_legacy(&json!(self.context.config.network.version))
                    .await?;
                Ok(Dispatch::Continue)
            }
            "mempool" => self.handle_mempool(&envelope, connector).await,
            "block" => self.handle_block(&envelope, connector).await,
            command if ClientCommands::COMMANDS.contains(&command) => {
                self.client_commands
                    .process_legacy(&envelope, connector)
                    .await?;
                Ok(Dispatch::Continue)
            }
            command if RESERVED_COMMANDS.contains(&command) => {
                debug!("reserved command '{command}' from {} ignored", connector.ip());
                Ok(Dispatch::Continue)
            }
            command => {
                warn!("unregistered command '{command}' from {}", connector.ip());
                Ok(Dispatch::Continue)
            }
        }
    }
}

impl Dispatcher {
    async fn handle_version(
        &self,
        envelope: &Envelope,
        connector: &mut dyn Connector,
    ) -> Result<Dispatch> {
        let announced = envelope.params.as_ref().and_then(Value::as_str);
        match announced {
            Some(version)
                if self
                    .context
                    .config
                    .network
                    .version_allow
                    .iter()
                    .any(|allowed| allowed == version) =>
            {
                connector.send_legacy(&json!(ACK)).await?;
                Ok(Dispatch::Continue)
            }
            Some(version) => {
                warn!("{}: version '{version}' not allowed", connector.ip());
                connector.send_legacy(&json!("version not allowed")).await?;
                Ok(Dispatch::Close)
            }
            None => {
                warn!("{}: version announce without a version", connector.ip());
                connector.send_legacy(&json!("version not allowed")).await?;
                Ok(Dispatch::Close)
            }
        }
    }

    /// Mempool intake: decode every tuple before touching shared state so a
    /// malformed batch mutates nothing.
    async fn handle_mempool(
        &self,
        envelope: &Envelope,
        connector: &mut dyn Connector,
    ) -> Result<Dispatch> {
        match decode_tuple_rows(envelope.params.as_ref()) {
            Ok(transactions) => {
                self.context
                    .mempool
                    .lock()
                    .expect("mempool lock")
                    .extend(transactions);
                connector.send_legacy(&json!(ACK)).await?;
            }
            Err(e) => {
                warn!("{}: rejected mempool payload: {e}", connector.ip());
                connector
                    .send_legacy(&json!({ "error": e.to_string() }))
                    .await?;
            }
        }
        Ok(Dispatch::Continue)
    }

    /// Block intake: decode, validate cheapest-first, persist atomically.
    /// A rejected block leaves storage untouched and the violated rule goes
    /// back to the sender.
    async fn handle_block(
        &self,
        envelope: &Envelope,
        connector: &mut dyn Connector,
    ) -> Result<Dispatch> {
        let outcome = self.ingest_block(envelope.params.as_ref());
        match outcome {
            Ok(height) => {
                info!("accepted block {height} from {}", connector.ip());
                connector.send_legacy(&json!(ACK)).await?;
            }
            Err(e) => {
                warn!("{}: rejected block: {e}", connector.ip());
                connector
                    .send_legacy(&json!({ "error": e.to_string() }))
                    .await?;
            }
        }
        Ok(Dispatch::Continue)
    }

    fn ingest_block(&self, params: Option<&Value>) -> Result<i64> {
        let rows = tuple_rows(params)?;
        let block = Block::from_legacy(&rows)?;
        let previous_timestamp = self
            .context
            .ledger
            .last_block()?
            .map_or(0.0, |(_, timestamp)| timestamp);
        validation::validate(&block, previous_timestamp, epoch_now())?;
        self.context.ledger.write_block(&block)?;
        Ok(block.height())
    }
}

fn tuple_rows(params: Option<&Value>) -> Result<Vec<Vec<Value>>> {
    let rows = params
        .and_then(Value::as_array)
        .ok_or_else(|| CoreError::Malformed("params is not a list of tuples".to_string()))?;
    rows.iter()
        .map(|row| {
            row.as_array()
                .cloned()
                .ok_or_else(|| CoreError::Malformed("tuple row is not a list".to_string()))
        })
        .collect()
}

fn decode_tuple_rows(params: Option<&Value>) -> Result<Vec<Transaction>> {
    tuple_rows(params)?
        .iter()
        .map(|row| Transaction::from_legacy(row).map(Transaction::sanitized))
        .collect()
}

/// The node: backend lifecycle plus the outgoing-dial manager.
pub struct Node {
    context: Arc<NodeContext>,
    backend: Arc<dyn ComBackend>,
    /// Whether the manager loop actively dials configured peers.
    dialing: AtomicBool,
}

impl Node {
    pub fn new(config: Config, ledger: Arc<dyn LedgerSink>, kind: BackendKind) -> Arc<Self> {
        let stop = StopSignal::new();
        let sessions = Arc::new(AtomicUsize::new(0));
        let context = Arc::new(NodeContext {
            config,
            ledger,
            mempool: Mutex::new(Vec::new()),
            peers: Mutex::new(HashMap::new()),
            sessions: sessions.clone(),
            stop: stop.clone(),
            started_at: Instant::now(),
        });
        let dispatcher = Arc::new(Dispatcher {
            context: context.clone(),
            client_commands: ClientCommands::new(context.clone()),
        });
        let backend = create_backend(kind, &context.config.network, dispatcher, stop, sessions);
        Arc::new(Self {
            context,
            backend,
            dialing: AtomicBool::new(true),
        })
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.context
    }

    pub fn backend(&self) -> &Arc<dyn ComBackend> {
        &self.backend
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.context.stop.clone()
    }

    pub fn set_dialing(&self, enabled: bool) {
        self.dialing.store(enabled, Ordering::SeqCst);
    }

    pub fn peer_count(&self) -> usize {
        self.context.peers.lock().expect("peers lock").len()
    }

    /// Runs the listener and the dial manager until the stop signal fires.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let serving = self.backend.clone();
        let serve_task = tokio::spawn(async move { serving.serve().await });

        self.manager_loop().await;

        self.backend.stop();
        match serve_task.await {
            Ok(result) => result?,
            Err(e) => warn!("listener task failed: {e}"),
        }
        info!("node stopped");
        Ok(())
    }

    /// While running: dial every configured peer not already connected as
    /// long as the outgoing count stays under the limit, then sleep
    /// cooperatively so shutdown latency stays bounded.
    async fn manager_loop(self: &Arc<Self>) {
        let pause = Duration::from_secs(self.context.config.network.pause_secs.max(1));
        while !self.context.stop.is_set() {
            if self.dialing.load(Ordering::SeqCst) {
                for (host, port, addr) in self.missing_peers() {
                    let node = self.clone();
                    tokio::spawn(async move {
                        node.outgoing_worker(host, port, addr).await;
                    });
                }
            }
            if self.context.stop.sleep(pause).await {
                break;
            }
        }
    }

    /// Configured peers we should dial right now, capped by the out limit.
    fn missing_peers(&self) -> Vec<(String, u16, String)> {
        let network = &self.context.config.network;
        let peers = self.context.peers.lock().expect("peers lock");
        let mut targets = Vec::new();
        for addr in &network.peers {
            if peers.len() + targets.len() >= network.out_limit {
                break;
            }
            if peers.contains_key(addr) {
                continue;
            }
            match addr.rsplit_once(':').map(|(h, p)| (h, p.parse::<u16>())) {
                Some((host, Ok(port))) => {
                    targets.push((host.to_string(), port, addr.clone()));
                }
                _ => warn!("cannot parse configured peer '{addr}'"),
            }
        }
        targets
    }

    /// One outgoing-session task. Registers the peer before the first
    /// suspension point so a concurrent manager re-scan cannot double-dial,
    /// and always removes it again on the way out — whatever the exit path —
    /// so the table and the session count stay exact.
    async fn outgoing_worker(self: Arc<Self>, host: String, port: u16, addr: String) {
        {
            let mut peers = self.context.peers.lock().expect("peers lock");
            if peers.contains_key(&addr) {
                return;
            }
            peers.insert(addr.clone(), SessionState::Connecting);
        }

        if let Err(e) = self.drive_outgoing(&host, port, &addr).await {
            debug!("peer {addr}: session ended: {e}");
        }

        self.context
            .peers
            .lock()
            .expect("peers lock")
            .remove(&addr);
    }

    async fn drive_outgoing(&self, host: &str, port: u16, addr: &str) -> Result<()> {
        let network = &self.context.config.network;
        let mut client = self.backend.connect(host, port).await?;
        client.handshake(&network.version).await?;
        {
            let mut peers = self.context.peers.lock().expect("peers lock");
            peers.insert(addr.to_string(), SessionState::Active);
        }
        info!("peer {addr}: active");

        let pause = Duration::from_secs(network.pause_secs.max(1));
        loop {
            if self.context.stop.sleep(pause).await {
                break;
            }
            // keepalive; the first stream error ends the session
            let version = client.request(&Envelope::new("getversion")).await?;
            debug!("peer {addr}: announces {version}");
        }
        client.close().await;
        Ok(())
    }
}
