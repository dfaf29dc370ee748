//! Communication backend contracts.
//!
//! A backend handles the server side as well as outgoing clients for one
//! low-level transport. New transports implement these traits; nothing
//! subclasses anything, and backends are resolved through the explicit
//! [`BackendKind`] registry at startup, never by name lookup.

use async_trait::async_trait;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::NetworkConfig;
use crate::error::{CoreError, Result};
use crate::node::StopSignal;
use crate::protocol::Envelope;

/// Handshake state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    AwaitingAck,
    Active,
    Failed,
    Closed,
}

/// Whether the session should keep running after a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    Close,
}

/// A channel to send a payload back to the peer that issued a command.
/// Backend agnostic.
#[async_trait]
pub trait Connector: Send {
    fn ip(&self) -> &str;
    /// Sends one legacy (JSON) response frame.
    async fn send_legacy(&mut self, data: &Value) -> Result<()>;
}

/// Receives every command decoded off a session.
///
/// Dispatch errors are caught at this boundary by the session loop, logged
/// and turned into a no-op; they never tear down the session by themselves.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Whether a params frame follows this command name on the wire.
    fn has_params(&self, command: &str) -> bool;
    async fn handle(&self, envelope: Envelope, connector: &mut dyn Connector)
        -> Result<Dispatch>;
}

/// An outgoing connection handle: connected-or-failed, then driven through
/// the handshake into its active request loop by the orchestrator.
#[async_trait]
pub trait ComClient: Send {
    /// Peer address as "host:port".
    fn addr(&self) -> &str;
    fn state(&self) -> SessionState;
    /// Announces our version and waits for the `"ok"` acknowledgement.
    /// Transitions `Connected → AwaitingAck → Active`, or `Failed`.
    async fn handshake(&mut self, version: &str) -> Result<()>;
    /// One ordered command/response exchange. Any stream error closes the
    /// session state.
    async fn request(&mut self, envelope: &Envelope) -> Result<Value>;
    async fn close(&mut self);
}

/// A communication backend: listening server plus outgoing-client factory.
#[async_trait]
pub trait ComBackend: Send + Sync {
    /// Listens and serves inbound sessions until the stop signal is set.
    async fn serve(&self) -> Result<()>;
    /// Idempotent stop; the serve loop winds down at its next suspension.
    fn stop(&self);
    /// Opens an outgoing connection. The returned handle is `Connected`;
    /// a failed dial is an error, not a half-open handle.
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn ComClient>>;
    /// Live count of active sessions, inbound plus outbound.
    fn session_count(&self) -> usize;
}

/// Enumerated transport identifiers for the backend registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Tcp,
}

impl FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(BackendKind::Tcp),
            other => Err(CoreError::Transport(format!(
                "unknown backend kind: {other}"
            ))),
        }
    }
}

/// Resolves a backend implementation at startup.
pub fn create_backend(
    kind: BackendKind,
    config: &NetworkConfig,
    handler: Arc<dyn CommandHandler>,
    stop: StopSignal,
    sessions: Arc<std::sync::atomic::AtomicUsize>,
) -> Arc<dyn ComBackend> {
    match kind {
        BackendKind::Tcp => Arc::new(crate::network::tcp::TcpBackend::new(
            config, handler, stop, sessions,
        )),
    }
}
