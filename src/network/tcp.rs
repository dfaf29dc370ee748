//! Asynchronous TCP implementation of the communication backend.
//!
//! One listener task accepts unbounded concurrent inbound sessions; each
//! session runs its own dispatch loop until the stream closes or errors.
//! Outgoing clients are plain connected handles the orchestrator drives
//! through the handshake. Session accounting uses a drop guard so the count
//! stays exact on every exit path.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::{CoreError, Result};
use crate::network::backend::{
    ComBackend, ComClient, CommandHandler, Connector, Dispatch, SessionState,
};
use crate::node::StopSignal;
use crate::protocol::{self, Envelope, ACK};

/// Decrements the shared session counter when dropped, whatever the exit
/// path of the owning session was.
struct SessionGuard {
    sessions: Arc<AtomicUsize>,
}

impl SessionGuard {
    fn new(sessions: Arc<AtomicUsize>) -> Self {
        sessions.fetch_add(1, Ordering::SeqCst);
        Self { sessions }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Response channel over the write half of an inbound stream.
struct StreamConnector {
    ip: String,
    writer: OwnedWriteHalf,
}

#[async_trait]
impl Connector for StreamConnector {
    fn ip(&self) -> &str {
        &self.ip
    }

    async fn send_legacy(&mut self, data: &Value) -> Result<()> {
        protocol::write_frame(&mut self.writer, data).await
    }
}

pub struct TcpBackend {
    bind_address: String,
    port: u16,
    timeout: Duration,
    handler: Arc<dyn CommandHandler>,
    stop: StopSignal,
    sessions: Arc<AtomicUsize>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TcpBackend {
    pub fn new(
        config: &NetworkConfig,
        handler: Arc<dyn CommandHandler>,
        stop: StopSignal,
        sessions: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            port: config.port,
            timeout: Duration::from_secs(config.timeout_secs),
            handler,
            stop,
            sessions,
            local_addr: Mutex::new(None),
        }
    }

    /// The address the listener actually bound, once serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local_addr lock")
    }

    async fn inbound_session(
        stream: TcpStream,
        peer: String,
        handler: Arc<dyn CommandHandler>,
        stop: StopSignal,
        read_timeout: Duration,
        _guard: SessionGuard,
    ) {
        let (mut reader, writer) = stream.into_split();
        let mut connector = StreamConnector {
            ip: peer.clone(),
            writer,
        };

        loop {
            let frame = tokio::select! {
                _ = stop.notified() => break,
                read = timeout(read_timeout, protocol::read_frame(&mut reader)) => {
                    match read {
                        Err(_) => {
                            debug!("session {peer}: read timeout");
                            break;
                        }
                        Ok(Err(e)) => {
                            debug!("session {peer}: stream ended: {e}");
                            break;
                        }
                        Ok(Ok(frame)) => frame,
                    }
                }
            };

            let Some(command) = frame.as_str().map(str::to_string) else {
                warn!("session {peer}: command frame is not a string");
                break;
            };

            let params = if handler.has_params(&command) {
                match timeout(read_timeout, protocol::read_frame(&mut reader)).await {
                    Ok(Ok(params)) => Some(params),
                    Ok(Err(e)) => {
                        debug!("session {peer}: stream ended reading params: {e}");
                        break;
                    }
                    Err(_) => {
                        debug!("session {peer}: params timeout for {command}");
                        break;
                    }
                }
            } else {
                None
            };

            let envelope = Envelope { command, params };
            match handler.handle(envelope, &mut connector).await {
                Ok(Dispatch::Continue) => {}
                Ok(Dispatch::Close) => break,
                Err(e) => {
                    // dispatch boundary: log and keep the session alive
                    warn!("session {peer}: dispatch error: {e}");
                }
            }
        }
        debug!("session {peer}: closed");
    }
}

#[async_trait]
impl ComBackend for TcpBackend {
    async fn serve(&self) -> Result<()> {
        let bind = format!("{}:{}", self.bind_address, self.port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| CoreError::Transport(format!("bind {bind}: {e}")))?;
        if let Ok(addr) = listener.local_addr() {
            *self.local_addr.lock().expect("local_addr lock") = Some(addr);
            info!("listening on {addr}");
        }

        loop {
            tokio::select! {
                _ = self.stop.notified() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let guard = SessionGuard::new(self.sessions.clone());
                            let handler = self.handler.clone();
                            let stop = self.stop.clone();
                            let read_timeout = self.timeout;
                            tokio::spawn(async move {
                                Self::inbound_session(
                                    stream,
                                    peer.to_string(),
                                    handler,
                                    stop,
                                    read_timeout,
                                    guard,
                                )
                                .await;
                            });
                        }
                        Err(e) => warn!("accept failed: {e}"),
                    }
                }
            }
        }
        info!("listener stopped");
        Ok(())
    }

    fn stop(&self) {
        self.stop.set();
    }

    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn ComClient>> {
        let addr = format!("{host}:{port}");
        // Idle -> Connecting -> Connected | Failed
        let stream = timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| CoreError::Transport(format!("dial {addr}: timeout")))?
            .map_err(|e| CoreError::Transport(format!("dial {addr}: {e}")))?;
        debug!("connected to {addr}");
        Ok(Box::new(TcpClient {
            addr,
            stream,
            state: SessionState::Connected,
            timeout: self.timeout,
            _guard: SessionGuard::new(self.sessions.clone()),
        }))
    }

    fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

pub struct TcpClient {
    addr: String,
    stream: TcpStream,
    state: SessionState,
    timeout: Duration,
    _guard: SessionGuard,
}

impl TcpClient {
    async fn try_request(&mut self, envelope: &Envelope) -> Result<Value> {
        protocol::write_frame(&mut self.stream, &json!(envelope.command)).await?;
        if let Some(params) = &envelope.params {
            protocol::write_frame(&mut self.stream, params).await?;
        }
        timeout(self.timeout, protocol::read_frame(&mut self.stream))
            .await
            .map_err(|_| CoreError::Transport(format!("{}: response timeout", self.addr)))?
    }
}

#[async_trait]
impl ComClient for TcpClient {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn state(&self) -> SessionState {
        self.state
    }

    async fn handshake(&mut self, version: &str) -> Result<()> {
        self.state = SessionState::AwaitingAck;
        let answer = self
            .request(&Envelope::with_params("version", json!(version)))
            .await?;
        if answer == json!(ACK) {
            self.state = SessionState::Active;
            Ok(())
        } else {
            self.state = SessionState::Failed;
            Err(CoreError::Transport(format!(
                "{}: version rejected: {answer}",
                self.addr
            )))
        }
    }

    async fn request(&mut self, envelope: &Envelope) -> Result<Value> {
        let result = self.try_request(envelope).await;
        if result.is_err() {
            self.state = SessionState::Closed;
        }
        result
    }

    async fn close(&mut self) {
        use tokio::io::AsyncWriteExt;
        let _ = self.stream.shutdown().await;
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        fn has_params(&self, command: &str) -> bool {
            command == "version"
        }

        async fn handle(
            &self,
            envelope: Envelope,
            connector: &mut dyn Connector,
        ) -> Result<Dispatch> {
            match envelope.command.as_str() {
                "version" => {
                    connector.send_legacy(&json!(ACK)).await?;
                    Ok(Dispatch::Continue)
                }
                "getversion" => {
                    connector.send_legacy(&json!("testnet")).await?;
                    Ok(Dispatch::Continue)
                }
                _ => Ok(Dispatch::Continue),
            }
        }
    }

    fn test_backend() -> Arc<TcpBackend> {
        let config = NetworkConfig {
            port: 0, // ephemeral
            bind_address: "127.0.0.1".to_string(),
            timeout_secs: 5,
            ..Default::default()
        };
        Arc::new(TcpBackend::new(
            &config,
            Arc::new(EchoHandler),
            StopSignal::new(),
            Arc::new(AtomicUsize::new(0)),
        ))
    }

    async fn served(backend: &Arc<TcpBackend>) -> SocketAddr {
        let serving = backend.clone();
        tokio::spawn(async move {
            let _ = serving.serve().await;
        });
        for _ in 0..100 {
            if let Some(addr) = backend.local_addr() {
                return addr;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("listener never bound");
    }

    #[tokio::test]
    async fn test_handshake_reaches_active() {
        let backend = test_backend();
        let addr = served(&backend).await;

        let mut client = backend.connect("127.0.0.1", addr.port()).await.unwrap();
        assert_eq!(client.state(), SessionState::Connected);
        client.handshake("testnet").await.unwrap();
        assert_eq!(client.state(), SessionState::Active);

        let version = client.request(&Envelope::new("getversion")).await.unwrap();
        assert_eq!(version, json!("testnet"));

        client.close().await;
        assert_eq!(client.state(), SessionState::Closed);
        backend.stop();
    }

    #[tokio::test]
    async fn test_session_count_returns_to_zero() {
        let backend = test_backend();
        let addr = served(&backend).await;
        assert_eq!(backend.session_count(), 0);

        {
            let mut client = backend.connect("127.0.0.1", addr.port()).await.unwrap();
            client.handshake("testnet").await.unwrap();
            // outbound client plus the server-side session
            assert!(backend.session_count() >= 1);
            client.close().await;
        }
        // dropped client releases its slot immediately
        backend.stop();
        for _ in 0..100 {
            if backend.session_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session count never drained");
    }

    #[tokio::test]
    async fn test_dial_failure_is_an_error() {
        let backend = test_backend();
        // nothing listens on this port
        let result = backend.connect("127.0.0.1", 1).await;
        assert!(result.is_err());
        assert_eq!(backend.session_count(), 0);
    }
}
