//! P2P networking: backend contracts and the TCP implementation

pub mod backend;
pub mod tcp;

pub use backend::{
    create_backend, BackendKind, ComBackend, ComClient, CommandHandler, Connector, Dispatch,
    SessionState,
};
pub use tcp::TcpBackend;
