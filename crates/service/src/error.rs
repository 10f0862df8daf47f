use thiserror::Error;

use crate::client::ConnectionId;

/// Errors raised inside the service.
///
/// Host replies, including host-reported errors and synthetic timeouts, are
/// not errors here: they travel as reply envelopes. These variants cover
/// failures decided locally, whose `Display` text is what the CLI sees.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Socket not set")]
    SocketNotSet,

    #[error("Connection to {0} closed before a reply arrived")]
    ConnectionClosed(&'static str),

    #[error("No valid session present at the CLI Service for given Plugin. Make sure you run `uxp plugin load` command first")]
    NoPluginSession,

    #[error("Failed to load plugin as loading and debugging of installed plugins is prohibited.")]
    InstalledPluginProhibited,

    #[error("Plugin request is missing params.provider.path")]
    MissingPluginPath,

    #[error("Failed to copy plugin contents.{0}")]
    SandboxCopy(std::io::Error),

    #[error("Host application has not reported its identity yet")]
    AppNotInitialized,

    #[error("Client {0} is not connected to the service")]
    ClientNotFound(ConnectionId),

    #[error("Request to client {client_id} timed out after {timeout_ms}ms")]
    ProxyTimeout { client_id: ConnectionId, timeout_ms: u128 },

    #[error("Service failed to start: Port number {0} already in use.")]
    PortInUse(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
