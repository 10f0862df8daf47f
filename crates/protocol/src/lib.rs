//! UXP Developer Tools Protocol
//!
//! Shared types for communication between the developer service, host
//! applications and the CLI. Every frame is a JSON [`Envelope`] tagged by
//! `command`; replies are correlated to requests by `requestId`.

pub mod commands;
pub mod envelope;
pub mod server;
pub mod types;

pub use commands::{Command, PluginAction};
pub use envelope::Envelope;
pub use types::*;

/// Default port of the developer service.
pub const DEFAULT_SERVICE_PORT: u16 = 14001;

/// Endpoint used by the CLI controller.
pub const CLI_ENDPOINT: &str = "/socket/cli";

/// Marker segment of the browser-level CDT endpoint
/// (`/socket/browser_cdt/?adobe-uxp-app-id=<id>`).
pub const BROWSER_CDT_ENDPOINT: &str = "/socket/browser_cdt/";

/// Prefix of the plugin-scoped CDT endpoint (`/socket/cdt/<clientSessionId>`).
pub const CDT_ENDPOINT_PREFIX: &str = "/socket/cdt/";

/// Query parameter naming the host application a browser CDT client attaches to.
pub const APP_ID_QUERY_PARAM: &str = "adobe-uxp-app-id";
