//! UXP developer service
//!
//! A local WebSocket broker between the UXP developer CLI, running host
//! applications and Chrome DevTools style debuggers. Every socket becomes a
//! [`Client`] whose role is picked from its request path; the [`Server`]
//! keeps the directory of live clients and the plugin session registry.

pub mod client;
mod clients;
pub mod config;
pub mod discovery;
pub mod error;
pub mod features;
pub mod logging;
pub mod manifest;
pub mod paths;
pub mod plugin_sessions;
pub mod sandbox;
pub mod server;
pub mod service;
pub mod session_file;
pub mod websocket;

pub use client::{Client, ClientKind, ConnectionId, ServerEvent};
pub use config::ServiceConfig;
pub use error::ServiceError;
pub use logging::{LogProvider, Logger};
pub use server::Server;
pub use service::{start, ServiceHandle};
