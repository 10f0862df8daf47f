//! Service configuration

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use uxp_devtools_protocol::DEFAULT_SERVICE_PORT;

/// Host-bound wait for `Plugin/load` (and the installed-plugin enumeration).
pub const LOAD_TIMEOUT: Duration = Duration::from_millis(5000);
/// Host-bound wait for `Plugin/list`.
pub const LIST_TIMEOUT: Duration = Duration::from_millis(1500);
/// Upper bound on any proxied request-with-reply.
pub const PROXY_TIMEOUT: Duration = Duration::from_millis(60_000);

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: IpAddr,
    pub port: u16,
    pub load_timeout: Duration,
    pub list_timeout: Duration,
    pub proxy_timeout: Duration,
    pub data_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_SERVICE_PORT,
            load_timeout: LOAD_TIMEOUT,
            list_timeout: LIST_TIMEOUT,
            proxy_timeout: PROXY_TIMEOUT,
            data_dir: None,
        }
    }
}

/// Command-line arguments of the service binary.
#[derive(Debug, Parser)]
#[command(name = "uxp-devtools-service", version, about = "UXP developer service")]
pub struct Args {
    /// Port the service listens on
    #[arg(long, env = "UXP_DEVTOOLS_PORT", default_value_t = DEFAULT_SERVICE_PORT)]
    pub port: u16,

    /// Interface the service binds to
    #[arg(long, env = "UXP_DEVTOOLS_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Data directory (logs, advertised port)
    #[arg(long, env = "UXP_DEVTOOLS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Milliseconds to wait for a host to answer a plugin load
    #[arg(long, env = "UXP_DEVTOOLS_LOAD_TIMEOUT_MS", default_value_t = 5000)]
    pub load_timeout_ms: u64,

    /// Milliseconds to wait for a host to answer a plugin list
    #[arg(long, env = "UXP_DEVTOOLS_LIST_TIMEOUT_MS", default_value_t = 1500)]
    pub list_timeout_ms: u64,

    /// Milliseconds to wait for any proxied request
    #[arg(long, env = "UXP_DEVTOOLS_PROXY_TIMEOUT_MS", default_value_t = 60_000)]
    pub proxy_timeout_ms: u64,
}

impl From<Args> for ServiceConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            load_timeout: Duration::from_millis(args.load_timeout_ms),
            list_timeout: Duration::from_millis(args.list_timeout_ms),
            proxy_timeout: Duration::from_millis(args.proxy_timeout_ms),
            data_dir: args.data_dir,
        }
    }
}
