//! Connection server: the directory of live clients.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::info;
use uxp_devtools_protocol::{
    AppInfo, Envelope, BROWSER_CDT_ENDPOINT, CDT_ENDPOINT_PREFIX, CLI_ENDPOINT,
};

use crate::client::{lock, Client, ClientKind, ConnectionId, Outbound, Role, ServerEvent};
use crate::clients::app::AppRole;
use crate::clients::browser_cdt::BrowserCdtRole;
use crate::clients::cdt::CdtRole;
use crate::config::ServiceConfig;
use crate::features::FeatureConfigTable;
use crate::logging::Logger;
use crate::plugin_sessions::PluginSessionRegistry;

/// Role for a socket request target. First matching rule wins.
pub fn classify_url(url: &str) -> ClientKind {
    if url == CLI_ENDPOINT {
        ClientKind::Cli
    } else if url.contains(BROWSER_CDT_ENDPOINT) {
        ClientKind::BrowserCdt
    } else if url.starts_with(CDT_ENDPOINT_PREFIX) {
        ClientKind::Cdt
    } else {
        ClientKind::App
    }
}

pub struct Server {
    clients: DashMap<ConnectionId, Arc<Client>>,
    sessions: Mutex<PluginSessionRegistry>,
    features: FeatureConfigTable,
    config: ServiceConfig,
    logger: Logger,
    port: AtomicU16,
    remote_ip: IpAddr,
}

impl Server {
    pub fn new(config: ServiceConfig, logger: Logger) -> Arc<Self> {
        Arc::new(Self {
            clients: DashMap::new(),
            sessions: Mutex::new(PluginSessionRegistry::new()),
            features: FeatureConfigTable::new(),
            port: AtomicU16::new(config.port),
            config,
            logger,
            remote_ip: lookup_remote_ip(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn features(&self) -> &FeatureConfigTable {
        &self.features
    }

    /// The plugin session registry. Never hold the guard across an await.
    pub fn sessions(&self) -> MutexGuard<'_, PluginSessionRegistry> {
        lock(&self.sessions)
    }

    pub fn port(&self) -> u16 {
        self.port.load(Ordering::Relaxed)
    }

    /// Record the port actually bound (differs from config when it was 0).
    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::Relaxed);
    }

    pub fn local_hostname(&self) -> String {
        format!("127.0.0.1:{}", self.port())
    }

    pub fn remote_hostname(&self) -> String {
        format!("{}:{}", self.remote_ip, self.port())
    }

    pub fn local_socket_url(&self) -> String {
        format!("ws://{}", self.local_hostname())
    }

    pub fn client(&self, id: ConnectionId) -> Option<Arc<Client>> {
        self.clients.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of the directory in connection order.
    pub fn clients(&self) -> Vec<Arc<Client>> {
        let mut clients: Vec<_> = self
            .clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        clients.sort_by_key(|client| client.id());
        clients
    }

    /// The connected host application with this app id and version.
    pub fn app_client_for(&self, app: &AppInfo) -> Option<Arc<Client>> {
        self.clients().into_iter().rev().find(|client| {
            client
                .app()
                .and_then(AppRole::info)
                .is_some_and(|info| info.is_same_app(app))
        })
    }

    /// Build the client for a socket request target. Debugger roles resolve
    /// their target here and fail with a reason when there is none.
    pub fn create_client(
        &self,
        url: &str,
        socket: mpsc::UnboundedSender<Outbound>,
    ) -> Result<Arc<Client>, &'static str> {
        let role = match classify_url(url) {
            ClientKind::Cli => Role::Cli,
            ClientKind::BrowserCdt => Role::BrowserCdt(BrowserCdtRole::resolve(self, url)?),
            ClientKind::Cdt => Role::Cdt(CdtRole::resolve(self, url)?),
            ClientKind::App => Role::App(AppRole::new()),
        };
        let client = Client::new(role, socket, self.logger.clone());
        if client.app().is_some() {
            // Unblocks the host's inspector.
            client.notify(&Envelope::new("ready"));
        }
        Ok(client)
    }

    /// Add a client to the directory and introduce it to everyone else.
    pub fn register(self: &Arc<Self>, client: Arc<Client>) {
        let existing = self.clients();
        self.clients.insert(client.id(), Arc::clone(&client));
        client.handle_registered(self);

        for other in &existing {
            client.handle_event(self, &ServerEvent::ClientDidConnect(Arc::clone(other)));
        }
        for other in &existing {
            other.handle_event(self, &ServerEvent::ClientDidConnect(Arc::clone(&client)));
        }
        client.handle_event(self, &ServerEvent::CompletedConnection);

        info!(
            component = "server",
            event = "server.client.registered",
            connection_id = client.id(),
            kind = client.kind().as_str(),
            target = %describe_target(client.role()),
            clients = self.clients.len(),
            "Client registered"
        );
    }

    /// Disconnect hook, removal, then a broadcast to whoever is left.
    pub fn unregister(self: &Arc<Self>, client: &Arc<Client>) {
        client.handle_disconnect(self);
        self.clients.remove(&client.id());
        self.broadcast(ServerEvent::ClientDidDisconnect(Arc::clone(client)));

        info!(
            component = "server",
            event = "server.client.unregistered",
            connection_id = client.id(),
            kind = client.kind().as_str(),
            clients = self.clients.len(),
            "Client unregistered"
        );
    }

    pub fn broadcast(self: &Arc<Self>, event: ServerEvent) {
        for client in self.clients() {
            client.handle_event(self, &event);
        }
    }

    pub fn close_all_clients(&self, code: u16, reason: &str) {
        for client in self.clients() {
            client.close(code, reason);
        }
    }
}

fn describe_target(role: &Role) -> String {
    match role {
        Role::Cdt(cdt) => format!("plugin session {}", cdt.client_session_id()),
        Role::BrowserCdt(browser) => format!("app {}", browser.app_id()),
        Role::App(_) | Role::Cli => "-".to_string(),
    }
}

/// First non-loopback IPv4 address of this machine, or loopback.
fn lookup_remote_ip() -> IpAddr {
    // Connecting a UDP socket only selects a route; nothing is sent.
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).map(|_| socket))
        .and_then(|socket| socket.local_addr());
    match probe {
        Ok(addr) if addr.is_ipv4() && !addr.ip().is_loopback() && !addr.ip().is_unspecified() => {
            addr.ip()
        }
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}
