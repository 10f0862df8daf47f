//! Per-connection client
//!
//! A [`Client`] wraps the outbound half of one socket. Inbound frames are
//! either parsed as [`Envelope`]s and dispatched by command, or, for the
//! debugger roles, handed over untouched. Outbound requests are correlated
//! with replies through a per-connection pending table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uxp_devtools_protocol::{Command, Envelope, HostAppLogDetails, PluginInfo, ProxyRequest};

use crate::clients::app::AppRole;
use crate::clients::browser_cdt::BrowserCdtRole;
use crate::clients::cdt::CdtRole;
use crate::clients::cli;
use crate::error::ServiceError;
use crate::logging::Logger;
use crate::server::Server;

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Close code for an orderly shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// A frame queued for the socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    App,
    Cli,
    Cdt,
    BrowserCdt,
}

impl ClientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Cli => "cli",
            Self::Cdt => "cdt_client",
            Self::BrowserCdt => "browser_cdt_client",
        }
    }
}

/// Role-specific state, fixed at connection time.
#[derive(Debug)]
pub(crate) enum Role {
    App(AppRole),
    Cli,
    Cdt(CdtRole),
    BrowserCdt(BrowserCdtRole),
}

impl Role {
    fn kind(&self) -> ClientKind {
        match self {
            Self::App(_) => ClientKind::App,
            Self::Cli => ClientKind::Cli,
            Self::Cdt(_) => ClientKind::Cdt,
            Self::BrowserCdt(_) => ClientKind::BrowserCdt,
        }
    }

    fn handles_raw_messages(&self) -> bool {
        matches!(self, Self::Cdt(_) | Self::BrowserCdt(_))
    }
}

/// Lifecycle events broadcast by the server to every client.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientDidConnect(Arc<Client>),
    ClientDidDisconnect(Arc<Client>),
    CompletedConnection,
    DidAddRuntimeClient(Arc<Client>),
    DidPluginUnloaded(PluginInfo),
    HostAppLog(HostAppLogDetails),
    AppQuit,
}

type PendingTable = Mutex<HashMap<u64, oneshot::Sender<Envelope>>>;

/// An outstanding request, resolved by exactly one of reply, error reply,
/// synthetic timeout reply, or disconnect. Dropping it unresolved removes
/// its entry from the pending table.
#[derive(Debug)]
pub struct PendingReply {
    pub request_id: u64,
    kind: ClientKind,
    rx: oneshot::Receiver<Envelope>,
    table: Weak<PendingTable>,
}

impl PendingReply {
    pub async fn recv(mut self) -> Result<Envelope, ServiceError> {
        (&mut self.rx)
            .await
            .map_err(|_| ServiceError::ConnectionClosed(self.kind.as_str()))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            lock(&table).remove(&self.request_id);
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Client {
    id: ConnectionId,
    role: Role,
    socket: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    next_request_id: AtomicU64,
    pending: Arc<PendingTable>,
    logger: Logger,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .finish()
    }
}

impl Client {
    pub(crate) fn new(
        role: Role,
        socket: mpsc::UnboundedSender<Outbound>,
        logger: Logger,
    ) -> Arc<Self> {
        let client = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            role,
            socket: Mutex::new(Some(socket)),
            next_request_id: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            logger,
        });
        client.logger.verbose(format_args!(
            "New Server client Connected : Type : {}",
            client.kind().as_str()
        ));
        client
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> ClientKind {
        self.role.kind()
    }

    pub(crate) fn role(&self) -> &Role {
        &self.role
    }

    pub(crate) fn app(&self) -> Option<&AppRole> {
        match &self.role {
            Role::App(app) => Some(app),
            _ => None,
        }
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.logger
    }

    // ── Outbound ────────────────────────────────────────────────────────

    /// Serialize and queue an envelope. Fails only when the socket was never
    /// set or has been torn down; transport failures are logged.
    pub fn send(&self, envelope: &Envelope) -> Result<(), ServiceError> {
        let json = envelope.to_json()?;
        self.send_raw(json)
    }

    pub fn send_raw(&self, data: impl Into<String>) -> Result<(), ServiceError> {
        let socket = lock(&self.socket);
        let tx = socket.as_ref().ok_or(ServiceError::SocketNotSet)?;
        if let Err(err) = tx.send(Outbound::Text(data.into())) {
            self.logger.error(format_args!(
                "Error while sending message to remote {} {err}",
                self.kind().as_str()
            ));
        }
        Ok(())
    }

    /// Close the socket. Later sends fail with [`ServiceError::SocketNotSet`].
    pub fn close(&self, code: u16, reason: &str) {
        if let Some(tx) = lock(&self.socket).take() {
            let _ = tx.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    /// Log a failed fire-and-forget send.
    pub(crate) fn notify(&self, envelope: &Envelope) {
        if let Err(err) = self.send(envelope) {
            self.logger.error(format_args!(
                "Failed to send {} to {} {}: {err}",
                envelope.command,
                self.kind().as_str(),
                self.id
            ));
        }
    }

    pub(crate) fn notify_raw(&self, data: String) {
        if let Err(err) = self.send_raw(data) {
            self.logger.verbose(format_args!(
                "Dropping raw frame for {} {}: {err}",
                self.kind().as_str(),
                self.id
            ));
        }
    }

    // ── Request / reply ─────────────────────────────────────────────────

    /// Stamp the next request id onto `envelope`, register it as pending and
    /// send it.
    pub fn send_request(&self, mut envelope: Envelope) -> Result<PendingReply, ServiceError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, tx);
        envelope.request_id = Some(request_id);

        if let Err(err) = self.send(&envelope) {
            lock(&self.pending).remove(&request_id);
            return Err(err);
        }
        Ok(PendingReply {
            request_id,
            kind: self.kind(),
            rx,
            table: Arc::downgrade(&self.pending),
        })
    }

    pub async fn request(&self, envelope: Envelope) -> Result<Envelope, ServiceError> {
        self.send_request(envelope)?.recv().await
    }

    /// Like [`Client::request`], but a missing reply turns into a synthetic
    /// timeout reply after `timeout`.
    pub async fn request_with_timeout(
        self: &Arc<Self>,
        action: &str,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<Envelope, ServiceError> {
        let pending = self.send_request(envelope)?;
        self.handle_request_timeout(action, pending.request_id, timeout);
        pending.recv().await
    }

    /// Schedule a synthetic error reply for `request_id`. A no-op if the real
    /// reply arrives first.
    pub fn handle_request_timeout(self: &Arc<Self>, action: &str, request_id: u64, after: Duration) {
        let client = Arc::downgrade(self);
        let message = format!(
            "Plugin {action} timed out. Check the host application to see if it is busy or in a modal state and try again."
        );
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let Some(client) = client.upgrade() else {
                return;
            };
            if let Some(tx) = client.take_pending(request_id) {
                let _ = tx.send(Envelope::error_reply(Some(request_id), message));
            }
        });
    }

    fn take_pending(&self, request_id: u64) -> Option<oneshot::Sender<Envelope>> {
        lock(&self.pending).remove(&request_id)
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    fn resolve_reply(&self, reply: Envelope) {
        let Some(request_id) = reply.request_id else {
            self.logger.verbose(format_args!(
                "Reply message missing requestId {}",
                self.kind().as_str()
            ));
            return;
        };
        match self.take_pending(request_id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => self.logger.verbose(format_args!(
                "Invalid request id {request_id} received from {}",
                self.kind().as_str()
            )),
        }
    }

    /// Drop every pending request; their waiters see `ConnectionClosed`.
    fn fail_pending(&self) {
        let dropped: Vec<_> = lock(&self.pending).drain().collect();
        if !dropped.is_empty() {
            debug!(
                component = "client",
                event = "client.pending.dropped",
                connection_id = self.id,
                count = dropped.len(),
                "Dropping pending requests of disconnected client"
            );
        }
    }

    // ── Inbound ─────────────────────────────────────────────────────────

    /// Entry point for every inbound frame, in socket delivery order.
    pub fn handle_text(self: &Arc<Self>, server: &Arc<Server>, text: &str) {
        if self.role.handles_raw_messages() {
            self.handle_raw(server, text);
            return;
        }

        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.logger.log(format_args!(
                    "Error while parsing message from remote {}: {text}",
                    self.kind().as_str()
                ));
                self.logger.error(err);
                return;
            }
        };

        match Command::parse(&envelope.command) {
            Command::Reply => self.resolve_reply(envelope),
            Command::Proxy => self.handle_proxy(server, envelope),
            command => {
                let unhandled = match &self.role {
                    Role::App(app) => app.handle_message(self, server, &command, envelope),
                    _ => Some(envelope),
                };
                if let Some(envelope) = unhandled {
                    self.logger.warn(format_args!(
                        "Invalid message {} for client {}: {}",
                        envelope.command,
                        self.kind().as_str(),
                        text
                    ));
                }
            }
        }
    }

    fn handle_raw(self: &Arc<Self>, server: &Arc<Server>, text: &str) {
        match &self.role {
            Role::Cdt(cdt) => cdt.forward_to_host(self, server, text),
            Role::BrowserCdt(browser) => browser.forward_to_host(self, server, text),
            _ => {}
        }
    }

    /// Forward `message` to another connection; with a `requestId` the
    /// outcome is stitched back to this client as a reply. Only the wait for
    /// that outcome leaves the inbound path.
    fn handle_proxy(self: &Arc<Self>, server: &Arc<Server>, envelope: Envelope) {
        let request_id = envelope.request_id;
        let proxy: Option<ProxyRequest> = envelope.parse_payload().ok();
        let target_id = proxy.as_ref().and_then(|p| p.client_id);
        let target = target_id.and_then(|id| server.client(id));
        let message = proxy.and_then(|p| p.message);

        let (Some(target), Some(message)) = (target, message) else {
            self.logger.verbose(format_args!("Invalid proxy request: {target_id:?}"));
            if request_id.is_some() {
                let err = ServiceError::ClientNotFound(target_id.unwrap_or_default());
                self.notify(&Envelope::error_reply(request_id, err.to_string()));
            }
            return;
        };

        let Some(request_id) = request_id else {
            target.handle_request(server, message);
            return;
        };

        let outcome = target.handle_request_with_reply(server, message);
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let reply = match outcome.await {
                Ok(mut reply) => {
                    reply.request_id = Some(request_id);
                    reply
                }
                Err(err) => {
                    client.logger.verbose(format_args!(
                        "Error while handling proxy request for client {}: {err}",
                        target.id()
                    ));
                    Envelope::error_reply(Some(request_id), err.to_string())
                }
            };
            client.notify(&reply);
        });
    }

    /// Run the role's request handler for `envelope`, or forward it as a
    /// plain request bounded by the proxy timeout.
    ///
    /// Request ids are allocated and frames sent (or plugin work queued)
    /// before this returns; the future only waits for the outcome.
    pub fn handle_request_with_reply(
        self: &Arc<Self>,
        server: &Arc<Server>,
        envelope: Envelope,
    ) -> BoxFuture<'static, Result<Envelope, ServiceError>> {
        if let Role::App(app) = &self.role {
            if Command::parse(&envelope.command) == Command::Plugin {
                let (tx, rx) = oneshot::channel();
                let queued = app.enqueue_plugin(self, server, envelope, Some(tx));
                return async move {
                    queued?;
                    rx.await
                        .unwrap_or(Err(ServiceError::ConnectionClosed(ClientKind::App.as_str())))
                }
                .boxed();
            }
        }

        let pending = self.send_request(envelope);
        let timeout = server.config().proxy_timeout;
        let client_id = self.id;
        async move {
            let pending = pending?;
            match tokio::time::timeout(timeout, pending.recv()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ServiceError::ProxyTimeout {
                    client_id,
                    timeout_ms: timeout.as_millis(),
                }),
            }
        }
        .boxed()
    }

    /// Fire-and-forget counterpart of [`Client::handle_request_with_reply`].
    pub fn handle_request(self: &Arc<Self>, server: &Arc<Server>, envelope: Envelope) {
        match &self.role {
            Role::App(app) if Command::parse(&envelope.command) == Command::Plugin => {
                if let Err(err) = app.enqueue_plugin(self, server, envelope, None) {
                    self.logger.error(format_args!("Plugin request failed: {err}"));
                }
            }
            _ => self.notify(&envelope),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Server-wide event; roles without a handler ignore it.
    pub fn handle_event(self: &Arc<Self>, server: &Arc<Server>, event: &ServerEvent) {
        match &self.role {
            Role::App(app) => app.handle_event(self, event),
            Role::Cli => cli::handle_event(self, event),
            Role::Cdt(cdt) => cdt.handle_event(self, server, event),
            Role::BrowserCdt(browser) => browser.handle_event(self, event),
        }
    }

    /// Runs once the client is in the directory.
    pub(crate) fn handle_registered(self: &Arc<Self>, server: &Arc<Server>) {
        match &self.role {
            Role::Cdt(cdt) => cdt.attach(self, server),
            Role::BrowserCdt(browser) => browser.attach(self, server),
            _ => {}
        }
    }

    /// Runs once when the socket closes, before the client leaves the
    /// directory.
    pub fn handle_disconnect(self: &Arc<Self>, server: &Arc<Server>) {
        match &self.role {
            Role::App(app) => app.handle_disconnect(self),
            Role::Cdt(cdt) => cdt.detach(self, server),
            Role::BrowserCdt(browser) => browser.detach(self, server),
            Role::Cli => {}
        }
        self.fail_pending();
        lock(&self.socket).take();
        self.logger.verbose(format_args!(
            "Server Client Disconnected Type : {}",
            self.kind().as_str()
        ));
    }
}
