//! Host-application client
//!
//! Bridges CLI plugin commands into request/reply exchanges with one running
//! host application, keeps the plugin session registry up to date, and
//! demultiplexes debugger traffic to the clients attached to each plugin.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use uxp_devtools_protocol::{
    AppInfo, Command, DiscoverReply, Envelope, HostAppLogDetails, PluginAction,
    CDT_ENDPOINT_PREFIX,
};

use crate::client::{lock, Client, ClientKind, ConnectionId, PendingReply, Role, ServerEvent};
use crate::error::ServiceError;
use crate::logging::Logger;
use crate::paths::normalize;
use crate::plugin_sessions::PluginSession;
use crate::server::Server;
use crate::{manifest, sandbox};

#[derive(Debug, Default)]
pub(crate) struct AppRole {
    info: Mutex<Option<AppInfo>>,
    /// Parent folders of installed plugins, memoized after the first
    /// successful enumeration.
    production_paths: tokio::sync::Mutex<Option<Vec<PathBuf>>>,
    browser_cdt: Mutex<Option<ConnectionId>>,
    /// Plugin commands for this host run one at a time, in arrival order.
    plugin_queue: Mutex<PluginQueue>,
}

type PluginOutcome = Result<Envelope, ServiceError>;

#[derive(Debug)]
struct PluginJob {
    envelope: Envelope,
    reply: Option<oneshot::Sender<PluginOutcome>>,
}

#[derive(Debug, Default)]
enum PluginQueue {
    #[default]
    Idle,
    Running(mpsc::UnboundedSender<PluginJob>),
    Closed,
}

impl AppRole {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Identity reported by the host; `None` until initialized.
    pub(crate) fn info(&self) -> Option<AppInfo> {
        lock(&self.info).clone()
    }

    pub(crate) fn is_initialized(&self) -> bool {
        lock(&self.info).is_some()
    }

    fn sandboxed_info(&self) -> Option<AppInfo> {
        self.info().filter(|info| info.sandbox)
    }

    // ── Host → service ──────────────────────────────────────────────────

    /// Returns the envelope back when this role has no handler for it.
    pub(crate) fn handle_message(
        &self,
        client: &Arc<Client>,
        server: &Arc<Server>,
        command: &Command,
        envelope: Envelope,
    ) -> Option<Envelope> {
        match command {
            Command::InitRuntimeClient => {
                let request = Envelope::new("App").with("action", "info");
                let pending = client.send_request(request);
                let client = Arc::clone(client);
                let server = Arc::clone(server);
                tokio::spawn(async move {
                    if let Some(app) = client.app() {
                        app.initialize(&client, &server, pending).await;
                    }
                });
            }
            Command::Uxp => self.handle_uxp(client, server, &envelope),
            Command::Cdt => fan_out_cdt(server, &envelope),
            Command::CdtBrowser => self.forward_browser_cdt(server, &envelope),
            _ => return Some(envelope),
        }
        None
    }

    /// Finish the handshake once the `App/info` request sent on
    /// `initRuntimeClient` is answered.
    async fn initialize(
        &self,
        client: &Arc<Client>,
        server: &Arc<Server>,
        pending: Result<PendingReply, ServiceError>,
    ) {
        let logger = client.logger();
        let reply = match pending {
            Ok(pending) => pending.recv().await,
            Err(err) => Err(err),
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                logger.error(format_args!(
                    "WS Error while processing request for App with error {err}"
                ));
                return;
            }
        };
        if let Some(err) = &reply.error {
            logger.error(format_args!("Host application refused App/info: {err}"));
            return;
        }
        let info: AppInfo = match reply.parse_payload() {
            Ok(info) => info,
            Err(err) => {
                logger.error(format_args!("Malformed App/info reply: {err}"));
                return;
            }
        };

        logger.verbose(format_args!(
            "{}({}) connected to service ... ",
            info.app_id, info.app_version
        ));
        *lock(&self.info) = Some(info);
        server.broadcast(ServerEvent::DidAddRuntimeClient(Arc::clone(client)));
    }

    fn handle_uxp(&self, client: &Arc<Client>, server: &Arc<Server>, envelope: &Envelope) {
        match envelope.action() {
            Some("unloaded") => {
                let plugin = envelope
                    .plugin_session_id()
                    .and_then(|host_id| server.sessions().plugin_for_host(host_id).cloned());
                if let Some(plugin) = plugin {
                    end_plugin_session(server, plugin, true);
                }
            }
            Some("log") => {
                let (Some(level), Some(message), Some(info)) = (
                    envelope.get_str("level"),
                    envelope.get_str("message"),
                    self.info(),
                ) else {
                    return;
                };
                server.broadcast(ServerEvent::HostAppLog(HostAppLogDetails {
                    level: level.to_string(),
                    message: message.to_string(),
                    app_info: info.summary(),
                }));
            }
            other => client.logger().verbose(format_args!(
                "Ignoring UXP message with action {other:?}"
            )),
        }
    }

    fn forward_browser_cdt(&self, server: &Arc<Server>, envelope: &Envelope) {
        if envelope.action() != Some("cdtMessage") {
            return;
        }
        let browser_id = *lock(&self.browser_cdt);
        let Some(browser) = browser_id.and_then(|id| server.client(id)) else {
            return;
        };
        if let Some(message) = cdt_message(envelope) {
            browser.notify_raw(message);
        }
    }

    // ── Browser debugger bridge ─────────────────────────────────────────

    pub(crate) fn attach_browser_cdt(&self, app: &Arc<Client>, browser: ConnectionId) {
        *lock(&self.browser_cdt) = Some(browser);
        send_host_notification(
            app,
            Envelope::new("CDTBrowser").with("action", "cdtConnected"),
            "Browser CDTConnected",
        );
    }

    pub(crate) fn detach_browser_cdt(&self, app: &Arc<Client>, browser: ConnectionId) {
        {
            let mut current = lock(&self.browser_cdt);
            if *current == Some(browser) {
                *current = None;
            }
        }
        send_host_notification(
            app,
            Envelope::new("CDTBrowser").with("action", "cdtDisconnected"),
            "Browser CDTDisconnected",
        );
    }

    // ── CLI → host: Plugin requests ─────────────────────────────────────

    /// Queue a Plugin command behind the ones already accepted for this
    /// host. The worker starts with the first command and stops once the
    /// host disconnects.
    pub(crate) fn enqueue_plugin(
        &self,
        client: &Arc<Client>,
        server: &Arc<Server>,
        envelope: Envelope,
        reply: Option<oneshot::Sender<PluginOutcome>>,
    ) -> Result<(), ServiceError> {
        let closed = || ServiceError::ConnectionClosed(ClientKind::App.as_str());
        let mut queue = lock(&self.plugin_queue);
        let jobs = match &*queue {
            PluginQueue::Running(jobs) => jobs.clone(),
            PluginQueue::Closed => return Err(closed()),
            PluginQueue::Idle => {
                let (jobs, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_plugin_queue(
                    Arc::downgrade(client),
                    Arc::downgrade(server),
                    rx,
                ));
                *queue = PluginQueue::Running(jobs.clone());
                jobs
            }
        };
        jobs.send(PluginJob { envelope, reply }).map_err(|_| closed())
    }

    pub(crate) async fn handle_plugin(
        &self,
        client: &Arc<Client>,
        server: &Arc<Server>,
        envelope: Envelope,
    ) -> Result<Envelope, ServiceError> {
        let action = PluginAction::parse(envelope.action().unwrap_or_default());
        match action {
            PluginAction::Load => self.load(client, server, envelope, None).await,
            PluginAction::List => {
                client
                    .request_with_timeout("refresh list", envelope, server.config().list_timeout)
                    .await
            }
            PluginAction::Debug => debug_urls(server, &envelope),
            PluginAction::Unload => self.unload(client, server, envelope).await,
            PluginAction::Validate => self.validate(client, server, envelope).await,
            PluginAction::Reload => self.reload(client, server, envelope).await,
            _ => {
                let request = with_host_session(server, envelope)?;
                client.request(request).await
            }
        }
    }

    /// Load a plugin from disk. `existing_session_id` keeps the caller's
    /// session id across an unload+load reload.
    async fn load(
        &self,
        client: &Arc<Client>,
        server: &Arc<Server>,
        mut envelope: Envelope,
        existing_session_id: Option<String>,
    ) -> Result<Envelope, ServiceError> {
        let app_info = self.info().ok_or(ServiceError::AppNotInitialized)?;
        let installed = self.production_paths(client, server).await;
        let plugin_path = envelope
            .provider_path()
            .map(str::to_owned)
            .ok_or(ServiceError::MissingPluginPath)?;

        if is_installed_plugin(Path::new(&plugin_path), &installed) {
            return Err(ServiceError::InstalledPluginProhibited);
        }

        let plugin_id = manifest::plugin_id(Path::new(&plugin_path));
        if app_info.sandbox {
            let staged = sandbox::staged_plugin_path(&app_info, Path::new(&plugin_path), &plugin_id);
            envelope.set_provider_path(staged.to_string_lossy());
        }

        let mut reply = client
            .request_with_timeout("load", envelope, server.config().load_timeout)
            .await?;
        let Some(host_session_id) = reply.plugin_session_id().map(str::to_owned) else {
            return Ok(reply);
        };

        let session_id = server.sessions().add_plugin(
            plugin_id,
            plugin_path,
            host_session_id,
            app_info,
            existing_session_id,
        );
        reply.set_plugin_session_id(session_id);
        Ok(reply)
    }

    async fn production_paths(&self, client: &Arc<Client>, server: &Arc<Server>) -> Vec<PathBuf> {
        let mut cached = self.production_paths.lock().await;
        if let Some(paths) = cached.as_ref() {
            return paths.clone();
        }

        let request = Envelope::new("Plugin").with("action", "discover");
        let reply = client
            .request_with_timeout("discover", request, server.config().load_timeout)
            .await;
        let reply = match reply {
            Ok(reply) if !reply.is_error() => reply,
            Ok(reply) => {
                client.logger().error(format_args!(
                    "Couldn't retrieve installed plugins from host application. {}",
                    reply.error.unwrap_or_default()
                ));
                return Vec::new();
            }
            Err(err) => {
                client.logger().error(format_args!(
                    "Couldn't retrieve installed plugins from host application. {err}"
                ));
                return Vec::new();
            }
        };

        let discovered: DiscoverReply = reply.parse_payload().unwrap_or_default();
        let mut paths: Vec<PathBuf> = Vec::new();
        for path in discovered.plugins.into_iter().filter_map(|plugin| plugin.path) {
            let Some(parent) = Path::new(&path).parent().map(normalize) else {
                continue;
            };
            if parent.parent().is_some() && !paths.contains(&parent) {
                paths.push(parent);
            }
        }
        *cached = Some(paths.clone());
        paths
    }

    async fn unload(
        &self,
        client: &Arc<Client>,
        server: &Arc<Server>,
        envelope: Envelope,
    ) -> Result<Envelope, ServiceError> {
        let client_session_id = envelope
            .plugin_session_id()
            .map(str::to_owned)
            .ok_or(ServiceError::NoPluginSession)?;
        let request = with_host_session(server, envelope)?;
        let host_session_id = request.plugin_session_id().map(str::to_owned);

        let mut reply = client.request(request).await?;
        if !reply.is_error() {
            let plugin = host_session_id
                .as_deref()
                .and_then(|host_id| server.sessions().plugin_for_host(host_id).cloned());
            if let Some(plugin) = plugin {
                end_plugin_session(server, plugin, true);
            }
        }
        reply.set_plugin_session_id(client_session_id);
        Ok(reply)
    }

    async fn validate(
        &self,
        client: &Arc<Client>,
        _server: &Arc<Server>,
        mut envelope: Envelope,
    ) -> Result<Envelope, ServiceError> {
        if let Some(app_info) = self.sandboxed_info() {
            if let Some(source) = envelope.provider_path().map(PathBuf::from) {
                let plugin_id = manifest::plugin_id(&source);
                let staged = sandbox::staged_plugin_path(&app_info, &source, &plugin_id);
                stage_in_sandbox(client.logger(), source, staged.clone()).await?;
                envelope.set_provider_path(staged.to_string_lossy());
            }
        }
        client.request(envelope).await
    }

    async fn reload(
        &self,
        client: &Arc<Client>,
        server: &Arc<Server>,
        envelope: Envelope,
    ) -> Result<Envelope, ServiceError> {
        let client_session_id = envelope
            .plugin_session_id()
            .map(str::to_owned)
            .ok_or(ServiceError::NoPluginSession)?;
        let plugin = server
            .sessions()
            .plugin_for_session(&client_session_id)
            .cloned()
            .ok_or(ServiceError::NoPluginSession)?;

        if let Some(app_info) = self.sandboxed_info() {
            let source = PathBuf::from(&plugin.plugin_path);
            let staged = sandbox::staged_plugin_path(&app_info, &source, &plugin.plugin_id);
            stage_in_sandbox(client.logger(), source, staged).await?;
        }

        if server.features().is_reload_supported(&plugin.app_info) {
            let request = with_host_session(server, envelope)?;
            return client.request(request).await;
        }

        // Hosts that cannot reload get an unload followed by a fresh load
        // under the caller's session id.
        let unload = Envelope::new("Plugin")
            .with("action", "unload")
            .with("pluginSessionId", plugin.host_session_id.clone());
        let unload_reply = client.request(unload).await?;
        if let Some(err) = &unload_reply.error {
            client.logger().warn(format_args!(
                "Unload before reload of {} failed: {err}",
                plugin.plugin_id
            ));
        }
        let current = server
            .sessions()
            .plugin_for_host(&plugin.host_session_id)
            .cloned();
        if let Some(current) = current {
            end_plugin_session(server, current, false);
        }

        let load = load_request_for(&plugin);
        self.load(client, server, load, Some(client_session_id)).await
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    pub(crate) fn handle_event(&self, client: &Arc<Client>, event: &ServerEvent) {
        if let ServerEvent::AppQuit = event {
            self.cleanup_sandbox(client.logger());
        }
    }

    pub(crate) fn handle_disconnect(&self, client: &Arc<Client>) {
        *lock(&self.plugin_queue) = PluginQueue::Closed;
        if let Some(info) = self.info() {
            client.logger().verbose(format_args!(
                "{}({}) got disconnected from service.",
                info.app_id, info.app_version
            ));
        }
        self.cleanup_sandbox(client.logger());
    }

    fn cleanup_sandbox(&self, logger: &Logger) {
        if let Some(info) = self.sandboxed_info() {
            if let Err(err) = sandbox::cleanup(&info) {
                logger.error(format_args!("Failed to clean up sandbox storage: {err}"));
            }
        }
    }
}

async fn run_plugin_queue(
    host: Weak<Client>,
    service: Weak<Server>,
    mut jobs: mpsc::UnboundedReceiver<PluginJob>,
) {
    while let Some(PluginJob { envelope, reply }) = jobs.recv().await {
        let (Some(client), Some(server)) = (host.upgrade(), service.upgrade()) else {
            break;
        };
        let Some(app) = client.app() else {
            break;
        };
        let timeout = server.config().proxy_timeout;
        let outcome = tokio::time::timeout(timeout, app.handle_plugin(&client, &server, envelope))
            .await
            .unwrap_or_else(|_| {
                Err(ServiceError::ProxyTimeout {
                    client_id: client.id(),
                    timeout_ms: timeout.as_millis(),
                })
            });
        match reply {
            Some(reply) => {
                let _ = reply.send(outcome);
            }
            None => {
                if let Err(err) = outcome {
                    client.logger().error(format_args!("Plugin request failed: {err}"));
                }
            }
        }
    }
}

/// Tell the host that the first debugger attached to a plugin, or that the
/// last one left.
pub(crate) fn notify_plugin_cdt(app: &Arc<Client>, host_session_id: &str, connected: bool) {
    let (action, label) = if connected {
        ("cdtConnected", "Plugin CDTConnected")
    } else {
        ("cdtDisconnected", "Plugin CDTDisconnected")
    };
    send_host_notification(
        app,
        Envelope::new("Plugin")
            .with("action", action)
            .with("pluginSessionId", host_session_id),
        label,
    );
}

/// Send a request whose reply only matters for logging.
fn send_host_notification(app: &Arc<Client>, request: Envelope, label: &'static str) {
    let pending = match app.send_request(request) {
        Ok(pending) => pending,
        Err(err) => {
            app.logger()
                .error(format_args!("{label} message failed with error {err}"));
            return;
        }
    };
    let logger = app.logger().clone();
    tokio::spawn(async move {
        match pending.recv().await {
            Ok(reply) => {
                if let Some(err) = reply.error {
                    logger.error(format_args!("{label} message failed with error {err}"));
                }
            }
            Err(err) => logger.error(format_args!("{label} message failed with error {err}")),
        }
    });
}

/// Close every debugger attached to `plugin`, drop the session and,
/// optionally, announce the removal.
fn end_plugin_session(server: &Arc<Server>, plugin: PluginSession, broadcast: bool) {
    for id in &plugin.cdt_clients {
        let Some(cdt) = server.client(*id) else {
            continue;
        };
        if let Role::Cdt(role) = cdt.role() {
            role.host_plugin_unloaded(&cdt, server);
        }
    }
    server.sessions().remove_plugin(&plugin.host_session_id);
    if broadcast {
        server.broadcast(ServerEvent::DidPluginUnloaded(plugin.info()));
    }
}

/// Broadcast a host CDT frame verbatim to every debugger on that plugin.
fn fan_out_cdt(server: &Arc<Server>, envelope: &Envelope) {
    let Some(message) = cdt_message(envelope) else {
        return;
    };
    let targets: Vec<ConnectionId> = match envelope.plugin_session_id() {
        Some(host_id) => server
            .sessions()
            .plugin_for_host(host_id)
            .map(|plugin| plugin.cdt_clients.iter().copied().collect())
            .unwrap_or_default(),
        None => return,
    };
    for id in targets {
        if let Some(cdt) = server.client(id) {
            cdt.notify_raw(message.clone());
        }
    }
}

fn cdt_message(envelope: &Envelope) -> Option<String> {
    match envelope.get("cdtMessage")? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Replace the client-visible session id with the host-assigned one.
fn with_host_session(server: &Server, mut envelope: Envelope) -> Result<Envelope, ServiceError> {
    let host_session_id = envelope
        .plugin_session_id()
        .and_then(|id| {
            server
                .sessions()
                .plugin_for_session(id)
                .map(|plugin| plugin.host_session_id.clone())
        })
        .ok_or(ServiceError::NoPluginSession)?;
    envelope.set_plugin_session_id(host_session_id);
    Ok(envelope)
}

fn debug_urls(server: &Server, envelope: &Envelope) -> Result<Envelope, ServiceError> {
    let client_session_id = envelope
        .plugin_session_id()
        .ok_or(ServiceError::NoPluginSession)?;
    if server.sessions().plugin_for_session(client_session_id).is_none() {
        return Err(ServiceError::NoPluginSession);
    }

    let cdt_url = format!(
        "{}{CDT_ENDPOINT_PREFIX}{client_session_id}",
        server.local_hostname()
    );
    Ok(Envelope::reply(None)
        .with("wsdebugUrl", format!("ws={cdt_url}"))
        .with(
            "chromeDevToolsUrl",
            format!("devtools://devtools/bundled/inspector.html?experiments=true&ws={cdt_url}"),
        ))
}

fn load_request_for(plugin: &PluginSession) -> Envelope {
    Envelope::new("Plugin")
        .with("action", "load")
        .with(
            "params",
            json!({
                "provider": {
                    "type": "disk",
                    "id": plugin.plugin_id,
                    "path": plugin.plugin_path,
                }
            }),
        )
        .with("breakOnStart", false)
}

fn is_installed_plugin(plugin_path: &Path, production_paths: &[PathBuf]) -> bool {
    let plugin_path = normalize(plugin_path);
    production_paths
        .iter()
        .any(|base| plugin_path.starts_with(base))
}

async fn stage_in_sandbox(
    logger: &Logger,
    source: PathBuf,
    staged: PathBuf,
) -> Result<(), ServiceError> {
    let result = tokio::task::spawn_blocking(move || sandbox::stage(&source, &staged))
        .await
        .unwrap_or_else(|err| Err(io::Error::other(err)));
    result.map_err(|err| {
        logger.error(format_args!("Error copying plugin to sandbox storage {err}"));
        ServiceError::SandboxCopy(err)
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::{Outbound, NORMAL_CLOSURE};
    use crate::config::ServiceConfig;
    use crate::server::tests::{connect, connect_app, reply_to, TestSocket};

    fn new_server() -> Arc<Server> {
        let server = Server::new(ServiceConfig::default(), Logger::new());
        server.set_port(14001);
        server
    }

    async fn connect_cli(server: &Arc<Server>) -> TestSocket {
        let mut cli = connect(server, "/socket/cli");
        loop {
            if cli.recv().await.command == "didCompleteConnection" {
                return cli;
            }
        }
    }

    fn proxy(cli: &TestSocket, server: &Arc<Server>, request_id: u64, app: &TestSocket, message: Value) {
        let frame = json!({
            "command": "proxy",
            "requestId": request_id,
            "clientId": app.id(),
            "message": message,
        });
        cli.send(server, &frame.to_string());
    }

    fn load_message(path: &str) -> Value {
        json!({
            "command": "Plugin",
            "action": "load",
            "params": {"provider": {"type": "disk", "path": path}},
            "breakOnStart": false,
        })
    }

    /// Answer the installed-plugin enumeration with `installed` paths.
    async fn answer_discover(app: &mut TestSocket, server: &Arc<Server>, installed: &[&str]) {
        let discover = app.recv().await;
        assert_eq!(discover.action(), Some("discover"));
        let plugins: Vec<Value> = installed.iter().map(|path| json!({"path": path})).collect();
        app.send(server, &reply_to(&discover, json!({"plugins": plugins})));
    }

    /// Drive a load through the proxy and return the client-visible id.
    async fn load_plugin(
        cli: &mut TestSocket,
        app: &mut TestSocket,
        server: &Arc<Server>,
        host_session_id: &str,
    ) -> String {
        proxy(cli, server, 100, app, load_message("/work/com.a"));
        // Only the first load enumerates installed plugins.
        let mut request = app.recv().await;
        if request.action() == Some("discover") {
            app.send(server, &reply_to(&request, json!({"plugins": []})));
            request = app.recv().await;
        }
        assert_eq!(request.action(), Some("load"));
        app.send(server, &reply_to(&request, json!({"pluginSessionId": host_session_id})));
        let reply = cli.recv().await;
        assert_eq!(reply.request_id, Some(100));
        assert!(!reply.is_error(), "load failed: {:?}", reply.error);
        reply.plugin_session_id().expect("session id").to_string()
    }

    #[tokio::test]
    async fn load_registers_plugin_session() {
        let server = new_server();
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;

        let sid = load_plugin(&mut cli, &mut app, &server, "host-1").await;

        assert_eq!(sid, "host-1");
        let sessions = server.sessions();
        let plugin = sessions.plugin_for_session(&sid).expect("plugin session");
        assert_eq!(plugin.plugin_path, "/work/com.a");
        assert_eq!(plugin.app_info.app_id, "PS");
    }

    #[tokio::test]
    async fn installed_plugins_cannot_be_loaded() {
        let server = new_server();
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;

        proxy(&cli, &server, 5, &app, load_message("/Installed/Plugins/com.a"));
        answer_discover(&mut app, &server, &["/Installed/Plugins/com.a"]).await;

        let reply = cli.recv().await;
        assert_eq!(reply.request_id, Some(5));
        assert!(reply
            .error
            .as_deref()
            .is_some_and(|e| e.ends_with("loading and debugging of installed plugins is prohibited.")));
        tokio::task::yield_now().await;
        app.assert_idle();

        // The enumeration is memoized: a second attempt never reaches the host.
        proxy(&cli, &server, 6, &app, load_message("/Installed/Plugins/com.b"));
        let reply = cli.recv().await;
        assert!(reply.is_error());
        app.assert_idle();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_host_times_out_load() {
        let server = new_server();
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;

        proxy(&cli, &server, 9, &app, load_message("/work/com.a"));
        assert_eq!(app.recv().await.action(), Some("discover"));
        assert_eq!(app.recv().await.action(), Some("load"));

        let reply = cli.recv().await;
        assert_eq!(reply.request_id, Some(9));
        assert!(reply
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("Plugin load timed out.")));
        assert_eq!(app.client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn session_commands_without_session_fail_locally() {
        let server = new_server();
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;

        for (request_id, action) in [(1, "debug"), (2, "unload"), (3, "reload"), (4, "discover")] {
            proxy(
                &cli,
                &server,
                request_id,
                &app,
                json!({"command": "Plugin", "action": action, "pluginSessionId": "nope"}),
            );
            let reply = cli.recv().await;
            assert_eq!(reply.request_id, Some(request_id));
            assert!(reply
                .error
                .as_deref()
                .is_some_and(|e| e.starts_with("No valid session present at the CLI Service")));
        }
        app.assert_idle();
    }

    #[tokio::test]
    async fn debug_url_round_trips_to_cdt_client() {
        let server = new_server();
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;
        let sid = load_plugin(&mut cli, &mut app, &server, "host-7").await;

        proxy(
            &cli,
            &server,
            11,
            &app,
            json!({"command": "Plugin", "action": "debug", "pluginSessionId": sid}),
        );
        let reply = cli.recv().await;
        let ws_url = reply.get_str("wsdebugUrl").expect("ws url");
        assert_eq!(ws_url, format!("ws=127.0.0.1:14001/socket/cdt/{sid}"));
        assert_eq!(
            reply.get_str("chromeDevToolsUrl"),
            Some(
                format!("devtools://devtools/bundled/inspector.html?experiments=true&ws=127.0.0.1:14001/socket/cdt/{sid}")
                    .as_str()
            )
        );
        app.assert_idle();

        let path = ws_url.trim_start_matches("ws=127.0.0.1:14001");
        let mut cdt = connect(&server, path);
        let connected = app.recv().await;
        assert_eq!(connected.action(), Some("cdtConnected"));
        assert_eq!(connected.plugin_session_id(), Some("host-7"));

        cdt.send(&server, r#"{"id":1,"method":"Runtime.enable"}"#);
        let wrapped = app.recv().await;
        assert_eq!(wrapped.command, "CDT");
        assert_eq!(wrapped.plugin_session_id(), Some("host-7"));
        assert_eq!(
            wrapped.get_str("cdtMessage"),
            Some(r#"{"id":1,"method":"Runtime.enable"}"#)
        );
        cdt.assert_idle();
    }

    #[tokio::test]
    async fn cdt_traffic_fans_out_and_notifies_first_and_last() {
        let server = new_server();
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;
        let sid = load_plugin(&mut cli, &mut app, &server, "host-1").await;

        let mut first = connect(&server, &format!("/socket/cdt/{sid}"));
        assert_eq!(app.recv().await.action(), Some("cdtConnected"));
        let mut second = connect(&server, &format!("/socket/cdt/{sid}"));
        app.assert_idle();

        let frame = r#"{"id":1,"result":{}}"#;
        app.send(
            &server,
            &json!({"command": "CDT", "pluginSessionId": "host-1", "cdtMessage": frame}).to_string(),
        );
        assert_eq!(first.recv_raw().await, frame);
        assert_eq!(second.recv_raw().await, frame);

        server.unregister(&first.client);
        tokio::task::yield_now().await;
        app.assert_idle();

        server.unregister(&second.client);
        let disconnected = app.recv().await;
        assert_eq!(disconnected.action(), Some("cdtDisconnected"));
        assert_eq!(disconnected.plugin_session_id(), Some("host-1"));
    }

    #[tokio::test]
    async fn reload_falls_back_to_unload_and_load() {
        let server = new_server();
        let mut app = connect_app(&server, "XD", "36.0.1").await;
        let mut cli = connect_cli(&server).await;
        let sid = load_plugin(&mut cli, &mut app, &server, "xd-1").await;

        proxy(
            &cli,
            &server,
            30,
            &app,
            json!({"command": "Plugin", "action": "reload", "pluginSessionId": sid}),
        );
        let unload = app.recv().await;
        assert_eq!(unload.action(), Some("unload"));
        assert_eq!(unload.plugin_session_id(), Some("xd-1"));
        app.send(&server, &reply_to(&unload, json!({})));

        let load = app.recv().await;
        assert_eq!(load.action(), Some("load"));
        assert_eq!(load.provider_path(), Some("/work/com.a"));
        app.send(&server, &reply_to(&load, json!({"pluginSessionId": "xd-2"})));

        let reply = cli.recv().await;
        assert_eq!(reply.request_id, Some(30));
        assert_eq!(reply.plugin_session_id(), Some(sid.as_str()));
        let sessions = server.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions.host_session_id(&sid), Some("xd-2"));
    }

    #[tokio::test]
    async fn reload_is_forwarded_when_supported() {
        let server = new_server();
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;
        let sid = load_plugin(&mut cli, &mut app, &server, "ps-1").await;

        proxy(
            &cli,
            &server,
            31,
            &app,
            json!({"command": "Plugin", "action": "reload", "pluginSessionId": sid}),
        );
        let reload = app.recv().await;
        assert_eq!(reload.action(), Some("reload"));
        assert_eq!(reload.plugin_session_id(), Some("ps-1"));
        app.send(&server, &reply_to(&reload, json!({})));
        assert_eq!(cli.recv().await.request_id, Some(31));
    }

    #[tokio::test]
    async fn unload_ends_debugging_and_is_idempotent() {
        let server = new_server();
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;
        let sid = load_plugin(&mut cli, &mut app, &server, "host-1").await;
        let mut cdt = connect(&server, &format!("/socket/cdt/{sid}"));
        app.recv().await;

        let unload = json!({"command": "Plugin", "action": "unload", "pluginSessionId": sid});
        proxy(&cli, &server, 40, &app, unload.clone());
        let forwarded = app.recv().await;
        assert_eq!(forwarded.plugin_session_id(), Some("host-1"));
        app.send(&server, &reply_to(&forwarded, json!({})));

        let unloaded = cli.recv().await;
        assert_eq!(unloaded.command, "didPluginUnloaded");
        assert_eq!(unloaded.payload["plugin"]["pluginPath"], "/work/com.a");
        let reply = cli.recv().await;
        assert_eq!(reply.request_id, Some(40));
        assert_eq!(reply.plugin_session_id(), Some(sid.as_str()));
        assert_eq!(
            cdt.recv_frame().await,
            Outbound::Close {
                code: NORMAL_CLOSURE,
                reason: String::new()
            }
        );
        assert!(server.sessions().is_empty());

        proxy(&cli, &server, 41, &app, unload);
        let again = cli.recv().await;
        assert_eq!(again.request_id, Some(41));
        assert!(again.is_error());
        app.assert_idle();
    }

    #[tokio::test]
    async fn host_unloaded_and_log_messages_are_broadcast() {
        let server = new_server();
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;
        load_plugin(&mut cli, &mut app, &server, "host-1").await;

        app.send(
            &server,
            r#"{"command":"UXP","action":"log","level":"warn","message":"low memory"}"#,
        );
        let log = cli.recv().await;
        assert_eq!(log.command, "hostAppLog");
        assert_eq!(log.payload["details"]["message"], "low memory");
        assert_eq!(log.payload["details"]["appInfo"]["appId"], "PS");

        app.send(
            &server,
            r#"{"command":"UXP","action":"unloaded","pluginSessionId":"host-1"}"#,
        );
        assert_eq!(cli.recv().await.command, "didPluginUnloaded");
        assert!(server.sessions().is_empty());
    }

    #[tokio::test]
    async fn app_disconnect_closes_attached_debuggers() {
        let server = new_server();
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;
        let sid = load_plugin(&mut cli, &mut app, &server, "host-1").await;
        let mut cdt = connect(&server, &format!("/socket/cdt/{sid}"));

        server.unregister(&app.client);

        assert!(matches!(cdt.recv_frame().await, Outbound::Close { .. }));
        assert_eq!(cli.recv().await.command, "didRemoveRuntimeClient");
    }

    #[tokio::test]
    async fn browser_debugger_bridges_raw_frames() {
        let server = new_server();
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut browser = connect(&server, "/socket/browser_cdt/?adobe-uxp-app-id=PS");
        assert_eq!(app.recv().await.action(), Some("cdtConnected"));

        browser.send(&server, r#"{"id":3,"method":"Target.getTargets"}"#);
        let wrapped = app.recv().await;
        assert_eq!(wrapped.command, "CDTBrowser");
        assert_eq!(wrapped.action(), Some("cdtMessage"));

        app.send(
            &server,
            &json!({"command": "CDTBrowser", "action": "cdtMessage", "cdtMessage": "{\"id\":3}"})
                .to_string(),
        );
        assert_eq!(browser.recv_raw().await, r#"{"id":3}"#);

        server.unregister(&browser.client);
        assert_eq!(app.recv().await.action(), Some("cdtDisconnected"));
    }

    #[tokio::test]
    async fn sandboxed_validate_stages_files_first() {
        let source = tempfile::tempdir().expect("source");
        let storage = tempfile::tempdir().expect("storage");
        std::fs::write(source.path().join("manifest.json"), r#"{"id":"com.sb"}"#).expect("manifest");

        let server = new_server();
        let mut app = connect(&server, "/socket/other");
        app.recv().await;
        app.send(&server, r#"{"command":"initRuntimeClient"}"#);
        let info = app.recv().await;
        app.send(
            &server,
            &reply_to(
                &info,
                json!({
                    "appId": "XD",
                    "appVersion": "40.0",
                    "sandbox": true,
                    "sandboxStoragePath": storage.path(),
                }),
            ),
        );
        while app.client.app().is_some_and(|role| !role.is_initialized()) {
            tokio::task::yield_now().await;
        }
        let mut cli = connect_cli(&server).await;

        proxy(
            &cli,
            &server,
            50,
            &app,
            json!({
                "command": "Plugin",
                "action": "validate",
                "params": {"provider": {"type": "disk", "path": source.path()}},
            }),
        );
        let validate = app.recv().await;
        let staged = PathBuf::from(validate.provider_path().expect("staged path"));
        assert!(staged.starts_with(storage.path().join("UDTPlugins")));
        assert!(staged.to_string_lossy().ends_with("_com.sb"));
        assert!(staged.join("manifest.json").is_file());
        app.send(&server, &reply_to(&validate, json!({})));
        assert_eq!(cli.recv().await.request_id, Some(50));

        server.unregister(&app.client);
        assert!(!staged.exists());
        assert!(storage.path().join("UDTPlugins").is_dir());
    }

    #[tokio::test(start_paused = true)]
    async fn list_uses_its_own_timeout() {
        let server = new_server();
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;

        proxy(&cli, &server, 60, &app, json!({"command": "Plugin", "action": "list"}));
        assert_eq!(app.recv().await.action(), Some("list"));
        let started = tokio::time::Instant::now();
        let reply = cli.recv().await;

        assert!(reply
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("Plugin refresh list timed out.")));
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert!(started.elapsed() < Duration::from_millis(5000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn proxied_requests_reach_the_host_in_arrival_order() {
        let server = new_server();
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;

        for seq in 0..500 {
            let frame = json!({
                "command": "proxy",
                "clientId": app.id(),
                "message": {"command": "App", "action": "ping", "seq": seq},
            });
            cli.send(&server, &frame.to_string());
        }
        for seq in 0..500 {
            assert_eq!(app.recv().await.get("seq"), Some(&json!(seq)));
        }

        for seq in 0..16u64 {
            proxy(
                &cli,
                &server,
                200 + seq,
                &app,
                json!({"command": "Plugin", "action": "list", "seq": seq}),
            );
        }
        let mut last_request_id = 0;
        for seq in 0..16u64 {
            let list = app.recv().await;
            assert_eq!(list.get("seq"), Some(&json!(seq)));
            let request_id = list.request_id.expect("request id");
            assert!(request_id > last_request_id);
            last_request_id = request_id;
            app.send(&server, &reply_to(&list, json!({"plugins": []})));
        }
        let mut replied = Vec::new();
        for _ in 0..16 {
            replied.push(cli.recv().await.request_id.expect("request id"));
        }
        replied.sort_unstable();
        assert_eq!(replied, (200..216).collect::<Vec<u64>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn handshake_request_precedes_later_traffic() {
        let server = new_server();
        let mut app = connect(&server, "/socket/other");
        assert_eq!(app.recv().await.command, "ready");
        let cli = connect(&server, "/socket/cli");

        app.send(&server, r#"{"command":"initRuntimeClient"}"#);
        let ping = json!({
            "command": "proxy",
            "clientId": app.id(),
            "message": {"command": "App", "action": "ping"},
        });
        cli.send(&server, &ping.to_string());

        let info = app.recv().await;
        assert_eq!(info.action(), Some("info"));
        assert_eq!(info.request_id, Some(1));
        assert_eq!(app.recv().await.action(), Some("ping"));
    }

    #[tokio::test(start_paused = true)]
    async fn proxy_timeout_releases_pending_requests() {
        let config = ServiceConfig {
            proxy_timeout: Duration::from_secs(1),
            ..ServiceConfig::default()
        };
        let server = Server::new(config, Logger::new());
        let mut app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;

        proxy(
            &cli,
            &server,
            70,
            &app,
            json!({
                "command": "Plugin",
                "action": "validate",
                "params": {"provider": {"type": "disk", "path": "/work/com.a"}},
            }),
        );
        proxy(&cli, &server, 71, &app, json!({"command": "App", "action": "busy"}));
        let mut forwarded = Vec::new();
        for _ in 0..2 {
            forwarded.push(app.recv().await.action().map(str::to_owned));
        }
        forwarded.sort();
        assert_eq!(forwarded, [Some("busy".to_string()), Some("validate".to_string())]);
        assert_eq!(app.client.pending_requests(), 2);

        let mut replied = Vec::new();
        for _ in 0..2 {
            let reply = cli.recv().await;
            let err = reply.error.as_deref().expect("timeout error");
            assert!(err.starts_with(&format!("Request to client {} timed out", app.id())));
            replied.push(reply.request_id.expect("request id"));
        }
        replied.sort_unstable();
        assert_eq!(replied, [70, 71]);
        assert_eq!(app.client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn plugin_commands_after_disconnect_fail() {
        let server = new_server();
        let app = connect_app(&server, "PS", "25.0").await;
        let mut cli = connect_cli(&server).await;

        app.client.handle_disconnect(&server);
        proxy(&cli, &server, 80, &app, json!({"command": "Plugin", "action": "list"}));

        let reply = cli.recv().await;
        assert_eq!(reply.request_id, Some(80));
        assert_eq!(
            reply.error.as_deref(),
            Some("Connection to app closed before a reply arrived")
        );
    }

    #[test]
    fn installed_plugin_guard_matches_descendants_only() {
        let bases = vec![PathBuf::from("/Library/Plugins")];
        assert!(is_installed_plugin(Path::new("/Library/Plugins/com.a"), &bases));
        assert!(is_installed_plugin(
            Path::new("/Library/Other/../Plugins/com.a"),
            &bases
        ));
        assert!(!is_installed_plugin(Path::new("/Library/PluginsDev/com.a"), &bases));
        assert!(!is_installed_plugin(Path::new("/work/com.a"), &[]));
    }

    #[test]
    fn cdt_message_accepts_text_or_json() {
        let text = Envelope::new("CDT").with("cdtMessage", r#"{"id":1}"#);
        assert_eq!(cdt_message(&text).as_deref(), Some(r#"{"id":1}"#));

        let object = Envelope::new("CDT").with("cdtMessage", json!({"id": 2}));
        assert_eq!(cdt_message(&object).as_deref(), Some(r#"{"id":2}"#));

        assert_eq!(cdt_message(&Envelope::new("CDT")), None);
    }

    #[test]
    fn fallback_load_request_targets_plugin_source() {
        let plugin = PluginSession {
            plugin_id: "com.a".into(),
            plugin_path: "/src/a".into(),
            host_session_id: "h1".into(),
            app_info: AppInfo::default(),
            cdt_clients: Default::default(),
        };
        let load = load_request_for(&plugin);
        assert_eq!(load.action(), Some("load"));
        assert_eq!(load.provider_path(), Some("/src/a"));
        assert_eq!(load.get("breakOnStart"), Some(&Value::Bool(false)));
        assert_eq!(load.payload["params"]["provider"]["id"], "com.a");
    }
}
