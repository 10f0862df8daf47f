//! Plugin-scoped debugger client (`/socket/cdt/<clientSessionId>`).

use std::sync::{Arc, Mutex};

use serde_json::json;
use uxp_devtools_protocol::Envelope;

use super::app::notify_plugin_cdt;
use super::NO_DEBUG_TARGET;
use crate::client::{lock, Client, ClientKind, ConnectionId, ServerEvent, NORMAL_CLOSURE};
use crate::server::Server;

#[derive(Debug, Clone)]
struct CdtLink {
    app: ConnectionId,
    host_session_id: String,
}

#[derive(Debug)]
pub(crate) struct CdtRole {
    client_session_id: String,
    link: Mutex<Option<CdtLink>>,
}

impl CdtRole {
    /// Resolve the plugin session named by the last path segment of `url`
    /// and the host application that owns it.
    pub(crate) fn resolve(server: &Server, url: &str) -> Result<Self, &'static str> {
        let path = url.split('?').next().unwrap_or_default();
        let client_session_id = path.rsplit('/').next().unwrap_or_default().to_string();

        let plugin = server
            .sessions()
            .plugin_for_session(&client_session_id)
            .map(|plugin| (plugin.host_session_id.clone(), plugin.app_info.clone()));
        let (host_session_id, app_info) = plugin.ok_or(NO_DEBUG_TARGET)?;
        let app = server.app_client_for(&app_info).ok_or(NO_DEBUG_TARGET)?;

        Ok(Self {
            client_session_id,
            link: Mutex::new(Some(CdtLink {
                app: app.id(),
                host_session_id,
            })),
        })
    }

    pub(crate) fn client_session_id(&self) -> &str {
        &self.client_session_id
    }

    fn link(&self) -> Option<CdtLink> {
        lock(&self.link).clone()
    }

    /// Join the plugin's debugger set; the first debugger in tells the host.
    pub(crate) fn attach(&self, client: &Arc<Client>, server: &Arc<Server>) {
        let Some(link) = self.link() else {
            return;
        };
        let attached = server
            .sessions()
            .attach_cdt(&link.host_session_id, client.id());
        if attached == Some(1) {
            if let Some(app) = server.client(link.app) {
                notify_plugin_cdt(&app, &link.host_session_id, true);
            }
        }
    }

    pub(crate) fn forward_to_host(&self, client: &Arc<Client>, server: &Arc<Server>, raw: &str) {
        let target = self
            .link()
            .and_then(|link| server.client(link.app).map(|app| (app, link.host_session_id)));
        match target {
            Some((app, host_session_id)) => app.notify(
                &Envelope::new("CDT")
                    .with("pluginSessionId", host_session_id)
                    .with("cdtMessage", raw),
            ),
            None => client.notify_raw(json!({ "error": NO_DEBUG_TARGET }).to_string()),
        }
    }

    pub(crate) fn handle_event(&self, client: &Arc<Client>, server: &Arc<Server>, event: &ServerEvent) {
        let ServerEvent::ClientDidDisconnect(other) = event else {
            return;
        };
        let owner_left = other.kind() == ClientKind::App
            && self.link().is_some_and(|link| link.app == other.id());
        if owner_left {
            self.host_plugin_unloaded(client, server);
        }
    }

    /// The plugin or its host went away: end this debugging session.
    pub(crate) fn host_plugin_unloaded(&self, client: &Arc<Client>, server: &Arc<Server>) {
        let link = lock(&self.link).take();
        if let Some(link) = link {
            server
                .sessions()
                .detach_cdt(&link.host_session_id, client.id());
        }
        client.close(NORMAL_CLOSURE, "");
    }

    /// Leave the debugger set; the last debugger out tells the host.
    pub(crate) fn detach(&self, client: &Arc<Client>, server: &Arc<Server>) {
        let Some(link) = lock(&self.link).take() else {
            return;
        };
        let remaining = server
            .sessions()
            .detach_cdt(&link.host_session_id, client.id());
        if remaining == Some(0) {
            if let Some(app) = server.client(link.app) {
                notify_plugin_cdt(&app, &link.host_session_id, false);
            }
        }
    }
}
