//! Plugin session registry
//!
//! Sessions are keyed by the host-assigned session id. Callers address them by
//! a client-visible id, which maps to at most one host id at a time. Attached
//! CDT clients are tracked by connection id only; the live client is resolved
//! through the server directory at point of use.

use std::collections::{BTreeSet, HashMap};

use uxp_devtools_protocol::{AppInfo, PluginInfo};

use crate::client::ConnectionId;

/// One loaded plugin inside one host application.
#[derive(Debug, Clone)]
pub struct PluginSession {
    pub plugin_id: String,
    pub plugin_path: String,
    pub host_session_id: String,
    pub app_info: AppInfo,
    pub cdt_clients: BTreeSet<ConnectionId>,
}

impl PluginSession {
    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            plugin_id: self.plugin_id.clone(),
            plugin_path: self.plugin_path.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PluginSessionRegistry {
    sessions: HashMap<String, PluginSession>,
    client_to_host: HashMap<String, String>,
}

impl PluginSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly loaded plugin and return its client-visible id.
    ///
    /// With `existing_session_id` the caller keeps its id: the session it
    /// pointed at is dropped before the new one is installed. Without it, the
    /// host id doubles as the client-visible id.
    pub fn add_plugin(
        &mut self,
        plugin_id: impl Into<String>,
        plugin_path: impl Into<String>,
        host_session_id: impl Into<String>,
        app_info: AppInfo,
        existing_session_id: Option<String>,
    ) -> String {
        let host_session_id = host_session_id.into();
        if let Some(existing) = existing_session_id.as_deref() {
            if let Some(stale_host) = self.client_to_host.remove(existing) {
                self.sessions.remove(&stale_host);
            }
        }

        let session_id = existing_session_id.unwrap_or_else(|| host_session_id.clone());
        self.sessions.insert(
            host_session_id.clone(),
            PluginSession {
                plugin_id: plugin_id.into(),
                plugin_path: plugin_path.into(),
                host_session_id: host_session_id.clone(),
                app_info,
                cdt_clients: BTreeSet::new(),
            },
        );
        self.client_to_host
            .insert(session_id.clone(), host_session_id);
        session_id
    }

    pub fn plugin_for_host(&self, host_session_id: &str) -> Option<&PluginSession> {
        self.sessions.get(host_session_id)
    }

    pub fn host_session_id(&self, client_session_id: &str) -> Option<&str> {
        self.client_to_host.get(client_session_id).map(String::as_str)
    }

    /// Two-hop lookup: client id -> host id -> session. `None` if either hop
    /// is missing.
    pub fn plugin_for_session(&self, client_session_id: &str) -> Option<&PluginSession> {
        self.host_session_id(client_session_id)
            .and_then(|host| self.sessions.get(host))
    }

    /// Remove a session and every client id mapped onto it. Idempotent.
    pub fn remove_plugin(&mut self, host_session_id: &str) -> Option<PluginSession> {
        let removed = self.sessions.remove(host_session_id);
        self.client_to_host.retain(|_, host| host != host_session_id);
        removed
    }

    /// Attach a CDT client; returns how many are attached afterwards.
    pub fn attach_cdt(&mut self, host_session_id: &str, client: ConnectionId) -> Option<usize> {
        let session = self.sessions.get_mut(host_session_id)?;
        session.cdt_clients.insert(client);
        Some(session.cdt_clients.len())
    }

    /// Detach a CDT client; returns how many remain, or `None` if the client
    /// was not attached.
    pub fn detach_cdt(&mut self, host_session_id: &str, client: ConnectionId) -> Option<usize> {
        let session = self.sessions.get_mut(host_session_id)?;
        if !session.cdt_clients.remove(&client) {
            return None;
        }
        Some(session.cdt_clients.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
