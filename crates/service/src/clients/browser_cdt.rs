//! Browser-target debugger client
//!
//! Automation frameworks (WebDriver, Puppeteer) attach to the top-level
//! "Browser" target of one host application rather than to a single plugin.
//! The endpoint is `/socket/browser_cdt/?adobe-uxp-app-id=<appId>`.

use std::sync::{Arc, Mutex};

use serde_json::json;
use url::Url;
use uxp_devtools_protocol::{Envelope, APP_ID_QUERY_PARAM};

use super::NO_DEBUG_TARGET;
use crate::client::{lock, Client, ClientKind, ConnectionId, ServerEvent, NORMAL_CLOSURE};
use crate::server::Server;

#[derive(Debug)]
pub(crate) struct BrowserCdtRole {
    app_id: String,
    app: Mutex<Option<ConnectionId>>,
}

impl BrowserCdtRole {
    pub(crate) fn resolve(server: &Server, url: &str) -> Result<Self, &'static str> {
        let app_id = app_id_from_url(url).ok_or(NO_DEBUG_TARGET)?;
        let app = server
            .clients()
            .into_iter()
            .filter(|client| {
                client
                    .app()
                    .and_then(|app| app.info())
                    .is_some_and(|info| info.app_id == app_id)
            })
            .last()
            .ok_or(NO_DEBUG_TARGET)?;

        Ok(Self {
            app_id,
            app: Mutex::new(Some(app.id())),
        })
    }

    pub(crate) fn app_id(&self) -> &str {
        &self.app_id
    }

    fn app_client(&self, server: &Server) -> Option<Arc<Client>> {
        let app = *lock(&self.app);
        app.and_then(|id| server.client(id))
    }

    pub(crate) fn attach(&self, client: &Arc<Client>, server: &Arc<Server>) {
        if let Some(app) = self.app_client(server) {
            if let Some(role) = app.app() {
                role.attach_browser_cdt(&app, client.id());
            }
        }
    }

    pub(crate) fn forward_to_host(&self, client: &Arc<Client>, server: &Arc<Server>, raw: &str) {
        match self.app_client(server) {
            Some(app) => app.notify(
                &Envelope::new("CDTBrowser")
                    .with("action", "cdtMessage")
                    .with("cdtMessage", raw),
            ),
            None => client.notify_raw(json!({ "error": NO_DEBUG_TARGET }).to_string()),
        }
    }

    pub(crate) fn handle_event(&self, client: &Arc<Client>, event: &ServerEvent) {
        let ServerEvent::ClientDidDisconnect(other) = event else {
            return;
        };
        if other.kind() != ClientKind::App {
            return;
        }
        let owner_left = {
            let mut app = lock(&self.app);
            if *app == Some(other.id()) {
                *app = None;
                true
            } else {
                false
            }
        };
        if owner_left {
            client.close(NORMAL_CLOSURE, "");
        }
    }

    pub(crate) fn detach(&self, client: &Arc<Client>, server: &Arc<Server>) {
        let Some(app) = self.app_client(server) else {
            return;
        };
        lock(&self.app).take();
        if let Some(role) = app.app() {
            role.detach_browser_cdt(&app, client.id());
        }
    }
}

/// Value of `adobe-uxp-app-id` in a request target like
/// `/socket/browser_cdt/?adobe-uxp-app-id=PS`.
fn app_id_from_url(url: &str) -> Option<String> {
    let base = Url::parse("http://127.0.0.1/").ok()?;
    let parsed = base.join(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == APP_ID_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
