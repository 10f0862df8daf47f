//! CLI controller client: turns server events into notifications.

use uxp_devtools_protocol::server as notifications;
use uxp_devtools_protocol::Envelope;

use crate::client::{Client, ServerEvent};

pub(crate) fn handle_event(client: &Client, event: &ServerEvent) {
    let notification = match event {
        ServerEvent::ClientDidConnect(other) | ServerEvent::DidAddRuntimeClient(other) => {
            runtime_client_added(other)
        }
        ServerEvent::ClientDidDisconnect(other) => other
            .app()
            .and_then(|app| app.info())
            .map(|info| notifications::did_remove_runtime_client(other.id(), &info)),
        ServerEvent::CompletedConnection => Some(notifications::did_complete_connection()),
        ServerEvent::DidPluginUnloaded(plugin) => Some(notifications::did_plugin_unloaded(plugin)),
        ServerEvent::HostAppLog(details) => Some(notifications::host_app_log(details)),
        ServerEvent::AppQuit => None,
    };
    if let Some(notification) = notification {
        client.notify(&notification);
    }
}

/// Only initialized host applications are announced.
fn runtime_client_added(other: &Client) -> Option<Envelope> {
    let info = other.app()?.info()?;
    Some(notifications::did_add_runtime_client(
        other.id(),
        info.platform.as_deref(),
        &info,
    ))
}
