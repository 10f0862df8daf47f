//! Service → CLI notifications

use serde_json::json;

use crate::envelope::Envelope;
use crate::types::{AppInfo, HostAppLogDetails, PluginInfo};

/// Sent once the two-way introduction of a new CLI connection is complete.
pub fn did_complete_connection() -> Envelope {
    Envelope::new("didCompleteConnection")
}

/// A host application identified itself (or was already identified when the
/// CLI connected).
pub fn did_add_runtime_client(id: u64, platform: Option<&str>, app: &AppInfo) -> Envelope {
    Envelope::new("didAddRuntimeClient")
        .with("id", id)
        .with("platform", platform)
        .with("app", json!(app))
}

/// An initialized host application disconnected.
pub fn did_remove_runtime_client(id: u64, app: &AppInfo) -> Envelope {
    Envelope::new("didRemoveRuntimeClient")
        .with("id", id)
        .with("app", json!(app))
}

pub fn did_plugin_unloaded(plugin: &PluginInfo) -> Envelope {
    Envelope::new("didPluginUnloaded").with("plugin", json!(plugin))
}

pub fn host_app_log(details: &HostAppLogDetails) -> Envelope {
    Envelope::new("hostAppLog").with("details", json!(details))
}
