//! Shared payload types

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;

/// Identity of a connected host application, as reported by `App/info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub app_id: String,
    #[serde(default)]
    pub app_name: String,
    pub app_version: String,
    #[serde(default)]
    pub uxp_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_storage_path: Option<String>,
}

impl AppInfo {
    /// Two identities denote the same host app when id and version match.
    pub fn is_same_app(&self, other: &AppInfo) -> bool {
        self.app_id == other.app_id && self.app_version == other.app_version
    }

    pub fn summary(&self) -> AppSummary {
        AppSummary {
            app_id: self.app_id.clone(),
            app_name: self.app_name.clone(),
            app_version: self.app_version.clone(),
            uxp_version: self.uxp_version.clone(),
        }
    }
}

/// The subset of [`AppInfo`] relayed with host log lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSummary {
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    pub uxp_version: String,
}

/// A log line emitted by a host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostAppLogDetails {
    pub level: String,
    pub message: String,
    pub app_info: AppSummary,
}

/// Plugin identity broadcast when a plugin goes away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub plugin_id: String,
    pub plugin_path: String,
}

/// An installed plugin as enumerated by `Plugin/discover`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPlugin {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Reply payload of `Plugin/discover`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoverReply {
    #[serde(default)]
    pub plugins: Vec<InstalledPlugin>,
}

/// Payload of a `proxy` request: forward `message` to connection `clientId`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    pub client_id: Option<u64>,
    pub message: Option<Envelope>,
}
