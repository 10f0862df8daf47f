//! Plugin manifest reader

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub host: Option<serde_json::Value>,
    #[serde(default)]
    pub manifest_version: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest file not found at {0}")]
    NotFound(PathBuf),
    #[error("Failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

impl PluginManifest {
    /// Reasons the manifest is unusable; empty when it is valid.
    pub fn validation_failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        if self.id.trim().is_empty() {
            failures.push("Manifest is missing a plugin id".to_string());
        }
        if !self.name.as_deref().is_some_and(|name| !name.trim().is_empty()) {
            failures.push("Manifest is missing a plugin name".to_string());
        }
        if self.version.is_none() {
            failures.push("Manifest is missing a plugin version".to_string());
        }
        if self.host.is_none() {
            failures.push("Manifest is missing host information".to_string());
        }
        failures
    }
}

pub fn read_manifest(plugin_dir: &Path) -> Result<PluginManifest, ManifestError> {
    let path = plugin_dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(ManifestError::NotFound(path));
    }
    let contents = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Plugin id from `<plugin_dir>/manifest.json`, or empty if unavailable.
pub fn plugin_id(plugin_dir: &Path) -> String {
    read_manifest(plugin_dir)
        .map(|manifest| manifest.id)
        .unwrap_or_default()
}
