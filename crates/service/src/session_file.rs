//! The `.uxprc` record of the plugin sessions a project last loaded.
//!
//! ```json
//! {
//!     "plugin": {
//!         "sessions": [{ "app": { "id": "PS", "version": "25.0" }, "pluginSessionId": "..." }],
//!         "info": { ... }
//!     }
//! }
//! ```
//!
//! Keys other than `plugin` belong to other tools and are written back as read.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ServiceError;

pub const SESSION_FILE: &str = ".uxprc";
const PLUGIN_KEY: &str = "plugin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionApp {
    pub id: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub app: SessionApp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_session_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionRecord {
    pub fn new(app_id: &str, app_version: &str, plugin_session_id: &str) -> Self {
        Self {
            app: SessionApp {
                id: app_id.to_string(),
                version: app_version.to_string(),
            },
            plugin_session_id: Some(plugin_session_id.to_string()),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
    #[serde(default)]
    pub info: Map<String, Value>,
}

pub fn session_file_path(dir: &Path) -> PathBuf {
    dir.join(SESSION_FILE)
}

/// The `plugin` entry of `<dir>/.uxprc`, `None` when the file or the entry
/// is missing.
pub fn read_plugin_sessions(dir: &Path) -> Result<Option<PluginRecord>, ServiceError> {
    let mut rc = read_rc(&session_file_path(dir))?;
    match rc.remove(PLUGIN_KEY) {
        Some(plugin) => Ok(Some(serde_json::from_value(plugin)?)),
        None => Ok(None),
    }
}

/// Merge `sessions` into the file: a record for the same app id and version
/// is replaced, others are appended. `info` replaces the stored info.
pub fn write_plugin_sessions(
    dir: &Path,
    sessions: &[SessionRecord],
    info: Map<String, Value>,
) -> Result<(), ServiceError> {
    let path = session_file_path(dir);
    let mut rc = read_rc(&path)?;
    let mut plugin: PluginRecord = match rc.remove(PLUGIN_KEY) {
        Some(existing) => serde_json::from_value(existing)?,
        None => PluginRecord::default(),
    };

    plugin.info = info;
    for session in sessions {
        match plugin
            .sessions
            .iter_mut()
            .find(|stored| stored.app == session.app)
        {
            Some(stored) => *stored = session.clone(),
            None => plugin.sessions.push(session.clone()),
        }
    }

    rc.insert(PLUGIN_KEY.to_string(), serde_json::to_value(plugin)?);
    write_rc(&path, &rc)
}

fn read_rc(path: &Path) -> Result<Map<String, Value>, ServiceError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Map::new()),
        Err(err) => Err(err.into()),
    }
}

fn write_rc(path: &Path, rc: &Map<String, Value>) -> Result<(), ServiceError> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    rc.serialize(&mut serializer)?;
    fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn info(name: &str) -> Map<String, Value> {
        match json!({ "id": "com.example", "name": name }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(read_plugin_sessions(dir.path()).expect("read"), None);
    }

    #[test]
    fn sessions_merge_by_app_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_plugin_sessions(
            dir.path(),
            &[
                SessionRecord::new("PS", "25.0", "s1"),
                SessionRecord::new("ID", "18.0", "s2"),
            ],
            info("first"),
        )
        .expect("first write");
        write_plugin_sessions(
            dir.path(),
            &[
                SessionRecord::new("PS", "25.0", "s3"),
                SessionRecord::new("PS", "26.0", "s4"),
            ],
            info("second"),
        )
        .expect("second write");

        let plugin = read_plugin_sessions(dir.path())
            .expect("read")
            .expect("plugin entry");
        let ids: Vec<_> = plugin
            .sessions
            .iter()
            .map(|s| s.plugin_session_id.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(ids, ["s3", "s2", "s4"]);
        assert_eq!(plugin.info["name"], "second");
    }

    #[test]
    fn unrelated_keys_survive_a_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            session_file_path(dir.path()),
            r#"{"config":{"theme":"dark"},"plugin":{"sessions":[{"app":{"id":"XD","version":"40.0"},"pluginSessionId":"x","note":"kept"}]}}"#,
        )
        .expect("seed rc");

        write_plugin_sessions(dir.path(), &[SessionRecord::new("PS", "25.0", "p")], Map::new())
            .expect("write");

        let written: Value = serde_json::from_str(
            &fs::read_to_string(session_file_path(dir.path())).expect("read back"),
        )
        .expect("json");
        assert_eq!(written["config"]["theme"], "dark");
        assert_eq!(written["plugin"]["sessions"][0]["note"], "kept");
        assert_eq!(written["plugin"]["sessions"][1]["app"]["id"], "PS");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(session_file_path(dir.path()), "not json").expect("seed rc");
        assert!(matches!(
            read_plugin_sessions(dir.path()),
            Err(ServiceError::Json(_))
        ));
    }
}
