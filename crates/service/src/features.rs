//! Per host-app-version feature capabilities.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use uxp_devtools_protocol::AppInfo;

struct UnsupportedEntry {
    app_id: &'static str,
    app_version: &'static str,
    actions: &'static [&'static str],
}

const HOST_APP_CONFIG: &[UnsupportedEntry] = &[
    UnsupportedEntry {
        app_id: "XD",
        app_version: "36",
        actions: &["reload"],
    },
    UnsupportedEntry {
        app_id: "XD",
        app_version: "37",
        actions: &["reload"],
    },
];

#[derive(Debug, Default)]
pub struct FeatureConfig {
    unsupported: BTreeSet<String>,
}

impl FeatureConfig {
    fn for_host_app(app_id: &str, app_version: &str) -> Self {
        let unsupported = HOST_APP_CONFIG
            .iter()
            .filter(|entry| entry.app_id == app_id && version_matches(entry.app_version, app_version))
            .flat_map(|entry| entry.actions.iter().map(|action| action.to_string()))
            .collect();
        Self { unsupported }
    }

    pub fn is_supported(&self, action: &str) -> bool {
        !self.unsupported.contains(action)
    }

    pub fn is_reload_supported(&self) -> bool {
        self.is_supported("reload")
    }
}

/// Memoized capability lookups, one entry per exact (appId, appVersion).
#[derive(Debug, Default)]
pub struct FeatureConfigTable {
    cache: Mutex<HashMap<(String, String), Arc<FeatureConfig>>>,
}

impl FeatureConfigTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config_for(&self, app_id: &str, app_version: &str) -> Arc<FeatureConfig> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .entry((app_id.to_string(), app_version.to_string()))
            .or_insert_with(|| Arc::new(FeatureConfig::for_host_app(app_id, app_version)))
            .clone()
    }

    pub fn is_reload_supported(&self, app: &AppInfo) -> bool {
        self.config_for(&app.app_id, &app.app_version)
            .is_reload_supported()
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A config version matches when every one of its dot-separated components
/// equals the actual version's component at the same position.
fn version_matches(config_version: &str, actual_version: &str) -> bool {
    if config_version == actual_version {
        return true;
    }
    let mut actual = actual_version.split('.');
    config_version.split('.').all(|expected| {
        match (leading_int(expected), actual.next().and_then(leading_int)) {
            (Some(want), Some(got)) => want == got,
            _ => false,
        }
    })
}

/// Integer value of the leading digits of a component ("3b" -> 3).
fn leading_int(component: &str) -> Option<u64> {
    let digits: &str = {
        let end = component
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(component.len());
        &component[..end]
    };
    digits.parse().ok()
}
