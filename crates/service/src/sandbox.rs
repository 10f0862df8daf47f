//! Staging plugin files for hosts that run plugins from private storage.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uxp_devtools_protocol::AppInfo;

use crate::paths::normalize;

const WORKSPACE_DIR: &str = "UDTPlugins";

/// `<sandboxStoragePath>/UDTPlugins`
pub fn workspace_path(app: &AppInfo) -> PathBuf {
    Path::new(app.sandbox_storage_path.as_deref().unwrap_or_default()).join(WORKSPACE_DIR)
}

/// `<workspace>/<basename(source)>_<pluginId>`
pub fn staged_plugin_path(app: &AppInfo, source: &Path, plugin_id: &str) -> PathBuf {
    let source = normalize(source);
    let base = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    workspace_path(app).join(format!("{base}_{plugin_id}"))
}

/// Recursively copy `source` into `dest`, creating `dest` as needed.
pub fn stage(source: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            stage(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Empty the staging workspace of a sandboxed host. No-op otherwise.
pub fn cleanup(app: &AppInfo) -> io::Result<()> {
    if !app.sandbox {
        return Ok(());
    }
    let workspace = workspace_path(app);
    match fs::remove_dir_all(&workspace) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    fs::create_dir_all(&workspace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandboxed(storage: &Path) -> AppInfo {
        AppInfo {
            app_id: "XD".into(),
            app_version: "36.0".into(),
            sandbox: true,
            sandbox_storage_path: Some(storage.to_string_lossy().into_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn staged_path_combines_basename_and_id() {
        let app = sandboxed(Path::new("/store"));
        assert_eq!(
            staged_plugin_path(&app, Path::new("/work/my-plugin/"), "com.a"),
            PathBuf::from("/store/UDTPlugins/my-plugin_com.a")
        );
    }

    #[test]
    fn stage_copies_nested_files() {
        let src = tempfile::tempdir().expect("src");
        let store = tempfile::tempdir().expect("store");
        fs::create_dir_all(src.path().join("assets")).expect("mkdir");
        fs::write(src.path().join("manifest.json"), "{}").expect("write");
        fs::write(src.path().join("assets/icon.png"), [1u8, 2, 3]).expect("write");

        let dest = staged_plugin_path(&sandboxed(store.path()), src.path(), "com.a");
        stage(src.path(), &dest).expect("stage");

        assert!(dest.join("manifest.json").is_file());
        assert_eq!(fs::read(dest.join("assets/icon.png")).expect("read"), vec![1, 2, 3]);
    }

    #[test]
    fn stage_reports_missing_source() {
        let store = tempfile::tempdir().expect("store");
        let err = stage(Path::new("/definitely/not/here"), &store.path().join("x"))
            .expect_err("missing source");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn cleanup_recreates_empty_workspace() {
        let store = tempfile::tempdir().expect("store");
        let app = sandboxed(store.path());
        let leftover = workspace_path(&app).join("old_com.a");
        fs::create_dir_all(&leftover).expect("mkdir");

        cleanup(&app).expect("cleanup");

        assert!(workspace_path(&app).is_dir());
        assert!(!leftover.exists());
    }

    #[test]
    fn cleanup_skips_unsandboxed_hosts() {
        let store = tempfile::tempdir().expect("store");
        let app = AppInfo {
            sandbox: false,
            ..sandboxed(store.path())
        };
        cleanup(&app).expect("cleanup");
        assert!(!workspace_path(&app).exists());
    }
}
