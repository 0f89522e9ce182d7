//! Configuration lookup for the CLI.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use sync_client::SyncConfig;

/// Default configuration file, e.g. `~/.config/roomsync/roomsync.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("roomsync.toml"))
}

/// Default store database, e.g. `~/.local/share/roomsync/store.db`.
pub fn default_store_path() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().join("store.db"))
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "roomsync", "roomsync")
        .context("Could not determine home directory")
}

/// Load the configuration and settle the store path.
///
/// `store` wins over the file's `store_path`; without either the default
/// data directory is used. The store's directory is created.
pub async fn load(config: Option<&Path>, store: Option<PathBuf>) -> Result<SyncConfig> {
    let path = match config {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    let mut config = SyncConfig::from_file(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let store = match (store, config.store_path.take()) {
        (Some(store), _) | (None, Some(store)) => store,
        (None, None) => default_store_path()?,
    };
    if let Some(parent) = store.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(config.with_store_path(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CONFIG: &str = r#"
homeserver_url = "https://matrix.example.org"
user_id = "@alice:example.org"
access_token = "secret"
"#;

    #[tokio::test]
    async fn store_flag_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roomsync.toml");
        std::fs::write(
            &path,
            format!("{}store_path = \"/nonexistent/store.db\"\n", CONFIG),
        )
        .unwrap();
        let store = dir.path().join("nested").join("store.db");

        let config = load(Some(&path), Some(store.clone())).await.unwrap();

        assert_eq!(config.store_path, Some(store));
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn file_store_path_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roomsync.toml");
        let store = dir.path().join("from-file.json");
        std::fs::write(
            &path,
            format!("{}store_path = {:?}\n", CONFIG, store.display().to_string()),
        )
        .unwrap();

        let config = load(Some(&path), None).await.unwrap();
        assert_eq!(config.store_path, Some(store));
    }

    #[tokio::test]
    async fn missing_file_names_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let error = load(Some(&path), None).await.unwrap_err();
        assert!(error.to_string().contains("absent.toml"));
    }
}
