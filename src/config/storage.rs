//! Configuration Storage

use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::{CoreConfig, CONFIG_VERSION};

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// `~/.cfclient`, or `%APPDATA%\CfClient` on Windows
pub fn config_dir() -> Result<PathBuf, StorageError> {
    let windows_dir = cfg!(windows)
        .then(dirs::config_dir)
        .flatten()
        .map(|app_data| app_data.join("CfClient"));

    windows_dir
        .or_else(|| dirs::home_dir().map(|home| home.join(".cfclient")))
        .ok_or(StorageError::NoConfigDir)
}

pub fn config_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("config.json"))
}

/// `CoreConfig` persisted as JSON
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self::with_path(config_file()?))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load configuration from disk.
    ///
    /// A missing file yields defaults. A corrupted file is backed up and
    /// defaults are returned.
    pub async fn load(&self) -> Result<CoreConfig, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {:?}, using defaults", self.path);
                return Ok(CoreConfig::default());
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let config = match serde_json::from_str::<CoreConfig>(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Config file {:?} corrupted: {}", self.path, e);
                match self.backup().await {
                    Ok(backup) => tracing::warn!("Backed up to {:?}, using defaults", backup),
                    Err(backup_err) => tracing::error!("Config backup failed: {}", backup_err),
                }
                return Ok(CoreConfig::default());
            }
        };

        if config.version > CONFIG_VERSION {
            return Err(StorageError::VersionTooNew {
                found: config.version,
                supported: CONFIG_VERSION,
            });
        }
        Ok(config)
    }

    /// Write atomically: temp file, fsync, rename
    pub async fn save(&self, config: &CoreConfig) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(serde_json::to_string_pretty(config)?.as_bytes())
            .await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Copy the config file next to itself with a timestamp suffix
    pub async fn backup(&self) -> Result<PathBuf, StorageError> {
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup_path = self.path.with_extension(format!("json.backup.{}", stamp));
        fs::copy(&self.path, &backup_path).await?;
        Ok(backup_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_nonexistent() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("config.json"));

        let config = storage.load().await.unwrap();
        assert_eq!(config, CoreConfig::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("nested").join("config.json"));

        let mut config = CoreConfig::default();
        config.request.total_wait_ms = 5000;
        config.ssh.max_active_connections = 2;
        storage.save(&config).await.unwrap();

        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_corrupted_config_is_backed_up() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let storage = ConfigStorage::with_path(path);

        let config = storage.load().await.unwrap();
        assert_eq!(config, CoreConfig::default());

        let backups = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("backup"))
            .count();
        assert_eq!(backups, 1);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_config_file_under_home() {
        if let Ok(path) = config_file() {
            assert!(path.ends_with(".cfclient/config.json"));
        }
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"version": 99}"#).unwrap();
        let storage = ConfigStorage::with_path(path);

        assert!(matches!(
            storage.load().await,
            Err(StorageError::VersionTooNew { found: 99, .. })
        ));
    }
}
