//! The server settings record.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use orion_shared::constants::SETTINGS_FILE_NAME;
use orion_shared::ServerSettings;

use crate::atomic;
use crate::error::Result;

/// Owns `settings.json` and the in-memory copy the server runs with.
pub struct SettingsStore {
    path: PathBuf,
    /// Doubles as the single-writer exclusion for saves.
    current: Mutex<ServerSettings>,
}

impl SettingsStore {
    /// Open `<data_dir>/settings.json`, loading it once.
    pub async fn open(data_dir: impl AsRef<Path>) -> Self {
        Self::open_at(data_dir.as_ref().join(SETTINGS_FILE_NAME)).await
    }

    pub async fn open_at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = Self::load_from(&path).await;
        Self {
            path,
            current: Mutex::new(current),
        }
    }

    /// Read settings from disk, falling back to defaults when the file is
    /// absent or malformed.
    pub async fn load(&self) -> ServerSettings {
        Self::load_from(&self.path).await
    }

    /// The settings the server is currently running with.
    pub async fn current(&self) -> ServerSettings {
        self.current.lock().await.clone()
    }

    /// Validate and persist. Invalid settings are rejected before any write.
    pub async fn save(&self, settings: ServerSettings) -> Result<()> {
        settings.validate()?;

        let mut current = self.current.lock().await;
        atomic::write_json(&self.path, &settings).await?;
        info!(
            host = %settings.host,
            port = %settings.port,
            retention_days = settings.retention_days,
            "Settings saved"
        );
        *current = settings;
        Ok(())
    }

    async fn load_from(path: &Path) -> ServerSettings {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ServerSettings::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read settings, using defaults");
                return ServerSettings::default();
            }
        };

        match serde_json::from_slice::<ServerSettings>(&bytes) {
            Ok(settings) if settings.validate().is_ok() => settings,
            Ok(settings) => {
                warn!(?settings, "Stored settings are invalid, using defaults");
                ServerSettings::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Malformed settings, using defaults");
                ServerSettings::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_absent_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::open(dir.path()).await;
        assert_eq!(store.current().await, ServerSettings::default());
    }

    #[tokio::test]
    async fn test_malformed_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE_NAME), b"port = 8000").unwrap();

        let store = SettingsStore::open(dir.path()).await;
        assert_eq!(store.load().await, ServerSettings::default());
    }

    #[tokio::test]
    async fn test_save_persists_and_updates_current() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::open(dir.path()).await;
        let settings = ServerSettings {
            host: "192.168.1.20".into(),
            port: "9000".into(),
            retention_days: 30,
        };

        store.save(settings.clone()).await.unwrap();

        assert_eq!(store.current().await, settings);
        let reopened = SettingsStore::open(dir.path()).await;
        assert_eq!(reopened.current().await, settings);
    }

    #[tokio::test]
    async fn test_invalid_settings_not_written() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::open(dir.path()).await;

        let result = store
            .save(ServerSettings {
                port: String::new(),
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert!(!dir.path().join(SETTINGS_FILE_NAME).exists());
        assert_eq!(store.current().await, ServerSettings::default());
    }
}
