use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

const APP_DIR_NAME: &str = "wb-rewind";

/// Layout of the data root.
#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<platform data dir>/wb-rewind`.
    pub fn default_root() -> Result<PathBuf, ConfigError> {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .ok_or(ConfigError::NoDataDir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.root.join("storage")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.storage_dir().join("config.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn ensure(&self) -> Result<(), ConfigError> {
        for dir in [self.versions_dir(), self.storage_dir(), self.logs_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Io { path: dir, source })?;
        }
        Ok(())
    }
}

fn default_guard_code_timeout_secs() -> u64 {
    300
}

fn default_stall_timeout_secs() -> Option<u64> {
    Some(3600)
}

/// Persisted user settings (`storage/config.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_path: Option<PathBuf>,
    /// Overrides the PATH lookup for steamcmd.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steamcmd_path: Option<PathBuf>,
    #[serde(default = "default_guard_code_timeout_secs")]
    pub guard_code_timeout_secs: u64,
    /// `null` disables the stall watchdog.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: None,
            installation_path: None,
            steamcmd_path: None,
            guard_code_timeout_secs: default_guard_code_timeout_secs(),
            stall_timeout_secs: default_stall_timeout_secs(),
        }
    }
}

impl Settings {
    /// Missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn set_username(&mut self, username: &str) -> bool {
        let username = username.trim();
        if username.is_empty() || self.username.as_deref() == Some(username) {
            return false;
        }
        self.username = Some(username.to_string());
        true
    }

    /// The installation path must already exist.
    pub fn set_installation_path(&mut self, path: &Path) -> Result<bool, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingPath(path.to_path_buf()));
        }
        if self.installation_path.as_deref() == Some(path) {
            return Ok(false);
        }
        self.installation_path = Some(path.to_path_buf());
        Ok(true)
    }

    pub fn guard_code_timeout(&self) -> Duration {
        Duration::from_secs(self.guard_code_timeout_secs.max(1))
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let s = Settings::load(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.guard_code_timeout(), Duration::from_secs(300));
        assert_eq!(s.stall_timeout(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn reads_legacy_config_with_only_two_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "username": "bob", "installation_path": "/games/worldbox", "theme": "dark" }"#,
        )
        .unwrap();

        let s = Settings::load(&path).unwrap();
        assert_eq!(s.username.as_deref(), Some("bob"));
        assert_eq!(s.installation_path, Some(PathBuf::from("/games/worldbox")));
        assert_eq!(s.guard_code_timeout_secs, 300);
    }

    #[test]
    fn save_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(tmp.path());
        let mut s = Settings::default();
        assert!(s.set_username(" alice "));
        assert!(!s.set_username("alice"));
        assert!(s.set_installation_path(tmp.path()).unwrap());
        s.stall_timeout_secs = None;
        s.save(&paths.settings_path()).unwrap();

        let loaded = Settings::load(&paths.settings_path()).unwrap();
        assert_eq!(loaded, s);
        assert_eq!(loaded.stall_timeout(), None);
    }

    #[test]
    fn rejects_missing_installation_path() {
        let mut s = Settings::default();
        let err = s
            .set_installation_path(Path::new("/definitely/not/here"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingPath(_)));
        assert!(s.installation_path.is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn layout_under_root() {
        let paths = AppPaths::new("/r");
        assert_eq!(paths.versions_dir(), PathBuf::from("/r/versions"));
        assert_eq!(paths.settings_path(), PathBuf::from("/r/storage/config.json"));
        assert_eq!(paths.logs_dir(), PathBuf::from("/r/logs"));
    }
}
