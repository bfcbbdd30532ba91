//! Runtime settings
//!
//! Defaults, optionally overlaid by a JSON settings file, then by environment
//! variables. Settings location: ~/.sshrelay/settings.json

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::transfer::TransferConfig;

/// Terminal type requested for interactive shells
pub const TERM_ENV: &str = "SSHRELAY_TERM";
/// Concurrent file copies per transfer
pub const MAX_CONCURRENT_ENV: &str = "SSHRELAY_MAX_CONCURRENT";
/// `0`, `false`, `no` or `off` hides progress bars
pub const PROGRESS_ENV: &str = "SSHRELAY_PROGRESS";

pub const DEFAULT_TERM: &str = "linux";

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_term")]
    pub term: String,

    #[serde(default)]
    pub transfer: TransferConfig,
}

fn default_term() -> String {
    DEFAULT_TERM.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            term: default_term(),
            transfer: TransferConfig::default(),
        }
    }
}

/// Directory holding sshrelay state, `~/.sshrelay`
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".sshrelay"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Default settings file path
pub fn settings_file() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("settings.json"))
}

impl Settings {
    /// Defaults overlaid by the process environment
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides from `lookup`
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(term) = lookup(TERM_ENV).filter(|t| !t.trim().is_empty()) {
            self.term = term.trim().to_string();
        }

        if let Some(raw) = lookup(MAX_CONCURRENT_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.transfer.max_concurrent = n.max(1),
                Err(_) => warn!(
                    "Ignoring {}={:?}: not a positive integer",
                    MAX_CONCURRENT_ENV, raw
                ),
            }
        }

        if let Some(raw) = lookup(PROGRESS_ENV) {
            self.transfer.show_progress = !matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }

        self
    }

    /// Load from a JSON file. A missing file yields defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path).await {
            Ok(contents) => {
                let mut settings: Settings = serde_json::from_str(&contents)?;
                settings.transfer.max_concurrent = settings.transfer.max_concurrent.max(1);
                debug!("Loaded settings from {}", path.display());
                Ok(settings)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// File at `path` (if any), then the environment
    pub async fn load_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::load(path)
            .await?
            .with_env(|key| std::env::var(key).ok()))
    }

    /// Save to disk
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to temp file first, then rename
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{ErrorMode, DEFAULT_MAX_CONCURRENT};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default().with_env(env(&[]));
        assert_eq!(settings.term, "linux");
        assert_eq!(settings.transfer.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert!(settings.transfer.show_progress);
        assert_eq!(settings.transfer.error_mode, ErrorMode::FailFast);
    }

    #[test]
    fn test_env_overrides() {
        let settings = Settings::default().with_env(env(&[
            (TERM_ENV, "xterm-256color"),
            (MAX_CONCURRENT_ENV, "3"),
            (PROGRESS_ENV, "off"),
        ]));
        assert_eq!(settings.term, "xterm-256color");
        assert_eq!(settings.transfer.max_concurrent, 3);
        assert!(!settings.transfer.show_progress);
    }

    #[test]
    fn test_bad_env_values() {
        let settings = Settings::default().with_env(env(&[
            (TERM_ENV, "  "),
            (MAX_CONCURRENT_ENV, "lots"),
            (PROGRESS_ENV, "1"),
        ]));
        assert_eq!(settings.term, "linux");
        assert_eq!(settings.transfer.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert!(settings.transfer.show_progress);

        let settings = Settings::default().with_env(env(&[(MAX_CONCURRENT_ENV, "0")]));
        assert_eq!(settings.transfer.max_concurrent, 1);
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let temp = tempdir().unwrap();
        let settings = Settings::load(temp.path().join("settings.json")).await.unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.transfer.error_mode = ErrorMode::ContinueOnError;
        settings.transfer.max_concurrent = 16;
        settings.save(&path).await.unwrap();

        assert_eq!(Settings::load(&path).await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_partial_and_invalid_files() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("settings.json");

        tokio::fs::write(&path, r#"{"transfer": {"error_mode": "continue_on_error"}}"#)
            .await
            .unwrap();
        let settings = Settings::load(&path).await.unwrap();
        assert_eq!(settings.term, "linux");
        assert_eq!(settings.transfer.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(settings.transfer.error_mode, ErrorMode::ContinueOnError);

        tokio::fs::write(&path, "{not json").await.unwrap();
        assert!(matches!(
            Settings::load(&path).await,
            Err(ConfigError::Parse(_))
        ));
    }
}
