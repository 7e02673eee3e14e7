//! Runner configuration.
//!
//! Loaded from `~/.snaut/config.json`; missing or malformed files fall back
//! to defaults with a warning. The license key can always be overridden via
//! the `SPECTRONAUTKEY` environment variable.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Environment variable holding the license key.
pub const LICENSE_KEY_ENV: &str = "SPECTRONAUTKEY";

/// Configuration for the external tool and runner behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Command prefix used to invoke SpectronautCMD
    pub spectronaut_command: Vec<String>,

    /// Default directory offered for input selection
    pub default_dir: PathBuf,

    /// License key; `SPECTRONAUTKEY` takes precedence over the file
    pub spectronaut_key: Option<String>,

    /// Optional wall-clock timeout for the main invocation, in seconds
    pub tool_timeout_secs: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            spectronaut_command: vec![
                "dotnet".to_string(),
                "/usr/lib/spectronaut/SpectronautCMD.dll".to_string(),
            ],
            default_dir: PathBuf::from("/work"),
            spectronaut_key: None,
            tool_timeout_secs: None,
        }
    }
}

impl RunnerConfig {
    /// Default on-disk location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".snaut").join("config.json"))
    }

    /// Load configuration from `path`, or the default location when `None`.
    /// A missing or unreadable file yields the defaults.
    pub fn load(path: Option<&PathBuf>) -> Self {
        let path = match path.cloned().or_else(Self::default_path) {
            Some(p) => p,
            None => return Self::default().with_env_key(),
        };

        let config = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<RunnerConfig>(&raw) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Could not parse config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };

        config.with_env_key()
    }

    fn with_env_key(mut self) -> Self {
        if let Ok(key) = std::env::var(LICENSE_KEY_ENV) {
            self.spectronaut_key = Some(key);
        }
        self
    }

    /// Write a default configuration file, creating parent directories.
    /// Returns the path written. Refuses to overwrite an existing file.
    pub fn create_default(path: Option<&PathBuf>) -> Result<PathBuf> {
        let path = path
            .cloned()
            .or_else(Self::default_path)
            .context("Cannot determine home directory for config path")?;

        if path.exists() {
            info!("Configuration file already exists at {}", path.display());
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(&RunnerConfig::default())?;
        fs::write(&path, raw)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_when_file_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let config = RunnerConfig::load(Some(&path));
        assert_eq!(config.spectronaut_command[0], "dotnet");
        assert_eq!(config.default_dir, PathBuf::from("/work"));
    }

    #[test]
    fn reads_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"spectronaut_command": ["/opt/sn/SpectronautCMD"], "tool_timeout_secs": 120}"#,
        )
        .unwrap();

        let config = RunnerConfig::load(Some(&path));
        assert_eq!(config.spectronaut_command, vec!["/opt/sn/SpectronautCMD"]);
        assert_eq!(config.tool_timeout_secs, Some(120));
        // unspecified fields keep their defaults
        assert_eq!(config.default_dir, PathBuf::from("/work"));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let config = RunnerConfig::load(Some(&path));
        assert_eq!(config.spectronaut_command[0], "dotnet");
    }

    #[test]
    fn create_default_writes_file_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("config.json");

        let written = RunnerConfig::create_default(Some(&path)).unwrap();
        assert_eq!(written, path);
        assert!(path.exists());

        // second call leaves the file alone
        fs::write(&path, r#"{"default_dir": "/data"}"#).unwrap();
        RunnerConfig::create_default(Some(&path)).unwrap();
        let config = RunnerConfig::load(Some(&path));
        assert_eq!(config.default_dir, PathBuf::from("/data"));
    }
}
