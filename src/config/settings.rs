//! User-level settings for reaching the control plane.
//!
//! Settings are read from `<config dir>/shipyard/settings.yaml` when present
//! and overridden by `SHIPYARD_ENDPOINT`, `SHIPYARD_TOKEN` and
//! `SHIPYARD_REGION`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ConfigError, Result, ShipyardError};

/// Default control-plane endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8400";

/// Connection settings for the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Control-plane base URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bearer token. Normally supplied through the environment.
    #[serde(default)]
    pub token: Option<String>,
    /// Default region for environments and artifact buckets.
    #[serde(default)]
    pub region: Option<String>,
}

impl Settings {
    /// Path of the user settings file, if a config directory exists.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("shipyard").join("settings.yaml"))
    }

    /// Loads settings from the user settings file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file exists but is malformed.
    pub fn load() -> Result<Self> {
        let mut settings = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    /// Reads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading settings from: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| {
            ShipyardError::Config(ConfigError::ParseError {
                message: format!("Invalid settings file: {e}"),
                location: Some(path.display().to_string()),
            })
        })
    }

    fn apply_env(&mut self) {
        if let Ok(endpoint) = std::env::var("SHIPYARD_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Ok(token) = std::env::var("SHIPYARD_TOKEN") {
            self.token = Some(token);
        }
        if let Ok(region) = std::env::var("SHIPYARD_REGION") {
            self.region = Some(region);
        }
    }

    /// The configured endpoint, or the default one.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    /// The bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if no token is configured.
    pub fn token(&self) -> Result<&str> {
        self.token.as_deref().ok_or_else(|| {
            ShipyardError::Config(ConfigError::MissingEnvVar {
                name: String::from("SHIPYARD_TOKEN"),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "endpoint: https://cp.example.com\nregion: eu-west-1\n").unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.endpoint(), "https://cp.example.com");
        assert_eq!(settings.region.as_deref(), Some("eu-west-1"));
        assert!(settings.token().is_err());
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.endpoint(), DEFAULT_ENDPOINT);
    }
}
