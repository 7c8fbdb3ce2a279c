//! Manifest parser for loading the workspace configuration.
//!
//! This module handles loading the manifest from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result, ShipyardError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::WorkspaceConfig;

/// Manifest parser for loading workspace configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads the manifest from a YAML file.
    ///
    /// Relative asset paths inside the manifest are resolved against the
    /// parser's base path, or the manifest's own directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<WorkspaceConfig> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(ShipyardError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ShipyardError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;

        let base = self
            .base_path
            .clone()
            .or_else(|| path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        resolve_paths(&mut config, &base);

        Ok(config)
    }

    /// Parses the manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<WorkspaceConfig> {
        debug!("Parsing YAML manifest");

        let config: WorkspaceConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ShipyardError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed manifest for application: {}", config.application);
        Ok(config)
    }

    /// Loads the manifest with environment variable overrides.
    ///
    /// `SHIPYARD_APP` replaces the manifest's application name.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<WorkspaceConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Applies environment variable overrides to the manifest.
    fn apply_env_overrides(config: &mut WorkspaceConfig) {
        if let Ok(app) = std::env::var("SHIPYARD_APP") {
            debug!("Overriding application from environment");
            config.application = app;
        }

        if let Ok(bucket) = std::env::var("SHIPYARD_ARTIFACT_BUCKET") {
            debug!("Overriding artifacts.bucket from environment");
            config.artifacts.bucket = Some(bucket);
        }

        if let Ok(registry) = std::env::var("SHIPYARD_REGISTRY") {
            debug!("Overriding artifacts.registry from environment");
            config.artifacts.registry = Some(registry);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ShipyardError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Makes every relative asset path in the manifest relative to `base`.
fn resolve_paths(config: &mut WorkspaceConfig, base: &Path) {
    let join = |p: &mut PathBuf| {
        if p.is_relative() {
            *p = base.join(&*p);
        }
    };

    for workload in &mut config.workloads {
        for image in workload.containers.values_mut() {
            if let super::spec::ImageConfig::Build { build, .. } = image {
                join(build);
            }
        }
        workload.env_files.values_mut().for_each(join);
        workload.custom_resources.values_mut().for_each(join);
        if let Some(addons) = workload.addons.as_mut() {
            join(addons);
        }
        if let Some(assets) = workload.static_assets.as_mut() {
            join(assets);
        }
    }
}

/// Default manifest file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["shipyard.yaml", "shipyard.yml"];

/// Finds the manifest in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no manifest is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found manifest: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ShipyardError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
