//! Configuration module for the Shipyard deployment system.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `shipyard.yaml`
//! - Validation of manifest values and deploy flags
//! - User settings for reaching the control plane

mod spec;
mod parser;
mod validator;
mod settings;

pub use spec::{
    ArtifactsConfig, BuildConfig, ConnectionSource, ImageConfig, PipelineConfig, PipelineSource,
    RepositorySource, StageConfig, WorkloadConfig, WorkloadOverride, WorkloadType,
    WorkspaceConfig,
};
pub use parser::{ConfigParser, find_config_file, DEFAULT_CONFIG_FILES};
pub use validator::{ConfigValidator, DeployFlags, ValidationResult, validate_name_flag};
pub use settings::{Settings, DEFAULT_ENDPOINT};
