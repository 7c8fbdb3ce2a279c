//! Deployment orchestration.
//!
//! This module provides:
//! - Deployment targets and their stack names
//! - Template rendering and the proposed change
//! - The template diff preview
//! - The template version gate
//! - The stack lifecycle controller

mod diff;
mod lifecycle;
mod render;
mod target;
mod version;

pub use diff::{DiffEngine, DiffResult, NO_CHANGES};
pub use lifecycle::{
    ApplyOptions, ApplyOutcome, ApplyReport, DeployEvent, Prompter, StackController,
};
pub use render::{
    ProposedChange, TemplateRenderer, YamlTemplateRenderer, FORCE_UPDATE_PARAMETER,
};
pub use target::DeploymentTarget;
pub use version::{check_version, Version, VersionGatekeeper, TEMPLATE_VERSION};
