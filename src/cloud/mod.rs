//! Control-plane integration.
//!
//! This module provides:
//! - The collaborator traits the deployment core depends on
//! - The HTTP client that implements them against the platform API
//! - The types exchanged with the platform

mod api;
mod client;
mod types;

pub use api::{EnvironmentStore, PipelineLister, StackApi};
pub use client::ControlPlaneClient;
pub use types::{
    classify_status, ApplyKind, DeployedPipeline, EnvironmentInfo, StackDescription, StackSpec,
    StatusClass,
};

#[cfg(test)]
pub use api::{MockEnvironmentStore, MockPipelineLister, MockStackApi};
