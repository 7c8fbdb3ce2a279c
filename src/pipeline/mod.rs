//! Pipeline stage resolution and legacy naming.
//!
//! This module provides:
//! - Binding of declared stages to environments, in declaration order
//! - Detection of the naming scheme a deployed pipeline uses

mod naming;
mod stages;

pub use naming::LegacyNamingResolver;
pub use stages::{resolve_stages, AssociatedEnvironment, PipelineStage};
