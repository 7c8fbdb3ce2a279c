// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Shipyard Deploy
//!
//! Deploys the workloads and delivery pipelines of an application as
//! platform stacks.
//!
//! ## Overview
//!
//! A deploy run takes one workload (in one environment) or one pipeline and:
//!
//! - Uploads its artifacts and renders the stack template
//! - Refuses to downgrade a stack deployed by a newer release of the tool
//! - Optionally shows a structural diff against the deployed template
//! - Creates or updates the stack and waits for it to settle
//!
//! ## Architecture
//!
//! The deployment core never talks to the platform directly:
//!
//! 1. **Collaborators**: `StackApi`, `PipelineLister` and `EnvironmentStore`
//!    are traits, implemented by the HTTP control-plane client
//! 2. **Controller**: `StackController` classifies how an apply ended and
//!    reports outcomes and events
//! 3. **CLI**: renders reports, diffs and errors for the user
//!
//! ## Modules
//!
//! - [`config`]: Manifest parsing and validation, user settings
//! - [`cloud`]: Control-plane contracts and HTTP client
//! - [`artifacts`]: Image pushes and content-addressed uploads
//! - [`deploy`]: Version gate, diff engine, rendering and stack lifecycle
//! - [`pipeline`]: Stage resolution and legacy naming
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! application: demo
//!
//! artifacts:
//!   bucket: demo-artifacts
//!   registry: 123456789012.dkr.ecr.us-west-2.amazonaws.com/demo
//!
//! workloads:
//!   - name: api
//!     type: Load Balanced Web Service
//!     containers:
//!       api:
//!         build: ./api
//!
//! pipelines:
//!   - name: release
//!     source:
//!       provider: GitHub
//!       properties:
//!         repository: https://github.com/acme/demo
//!     stages:
//!       - name: test
//!       - name: prod
//!         requires_approval: true
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod artifacts;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod deploy;
pub mod error;
pub mod pipeline;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use cloud::ControlPlaneClient;
pub use config::{ConfigParser, ConfigValidator, WorkspaceConfig};
pub use deploy::{ApplyOutcome, ApplyReport, DiffEngine, StackController, VersionGatekeeper};
pub use error::{Result, ShipyardError};
pub use pipeline::{resolve_stages, LegacyNamingResolver};
