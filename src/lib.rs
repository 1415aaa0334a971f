// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
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

//! # Kestrel
//!
//! A lifecycle engine for Kubernetes clusters built from virtual machines.
//!
//! ## Overview
//!
//! Kestrel turns a declarative cluster file into running infrastructure:
//!
//! - Compare the new configuration with the last applied one
//! - Classify every change by how disruptive it is
//! - Refuse forbidden changes before anything is touched
//! - Drive terraform and ansible to converge the cluster
//!
//! ## Architecture
//!
//! 1. **Configuration**: parsed from `kestrel.yaml` and normalized into a tree
//! 2. **Classifier**: diffs the applied and new trees and assigns severities
//! 3. **Orchestrator**: decides what to run and records the applied state
//! 4. **Provisioners**: run the infrastructure and configuration engines
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation and trees
//! - [`planner`]: Diffing, severity policy and cluster plans
//! - [`provisioner`]: Engine provisioners, installers and subprocesses
//! - [`state`]: Applied state and working-directory lock
//! - [`orchestrator`]: Lifecycle pipeline
//! - [`ui`]: Operator prompts and messages
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! cluster:
//!   name: lab
//! hosts:
//!   - name: localhost
//!     default: true
//! network:
//!   cidr: 192.168.113.0/24
//! nodes:
//!   master:
//!     - id: m1
//!   worker:
//!     - id: w1
//!       cpu: 4
//! kubernetes:
//!   version: v1.28.6
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod provisioner;
pub mod state;
pub mod ui;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ClusterConfig, ClusterPaths, ConfigHasher, ConfigParser, ConfigTree, ConfigValidator};
pub use error::{KestrelError, Result};
pub use orchestrator::{Orchestrator, PipelineOutcome, ProvisionerPlan};
pub use planner::{ChangeClassifier, ClusterPlan, Event, RequiredAction, SeverityClass, SeverityPolicy};
pub use provisioner::{
    ClusterProvisioner, ConfigurationProvisioner, InfrastructureProvisioner, ProvisionOutcome, Provisioner,
};
pub use state::{AppliedState, LocalStateStore, StateStore};
pub use ui::{TerminalUi, Ui};
