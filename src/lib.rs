// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

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
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Kongsync
//!
//! Declarative, idempotent reconciliation of Kong upstreams and targets
//! through the Kong Admin API.
//!
//! ## Overview
//!
//! Kongsync keeps a set of Kong load-balancing objects in line with a
//! YAML declaration:
//!
//! - Declare upstreams (name, slot count) and their targets (address, weight)
//! - Record the ids Kong assigns so later runs can find the same objects
//! - Refresh those ids on every run and forget the ones Kong no longer knows
//! - Converge by creating, updating, replacing or deleting objects
//!
//! ## Architecture
//!
//! 1. **Desired State**: Defined in `kongsync.yaml`
//! 2. **Recorded State**: Kong ids stored next to the declaration
//! 3. **Reconciler**: Refreshes recorded ids, plans, and executes Admin API calls
//!
//! Targets are immutable in Kong. Changing a target's weight deletes it
//! and creates a replacement with a new id. Upstream slots cannot change
//! in place either, so a slot change replaces the upstream.
//!
//! ## Modules
//!
//! - [`kong`]: Admin API wire types and the REST client
//! - [`resources`]: Create/read/update/delete per resource type
//! - [`config`]: Declaration parsing and validation
//! - [`state`]: Recorded identities and locking
//! - [`planner`]: Diff computation and execution planning
//! - [`reconciler`]: Refresh, plan and apply
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! admin:
//!   url: http://localhost:8001
//!
//! upstreams:
//!   - name: svc-a
//!     slots: 100
//!     targets:
//!       - target: 10.0.0.1:8080
//!         weight: 100
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod kong;
pub mod planner;
pub mod reconciler;
pub mod resources;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, SyncConfig};
pub use error::{KongSyncError, Result};
pub use kong::{KongClient, RestClient, Target, Upstream};
pub use planner::{DiffEngine, PlanExecutor, SyncPlan};
pub use reconciler::{DriftReport, PreparedPlan, ReconciliationResult, Reconciler};
pub use resources::{DesiredTarget, DesiredUpstream, TargetReconciler, UpstreamReconciler};
pub use state::{LocalStateStore, StateStore, SyncState};
