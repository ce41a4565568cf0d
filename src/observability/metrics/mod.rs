//! # Metrics Module
//!
//! Prometheus metrics for monitoring the operator, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup and registration
//! - `controller_metrics` - Reconciliations, errors, durations and requeues
//! - `sharing_metrics` - Leader elections, tracker rebuilds, LTPA jobs, key rotations, trace operations

pub mod controller_metrics;
pub mod registry;
pub mod sharing_metrics;

pub use controller_metrics::*;
pub use registry::*;
pub use sharing_metrics::*;
