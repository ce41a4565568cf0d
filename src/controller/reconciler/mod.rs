//! # Reconciler
//!
//! Reconcile functions of the application and trace controllers, and the context they
//! share.

pub mod application;
pub mod context;
pub mod finalizer;
pub mod status;
pub mod workload;

pub use application::reconcile_application;
pub use context::{BackoffState, Reconciler};
