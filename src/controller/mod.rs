//! # Controller
//!
//! Application reconcile glue, status management, finalizers, reconcile errors, retry
//! backoff and the metrics/probe HTTP server.

pub mod backoff;
pub mod error;
pub mod reconciler;
pub mod server;

pub use error::{Error, ErrorKind};
