//! # Trace Controller
//!
//! Enables Liberty trace on a single pod by writing a `<logging>` dropin into the pod's
//! `app` container over exec.
//!
//! Traced pods are tracked in the `trace` leader tracker so at most one
//! `OpenLibertyTrace` operates on a pod. Moving a trace to another pod first removes the
//! dropin from the previous one; deleting the trace removes it through a finalizer.

pub mod factory;
pub mod plan;
pub mod reconcile;

pub use factory::TraceFactory;
pub use plan::{plan, trace_xml, TraceAction, TracePlan};
pub use reconcile::reconcile_trace;
