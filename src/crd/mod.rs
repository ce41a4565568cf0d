//! # Custom Resource Definitions
//!
//! CRD types for the Open Liberty operator.
//!
//! `OpenLibertyApplication` drives shared-resource election and the workload;
//! `OpenLibertyTrace` enables trace on a single pod.

pub mod application;
pub mod status;
pub mod trace;

pub use application::{
    EnvVar, ExperimentalSpec, OpenLibertyApplication, OpenLibertyApplicationSpec, ServiceSpec,
    SsoSpec, StatefulSetSpec, StorageSpec,
};
pub use status::{
    find_condition, set_condition, Condition, OpenLibertyApplicationStatus, OpenLibertyTraceStatus,
    OperatedResource,
};
pub use trace::{OpenLibertyTrace, OpenLibertyTraceSpec};
