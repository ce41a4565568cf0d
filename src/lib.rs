//! # Open Liberty Operator
//!
//! Kubernetes operator core for Open Liberty applications.
//!
//! ## Overview
//!
//! Applications in a namespace share generated resources instead of each producing its own:
//!
//! 1. **LTPA keys** - generated once by a Job and mounted by every application that opts in
//! 2. **LTPA server XML** - published per password-encryption setting
//! 3. **Password encryption key** - the user's AES (or legacy) key mirrored into an internal Secret
//! 4. **Trace** - a `<logging>` dropin written into a single pod
//!
//! Each family of shared resources has a leader tracker Secret recording which instance
//! leads each resource. The leader creates and rotates the resource; followers wait for it.
//! Which resource an instance needs is decided by walking a versioned decision tree with
//! the instance's spec options.
//!
//! ## Features
//!
//! - **Leader tracking**: namespace-scoped, rebuilt from the cluster when missing or outdated
//! - **Versioned decision trees**: old tracker paths are upgraded through replace maps
//! - **Rotation propagation**: pod-template annotations roll workloads when keys change
//! - **Prometheus metrics**: reconcile, election and rotation counters on `/metrics`
//! - **Health probes**: `/healthz` and `/readyz`

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod encryption;
pub mod image;
pub mod leader;
pub mod ltpa;
pub mod observability;
pub mod runtime;
pub mod sharing;
pub mod trace;
pub mod tree;
pub mod worker;

pub use crd::{OpenLibertyApplication, OpenLibertyTrace};
