//! # Runtime Module
//!
//! Runtime components of the operator: initialization, watch loops, error handling and
//! manager-level leader election.

pub mod error_policy;
pub mod initialization;
pub mod leader_election;
pub mod watch_loop;

pub use error_policy::*;
pub use initialization::*;
pub use leader_election::ManagerLease;
pub use watch_loop::*;
