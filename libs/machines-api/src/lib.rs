//! Control plane machine models
//!
//! Resources exchanged with the machines control plane: machines, their
//! configuration and event history, leases and volumes.

pub mod models;

pub use models::*;
