//! Leases, leasable machines and machine sets

pub mod leasable;
pub mod lease;
pub mod set;
pub mod wait;

pub use leasable::{LeasableMachine, LeasableMachineExt};
pub use lease::Lease;
pub use set::MachineSet;
