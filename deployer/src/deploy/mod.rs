//! Deployment module

pub mod fsm;
pub mod launch_input;
pub mod orchestrator;
pub mod release_command;
pub mod strategy;
pub mod volumes;

pub use orchestrator::MachineDeployment;
pub use strategy::Strategy;
