//! machdeploy library
//!
//! Lease-guarded rollouts of app releases over machines managed by a remote
//! control plane.

pub mod api;
pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod machines;
pub mod models;
pub mod storage;
pub mod utils;
