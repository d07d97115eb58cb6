//! Release record service models

pub mod models;

pub use models::*;
