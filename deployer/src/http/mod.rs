//! HTTP clients for the remote services

pub mod client;
pub mod machines;
pub mod releases;

pub use client::HttpClient;
pub use machines::MachinesClient;
