//! `farmhand-worker` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod config;
pub mod gpu;
pub mod output;
pub mod renderer;
pub mod rpc;
pub mod session;
pub mod status;
