//! `farmhand-core` -- render worker domain logic.
//!
//! Everything in this crate is pure: the coordinator, the external
//! renderer and the host's device enumeration are all supplied by the
//! caller, so every rule can be tested in isolation.

pub mod capabilities;
pub mod compute;
pub mod devices;
pub mod error;
pub mod inspection;
pub mod job;
pub mod settings;
