//! The Strata server: configuration, the fixed-rate simulation loop, event
//! handlers, periodic jobs, and world snapshots, assembled over the
//! transport and sync crates.

pub mod config;
pub mod handlers;
pub mod jobs;
pub mod snapshot;
pub mod tick;

pub use config::{CliArgs, ConfigError, ServerConfig};
pub use tick::{SimState, TickLoop};
