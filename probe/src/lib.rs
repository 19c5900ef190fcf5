//! Switchboard Probe - command-line check of a Switchboard backend.
//!
//! Acquires the shared session from an environment-configured discovery
//! endpoint, issues one correlated request and holds the session until
//! Ctrl-C.
//!
//! # Components
//!
//! - [`config`]: Probe configuration

pub mod config;

pub use config::{ConfigError, ProbeConfig};
