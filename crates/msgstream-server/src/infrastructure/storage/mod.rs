//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration file, writes the
//! defaults back out on request, and turns the on-disk schema into the
//! runtime [`ServerConfig`](crate::infrastructure::network::ServerConfig).

pub mod config;
