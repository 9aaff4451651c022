//! Subcommand implementations.

pub mod connect;
