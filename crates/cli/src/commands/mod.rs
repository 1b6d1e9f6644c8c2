//! Subcommand implementations

pub mod checkpoint;
pub mod health;
pub mod watch;
