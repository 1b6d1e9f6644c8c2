//! CPU advisor service
//!
//! Runs next to the CPU plugin on each node, streaming CPU advice over a
//! unix socket and exposing health and metrics over HTTP.

pub mod api;
pub mod config;
