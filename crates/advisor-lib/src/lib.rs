//! Core library of the CPU advisor
//!
//! This crate provides the core functionality for:
//! - Reconciling CPU plugin checkpoints into the metadata cache
//! - Modelling pool and container CPU capacity as overlapping blocks
//! - Assembling ListAndWatch responses from advisory results
//! - The single-flight advisory loop and its gRPC transport
//! - Health checks and observability

pub mod advisor;
pub mod assembler;
pub mod block;
pub mod cache;
pub mod checkpoint;
pub mod cpuset;
pub mod error;
pub mod grpc;
pub mod health;
pub mod metadata;
pub mod models;
pub mod observability;
pub mod proto;
pub mod reconcile;
pub mod server;

#[cfg(test)]
mod tests;

pub use advisor::{Advice, CpuCalculationResult, HeadroomProvider, ResourceAdvisor};
pub use assembler::Assembler;
pub use cache::{InMemoryMetaCache, MetaCache};
pub use error::{AdvisorError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AdvisorMetrics, StructuredLogger};
pub use server::{CpuServer, ServerConfig};
