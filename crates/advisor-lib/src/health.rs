//! Health check infrastructure for the CPU advisor
//!
//! Tracks per-component health for liveness and readiness probes. The
//! advisory loop registers itself for the lifetime of each ListAndWatch
//! session and unregisters on exit, so an idle advisor reports healthy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing, but still inside its toleration window
    Degraded,
    Unhealthy,
}

/// Last reported state of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn stamped(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::stamped(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::stamped(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::stamped(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Overall status is the worst component status; no components is healthy
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    /// Temporary check held by a running ListAndWatch session
    pub const CPU_SERVER_LW: &str = "cpu_server_lw";
    pub const GRPC_SERVER: &str = "advisor_grpc_server";
}

#[derive(Debug, Default)]
struct RegistryState {
    components: HashMap<String, ComponentHealth>,
    serving: bool,
}

/// Shared component table behind the health endpoints
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.register_with(name, ComponentHealth::healthy()).await;
    }

    /// Register a component with an explicit initial status
    pub async fn register_with(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    /// Remove a component; returns whether it was registered
    pub async fn unregister(&self, name: &str) -> bool {
        self.state.write().await.components.remove(name).is_some()
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.state.read().await.components.contains_key(name)
    }

    pub async fn set_healthy(&self, name: &str) {
        self.register_with(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.register_with(name, ComponentHealth::degraded(message))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.register_with(name, ComponentHealth::unhealthy(message))
            .await;
    }

    /// Flip readiness once the gRPC server is serving, and back on shutdown
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.serving = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready when serving and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.serving {
            return ReadinessResponse {
                ready: false,
                reason: Some("advisor gRPC server is not serving".to_string()),
            };
        }

        let mut failing: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, health)| health.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .collect();
        if failing.is_empty() {
            return ReadinessResponse {
                ready: true,
                reason: None,
            };
        }

        failing.sort_unstable();
        ReadinessResponse {
            ready: false,
            reason: Some(format!("unhealthy components: {}", failing.join(", "))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idle_advisor_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[test]
    fn test_overall_status_is_worst_component() {
        let mut components = HashMap::new();
        components.insert("a".to_string(), ComponentHealth::healthy());
        components.insert("b".to_string(), ComponentHealth::degraded("slow"));
        assert_eq!(
            HealthResponse::compute_status(&components),
            ComponentStatus::Degraded
        );

        components.insert("c".to_string(), ComponentHealth::unhealthy("down"));
        assert_eq!(
            HealthResponse::compute_status(&components),
            ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_tick_failure_marks_session_degraded() {
        let registry = HealthRegistry::new();
        registry.register(components::GRPC_SERVER).await;
        registry
            .register_with(
                components::CPU_SERVER_LW,
                ComponentHealth::degraded("waiting for first advice"),
            )
            .await;
        assert!(registry.is_registered(components::CPU_SERVER_LW).await);

        registry
            .set_degraded(components::CPU_SERVER_LW, "get checkpoint failed")
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::CPU_SERVER_LW].message.as_deref(),
            Some("get checkpoint failed")
        );

        registry.set_healthy(components::CPU_SERVER_LW).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_session_exit_clears_its_check() {
        let registry = HealthRegistry::new();
        registry
            .set_unhealthy(components::CPU_SERVER_LW, "plugin unreachable")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);

        assert!(registry.unregister(components::CPU_SERVER_LW).await);
        assert!(!registry.unregister(components::CPU_SERVER_LW).await);
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_not_ready_until_serving() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.unwrap().contains("not serving"));

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_readiness_names_unhealthy_components() {
        let registry = HealthRegistry::new();
        registry.register(components::GRPC_SERVER).await;
        registry.set_ready(true).await;
        registry
            .set_unhealthy(components::CPU_SERVER_LW, "plugin unreachable")
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("unhealthy components: cpu_server_lw")
        );
    }
}
