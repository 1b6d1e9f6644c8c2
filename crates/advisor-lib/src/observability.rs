//! Observability infrastructure for the CPU advisor
//!
//! Provides:
//! - Prometheus metrics for every step of the advisory tick
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AdvisorMetricsInner> = OnceLock::new();

struct AdvisorMetricsInner {
    lw_sessions: IntCounter,
    get_checkpoint: IntCounterVec,
    advisor_update_failed: IntCounter,
    send_response: IntCounterVec,
    update_container_failed: IntCounterVec,
    skipped_pushes: IntCounterVec,
    reconcile_latency_seconds: Histogram,
    assemble_latency_seconds: Histogram,
    cached_containers: IntGauge,
    cached_pools: IntGauge,
}

impl AdvisorMetricsInner {
    fn new() -> Self {
        Self {
            lw_sessions: register_int_counter!(
                "cpu_advisor_lw_sessions_total",
                "Number of ListAndWatch sessions requested"
            )
            .expect("Failed to register lw_sessions"),

            get_checkpoint: register_int_counter_vec!(
                "cpu_advisor_get_checkpoint_total",
                "Checkpoint fetches from the CPU plugin by result",
                &["result"]
            )
            .expect("Failed to register get_checkpoint"),

            advisor_update_failed: register_int_counter!(
                "cpu_advisor_advisor_update_failed_total",
                "Failed advisory updates"
            )
            .expect("Failed to register advisor_update_failed"),

            send_response: register_int_counter_vec!(
                "cpu_advisor_send_response_total",
                "ListAndWatch responses pushed by result",
                &["result"]
            )
            .expect("Failed to register send_response"),

            update_container_failed: register_int_counter_vec!(
                "cpu_advisor_checkpoint_update_container_failed_total",
                "Containers that could not be updated from the checkpoint",
                &["pod_uid", "container_name"]
            )
            .expect("Failed to register update_container_failed"),

            skipped_pushes: register_int_counter_vec!(
                "cpu_advisor_skipped_pushes_total",
                "Advisory pushes skipped by the gate check",
                &["reason"]
            )
            .expect("Failed to register skipped_pushes"),

            reconcile_latency_seconds: register_histogram!(
                "cpu_advisor_reconcile_latency_seconds",
                "Time spent reconciling a checkpoint into the cache",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_latency_seconds"),

            assemble_latency_seconds: register_histogram!(
                "cpu_advisor_assemble_latency_seconds",
                "Time spent assembling a ListAndWatch response",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register assemble_latency_seconds"),

            cached_containers: register_int_gauge!(
                "cpu_advisor_cached_containers",
                "Containers currently held in the metadata cache"
            )
            .expect("Failed to register cached_containers"),

            cached_pools: register_int_gauge!(
                "cpu_advisor_cached_pools",
                "Pools currently held in the metadata cache"
            )
            .expect("Failed to register cached_pools"),
        }
    }
}

/// Advisor metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct AdvisorMetrics {
    _private: (),
}

impl Default for AdvisorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AdvisorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AdvisorMetricsInner {
        GLOBAL_METRICS.get_or_init(AdvisorMetricsInner::new)
    }

    pub fn inc_lw_sessions(&self) {
        self.inner().lw_sessions.inc();
    }

    pub fn inc_get_checkpoint_failed(&self) {
        self.inner()
            .get_checkpoint
            .with_label_values(&["failed"])
            .inc();
    }

    pub fn inc_get_checkpoint_succeeded(&self) {
        self.inner()
            .get_checkpoint
            .with_label_values(&["succeeded"])
            .inc();
    }

    pub fn inc_advisor_update_failed(&self) {
        self.inner().advisor_update_failed.inc();
    }

    pub fn inc_send_response_failed(&self) {
        self.inner()
            .send_response
            .with_label_values(&["failed"])
            .inc();
    }

    pub fn inc_send_response_succeeded(&self) {
        self.inner()
            .send_response
            .with_label_values(&["succeeded"])
            .inc();
    }

    pub fn inc_update_container_failed(&self, pod_uid: &str, container_name: &str) {
        self.inner()
            .update_container_failed
            .with_label_values(&[pod_uid, container_name])
            .inc();
    }

    pub fn inc_skipped_push(&self, reason: &str) {
        self.inner()
            .skipped_pushes
            .with_label_values(&[reason])
            .inc();
    }

    pub fn observe_reconcile_latency(&self, duration_secs: f64) {
        self.inner().reconcile_latency_seconds.observe(duration_secs);
    }

    pub fn observe_assemble_latency(&self, duration_secs: f64) {
        self.inner().assemble_latency_seconds.observe(duration_secs);
    }

    pub fn set_cache_size(&self, containers: i64, pools: i64) {
        self.inner().cached_containers.set(containers);
        self.inner().cached_pools.set(pools);
    }
}

/// Structured logger for advisor lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, advisor_socket: &str, plugin_socket: &str) {
        info!(
            event = "advisor_started",
            node = %self.node_name,
            advisor_version = %version,
            advisor_socket = %advisor_socket,
            plugin_socket = %plugin_socket,
            "CPU advisor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "advisor_shutdown",
            node = %self.node_name,
            reason = %reason,
            "CPU advisor shutting down"
        );
    }

    pub fn log_checkpoint_synced(
        &self,
        pools: usize,
        containers: usize,
        failures: usize,
        containers_deleted: usize,
        pools_deleted: usize,
    ) {
        if failures > 0 {
            warn!(
                event = "checkpoint_synced",
                node = %self.node_name,
                pools = pools,
                containers = containers,
                failures = failures,
                containers_deleted = containers_deleted,
                pools_deleted = pools_deleted,
                "Checkpoint synced with per-entity failures"
            );
        } else {
            info!(
                event = "checkpoint_synced",
                node = %self.node_name,
                pools = pools,
                containers = containers,
                containers_deleted = containers_deleted,
                pools_deleted = pools_deleted,
                "Checkpoint synced"
            );
        }
    }

    pub fn log_advice_pushed(&self, pod_entries: usize, extra_entries: usize, overlap: bool) {
        info!(
            event = "advice_pushed",
            node = %self.node_name,
            pod_entries = pod_entries,
            extra_entries = extra_entries,
            allow_shared_overlap_reclaimed = overlap,
            "Sent ListAndWatch response"
        );
    }
}
