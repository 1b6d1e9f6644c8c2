//! Single-flight advisory loop behind ListAndWatch
//!
//! Each tick fetches the plugin checkpoint, reconciles it into the cache,
//! checks the push gate, asks the advisor for fresh advice, assembles the
//! response and pushes it to the stream. Tick failures are reported to the
//! health registry and the loop carries on until the stream is closed or the
//! process stops.

use crate::advisor::{Advice, ResourceAdvisor};
use crate::assembler::Assembler;
use crate::cache::{now_nanos, MetaCache};
use crate::checkpoint::Checkpoint;
use crate::error::AdvisorError;
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::metadata::{PodFetcher, QosClassifier};
use crate::models::pools;
use crate::observability::{AdvisorMetrics, StructuredLogger};
use crate::proto::{GetCheckpointResponse, ListAndWatchResponse};
use crate::reconcile::Reconciler;
use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Items pushed to a ListAndWatch stream
pub type ResponseSender = mpsc::Sender<Result<ListAndWatchResponse, tonic::Status>>;
pub type ResponseReceiver = mpsc::Receiver<Result<ListAndWatchResponse, tonic::Status>>;

/// Source of plugin checkpoints
#[async_trait]
pub trait CheckpointSource: Send + Sync {
    async fn get_checkpoint(&self) -> Result<GetCheckpointResponse, AdvisorError>;
}

/// Creates a checkpoint source for a new session
#[async_trait]
pub trait PluginConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn CheckpointSource>, AdvisorError>;
}

/// Compare-and-swap guard allowing one advisory loop per process
#[derive(Debug, Clone, Default)]
pub struct LoopGuard {
    running: Arc<AtomicBool>,
}

impl LoopGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Result<LoopPermit, AdvisorError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AdvisorError::AlreadyRunning)?;
        Ok(LoopPermit {
            running: self.running.clone(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Held by the running loop; releases the guard when dropped
#[derive(Debug)]
pub struct LoopPermit {
    running: Arc<AtomicBool>,
}

impl Drop for LoopPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Timing and gating settings of the advisory loop
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Tick period (default: 5 seconds)
    pub period: Duration,
    /// Pushes are suppressed for this long after start (default: 30 seconds)
    pub startup_period: Duration,
    /// How long tick failures are tolerated before the loop reports unhealthy
    pub health_toleration: Duration,
    /// Pool that must exist before advice is pushed
    pub reserve_pool_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            startup_period: Duration::from_secs(30),
            health_toleration: Duration::from_secs(300),
            reserve_pool_name: pools::RESERVE.to_string(),
        }
    }
}

/// The CPU advisory server
pub struct CpuServer {
    config: ServerConfig,
    start_time: Instant,
    guard: LoopGuard,
    cache: Arc<dyn MetaCache>,
    reconciler: Reconciler,
    advisor: Arc<dyn ResourceAdvisor>,
    assembler: Assembler,
    health: HealthRegistry,
    metrics: AdvisorMetrics,
    logger: StructuredLogger,
    stop: watch::Receiver<bool>,
}

impl CpuServer {
    pub fn builder() -> CpuServerBuilder {
        CpuServerBuilder::default()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    /// Start a streaming session.
    ///
    /// Fails with [`AdvisorError::AlreadyRunning`] while another session is
    /// active, or with a transport error when the plugin cannot be reached.
    pub async fn list_and_watch(
        self: Arc<Self>,
        connector: &dyn PluginConnector,
    ) -> Result<ResponseReceiver, AdvisorError> {
        self.metrics.inc_lw_sessions();

        let permit = self.guard.try_acquire().map_err(|e| {
            warn!("Another ListAndWatch loop is running");
            e
        })?;

        let source = match connector.connect().await {
            Ok(source) => source,
            Err(e) => {
                self.metrics.inc_get_checkpoint_failed();
                error!(error = %e, "Failed to create cpu plugin client");
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(self.run_session(permit, source, tx));
        Ok(rx)
    }

    async fn run_session(
        self: Arc<Self>,
        _permit: LoopPermit,
        source: Box<dyn CheckpointSource>,
        tx: ResponseSender,
    ) {
        info!(
            period_ms = self.config.period.as_millis() as u64,
            "Start to push cpu advices"
        );
        self.health
            .register_with(
                components::CPU_SERVER_LW,
                ComponentHealth::degraded("waiting for first advice"),
            )
            .await;

        let mut stop = self.stop.clone();
        let period = self.config.period;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_success = Instant::now();

        loop {
            if *stop.borrow() {
                info!("ListAndWatch stopped because cpu server stopped");
                break;
            }

            tokio::select! {
                _ = tx.closed() => {
                    info!("ListAndWatch stream exited");
                    break;
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        info!("ListAndWatch stopped because stop signal was dropped");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    debug!("Trigger advisor update");
                    // a hung tick must not pin the session past cancel or stop
                    let result = tokio::select! {
                        result = self.get_and_push_advice(source.as_ref(), &tx) => result,
                        _ = tx.closed() => {
                            info!("ListAndWatch stream exited during advisor update");
                            break;
                        }
                        _ = stop.changed() => continue,
                    };
                    self.report_tick(result, &mut last_success).await;
                }
            }
        }

        self.health.unregister(components::CPU_SERVER_LW).await;
    }

    async fn report_tick(&self, result: Result<(), AdvisorError>, last_success: &mut Instant) {
        match result {
            Ok(()) => {
                *last_success = Instant::now();
                self.health.set_healthy(components::CPU_SERVER_LW).await;
            }
            Err(e) => {
                error!(error = %e, "Get and push advice failed");
                if last_success.elapsed() > self.config.health_toleration {
                    self.health
                        .set_unhealthy(components::CPU_SERVER_LW, e.to_string())
                        .await;
                } else {
                    self.health
                        .set_degraded(components::CPU_SERVER_LW, e.to_string())
                        .await;
                }
            }
        }
    }

    /// One advisory tick
    pub async fn get_and_push_advice(
        &self,
        source: &dyn CheckpointSource,
        tx: &ResponseSender,
    ) -> Result<(), AdvisorError> {
        self.get_and_sync_checkpoint(source).await?;

        if !self.should_trigger_advisor_update() {
            return Ok(());
        }

        let advice = self.advisor.update_and_get_advice().await.map_err(|e| {
            self.metrics.inc_advisor_update_failed();
            AdvisorError::Advice(e)
        })?;
        let result = match advice {
            Advice::Cpu(result) => result,
            Advice::Other { resource } => {
                self.metrics.inc_advisor_update_failed();
                return Err(AdvisorError::UnexpectedAdvice(resource));
            }
        };
        debug!(?result, "Got advisor update");

        let start = Instant::now();
        let resp = self.assembler.assemble(&result, self.cache.as_ref());
        self.metrics
            .observe_assemble_latency(start.elapsed().as_secs_f64());

        let pod_entries = resp.pod_entries.len();
        let extra_entries = resp.extra_entries.len();
        let overlap = resp.allow_shared_cores_overlap_reclaimed_cores;

        if tx.send(Ok(resp)).await.is_err() {
            self.metrics.inc_send_response_failed();
            return Err(AdvisorError::Send);
        }
        self.metrics.inc_send_response_succeeded();
        self.logger
            .log_advice_pushed(pod_entries, extra_entries, overlap);
        Ok(())
    }

    async fn get_and_sync_checkpoint(&self, source: &dyn CheckpointSource) -> Result<(), AdvisorError> {
        // taken before the fetch so containers added meanwhile survive GC
        let safe_time = now_nanos();

        let resp = match source.get_checkpoint().await {
            Ok(resp) => resp,
            Err(e) => {
                self.metrics.inc_get_checkpoint_failed();
                return Err(e);
            }
        };
        let checkpoint = match Checkpoint::from_proto(&resp) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                self.metrics.inc_get_checkpoint_failed();
                return Err(e);
            }
        };
        self.metrics.inc_get_checkpoint_succeeded();
        debug!(entries = checkpoint.entries.len(), "Got checkpoint");

        let report = self.reconciler.reconcile(&checkpoint, safe_time).await;
        self.logger.log_checkpoint_synced(
            report.pools_upserted,
            report.containers_upserted,
            report.failures,
            report.containers_deleted,
            report.pools_deleted,
        );
        Ok(())
    }

    /// Push gate: startup grace window and reserve pool presence
    pub fn should_trigger_advisor_update(&self) -> bool {
        if self.start_time.elapsed() < self.config.startup_period {
            info!("Skip pushing advice: starting up");
            self.metrics.inc_skipped_push("starting_up");
            return false;
        }

        if self.cache.get_pool(&self.config.reserve_pool_name).is_none() {
            error!(
                pool = %self.config.reserve_pool_name,
                "Skip pushing advice: reserve pool does not exist"
            );
            self.metrics.inc_skipped_push("reserve_pool_missing");
            return false;
        }

        true
    }
}

/// Builder for [`CpuServer`]
#[derive(Default)]
pub struct CpuServerBuilder {
    config: Option<ServerConfig>,
    cache: Option<Arc<dyn MetaCache>>,
    pods: Option<Arc<dyn PodFetcher>>,
    qos: Option<Arc<dyn QosClassifier>>,
    advisor: Option<Arc<dyn ResourceAdvisor>>,
    assembler: Option<Assembler>,
    health: Option<HealthRegistry>,
    node_name: Option<String>,
    stop: Option<watch::Receiver<bool>>,
}

impl CpuServerBuilder {
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn MetaCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn pod_fetcher(mut self, pods: Arc<dyn PodFetcher>) -> Self {
        self.pods = Some(pods);
        self
    }

    pub fn qos_classifier(mut self, qos: Arc<dyn QosClassifier>) -> Self {
        self.qos = Some(qos);
        self
    }

    pub fn advisor(mut self, advisor: Arc<dyn ResourceAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn assembler(mut self, assembler: Assembler) -> Self {
        self.assembler = Some(assembler);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }

    pub fn stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn build(self) -> anyhow::Result<CpuServer> {
        let cache = self.cache.ok_or_else(|| anyhow!("cache is required"))?;
        let pods = self.pods.ok_or_else(|| anyhow!("pod fetcher is required"))?;
        let qos = self.qos.ok_or_else(|| anyhow!("qos classifier is required"))?;
        let advisor = self.advisor.ok_or_else(|| anyhow!("advisor is required"))?;
        let stop = self.stop.ok_or_else(|| anyhow!("stop signal is required"))?;
        let metrics = AdvisorMetrics::new();

        Ok(CpuServer {
            config: self.config.unwrap_or_default(),
            start_time: Instant::now(),
            guard: LoopGuard::new(),
            reconciler: Reconciler::new(cache.clone(), pods, qos, metrics.clone()),
            cache,
            advisor,
            assembler: self.assembler.unwrap_or_default(),
            health: self.health.unwrap_or_default(),
            metrics,
            logger: StructuredLogger::new(self.node_name.unwrap_or_default()),
            stop,
        })
    }
}
