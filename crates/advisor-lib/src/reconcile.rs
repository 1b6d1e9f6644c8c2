//! Checkpoint reconciliation
//!
//! Merges a plugin checkpoint into the metadata cache. Pools are ingested
//! before containers because non-dedicated containers inherit their owner
//! pool's topology. Containers missing from the checkpoint are garbage
//! collected, fenced by the safe time taken before the checkpoint was fetched.

use crate::cache::MetaCache;
use crate::checkpoint::{AllocationInfo, Checkpoint};
use crate::metadata::{PodFetcher, PodMeta, PodQos, QosClassifier};
use crate::models::{ContainerInfo, PoolInfo, QosLevel, FAKED_CONTAINER_NAME};
use crate::observability::AdvisorMetrics;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome counters of one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub pools_upserted: usize,
    pub containers_upserted: usize,
    pub failures: usize,
    pub containers_deleted: usize,
    pub pools_deleted: usize,
}

pub struct Reconciler {
    cache: Arc<dyn MetaCache>,
    pods: Arc<dyn PodFetcher>,
    qos: Arc<dyn QosClassifier>,
    metrics: AdvisorMetrics,
}

impl Reconciler {
    pub fn new(
        cache: Arc<dyn MetaCache>,
        pods: Arc<dyn PodFetcher>,
        qos: Arc<dyn QosClassifier>,
        metrics: AdvisorMetrics,
    ) -> Self {
        Self {
            cache,
            pods,
            qos,
            metrics,
        }
    }

    pub async fn reconcile(&self, checkpoint: &Checkpoint, safe_time: i64) -> ReconcileReport {
        let start = Instant::now();
        let mut report = ReconcileReport::default();
        let mut living_pools: HashSet<String> = HashSet::new();

        for (pool_name, info) in checkpoint.pools() {
            living_pools.insert(pool_name.clone());
            match self.update_pool(pool_name, info) {
                Ok(()) => report.pools_upserted += 1,
                Err(e) => {
                    warn!(pool = %pool_name, error = %e, "Failed to update pool info");
                    report.failures += 1;
                }
            }
        }

        for malformed in &checkpoint.malformed {
            warn!(
                entry = %malformed.entry_name,
                sub_entry = %malformed.sub_entry_name,
                reason = %malformed.reason,
                "Skipping malformed checkpoint entry"
            );
            report.failures += 1;
            if malformed.sub_entry_name == FAKED_CONTAINER_NAME {
                living_pools.insert(malformed.entry_name.clone());
            } else {
                self.metrics
                    .inc_update_container_failed(&malformed.entry_name, &malformed.sub_entry_name);
            }
        }

        for (pod_uid, containers) in checkpoint.pods() {
            let (pod, qos) = match self.lookup_pod(pod_uid).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(pod_uid = %pod_uid, error = %e, "Failed to get pod info");
                    report.failures += 1;
                    for container_name in containers.keys() {
                        self.metrics
                            .inc_update_container_failed(pod_uid, container_name);
                    }
                    continue;
                }
            };

            for (container_name, info) in containers {
                match self.update_container(pod_uid, container_name, &pod, qos, info) {
                    Ok(()) => report.containers_upserted += 1,
                    Err(e) => {
                        warn!(
                            pod_uid = %pod_uid,
                            container_name = %container_name,
                            error = %e,
                            "Failed to update container info"
                        );
                        report.failures += 1;
                        self.metrics
                            .inc_update_container_failed(pod_uid, container_name);
                    }
                }
            }
        }

        match self.cache.range_and_delete_containers(
            &mut |ci: &ContainerInfo| !checkpoint.has_container(&ci.pod_uid, &ci.container_name),
            safe_time,
        ) {
            Ok(deleted) => report.containers_deleted = deleted,
            Err(e) => warn!(error = %e, "Failed to delete stale containers"),
        }

        // Pools still referenced by a live container survive even if the
        // checkpoint omits them
        self.cache.range_containers(&mut |ci: &ContainerInfo| {
            if !ci.origin_owner_pool_name.is_empty() {
                living_pools.insert(ci.origin_owner_pool_name.clone());
            }
            true
        });

        match self.cache.gc_pools(&living_pools) {
            Ok(deleted) => report.pools_deleted = deleted,
            Err(e) => warn!(error = %e, "Failed to gc pool entries"),
        }

        self.metrics
            .observe_reconcile_latency(start.elapsed().as_secs_f64());
        self.metrics.set_cache_size(
            self.cache.container_count() as i64,
            self.cache.pool_count() as i64,
        );
        debug!(?report, "Reconciled checkpoint");

        report
    }

    async fn lookup_pod(&self, pod_uid: &str) -> Result<(PodMeta, PodQos)> {
        let pod = self.pods.get_pod(pod_uid).await?;
        let qos = self.qos.classify(&pod)?;
        Ok((pod, qos))
    }

    fn update_pool(&self, pool_name: &str, info: &AllocationInfo) -> Result<()> {
        let mut pool = self
            .cache
            .get_pool(pool_name)
            .unwrap_or_else(|| PoolInfo::new(pool_name));
        pool.topology_aware_assignments = info.topology_aware_assignments.clone();
        pool.original_topology_aware_assignments =
            info.original_topology_aware_assignments.clone();
        self.cache.set_pool(pool)
    }

    fn update_container(
        &self,
        pod_uid: &str,
        container_name: &str,
        pod: &PodMeta,
        qos: PodQos,
        info: &AllocationInfo,
    ) -> Result<()> {
        let existing = self.cache.get_container(pod_uid, container_name);
        let is_new = existing.is_none();
        let mut ci = existing.unwrap_or_else(|| {
            let mut ci = ContainerInfo::new(pod_uid, container_name);
            ci.qos_level = qos.level;
            ci
        });

        ci.pod_namespace = pod.namespace.clone();
        ci.pod_name = pod.name.clone();
        ci.ramp_up = info.ramp_up;
        ci.topology_aware_assignments = info.topology_aware_assignments.clone();
        ci.original_topology_aware_assignments = info.original_topology_aware_assignments.clone();
        ci.owner_pool_name = info.owner_pool_name.clone();
        ci.numa_binding = qos.numa_binding;

        if ci.qos_level != qos.level {
            info!(
                pod_uid = %pod_uid,
                container_name = %container_name,
                from = %ci.qos_level,
                to = %qos.level,
                "QoS level changed"
            );
            ci.qos_level = qos.level;
        }

        if ci.origin_owner_pool_name.is_empty() && !ci.owner_pool_name.is_empty() {
            ci.origin_owner_pool_name = ci.owner_pool_name.clone();
        }

        if ci.qos_level != QosLevel::DedicatedCores && !ci.owner_pool_name.is_empty() {
            if let Some(pool) = self.cache.get_pool(&ci.owner_pool_name) {
                ci.topology_aware_assignments = pool.topology_aware_assignments;
            }
        }

        if is_new {
            debug!(pod_uid = %pod_uid, container_name = %container_name, "Tracking new container");
        }
        self.cache.set_container(ci)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{now_nanos, InMemoryMetaCache};
    use crate::checkpoint::fixtures::CheckpointBuilder;
    use crate::metadata::{AnnotationQosClassifier, StaticPodFetcher, QOS_LEVEL_ANNOTATION};

    struct Harness {
        cache: Arc<InMemoryMetaCache>,
        pods: Arc<StaticPodFetcher>,
        reconciler: Reconciler,
    }

    fn harness() -> Harness {
        let cache = Arc::new(InMemoryMetaCache::new());
        let pods = Arc::new(StaticPodFetcher::new());
        let reconciler = Reconciler::new(
            cache.clone(),
            pods.clone(),
            Arc::new(AnnotationQosClassifier),
            AdvisorMetrics::new(),
        );
        Harness {
            cache,
            pods,
            reconciler,
        }
    }

    fn add_pod(pods: &StaticPodFetcher, uid: &str, qos: Option<&str>) {
        let mut pod = PodMeta {
            uid: uid.to_string(),
            namespace: "default".to_string(),
            name: format!("pod-{}", uid),
            ..Default::default()
        };
        if let Some(level) = qos {
            pod.annotations
                .insert(QOS_LEVEL_ANNOTATION.to_string(), level.to_string());
        }
        pods.insert(pod);
    }

    async fn run(h: &Harness, builder: CheckpointBuilder) -> ReconcileReport {
        let checkpoint = Checkpoint::from_proto(&builder.build()).unwrap();
        h.reconciler.reconcile(&checkpoint, now_nanos()).await
    }

    #[tokio::test]
    async fn test_container_inherits_pool_topology_from_same_checkpoint() {
        let h = harness();
        add_pod(&h.pods, "uid-1", None);

        let report = run(
            &h,
            CheckpointBuilder::new()
                .pool("share", &[(0, "0-7")])
                .container("uid-1", "main", "share", &[(0, "0")]),
        )
        .await;

        assert_eq!(report.pools_upserted, 1);
        assert_eq!(report.containers_upserted, 1);
        let ci = h.cache.get_container("uid-1", "main").unwrap();
        assert_eq!(ci.topology_aware_assignments[&0].to_string(), "0-7");
        assert_eq!(ci.original_topology_aware_assignments[&0].to_string(), "0");
        assert_eq!(ci.pod_name, "pod-uid-1");
    }

    #[tokio::test]
    async fn test_dedicated_keeps_own_topology() {
        let h = harness();
        add_pod(&h.pods, "uid-1", Some("dedicated_cores"));

        run(
            &h,
            CheckpointBuilder::new()
                .pool("share", &[(0, "0-7")])
                .container("uid-1", "main", "dedicated", &[(0, "8-9")]),
        )
        .await;

        let ci = h.cache.get_container("uid-1", "main").unwrap();
        assert_eq!(ci.qos_level, QosLevel::DedicatedCores);
        assert_eq!(ci.topology_aware_assignments[&0].to_string(), "8-9");
    }

    #[tokio::test]
    async fn test_origin_owner_is_immutable() {
        let h = harness();
        add_pod(&h.pods, "uid-1", None);

        for owner in ["share", "isolation-a", "share-2", ""] {
            run(
                &h,
                CheckpointBuilder::new()
                    .pool("share", &[(0, "0-3")])
                    .container("uid-1", "main", owner, &[(0, "0-3")]),
            )
            .await;
            let ci = h.cache.get_container("uid-1", "main").unwrap();
            assert_eq!(ci.owner_pool_name, owner);
            assert_eq!(ci.origin_owner_pool_name, "share");
        }
    }

    #[tokio::test]
    async fn test_origin_owner_set_on_first_non_empty_owner() {
        let h = harness();
        add_pod(&h.pods, "uid-1", None);

        run(
            &h,
            CheckpointBuilder::new()
                .pool("share", &[(0, "0-3")])
                .container("uid-1", "main", "", &[(0, "0-3")]),
        )
        .await;
        assert_eq!(
            h.cache
                .get_container("uid-1", "main")
                .unwrap()
                .origin_owner_pool_name,
            ""
        );

        run(
            &h,
            CheckpointBuilder::new()
                .pool("share", &[(0, "0-3")])
                .container("uid-1", "main", "share", &[(0, "0-3")]),
        )
        .await;
        assert_eq!(
            h.cache
                .get_container("uid-1", "main")
                .unwrap()
                .origin_owner_pool_name,
            "share"
        );
    }

    #[tokio::test]
    async fn test_gc_removes_missing_containers() {
        let h = harness();
        add_pod(&h.pods, "uid-1", None);
        add_pod(&h.pods, "uid-2", None);

        run(
            &h,
            CheckpointBuilder::new()
                .pool("share", &[(0, "0-3")])
                .container("uid-1", "main", "share", &[])
                .container("uid-1", "sidecar", "share", &[])
                .container("uid-2", "main", "share", &[]),
        )
        .await;
        assert_eq!(h.cache.container_count(), 3);

        let report = run(
            &h,
            CheckpointBuilder::new()
                .pool("share", &[(0, "0-3")])
                .container("uid-1", "main", "share", &[]),
        )
        .await;

        assert_eq!(report.containers_deleted, 2);
        assert!(h.cache.get_container("uid-1", "sidecar").is_none());
        assert!(h.cache.get_container("uid-2", "main").is_none());
        assert!(h.cache.get_container("uid-1", "main").is_some());
    }

    #[tokio::test]
    async fn test_gc_spares_containers_created_after_safe_time() {
        let h = harness();
        let safe_time = now_nanos();
        h.cache
            .set_container(ContainerInfo::new("uid-late", "main"))
            .unwrap();

        let checkpoint =
            Checkpoint::from_proto(&CheckpointBuilder::new().pool("share", &[]).build()).unwrap();
        let report = h.reconciler.reconcile(&checkpoint, safe_time).await;

        assert_eq!(report.containers_deleted, 0);
        assert!(h.cache.get_container("uid-late", "main").is_some());
    }

    #[tokio::test]
    async fn test_pool_gc_keeps_pools_referenced_by_origin_owner() {
        let h = harness();
        add_pod(&h.pods, "uid-1", None);

        run(
            &h,
            CheckpointBuilder::new()
                .pool("share", &[(0, "0-3")])
                .pool("stale", &[(0, "4")])
                .container("uid-1", "main", "share", &[]),
        )
        .await;
        assert_eq!(h.cache.pool_count(), 2);

        // share is gone from the checkpoint but uid-1 still originates from it
        let report = run(
            &h,
            CheckpointBuilder::new()
                .pool("reserve", &[(0, "5")])
                .container("uid-1", "main", "isolation-a", &[]),
        )
        .await;

        assert_eq!(report.pools_deleted, 1);
        assert!(h.cache.get_pool("share").is_some());
        assert!(h.cache.get_pool("reserve").is_some());
        assert!(h.cache.get_pool("stale").is_none());
    }

    #[tokio::test]
    async fn test_pod_lookup_failure_is_isolated() {
        let h = harness();
        add_pod(&h.pods, "uid-1", None);

        let report = run(
            &h,
            CheckpointBuilder::new()
                .pool("share", &[(0, "0-3")])
                .container("uid-missing", "main", "share", &[])
                .container("uid-1", "main", "share", &[]),
        )
        .await;

        assert_eq!(report.failures, 1);
        assert_eq!(report.containers_upserted, 1);
        assert!(h.cache.get_container("uid-1", "main").is_some());
        assert!(h.cache.get_container("uid-missing", "main").is_none());
    }

    #[tokio::test]
    async fn test_failed_pod_lookup_does_not_delete_known_containers() {
        let h = harness();
        add_pod(&h.pods, "uid-1", None);
        run(
            &h,
            CheckpointBuilder::new()
                .pool("share", &[(0, "0-3")])
                .container("uid-1", "main", "share", &[]),
        )
        .await;

        h.pods.remove("uid-1");
        let report = run(
            &h,
            CheckpointBuilder::new()
                .pool("share", &[(0, "0-3")])
                .container("uid-1", "main", "share", &[]),
        )
        .await;

        assert_eq!(report.failures, 1);
        assert_eq!(report.containers_deleted, 0);
        assert!(h.cache.get_container("uid-1", "main").is_some());
    }

    #[tokio::test]
    async fn test_qos_change_is_applied() {
        let h = harness();
        add_pod(&h.pods, "uid-1", None);
        let builder = || {
            CheckpointBuilder::new()
                .pool("share", &[(0, "0-3")])
                .container("uid-1", "main", "share", &[])
        };

        run(&h, builder()).await;
        assert_eq!(
            h.cache.get_container("uid-1", "main").unwrap().qos_level,
            QosLevel::SharedCores
        );

        add_pod(&h.pods, "uid-1", Some("reclaimed_cores"));
        run(&h, builder()).await;
        assert_eq!(
            h.cache.get_container("uid-1", "main").unwrap().qos_level,
            QosLevel::ReclaimedCores
        );
    }

    #[tokio::test]
    async fn test_malformed_pool_row_stays_alive() {
        let h = harness();
        run(&h, CheckpointBuilder::new().pool("share", &[(0, "0-3")])).await;

        let report = run(&h, CheckpointBuilder::new().pool("share", &[(0, "3-0")])).await;

        assert_eq!(report.failures, 1);
        assert_eq!(report.pools_deleted, 0);
        assert_eq!(
            h.cache.get_pool("share").unwrap().topology_aware_assignments[&0].to_string(),
            "0-3"
        );
    }
}
