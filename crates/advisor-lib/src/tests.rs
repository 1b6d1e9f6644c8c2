//! Cross-module scenarios
//!
//! Each test drives a checkpoint through reconciliation and assembly the way
//! one advisory tick does, without the gRPC transport.

#[cfg(test)]
mod advisory_tick_tests {
    use crate::advisor::{Advice, CpuCalculationResult, ResourceAdvisor, StaticAdvisor};
    use crate::assembler::Assembler;
    use crate::cache::{now_nanos, InMemoryMetaCache, MetaCache};
    use crate::checkpoint::fixtures::CheckpointBuilder;
    use crate::checkpoint::Checkpoint;
    use crate::metadata::{
        AnnotationQosClassifier, PodMeta, StaticPodFetcher, MEMORY_ENHANCEMENT_ANNOTATION,
        QOS_LEVEL_ANNOTATION,
    };
    use crate::models::FAKED_CONTAINER_NAME;
    use crate::observability::AdvisorMetrics;
    use crate::proto::{Block, GetCheckpointResponse, ListAndWatchResponse, OverlapType};
    use crate::reconcile::Reconciler;
    use std::sync::Arc;

    struct Harness {
        cache: Arc<InMemoryMetaCache>,
        pods: Arc<StaticPodFetcher>,
        reconciler: Reconciler,
    }

    impl Harness {
        fn new() -> Self {
            let cache = Arc::new(InMemoryMetaCache::new());
            let pods = Arc::new(StaticPodFetcher::new());
            let reconciler = Reconciler::new(
                cache.clone(),
                pods.clone(),
                Arc::new(AnnotationQosClassifier),
                AdvisorMetrics::new(),
            );
            Self {
                cache,
                pods,
                reconciler,
            }
        }

        fn add_dedicated_pod(&self, uid: &str) {
            self.pods.insert(PodMeta {
                uid: uid.into(),
                namespace: "default".into(),
                name: format!("pod-{uid}"),
                annotations: [
                    (QOS_LEVEL_ANNOTATION.to_string(), "dedicated_cores".to_string()),
                    (
                        MEMORY_ENHANCEMENT_ANNOTATION.to_string(),
                        r#"{"numa_binding":"true"}"#.to_string(),
                    ),
                ]
                .into_iter()
                .collect(),
            });
        }

        fn add_shared_pod(&self, uid: &str) {
            self.pods.insert(PodMeta {
                uid: uid.into(),
                namespace: "default".into(),
                name: format!("pod-{uid}"),
                ..Default::default()
            });
        }

        async fn sync(&self, resp: &GetCheckpointResponse) {
            let checkpoint = Checkpoint::from_proto(resp).unwrap();
            self.reconciler.reconcile(&checkpoint, now_nanos()).await;
        }

        fn assemble(&self, result: &CpuCalculationResult) -> ListAndWatchResponse {
            Assembler::new().assemble(result, self.cache.as_ref())
        }
    }

    fn blocks<'a>(resp: &'a ListAndWatchResponse, entry: &str, sub: &str, numa: i64) -> &'a [Block] {
        &resp.pod_entries[entry].container_entries[sub]
            .calculation_results_by_numas[&numa]
            .blocks
    }

    #[tokio::test]
    async fn test_reclaim_overlaps_shared_pool() {
        let harness = Harness::new();
        harness
            .sync(
                &CheckpointBuilder::new()
                    .pool("reserve", &[(0, "0")])
                    .pool("share", &[(0, "1-4")])
                    .pool("reclaim", &[(0, "4")])
                    .build(),
            )
            .await;

        let mut result = CpuCalculationResult {
            allow_shared_cores_overlap_reclaimed_cores: true,
            ..Default::default()
        };
        result.set_pool_entry("share", 0, 4000);
        result.set_pool_entry("reclaim", 0, 1000);
        result.set_pool_overlap("reclaim", 0, "share", 1000);

        let resp = harness.assemble(&result);
        assert!(resp.allow_shared_cores_overlap_reclaimed_cores);

        let share = blocks(&resp, "share", FAKED_CONTAINER_NAME, 0);
        let reclaim = blocks(&resp, "reclaim", FAKED_CONTAINER_NAME, 0);
        assert_eq!(reclaim.len(), 1);
        assert_eq!(reclaim[0].result, 1000);
        assert_eq!(reclaim[0].overlap_targets.len(), 1);
        assert_eq!(
            reclaim[0].overlap_targets[0].overlap_target_block_id,
            share[0].block_id
        );
        assert_eq!(
            reclaim[0].overlap_targets[0].overlap_type,
            OverlapType::OverlapWithPool as i32
        );
        assert_eq!(reclaim[0].overlap_targets[0].overlap_target_pool_name, "share");

        // symmetric link on the shared side
        assert_eq!(share[0].overlap_targets.len(), 1);
        assert_eq!(
            share[0].overlap_targets[0].overlap_target_block_id,
            reclaim[0].block_id
        );
    }

    #[tokio::test]
    async fn test_sidecar_reuses_main_block() {
        let harness = Harness::new();
        harness.add_dedicated_pod("uid-1");
        harness
            .sync(
                &CheckpointBuilder::new()
                    .pool("reserve", &[(0, "0")])
                    .pool("reclaim", &[(0, "3")])
                    .container("uid-1", "main", "dedicated", &[(1, "8-9")])
                    .container("uid-1", "sidecar", "dedicated", &[(1, "10-11")])
                    .build(),
            )
            .await;

        let advisor = StaticAdvisor::new(harness.cache.clone(), false);
        let Advice::Cpu(result) = advisor.update_and_get_advice().await.unwrap() else {
            panic!("expected cpu advice");
        };
        let resp = harness.assemble(&result);

        let main = blocks(&resp, "uid-1", "main", 1);
        let sidecar = blocks(&resp, "uid-1", "sidecar", 1);
        assert_eq!(main.len(), 1);
        assert_eq!(main[0].result, 2);
        assert!(!main[0].block_id.is_empty());
        assert_eq!(sidecar.len(), 1);
        assert_eq!(sidecar[0].block_id, main[0].block_id);
        assert_eq!(sidecar[0].result, main[0].result);
        assert_eq!(
            resp.pod_entries["uid-1"].container_entries["main"].owner_pool_name,
            "dedicated"
        );
    }

    #[tokio::test]
    async fn test_reclaim_block_claimed_once() {
        let harness = Harness::new();
        harness.add_dedicated_pod("uid-a");
        harness.add_dedicated_pod("uid-b");
        harness
            .sync(
                &CheckpointBuilder::new()
                    .pool("reserve", &[(0, "0")])
                    .pool("reclaim", &[(0, "1-2")])
                    .container("uid-a", "main", "dedicated", &[(0, "3-4")])
                    .container("uid-b", "main", "dedicated", &[(0, "5-6")])
                    .build(),
            )
            .await;

        let mut result = CpuCalculationResult::default();
        result.set_pool_entry("reclaim", 0, 2);
        let resp = harness.assemble(&result);

        let reclaim = blocks(&resp, "reclaim", FAKED_CONTAINER_NAME, 0);
        let first = blocks(&resp, "uid-a", "main", 0);
        let second = blocks(&resp, "uid-b", "main", 0);

        let joined = first.len() + second.len();
        assert_eq!(joined, 1, "exactly one container joins the reclaim block");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].overlap_targets[0].overlap_target_block_id, reclaim[0].block_id);
        assert_eq!(
            first[0].overlap_targets[0].overlap_type,
            OverlapType::OverlapWithPool as i32
        );
        assert_eq!(reclaim[0].overlap_targets.len(), 1);
        assert_eq!(reclaim[0].overlap_targets[0].overlap_target_pod_uid, "uid-a");
        assert_eq!(
            reclaim[0].overlap_targets[0].overlap_type,
            OverlapType::OverlapWithPod as i32
        );
    }

    #[tokio::test]
    async fn test_origin_owner_survives_many_ticks() {
        let harness = Harness::new();
        harness.add_shared_pod("uid-1");
        let owners = ["share", "isolation-1", "", "share-2", "share"];

        for owner in owners {
            harness
                .sync(
                    &CheckpointBuilder::new()
                        .pool("share", &[(0, "1-4")])
                        .pool("share-2", &[(0, "5-6")])
                        .container("uid-1", "main", owner, &[(0, "1-4")])
                        .build(),
                )
                .await;
            let ci = harness.cache.get_container("uid-1", "main").unwrap();
            assert_eq!(ci.origin_owner_pool_name, "share");
        }
    }

    #[tokio::test]
    async fn test_stale_container_removed_from_advice() {
        let harness = Harness::new();
        harness.add_shared_pod("uid-1");
        harness.add_shared_pod("uid-2");
        let two = CheckpointBuilder::new()
            .pool("share", &[(0, "1-4")])
            .container("uid-1", "main", "share", &[(0, "1-4")])
            .container("uid-2", "main", "share", &[(0, "1-4")])
            .build();
        harness.sync(&two).await;

        let mut result = CpuCalculationResult::default();
        result.set_pool_entry("share", 0, 4);
        assert!(harness.assemble(&result).pod_entries.contains_key("uid-2"));

        let one = CheckpointBuilder::new()
            .pool("share", &[(0, "1-4")])
            .container("uid-1", "main", "share", &[(0, "1-4")])
            .build();
        harness.sync(&one).await;

        let resp = harness.assemble(&result);
        assert!(resp.pod_entries.contains_key("uid-1"));
        assert!(!resp.pod_entries.contains_key("uid-2"));
    }
}
