//! Pool and container metadata cache
//!
//! The cache is the single source of truth between advisory ticks. Readers
//! always receive owned clones; writers replace whole records.

use crate::models::{ContainerInfo, PoolInfo};
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_NANOS: AtomicI64 = AtomicI64::new(0);

/// Wall-clock nanoseconds, strictly increasing within the process
pub fn now_nanos() -> i64 {
    let wall = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
    let prev = LAST_NANOS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(wall.max(last + 1))
        })
        .unwrap_or(wall);
    wall.max(prev + 1)
}

/// Storage used by the reconciler and the assembler
pub trait MetaCache: Send + Sync {
    fn get_container(&self, pod_uid: &str, container_name: &str) -> Option<ContainerInfo>;

    /// Insert or replace a container; creation time is kept across replacements
    fn set_container(&self, info: ContainerInfo) -> Result<()>;

    /// Visit every container in (pod uid, container name) order until `f` returns false
    fn range_containers(&self, f: &mut dyn FnMut(&ContainerInfo) -> bool);

    /// Delete containers matching `should_delete` that were created before `safe_time`
    fn range_and_delete_containers(
        &self,
        should_delete: &mut dyn FnMut(&ContainerInfo) -> bool,
        safe_time: i64,
    ) -> Result<usize>;

    fn get_pool(&self, pool_name: &str) -> Option<PoolInfo>;

    fn set_pool(&self, info: PoolInfo) -> Result<()>;

    fn list_pools(&self) -> Vec<PoolInfo>;

    /// Delete every pool not named in `living`
    fn gc_pools(&self, living: &HashSet<String>) -> Result<usize>;

    fn container_count(&self) -> usize;

    fn pool_count(&self) -> usize;
}

#[derive(Debug, Clone)]
struct CachedContainer {
    info: ContainerInfo,
    created_at: i64,
}

/// DashMap-backed cache
#[derive(Debug, Default)]
pub struct InMemoryMetaCache {
    containers: DashMap<(String, String), CachedContainer>,
    pools: DashMap<String, PoolInfo>,
}

impl InMemoryMetaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creation timestamp recorded for a container
    pub fn created_at(&self, pod_uid: &str, container_name: &str) -> Option<i64> {
        self.containers
            .get(&(pod_uid.to_string(), container_name.to_string()))
            .map(|entry| entry.created_at)
    }

    fn sorted_containers(&self) -> Vec<CachedContainer> {
        let mut all: Vec<CachedContainer> = self
            .containers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| {
            (&a.info.pod_uid, &a.info.container_name)
                .cmp(&(&b.info.pod_uid, &b.info.container_name))
        });
        all
    }
}

impl MetaCache for InMemoryMetaCache {
    fn get_container(&self, pod_uid: &str, container_name: &str) -> Option<ContainerInfo> {
        self.containers
            .get(&(pod_uid.to_string(), container_name.to_string()))
            .map(|entry| entry.info.clone())
    }

    fn set_container(&self, info: ContainerInfo) -> Result<()> {
        if info.pod_uid.is_empty() {
            return Err(anyhow!(
                "container {:?} has an empty pod uid",
                info.container_name
            ));
        }

        let key = (info.pod_uid.clone(), info.container_name.clone());
        self.containers
            .entry(key)
            .and_modify(|cached| cached.info = info.clone())
            .or_insert_with(|| CachedContainer {
                info,
                created_at: now_nanos(),
            });
        Ok(())
    }

    fn range_containers(&self, f: &mut dyn FnMut(&ContainerInfo) -> bool) {
        for cached in self.sorted_containers() {
            if !f(&cached.info) {
                break;
            }
        }
    }

    fn range_and_delete_containers(
        &self,
        should_delete: &mut dyn FnMut(&ContainerInfo) -> bool,
        safe_time: i64,
    ) -> Result<usize> {
        let mut deleted = 0;
        for cached in self.sorted_containers() {
            if cached.created_at >= safe_time || !should_delete(&cached.info) {
                continue;
            }
            let key = (cached.info.pod_uid.clone(), cached.info.container_name.clone());
            // Re-check under the shard lock so a re-created entry survives
            if self
                .containers
                .remove_if(&key, |_, current| current.created_at < safe_time)
                .is_some()
            {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn get_pool(&self, pool_name: &str) -> Option<PoolInfo> {
        self.pools.get(pool_name).map(|entry| entry.value().clone())
    }

    fn set_pool(&self, info: PoolInfo) -> Result<()> {
        if info.pool_name.is_empty() {
            return Err(anyhow!("pool name must not be empty"));
        }
        self.pools.insert(info.pool_name.clone(), info);
        Ok(())
    }

    fn list_pools(&self) -> Vec<PoolInfo> {
        let mut pools: Vec<PoolInfo> = self.pools.iter().map(|e| e.value().clone()).collect();
        pools.sort_by(|a, b| a.pool_name.cmp(&b.pool_name));
        pools
    }

    fn gc_pools(&self, living: &HashSet<String>) -> Result<usize> {
        let before = self.pools.len();
        self.pools.retain(|name, _| living.contains(name));
        Ok(before.saturating_sub(self.pools.len()))
    }

    fn container_count(&self) -> usize {
        self.containers.len()
    }

    fn pool_count(&self) -> usize {
        self.pools.len()
    }
}
