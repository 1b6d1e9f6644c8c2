//! Advisory engine interface and the built-in static advisor

use crate::cache::MetaCache;
use crate::models::pools;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Auxiliary key/value signal addressed by cgroup path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtraEntry {
    pub cgroup_path: String,
    pub values: BTreeMap<String, String>,
}

/// Raw CPU plan produced by the advisory engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuCalculationResult {
    /// pool name -> NUMA id -> CPU count
    pub pool_entries: BTreeMap<String, BTreeMap<i64, u64>>,
    /// pool name -> NUMA id -> overlapped pool name -> overlapped CPU count
    pub pool_overlap_info: BTreeMap<String, BTreeMap<i64, BTreeMap<String, u64>>>,
    pub extra_entries: Vec<ExtraEntry>,
    pub allow_shared_cores_overlap_reclaimed_cores: bool,
}

impl CpuCalculationResult {
    pub fn set_pool_entry(&mut self, pool_name: &str, numa_id: i64, size: u64) {
        self.pool_entries
            .entry(pool_name.to_string())
            .or_default()
            .insert(numa_id, size);
    }

    pub fn set_pool_overlap(&mut self, pool_name: &str, numa_id: i64, other: &str, size: u64) {
        self.pool_overlap_info
            .entry(pool_name.to_string())
            .or_default()
            .entry(numa_id)
            .or_default()
            .insert(other.to_string(), size);
    }

    /// Pools overlapping `pool_name` on a NUMA node, with overlapped sizes
    pub fn pool_overlap_info(&self, pool_name: &str, numa_id: i64) -> BTreeMap<String, u64> {
        self.pool_overlap_info
            .get(pool_name)
            .and_then(|by_numa| by_numa.get(&numa_id))
            .cloned()
            .unwrap_or_default()
    }
}

/// Output of one advisory update
#[derive(Debug, Clone, PartialEq)]
pub enum Advice {
    Cpu(CpuCalculationResult),
    /// Advice for another resource dimension
    Other { resource: String },
}

/// Recomputes and returns the latest advice
#[async_trait]
pub trait ResourceAdvisor: Send + Sync {
    async fn update_and_get_advice(&self) -> Result<Advice>;
}

/// Per-NUMA allocatable CPU for reclaimed workloads
pub trait HeadroomProvider: Send + Sync {
    /// NUMA id -> milli-CPU
    fn numa_allocatable(&self) -> Result<BTreeMap<i64, u64>>;
}

/// Advisor that reports the pools' current assignments back unchanged.
///
/// Sizes are the cardinalities of the cached pool cpusets. When overlap is
/// allowed, the reclaim pool overlaps the share pool by the CPUs the two
/// assignments have in common on each NUMA node.
pub struct StaticAdvisor {
    cache: Arc<dyn MetaCache>,
    allow_shared_overlap_reclaimed: bool,
}

impl StaticAdvisor {
    pub fn new(cache: Arc<dyn MetaCache>, allow_shared_overlap_reclaimed: bool) -> Self {
        Self {
            cache,
            allow_shared_overlap_reclaimed,
        }
    }
}

#[async_trait]
impl ResourceAdvisor for StaticAdvisor {
    async fn update_and_get_advice(&self) -> Result<Advice> {
        let mut result = CpuCalculationResult {
            allow_shared_cores_overlap_reclaimed_cores: self.allow_shared_overlap_reclaimed,
            ..Default::default()
        };

        for pool in self.cache.list_pools() {
            for (numa_id, cpus) in &pool.topology_aware_assignments {
                result.set_pool_entry(&pool.pool_name, *numa_id, cpus.len() as u64);
            }
        }

        if self.allow_shared_overlap_reclaimed {
            if let (Some(reclaim), Some(share)) = (
                self.cache.get_pool(pools::RECLAIM),
                self.cache.get_pool(pools::SHARE),
            ) {
                for (numa_id, reclaim_cpus) in &reclaim.topology_aware_assignments {
                    let overlap = share
                        .topology_aware_assignments
                        .get(numa_id)
                        .map(|share_cpus| reclaim_cpus.intersection(share_cpus))
                        .unwrap_or_default();
                    if !overlap.is_empty() {
                        result.set_pool_overlap(
                            pools::RECLAIM,
                            *numa_id,
                            pools::SHARE,
                            overlap.len() as u64,
                        );
                    }
                }
            }
        }

        Ok(Advice::Cpu(result))
    }
}

/// Headroom equal to the reclaim pool's CPUs on each NUMA node
pub struct ReclaimHeadroom {
    cache: Arc<dyn MetaCache>,
}

impl ReclaimHeadroom {
    pub fn new(cache: Arc<dyn MetaCache>) -> Self {
        Self { cache }
    }
}

impl HeadroomProvider for ReclaimHeadroom {
    fn numa_allocatable(&self) -> Result<BTreeMap<i64, u64>> {
        let reclaim = self
            .cache
            .get_pool(pools::RECLAIM)
            .ok_or_else(|| anyhow::anyhow!("reclaim pool not found"))?;
        Ok(reclaim
            .topology_aware_assignments
            .iter()
            .map(|(numa_id, cpus)| (*numa_id, cpus.len() as u64 * 1000))
            .collect())
    }
}
