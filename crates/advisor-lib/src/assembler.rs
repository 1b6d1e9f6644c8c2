//! ListAndWatch response assembly
//!
//! Pool entries are assembled first, one block per pool and NUMA node. When
//! shared cores may overlap reclaimed cores, the reclaim pool's blocks are
//! joined against the shared pools' blocks. Containers are assembled next in
//! (pod uid, container name) order; NUMA-bound dedicated containers get their
//! own blocks, joined against the reclaim pool or reused from a sibling.

use crate::advisor::{CpuCalculationResult, ExtraEntry, HeadroomProvider};
use crate::block::{Block, BlockHandle, BlockOwner, BlockSet, InnerBlock};
use crate::cache::MetaCache;
use crate::models::{pools, ContainerInfo, FAKED_CONTAINER_NAME};
use crate::proto::{
    CalculationEntries, CalculationInfo, CalculationResult, ExtraCalculationInfo,
    ListAndWatchResponse, NumaCalculationResult,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

/// Extra entry key carrying the per-NUMA headroom as JSON
pub const CPU_NUMA_HEADROOM_KEY: &str = "cpu_numa_headroom";

#[derive(Debug, Default)]
struct InfoDraft {
    owner_pool_name: String,
    numas: BTreeMap<i64, Vec<BlockHandle>>,
}

#[derive(Debug, Default)]
struct EntryDraft {
    containers: BTreeMap<String, InfoDraft>,
}

/// Builder owning the block arena and the draft entries of one assembly
#[derive(Debug, Default)]
pub struct ResponseBuilder {
    blocks: BlockSet,
    entries: BTreeMap<String, EntryDraft>,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> &BlockSet {
        &self.blocks
    }

    fn numa_handles(&self, entry: &str, container: &str, numa_id: i64) -> Option<&Vec<BlockHandle>> {
        self.entries
            .get(entry)?
            .containers
            .get(container)?
            .numas
            .get(&numa_id)
    }

    fn is_pool_entry(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .map(|entry| entry.containers.contains_key(FAKED_CONTAINER_NAME))
            .unwrap_or(false)
    }

    fn pool_draft(&mut self, pool_name: &str) -> &mut InfoDraft {
        self.entries
            .entry(pool_name.to_string())
            .or_default()
            .containers
            .entry(FAKED_CONTAINER_NAME.to_string())
            .or_insert_with(|| InfoDraft {
                owner_pool_name: pool_name.to_string(),
                numas: BTreeMap::new(),
            })
    }

    fn standalone(&mut self, size: u64, numa_id: i64, owner: BlockOwner) -> BlockHandle {
        self.blocks
            .join(InnerBlock::new(Block::new(size, None), numa_id, owner), "")
    }

    fn block_id(&self, handle: BlockHandle) -> String {
        self.blocks
            .get(handle)
            .map(|inner| inner.block.id().to_string())
            .unwrap_or_default()
    }

    /// Assemble one entry per pool in the advisory result
    pub fn add_pool_entries(&mut self, result: &CpuCalculationResult) {
        let overlap_reclaim = result.allow_shared_cores_overlap_reclaimed_cores;

        for (pool_name, by_numa) in &result.pool_entries {
            // reclaim is joined after the pools it may overlap
            if pool_name == pools::RECLAIM && overlap_reclaim {
                continue;
            }

            self.pool_draft(pool_name);
            for (numa_id, size) in by_numa {
                let handle = self.standalone(*size, *numa_id, BlockOwner::pool(pool_name));
                self.pool_draft(pool_name).numas.insert(*numa_id, vec![handle]);
            }
        }

        if !overlap_reclaim {
            return;
        }
        let Some(reclaim) = result.pool_entries.get(pools::RECLAIM) else {
            return;
        };

        self.pool_draft(pools::RECLAIM);
        for (numa_id, reclaim_size) in reclaim {
            let overlap = result.pool_overlap_info(pools::RECLAIM, *numa_id);

            let handles = if overlap.is_empty() {
                vec![self.standalone(*reclaim_size, *numa_id, BlockOwner::pool(pools::RECLAIM))]
            } else {
                let mut handles = Vec::new();
                for (shared_pool, overlap_size) in &overlap {
                    let target = match self.numa_handles(shared_pool, FAKED_CONTAINER_NAME, *numa_id) {
                        Some(targets) if targets.len() == 1 => targets[0],
                        other => {
                            warn!(
                                pool = %shared_pool,
                                numa_id = numa_id,
                                blocks = other.map(Vec::len).unwrap_or(0),
                                "Shared pool is not overlappable, skipping reclaim block"
                            );
                            continue;
                        }
                    };
                    let target_id = self.block_id(target);
                    let handle = self.blocks.join(
                        InnerBlock::new(
                            Block::new(*overlap_size, None),
                            *numa_id,
                            BlockOwner::pool(pools::RECLAIM),
                        ),
                        &target_id,
                    );
                    handles.push(handle);
                }
                handles
            };

            self.pool_draft(pools::RECLAIM).numas.insert(*numa_id, handles);
        }
    }

    /// Assemble one container entry. Returns false when the container is skipped.
    pub fn add_container(&mut self, ci: &ContainerInfo) -> bool {
        let owner_pool_name = ci.published_owner_pool().to_string();

        if ci.qos_level.requires_pool() {
            if owner_pool_name.is_empty() {
                warn!(
                    pod_uid = %ci.pod_uid,
                    container_name = %ci.container_name,
                    "Container pool name is empty, skipping"
                );
                return false;
            }
            if !self.is_pool_entry(&owner_pool_name) {
                warn!(
                    pod_uid = %ci.pod_uid,
                    container_name = %ci.container_name,
                    pool = %owner_pool_name,
                    "Container refers to a non-existent pool, skipping"
                );
                return false;
            }
        }

        let mut numas = BTreeMap::new();
        if ci.is_dedicated_numa_binding() {
            for (numa_id, cpus) in &ci.topology_aware_assignments {
                let handles = self.dedicated_numa_blocks(ci, *numa_id, cpus.len() as u64);
                numas.insert(*numa_id, handles);
            }
        }

        self.entries
            .entry(ci.pod_uid.clone())
            .or_default()
            .containers
            .insert(
                ci.container_name.clone(),
                InfoDraft {
                    owner_pool_name,
                    numas,
                },
            );
        true
    }

    fn dedicated_numa_blocks(&mut self, ci: &ContainerInfo, numa_id: i64, size: u64) -> Vec<BlockHandle> {
        let owner = || BlockOwner::container(ci.pod_uid.clone(), ci.container_name.clone());

        // Sidecars reuse the blocks of the first sibling assembled on this NUMA node
        if let Some(pod) = self.entries.get(&ci.pod_uid) {
            let sibling = pod
                .containers
                .values()
                .find_map(|info| info.numas.get(&numa_id).cloned())
                .unwrap_or_default();

            let mut handles = Vec::with_capacity(sibling.len());
            for sibling_handle in sibling {
                let Some(sibling_block) = self.blocks.get(sibling_handle).map(|b| b.block.clone())
                else {
                    continue;
                };
                let handle = self.blocks.join(
                    InnerBlock::new(
                        Block::new(sibling_block.size(), Some(sibling_block.id())),
                        numa_id,
                        owner(),
                    ),
                    sibling_block.id(),
                );
                handles.push(handle);
            }
            return handles;
        }

        let Some(reclaim_handles) = self
            .numa_handles(pools::RECLAIM, FAKED_CONTAINER_NAME, numa_id)
            .cloned()
        else {
            return vec![self.standalone(size, numa_id, owner())];
        };

        let mut handles = Vec::new();
        for reclaim_handle in reclaim_handles {
            // a reclaim block is claimed by at most one dedicated container;
            // later claimants stay unlinked on this NUMA node
            if self.blocks.has_overlap(reclaim_handle) {
                continue;
            }
            let reclaim_id = self.block_id(reclaim_handle);
            let handle = self.blocks.join(
                InnerBlock::new(Block::new(size, None), numa_id, owner()),
                &reclaim_id,
            );
            handles.push(handle);
        }
        handles
    }

    /// Materialize the wire response; the arena is dropped here
    pub fn finish(self, allow_shared_overlap_reclaimed: bool) -> ListAndWatchResponse {
        let ResponseBuilder { blocks, entries } = self;

        let pod_entries = entries
            .into_iter()
            .map(|(entry_name, entry)| {
                let container_entries = entry
                    .containers
                    .into_iter()
                    .map(|(container_name, info)| {
                        let calculation_results_by_numas = info
                            .numas
                            .into_iter()
                            .map(|(numa_id, handles)| {
                                let wire_blocks = handles
                                    .iter()
                                    .filter_map(|h| blocks.to_proto(*h))
                                    .collect();
                                (numa_id, NumaCalculationResult { blocks: wire_blocks })
                            })
                            .collect();
                        (
                            container_name,
                            CalculationInfo {
                                owner_pool_name: info.owner_pool_name,
                                calculation_results_by_numas,
                            },
                        )
                    })
                    .collect();
                (entry_name, CalculationEntries { container_entries })
            })
            .collect();

        ListAndWatchResponse {
            pod_entries,
            extra_entries: Vec::new(),
            allow_shared_cores_overlap_reclaimed_cores: allow_shared_overlap_reclaimed,
        }
    }
}

/// Turns advisory results into ListAndWatch responses
#[derive(Clone, Default)]
pub struct Assembler {
    headroom: Option<Arc<dyn HeadroomProvider>>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headroom(mut self, provider: Arc<dyn HeadroomProvider>) -> Self {
        self.headroom = Some(provider);
        self
    }

    pub fn assemble(&self, result: &CpuCalculationResult, cache: &dyn MetaCache) -> ListAndWatchResponse {
        let mut builder = ResponseBuilder::new();
        builder.add_pool_entries(result);
        cache.range_containers(&mut |ci: &ContainerInfo| {
            builder.add_container(ci);
            true
        });

        let mut resp = builder.finish(result.allow_shared_cores_overlap_reclaimed_cores);
        resp.extra_entries = merge_extra_entries(&result.extra_entries);
        if let Some(headroom) = self.headroom_entry() {
            resp.extra_entries.push(headroom);
        }
        resp
    }

    fn headroom_entry(&self) -> Option<ExtraCalculationInfo> {
        let provider = self.headroom.as_ref()?;
        let allocatable = match provider.numa_allocatable() {
            Ok(allocatable) => allocatable,
            Err(e) => {
                warn!(error = %e, "Failed to get numa allocatable");
                return None;
            }
        };

        let cores: BTreeMap<i64, f64> = allocatable
            .iter()
            .map(|(numa_id, milli)| (*numa_id, *milli as f64 / 1000.0))
            .collect();
        let data = match serde_json::to_string(&cores) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Failed to marshal numa headroom");
                return None;
            }
        };

        Some(ExtraCalculationInfo {
            cgroup_path: String::new(),
            calculation_result: Some(CalculationResult {
                values: HashMap::from([(CPU_NUMA_HEADROOM_KEY.to_string(), data)]),
            }),
        })
    }
}

/// One wire entry per cgroup path; later duplicates merge into the first
fn merge_extra_entries(extra: &[ExtraEntry]) -> Vec<ExtraCalculationInfo> {
    let mut merged: Vec<ExtraCalculationInfo> = Vec::new();

    for entry in extra {
        let values = entry.values.iter().map(|(k, v)| (k.clone(), v.clone()));
        match merged
            .iter_mut()
            .find(|existing| existing.cgroup_path == entry.cgroup_path)
        {
            Some(existing) => existing
                .calculation_result
                .get_or_insert_with(CalculationResult::default)
                .values
                .extend(values),
            None => merged.push(ExtraCalculationInfo {
                cgroup_path: entry.cgroup_path.clone(),
                calculation_result: Some(CalculationResult {
                    values: values.collect(),
                }),
            }),
        }
    }

    merged
}
