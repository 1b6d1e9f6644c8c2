//! Blocks of CPU capacity and their overlap relationships
//!
//! A [`BlockSet`] is an arena built fresh for every assembly pass. Blocks are
//! registered under their own id and linked symmetrically to the blocks they
//! overlap with, so either side of an overlap can be discovered from the other.

use crate::proto;
use std::collections::HashMap;

/// Identified, sized unit of CPU capacity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    id: String,
    size: u64,
}

impl Block {
    /// Create a block; a fresh id is generated when none (or an empty one) is given
    pub fn new(size: u64, id: Option<&str>) -> Self {
        let id = match id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        Self { id, size }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Pool or container a block is allocated to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockOwner {
    Pool {
        pool_name: String,
    },
    Container {
        pod_uid: String,
        container_name: String,
    },
}

impl BlockOwner {
    pub fn pool(pool_name: impl Into<String>) -> Self {
        BlockOwner::Pool {
            pool_name: pool_name.into(),
        }
    }

    pub fn container(pod_uid: impl Into<String>, container_name: impl Into<String>) -> Self {
        BlockOwner::Container {
            pod_uid: pod_uid.into(),
            container_name: container_name.into(),
        }
    }
}

/// Assembly-time association of a block with its NUMA node and owner
#[derive(Debug, Clone)]
pub struct InnerBlock {
    pub block: Block,
    pub numa_id: i64,
    pub owner: BlockOwner,
}

impl InnerBlock {
    pub fn new(block: Block, numa_id: i64, owner: BlockOwner) -> Self {
        Self {
            block,
            numa_id,
            owner,
        }
    }
}

/// Handle to a block registered in a [`BlockSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHandle(usize);

/// The other side of an overlap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapTarget {
    pub block_id: String,
    pub owner: BlockOwner,
}

impl OverlapTarget {
    pub fn to_proto(&self) -> proto::OverlapTarget {
        match &self.owner {
            BlockOwner::Pool { pool_name } => proto::OverlapTarget {
                overlap_target_pool_name: pool_name.clone(),
                overlap_type: proto::OverlapType::OverlapWithPool as i32,
                overlap_target_block_id: self.block_id.clone(),
                ..Default::default()
            },
            BlockOwner::Container {
                pod_uid,
                container_name,
            } => proto::OverlapTarget {
                overlap_target_pod_uid: pod_uid.clone(),
                overlap_target_container_name: container_name.clone(),
                overlap_type: proto::OverlapType::OverlapWithPod as i32,
                overlap_target_block_id: self.block_id.clone(),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug)]
struct Slot {
    inner: InnerBlock,
    links: Vec<BlockHandle>,
}

/// Arena of inner blocks with an index by block id
#[derive(Debug, Default)]
pub struct BlockSet {
    slots: Vec<Slot>,
    index: HashMap<String, Vec<BlockHandle>>,
}

impl BlockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `inner` under its own id and link it with every block already
    /// registered under `target_block_id`. An empty or unknown target only
    /// registers the block.
    pub fn join(&mut self, inner: InnerBlock, target_block_id: &str) -> BlockHandle {
        let peers = if target_block_id.is_empty() {
            Vec::new()
        } else {
            self.index.get(target_block_id).cloned().unwrap_or_default()
        };

        let handle = BlockHandle(self.slots.len());
        self.index
            .entry(inner.block.id().to_string())
            .or_default()
            .push(handle);
        self.slots.push(Slot {
            inner,
            links: Vec::new(),
        });

        for peer in peers {
            self.link(handle, peer);
        }

        handle
    }

    fn link(&mut self, a: BlockHandle, b: BlockHandle) {
        if a == b || self.slots[a.0].links.contains(&b) {
            return;
        }
        self.slots[a.0].links.push(b);
        self.slots[b.0].links.push(a);
    }

    pub fn get(&self, handle: BlockHandle) -> Option<&InnerBlock> {
        self.slots.get(handle.0).map(|slot| &slot.inner)
    }

    /// Blocks this block overlaps with, in link order
    pub fn overlap_targets(&self, handle: BlockHandle) -> Vec<OverlapTarget> {
        let Some(slot) = self.slots.get(handle.0) else {
            return Vec::new();
        };
        slot.links
            .iter()
            .map(|peer| {
                let peer = &self.slots[peer.0].inner;
                OverlapTarget {
                    block_id: peer.block.id().to_string(),
                    owner: peer.owner.clone(),
                }
            })
            .collect()
    }

    pub fn has_overlap(&self, handle: BlockHandle) -> bool {
        self.slots
            .get(handle.0)
            .map(|slot| !slot.links.is_empty())
            .unwrap_or(false)
    }

    pub fn handles_for(&self, block_id: &str) -> &[BlockHandle] {
        self.index
            .get(block_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Wire form of a registered block, overlap targets included
    pub fn to_proto(&self, handle: BlockHandle) -> Option<proto::Block> {
        let inner = self.get(handle)?;
        Some(proto::Block {
            result: inner.block.size(),
            overlap_targets: self
                .overlap_targets(handle)
                .iter()
                .map(OverlapTarget::to_proto)
                .collect(),
            block_id: inner.block.id().to_string(),
        })
    }
}
