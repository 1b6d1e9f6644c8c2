//! Core data models for the CPU advisor

use crate::cpuset::CpuSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Well-known pool names
pub mod pools {
    pub const RESERVE: &str = "reserve";
    pub const SHARE: &str = "share";
    pub const RECLAIM: &str = "reclaim";
}

/// Container name used by the plugin for pool-level checkpoint rows
pub const FAKED_CONTAINER_NAME: &str = "";

/// Per-NUMA CPU assignment, keyed by NUMA id
pub type TopologyAssignments = BTreeMap<i64, CpuSet>;

/// Workload QoS class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    #[default]
    SharedCores,
    ReclaimedCores,
    DedicatedCores,
    SystemCores,
}

impl QosLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QosLevel::SharedCores => "shared_cores",
            QosLevel::ReclaimedCores => "reclaimed_cores",
            QosLevel::DedicatedCores => "dedicated_cores",
            QosLevel::SystemCores => "system_cores",
        }
    }

    /// Shared and reclaimed containers must reference an assembled pool
    pub fn requires_pool(&self) -> bool {
        matches!(self, QosLevel::SharedCores | QosLevel::ReclaimedCores)
    }
}

impl std::fmt::Display for QosLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QosLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared_cores" => Ok(QosLevel::SharedCores),
            "reclaimed_cores" => Ok(QosLevel::ReclaimedCores),
            "dedicated_cores" => Ok(QosLevel::DedicatedCores),
            "system_cores" => Ok(QosLevel::SystemCores),
            other => Err(format!("unknown qos level: {}", other)),
        }
    }
}

/// A named aggregate of CPU capacity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub pool_name: String,
    pub topology_aware_assignments: TopologyAssignments,
    pub original_topology_aware_assignments: TopologyAssignments,
}

impl PoolInfo {
    pub fn new(pool_name: impl Into<String>) -> Self {
        Self {
            pool_name: pool_name.into(),
            ..Default::default()
        }
    }
}

/// One workload container as tracked by the cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub pod_uid: String,
    pub pod_namespace: String,
    pub pod_name: String,
    pub container_name: String,
    pub qos_level: QosLevel,
    pub numa_binding: bool,
    pub owner_pool_name: String,
    /// First non-empty owner ever observed; never cleared
    pub origin_owner_pool_name: String,
    pub isolated: bool,
    pub region_names: BTreeSet<String>,
    pub topology_aware_assignments: TopologyAssignments,
    pub original_topology_aware_assignments: TopologyAssignments,
    pub ramp_up: bool,
}

impl ContainerInfo {
    pub fn new(pod_uid: impl Into<String>, container_name: impl Into<String>) -> Self {
        Self {
            pod_uid: pod_uid.into(),
            container_name: container_name.into(),
            ..Default::default()
        }
    }

    pub fn is_dedicated_numa_binding(&self) -> bool {
        self.qos_level == QosLevel::DedicatedCores && self.numa_binding
    }

    /// Owner pool name as it should be reported to the plugin.
    ///
    /// An isolated container locked into a single region reports the region;
    /// a container released from isolation reports its origin owner.
    pub fn published_owner_pool(&self) -> &str {
        if self.isolated {
            if self.region_names.len() == 1 {
                if let Some(region) = self.region_names.iter().next() {
                    if region != &self.owner_pool_name {
                        return region;
                    }
                }
            }
            return &self.owner_pool_name;
        }

        if self.owner_pool_name != self.origin_owner_pool_name {
            return &self.origin_owner_pool_name;
        }
        &self.owner_pool_name
    }
}
