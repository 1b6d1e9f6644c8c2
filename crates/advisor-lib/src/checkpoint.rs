//! Plugin checkpoint snapshot
//!
//! Rows keyed by the faked container name are pool rows; everything else is
//! a pod row. The distinction is made once here.

use crate::cpuset::CpuSet;
use crate::error::{AdvisorError, Result};
use crate::models::{TopologyAssignments, FAKED_CONTAINER_NAME};
use crate::proto::{AllocationInfo as WireAllocationInfo, GetCheckpointResponse};
use std::collections::{BTreeMap, HashMap};

/// Allocation reported by the plugin for one pool or container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationInfo {
    pub ramp_up: bool,
    pub owner_pool_name: String,
    pub topology_aware_assignments: TopologyAssignments,
    pub original_topology_aware_assignments: TopologyAssignments,
}

impl AllocationInfo {
    fn from_proto(info: &WireAllocationInfo) -> Result<Self> {
        Ok(Self {
            ramp_up: info.ramp_up,
            owner_pool_name: info.owner_pool_name.clone(),
            topology_aware_assignments: parse_assignments(&info.topology_aware_assignments)?,
            original_topology_aware_assignments: parse_assignments(
                &info.original_topology_aware_assignments,
            )?,
        })
    }
}

fn parse_assignments(raw: &HashMap<u64, String>) -> Result<TopologyAssignments> {
    raw.iter()
        .map(|(numa, cpus)| Ok((*numa as i64, cpus.parse::<CpuSet>()?)))
        .collect()
}

/// A checkpoint row, decided at parse time
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointEntry {
    Pool(AllocationInfo),
    /// Containers of one pod, keyed by container name
    Pod(BTreeMap<String, AllocationInfo>),
}

/// Row that could not be parsed, kept so the reconciler can count it
#[derive(Debug, Clone)]
pub struct MalformedEntry {
    pub entry_name: String,
    pub sub_entry_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    pub entries: BTreeMap<String, CheckpointEntry>,
    pub malformed: Vec<MalformedEntry>,
}

impl Checkpoint {
    /// Parse a wire checkpoint. An empty response is rejected.
    pub fn from_proto(resp: &GetCheckpointResponse) -> Result<Self> {
        if resp.entries.is_empty() {
            return Err(AdvisorError::NilCheckpoint);
        }

        let mut checkpoint = Checkpoint::default();

        for (entry_name, entries) in &resp.entries {
            if let Some(pool) = entries.entries.get(FAKED_CONTAINER_NAME) {
                match AllocationInfo::from_proto(pool) {
                    Ok(info) => {
                        checkpoint
                            .entries
                            .insert(entry_name.clone(), CheckpointEntry::Pool(info));
                    }
                    Err(e) => checkpoint.malformed.push(MalformedEntry {
                        entry_name: entry_name.clone(),
                        sub_entry_name: FAKED_CONTAINER_NAME.to_string(),
                        reason: e.to_string(),
                    }),
                }
                continue;
            }

            let mut containers = BTreeMap::new();
            for (container_name, info) in &entries.entries {
                match AllocationInfo::from_proto(info) {
                    Ok(info) => {
                        containers.insert(container_name.clone(), info);
                    }
                    Err(e) => checkpoint.malformed.push(MalformedEntry {
                        entry_name: entry_name.clone(),
                        sub_entry_name: container_name.clone(),
                        reason: e.to_string(),
                    }),
                }
            }
            checkpoint
                .entries
                .insert(entry_name.clone(), CheckpointEntry::Pod(containers));
        }

        Ok(checkpoint)
    }

    pub fn pools(&self) -> impl Iterator<Item = (&String, &AllocationInfo)> {
        self.entries.iter().filter_map(|(name, entry)| match entry {
            CheckpointEntry::Pool(info) => Some((name, info)),
            CheckpointEntry::Pod(_) => None,
        })
    }

    pub fn pods(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, AllocationInfo>)> {
        self.entries.iter().filter_map(|(uid, entry)| match entry {
            CheckpointEntry::Pod(containers) => Some((uid, containers)),
            CheckpointEntry::Pool(_) => None,
        })
    }

    /// Whether the checkpoint still reports this container.
    ///
    /// A container whose row failed to parse counts as present so it is not
    /// garbage collected on a transient formatting error.
    pub fn has_container(&self, pod_uid: &str, container_name: &str) -> bool {
        let parsed = matches!(
            self.entries.get(pod_uid),
            Some(CheckpointEntry::Pod(containers)) if containers.contains_key(container_name)
        );
        parsed
            || self
                .malformed
                .iter()
                .any(|m| m.entry_name == pod_uid && m.sub_entry_name == container_name)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::proto::{AllocationEntries, AllocationInfo, GetCheckpointResponse};
    use std::collections::HashMap;

    /// Builder for wire checkpoints used across tests
    #[derive(Default)]
    pub struct CheckpointBuilder {
        resp: GetCheckpointResponse,
    }

    impl CheckpointBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn pool(mut self, name: &str, assignments: &[(u64, &str)]) -> Self {
            let info = AllocationInfo {
                owner_pool_name: name.to_string(),
                topology_aware_assignments: to_map(assignments),
                original_topology_aware_assignments: to_map(assignments),
                ..Default::default()
            };
            self.resp
                .entries
                .entry(name.to_string())
                .or_insert_with(AllocationEntries::default)
                .entries
                .insert(String::new(), info);
            self
        }

        pub fn container(
            mut self,
            pod_uid: &str,
            container_name: &str,
            owner_pool: &str,
            assignments: &[(u64, &str)],
        ) -> Self {
            let info = AllocationInfo {
                owner_pool_name: owner_pool.to_string(),
                topology_aware_assignments: to_map(assignments),
                original_topology_aware_assignments: to_map(assignments),
                ..Default::default()
            };
            self.resp
                .entries
                .entry(pod_uid.to_string())
                .or_insert_with(AllocationEntries::default)
                .entries
                .insert(container_name.to_string(), info);
            self
        }

        pub fn build(self) -> GetCheckpointResponse {
            self.resp
        }
    }

    fn to_map(assignments: &[(u64, &str)]) -> HashMap<u64, String> {
        assignments
            .iter()
            .map(|(numa, cpus)| (*numa, cpus.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::CheckpointBuilder;
    use super::*;

    #[test]
    fn test_empty_checkpoint_rejected() {
        let resp = GetCheckpointResponse::default();
        assert!(matches!(
            Checkpoint::from_proto(&resp),
            Err(AdvisorError::NilCheckpoint)
        ));
    }

    #[test]
    fn test_pool_and_pod_rows_are_split() {
        let resp = CheckpointBuilder::new()
            .pool("share", &[(0, "0-3")])
            .container("pod-1", "main", "share", &[(0, "0-3")])
            .build();

        let checkpoint = Checkpoint::from_proto(&resp).unwrap();
        let pools: Vec<_> = checkpoint.pools().map(|(name, _)| name.clone()).collect();
        let pods: Vec<_> = checkpoint.pods().map(|(uid, _)| uid.clone()).collect();

        assert_eq!(pools, vec!["share"]);
        assert_eq!(pods, vec!["pod-1"]);
        assert!(checkpoint.has_container("pod-1", "main"));
        assert!(!checkpoint.has_container("pod-1", "sidecar"));
        assert!(!checkpoint.has_container("share", ""));
    }

    #[test]
    fn test_malformed_cpuset_kept_as_present() {
        let resp = CheckpointBuilder::new()
            .pool("share", &[(0, "0-3")])
            .container("pod-1", "main", "share", &[(0, "3-1")])
            .build();

        let checkpoint = Checkpoint::from_proto(&resp).unwrap();
        assert_eq!(checkpoint.malformed.len(), 1);
        assert!(checkpoint.has_container("pod-1", "main"));
    }
}
