//! `checkpoint`: print the CPU plugin checkpoint

use advisor_lib::proto::{GetCheckpointRequest, GetCheckpointResponse};
use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tabled::Tabled;

use crate::client::plugin_client;
use crate::output::{container_label, print_json, print_table, OutputFormat};

/// One NUMA assignment of a checkpoint row
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct CheckpointRow {
    #[tabled(rename = "Entry")]
    pub entry: String,
    #[tabled(rename = "Container")]
    pub container: String,
    #[tabled(rename = "Owner Pool")]
    pub owner_pool: String,
    #[tabled(rename = "NUMA")]
    pub numa: u64,
    #[tabled(rename = "CPUs")]
    pub cpus: String,
    #[tabled(rename = "Original CPUs")]
    pub original_cpus: String,
    #[tabled(rename = "Ramp Up")]
    pub ramp_up: bool,
}

pub fn checkpoint_rows(resp: &GetCheckpointResponse) -> Vec<CheckpointRow> {
    let mut rows = Vec::new();

    for (entry, allocations) in &resp.entries {
        for (container, info) in &allocations.entries {
            for (numa, cpus) in &info.topology_aware_assignments {
                rows.push(CheckpointRow {
                    entry: entry.clone(),
                    container: container_label(container),
                    owner_pool: info.owner_pool_name.clone(),
                    numa: *numa,
                    cpus: cpus.clone(),
                    original_cpus: info
                        .original_topology_aware_assignments
                        .get(numa)
                        .cloned()
                        .unwrap_or_default(),
                    ramp_up: info.ramp_up,
                });
            }
        }
    }

    rows.sort_by(|a, b| (&a.entry, &a.container, a.numa).cmp(&(&b.entry, &b.container, b.numa)));
    rows
}

pub async fn show_checkpoint(socket: &str, timeout: Duration, format: OutputFormat) -> Result<()> {
    let mut client = plugin_client(socket, timeout).await?;
    let resp = client
        .get_checkpoint(GetCheckpointRequest {})
        .await
        .context("GetCheckpoint failed")?
        .into_inner();

    let rows = checkpoint_rows(&resp);
    match format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Table => {
            print_table(&rows);
            println!("\nTotal: {} entries", resp.entries.len());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use advisor_lib::proto::{AllocationEntries, AllocationInfo};
    use std::collections::HashMap;

    fn allocation(owner: &str, numa: &[(u64, &str)]) -> AllocationInfo {
        AllocationInfo {
            owner_pool_name: owner.into(),
            topology_aware_assignments: numa
                .iter()
                .map(|(id, cpus)| (*id, cpus.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_checkpoint_rows_sorted() {
        let resp = GetCheckpointResponse {
            entries: HashMap::from([
                (
                    "uid-1".to_string(),
                    AllocationEntries {
                        entries: HashMap::from([(
                            "main".to_string(),
                            allocation("share", &[(1, "8-9"), (0, "1-2")]),
                        )]),
                    },
                ),
                (
                    "share".to_string(),
                    AllocationEntries {
                        entries: HashMap::from([(
                            String::new(),
                            allocation("share", &[(0, "1-2")]),
                        )]),
                    },
                ),
            ]),
        };

        let rows = checkpoint_rows(&resp);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].entry, "share");
        assert_eq!(rows[0].container, "-");
        assert_eq!(rows[1].entry, "uid-1");
        assert_eq!(rows[1].numa, 0);
        assert_eq!(rows[2].cpus, "8-9");
        assert_eq!(rows[2].original_cpus, "");
    }
}
