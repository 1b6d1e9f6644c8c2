//! `watch`: stream ListAndWatch responses

use advisor_lib::proto::{Empty, ListAndWatchResponse, OverlapTarget, OverlapType};
use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::time::Duration;
use tabled::Tabled;

use crate::client::advisor_client;
use crate::output::{container_label, print_info, print_json, print_table, short_id, OutputFormat};

/// One block of one container entry
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct BlockRow {
    #[tabled(rename = "Entry")]
    pub entry: String,
    #[tabled(rename = "Container")]
    pub container: String,
    #[tabled(rename = "Owner Pool")]
    pub owner_pool: String,
    #[tabled(rename = "NUMA")]
    pub numa: i64,
    #[tabled(rename = "Block")]
    pub block_id: String,
    #[tabled(rename = "Size")]
    pub size: u64,
    #[tabled(rename = "Overlaps")]
    pub overlaps: String,
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct ExtraRow {
    #[tabled(rename = "Cgroup")]
    pub cgroup_path: String,
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Debug, Serialize)]
struct Snapshot {
    sequence: usize,
    allow_shared_cores_overlap_reclaimed_cores: bool,
    blocks: Vec<BlockRow>,
    extra_entries: Vec<ExtraRow>,
}

fn describe_target(target: &OverlapTarget) -> String {
    let owner = match OverlapType::try_from(target.overlap_type) {
        Ok(OverlapType::OverlapWithPool) => target.overlap_target_pool_name.clone(),
        _ => format!(
            "{}/{}",
            target.overlap_target_pod_uid, target.overlap_target_container_name
        ),
    };
    format!("{}@{}", owner, short_id(&target.overlap_target_block_id))
}

/// Flatten a response into rows ordered by entry, container and NUMA node
pub fn block_rows(resp: &ListAndWatchResponse) -> Vec<BlockRow> {
    let mut rows = Vec::new();

    for (entry, entries) in &resp.pod_entries {
        for (container, info) in &entries.container_entries {
            for (numa, result) in &info.calculation_results_by_numas {
                for block in &result.blocks {
                    rows.push(BlockRow {
                        entry: entry.clone(),
                        container: container_label(container),
                        owner_pool: info.owner_pool_name.clone(),
                        numa: *numa,
                        block_id: block.block_id.clone(),
                        size: block.result,
                        overlaps: block
                            .overlap_targets
                            .iter()
                            .map(describe_target)
                            .collect::<Vec<_>>()
                            .join(", "),
                    });
                }
            }
        }
    }

    rows.sort_by(|a, b| {
        (&a.entry, &a.container, a.numa, &a.block_id).cmp(&(&b.entry, &b.container, b.numa, &b.block_id))
    });
    rows
}

pub fn extra_rows(resp: &ListAndWatchResponse) -> Vec<ExtraRow> {
    let mut rows: Vec<ExtraRow> = resp
        .extra_entries
        .iter()
        .flat_map(|info| {
            info.calculation_result
                .iter()
                .flat_map(|result| result.values.iter())
                .map(|(key, value)| ExtraRow {
                    cgroup_path: container_label(&info.cgroup_path),
                    key: key.clone(),
                    value: value.clone(),
                })
        })
        .collect();
    rows.sort_by(|a, b| (&a.cgroup_path, &a.key).cmp(&(&b.cgroup_path, &b.key)));
    rows
}

/// Stream responses until the advisor closes the stream or `count` is reached
pub async fn watch(
    socket: &str,
    timeout: Duration,
    count: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let mut client = advisor_client(socket, timeout).await?;
    let mut stream = client
        .list_and_watch(Empty {})
        .await
        .context("ListAndWatch failed")?
        .into_inner();

    let mut sequence = 0;
    while let Some(resp) = stream.message().await.context("Stream failed")? {
        sequence += 1;
        let blocks = block_rows(&resp);
        let extras = extra_rows(&resp);

        match format {
            OutputFormat::Json => print_json(&Snapshot {
                sequence,
                allow_shared_cores_overlap_reclaimed_cores: resp
                    .allow_shared_cores_overlap_reclaimed_cores,
                blocks,
                extra_entries: extras,
            })?,
            OutputFormat::Table => {
                println!(
                    "{} #{} (shared/reclaimed overlap: {})",
                    "Advice".bold(),
                    sequence,
                    resp.allow_shared_cores_overlap_reclaimed_cores
                );
                let mut blocks = blocks;
                for row in &mut blocks {
                    row.block_id = short_id(&row.block_id);
                }
                print_table(&blocks);
                if !extras.is_empty() {
                    print_table(&extras);
                }
                println!();
            }
        }

        if count.is_some_and(|limit| sequence >= limit) {
            break;
        }
    }

    print_info(&format!("Received {} responses", sequence));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use advisor_lib::proto::{
        Block, CalculationEntries, CalculationInfo, CalculationResult, ExtraCalculationInfo,
        NumaCalculationResult,
    };
    use std::collections::HashMap;

    fn response() -> ListAndWatchResponse {
        let reclaim_block = Block {
            result: 2,
            block_id: "reclaim-block".into(),
            overlap_targets: vec![OverlapTarget {
                overlap_target_pod_uid: "uid-1".into(),
                overlap_target_container_name: "main".into(),
                overlap_type: OverlapType::OverlapWithPod as i32,
                overlap_target_block_id: "dedicated-block".into(),
                ..Default::default()
            }],
        };

        ListAndWatchResponse {
            pod_entries: HashMap::from([(
                "reclaim".to_string(),
                CalculationEntries {
                    container_entries: HashMap::from([(
                        String::new(),
                        CalculationInfo {
                            owner_pool_name: "reclaim".into(),
                            calculation_results_by_numas: HashMap::from([(
                                0,
                                NumaCalculationResult {
                                    blocks: vec![reclaim_block],
                                },
                            )]),
                        },
                    )]),
                },
            )]),
            extra_entries: vec![ExtraCalculationInfo {
                cgroup_path: String::new(),
                calculation_result: Some(CalculationResult {
                    values: HashMap::from([(
                        "cpu_numa_headroom".to_string(),
                        r#"{"0":2.0}"#.to_string(),
                    )]),
                }),
            }],
            allow_shared_cores_overlap_reclaimed_cores: false,
        }
    }

    #[test]
    fn test_block_rows() {
        let rows = block_rows(&response());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry, "reclaim");
        assert_eq!(rows[0].container, "-");
        assert_eq!(rows[0].size, 2);
        assert_eq!(rows[0].overlaps, "uid-1/main@dedicate");
    }

    #[test]
    fn test_extra_rows() {
        let rows = extra_rows(&response());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "cpu_numa_headroom");
        assert_eq!(rows[0].cgroup_path, "-");
    }
}
