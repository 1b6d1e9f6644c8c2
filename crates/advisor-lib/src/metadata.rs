//! Pod metadata lookup and QoS classification

use crate::error::AdvisorError;
use crate::models::QosLevel;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

pub const QOS_LEVEL_ANNOTATION: &str = "katalyst.kubewharf.io/qos_level";
pub const MEMORY_ENHANCEMENT_ANNOTATION: &str = "katalyst.kubewharf.io/memory_enhancement";

/// The subset of pod metadata the advisor needs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodMeta {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
}

/// Looks up pods by UID
#[async_trait]
pub trait PodFetcher: Send + Sync {
    async fn get_pod(&self, pod_uid: &str) -> Result<PodMeta>;
}

/// QoS decision for one pod
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodQos {
    pub level: QosLevel,
    pub numa_binding: bool,
}

/// Decides the QoS class of a pod
pub trait QosClassifier: Send + Sync {
    fn classify(&self, pod: &PodMeta) -> Result<PodQos>;
}

/// Classifies pods by their katalyst annotations
#[derive(Debug, Clone, Default)]
pub struct AnnotationQosClassifier;

impl QosClassifier for AnnotationQosClassifier {
    fn classify(&self, pod: &PodMeta) -> Result<PodQos> {
        let level = match pod.annotations.get(QOS_LEVEL_ANNOTATION) {
            Some(raw) => raw
                .parse::<QosLevel>()
                .map_err(|e| anyhow::anyhow!("pod {}/{}: {}", pod.namespace, pod.name, e))?,
            None => QosLevel::SharedCores,
        };

        let numa_binding = match pod.annotations.get(MEMORY_ENHANCEMENT_ANNOTATION) {
            Some(raw) => {
                let enhancement: HashMap<String, String> = serde_json::from_str(raw)
                    .with_context(|| {
                        format!(
                            "pod {}/{} has malformed {}",
                            pod.namespace, pod.name, MEMORY_ENHANCEMENT_ANNOTATION
                        )
                    })?;
                enhancement
                    .get("numa_binding")
                    .map(|v| v == "true")
                    .unwrap_or(false)
            }
            None => false,
        };

        Ok(PodQos {
            level,
            numa_binding,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodItem>,
}

#[derive(Debug, Deserialize)]
struct PodItem {
    metadata: ObjectMeta,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

impl From<ObjectMeta> for PodMeta {
    fn from(meta: ObjectMeta) -> Self {
        Self {
            uid: meta.uid,
            namespace: meta.namespace,
            name: meta.name,
            annotations: meta.annotations,
        }
    }
}

/// How long a kubelet pod list is trusted before it is fetched again
pub const DEFAULT_POD_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct PodTable {
    pods: HashMap<String, PodMeta>,
    fetched_at: Option<Instant>,
}

impl PodTable {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|at| at.elapsed() < ttl)
    }
}

/// Reads pods from the kubelet `/pods` endpoint.
///
/// The pod list is fetched at most once per refresh interval. Annotation
/// changes and deleted pods become visible on the next fetch; a UID missing
/// from a fresh list is `PodNotFound` without another request.
pub struct KubeletPodFetcher {
    endpoint: String,
    http: reqwest::Client,
    refresh_interval: Duration,
    table: RwLock<PodTable>,
}

impl KubeletPodFetcher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build kubelet HTTP client")?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http,
            refresh_interval: DEFAULT_POD_REFRESH_INTERVAL,
            table: RwLock::new(PodTable::default()),
        })
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    async fn fetch(&self) -> Result<HashMap<String, PodMeta>> {
        let url = format!("{}/pods", self.endpoint);
        let list: PodList = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?
            .json()
            .await
            .context("Failed to decode kubelet pod list")?;

        Ok(list
            .items
            .into_iter()
            .map(|item| (item.metadata.uid.clone(), PodMeta::from(item.metadata)))
            .collect())
    }
}

#[async_trait]
impl PodFetcher for KubeletPodFetcher {
    async fn get_pod(&self, pod_uid: &str) -> Result<PodMeta> {
        {
            let table = self.table.read().await;
            if table.is_fresh(self.refresh_interval) {
                return table
                    .pods
                    .get(pod_uid)
                    .cloned()
                    .ok_or_else(|| AdvisorError::PodNotFound(pod_uid.to_string()).into());
            }
        }

        let mut table = self.table.write().await;
        // another lookup may have refreshed while we waited for the lock
        if !table.is_fresh(self.refresh_interval) {
            table.pods = self.fetch().await?;
            table.fetched_at = Some(Instant::now());
            debug!(pods = table.pods.len(), "Refreshed kubelet pod list");
        }

        table
            .pods
            .get(pod_uid)
            .cloned()
            .ok_or_else(|| AdvisorError::PodNotFound(pod_uid.to_string()).into())
    }
}

/// Fixed pod table, for tests and static setups
#[derive(Debug, Default)]
pub struct StaticPodFetcher {
    pods: std::sync::RwLock<HashMap<String, PodMeta>>,
}

impl StaticPodFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pod: PodMeta) {
        if let Ok(mut pods) = self.pods.write() {
            pods.insert(pod.uid.clone(), pod);
        }
    }

    pub fn remove(&self, pod_uid: &str) {
        if let Ok(mut pods) = self.pods.write() {
            pods.remove(pod_uid);
        }
    }
}

#[async_trait]
impl PodFetcher for StaticPodFetcher {
    async fn get_pod(&self, pod_uid: &str) -> Result<PodMeta> {
        let pods = self
            .pods
            .read()
            .map_err(|_| anyhow::anyhow!("pod table lock poisoned"))?;
        pods.get(pod_uid)
            .cloned()
            .ok_or_else(|| AdvisorError::PodNotFound(pod_uid.to_string()).into())
    }
}
