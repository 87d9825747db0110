// src/core/services/registry.rs
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::core::face::LabeledDescriptorSet;
use crate::core::node::{ComputeNode, InferenceInput};
use crate::storage::DescriptorStore;
use crate::utils::config::{NodeConfig, WorkerConfig};
use crate::utils::error::{NodeError, Result};
use crate::worker::{DiagnosticFilter, InferenceResponse, WorkerManager, WorkerSpawner};

/// Registered compute nodes and the workers behind them. Each node gets its
/// own worker unless isolation is turned off, in which case one worker is
/// shared by every node.
pub struct NodeRegistry {
    spawner: Arc<dyn WorkerSpawner>,
    filter: DiagnosticFilter,
    worker_config: WorkerConfig,
    store: DescriptorStore,
    shared_worker: Option<Arc<WorkerManager>>,
    nodes: RwLock<HashMap<String, Arc<ComputeNode>>>,
}

impl NodeRegistry {
    pub fn new(
        worker_config: &WorkerConfig,
        spawner: Arc<dyn WorkerSpawner>,
        store: DescriptorStore,
    ) -> Self {
        let filter = DiagnosticFilter::new(worker_config.ignored_diagnostics.iter().cloned());
        let mut registry = Self {
            spawner,
            filter,
            worker_config: worker_config.clone(),
            store,
            shared_worker: None,
            nodes: RwLock::new(HashMap::new()),
        };
        if !worker_config.isolate {
            registry.shared_worker = Some(Arc::new(registry.worker_manager("shared")));
        }
        registry
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    /// A fresh manager using the registry's spawner and timeout.
    pub fn worker_manager(&self, name: &str) -> WorkerManager {
        WorkerManager::new(
            name,
            self.spawner.clone(),
            self.filter.clone(),
            self.worker_config.timeout(),
        )
    }

    /// Loads the node's descriptors and starts its worker.
    pub async fn register(&self, settings: NodeConfig) -> Result<Arc<ComputeNode>> {
        if self.nodes.read().contains_key(&settings.id) {
            return Err(NodeError::Config(format!("Node {} is already registered", settings.id)));
        }

        let (worker, owns_worker) = match &self.shared_worker {
            Some(shared) => (shared.clone(), false),
            None => (Arc::new(self.worker_manager(&settings.id)), true),
        };
        let node = Arc::new(ComputeNode::new(settings, worker, owns_worker, self.store.clone()));
        node.load_descriptors().await?;
        node.worker().start().await?;

        let inserted = match self.nodes.write().entry(node.id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(node.clone());
                true
            }
        };
        if !inserted {
            node.shutdown(false).await?;
            return Err(NodeError::Config(format!("Node {} is already registered", node.id())));
        }
        info!(node = node.id(), "Registered node");
        Ok(node)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ComputeNode>> {
        self.nodes.read().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.nodes.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Takes a node out of service. With `removed`, its enrolled
    /// descriptors are deleted too. Returns whether the node was registered.
    pub async fn remove(&self, id: &str, removed: bool) -> Result<bool> {
        let node = self.nodes.write().remove(id);
        match node {
            Some(node) => {
                node.shutdown(removed).await?;
                info!(node = id, removed, "Node closed");
                Ok(true)
            }
            None => {
                if removed {
                    self.store.delete(id).await?;
                }
                Ok(false)
            }
        }
    }

    /// Enrolled sets a node matches against: those of its recognise nodes,
    /// or its own when none are configured. Nodes with nothing enrolled
    /// contribute nothing.
    pub async fn comparison_sets(&self, node: &ComputeNode) -> Vec<LabeledDescriptorSet> {
        let sources = &node.settings().recognise_nodes;
        if sources.is_empty() {
            return node
                .descriptor_snapshot()
                .map(|set| vec![(*set).clone()])
                .unwrap_or_default();
        }

        let mut sets = Vec::with_capacity(sources.len());
        for id in sources {
            let set = if id == node.id() {
                node.descriptor_snapshot().map(|set| (*set).clone())
            } else if let Some(other) = self.get(id) {
                other.descriptor_snapshot().map(|set| (*set).clone())
            } else {
                match self.store.load(id).await {
                    Ok(set) => set,
                    Err(e) => {
                        warn!(node = node.id(), "Cannot read descriptors of {}: {}", id, e);
                        None
                    }
                }
            };
            sets.extend(set);
        }
        sets
    }

    /// The node's gate is taken before anything is awaited, so a busy node
    /// rejects on the first poll.
    pub async fn compute(&self, id: &str, input: InferenceInput) -> Result<InferenceResponse> {
        let node = self
            .get(id)
            .ok_or_else(|| NodeError::NotFound(format!("node {}", id)))?;
        let admission = node.admit(input)?;
        let sets = self.comparison_sets(&node).await;
        node.run(admission, sets).await
    }

    pub async fn shutdown(&self) {
        let nodes: Vec<_> = self.nodes.write().drain().map(|(_, node)| node).collect();
        let results = join_all(nodes.iter().map(|node| node.shutdown(false))).await;
        for (node, result) in nodes.iter().zip(results) {
            if let Err(e) = result {
                warn!(node = node.id(), "Shutdown failed: {}", e);
            }
        }
        if let Some(shared) = &self.shared_worker {
            shared.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::face::{Descriptor, DESCRIPTOR_LEN};
    use crate::utils::config::Config;
    use crate::worker::{InferencePipeline, LocalSpawner};
    use tempfile::TempDir;

    async fn registry(isolate: bool) -> (NodeRegistry, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::from_toml("[worker]\nmode = \"local\"").unwrap().worker;
        config.isolate = isolate;
        let spawner = LocalSpawner::new(
            Arc::new(|| InferencePipeline::replay(None)),
            config.model_load_timeout(),
        );
        let store = DescriptorStore::open(dir.path()).await.unwrap();
        (NodeRegistry::new(&config, Arc::new(spawner), store), dir)
    }

    fn set(label: &str, value: f32) -> LabeledDescriptorSet {
        LabeledDescriptorSet::new(label, vec![Descriptor::new(vec![value; DESCRIPTOR_LEN]).unwrap()])
    }

    #[tokio::test]
    async fn test_register_get_remove() {
        let (registry, _dir) = registry(true).await;
        registry.store().save("n1", &set("n1", 0.1)).await.unwrap();

        let node = registry.register(NodeConfig::new("n1")).await.unwrap();
        assert!(node.worker().is_running().await);
        assert!(registry.register(NodeConfig::new("n1")).await.is_err());
        assert_eq!(registry.ids(), vec!["n1".to_string()]);

        assert!(registry.remove("n1", false).await.unwrap());
        assert!(!node.worker().is_running().await);
        assert!(registry.get("n1").is_none());
        assert!(registry.store().load("n1").await.unwrap().is_some());

        assert!(!registry.remove("n1", true).await.unwrap());
        assert!(registry.store().load("n1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_comparison_sets_follow_recognise_nodes() {
        let (registry, _dir) = registry(true).await;
        registry.store().save("alice", &set("alice", 0.1)).await.unwrap();
        registry.store().save("bob", &set("bob", 0.2)).await.unwrap();

        let own = registry.register(NodeConfig::new("alice")).await.unwrap();
        let sets = registry.comparison_sets(&own).await;
        assert_eq!(sets.iter().map(|s| s.label.as_str()).collect::<Vec<_>>(), vec!["alice"]);

        let settings = NodeConfig {
            recognise_nodes: vec!["alice".into(), "bob".into(), "nobody".into()],
            ..NodeConfig::new("camera")
        };
        let camera = registry.register(settings).await.unwrap();
        let sets = registry.comparison_sets(&camera).await;
        assert_eq!(
            sets.iter().map(|s| s.label.as_str()).collect::<Vec<_>>(),
            vec!["alice", "bob"]
        );
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_shared_worker_survives_node_removal() {
        let (registry, _dir) = registry(false).await;
        let a = registry.register(NodeConfig::new("a")).await.unwrap();
        let b = registry.register(NodeConfig::new("b")).await.unwrap();
        assert!(Arc::ptr_eq(a.worker(), b.worker()));

        registry.remove("a", false).await.unwrap();
        assert!(b.worker().is_running().await);

        let response = registry
            .compute("b", InferenceInput::image(b"img".to_vec()))
            .await
            .unwrap();
        assert!(response.faces.is_empty());
        registry.shutdown().await;
        assert!(!b.worker().is_running().await);
    }

    #[tokio::test]
    async fn test_compute_on_unknown_node() {
        let (registry, _dir) = registry(true).await;
        let err = registry
            .compute("ghost", InferenceInput::image(b"img".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_busy_node_rejects_on_first_poll() {
        use futures::FutureExt;

        let (registry, _dir) = registry(true).await;
        let settings = NodeConfig {
            recognise_nodes: vec!["ghost".into()],
            ..NodeConfig::new("cam")
        };
        let node = registry.register(settings).await.unwrap();
        registry.store().save("ghost", &set("ghost", 0.3)).await.unwrap();
        let permit = node.gate().try_acquire().unwrap();

        let polled = registry
            .compute("cam", InferenceInput::image(b"img".to_vec()))
            .now_or_never();
        assert!(matches!(polled, Some(Err(NodeError::NodeBusy(_)))));

        permit.release();
        let response = registry
            .compute("cam", InferenceInput::image(b"img".to_vec()))
            .await
            .unwrap();
        assert!(response.faces.is_empty());
        registry.shutdown().await;
    }
}
