// src/core/node/mod.rs
//! A compute node: one busy gate, one worker manager and the node's own
//! enrolled descriptors.

pub mod gate;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::core::face::{
    DetectOverrides, FaceMode, LabeledDescriptorSet, Metric, ModelOverrides,
};
use crate::storage::DescriptorStore;
use crate::utils::config::NodeConfig;
use crate::utils::error::{NodeError, Result};
use crate::worker::{InferenceRequest, InferenceResponse, WorkerManager};

pub use gate::{BusyGate, GatePermit, GateState};

/// Incoming message body. Only binary images can be processed.
#[derive(Debug, Clone)]
pub enum Payload {
    Binary(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    fn kind(&self) -> &'static str {
        match self {
            Payload::Binary(_) => "binary",
            Payload::Text(_) => "text",
            Payload::Json(_) => "json",
        }
    }
}

/// Per-request settings; anything left unset falls back to the node's
/// configured value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOverrides {
    #[serde(default)]
    pub model_options: ModelOverrides,
    #[serde(default)]
    pub detect_options: DetectOverrides,
    pub face_mode: Option<FaceMode>,
    pub metric: Option<Metric>,
    pub match_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct InferenceInput {
    pub payload: Option<Payload>,
    pub overrides: RequestOverrides,
}

impl InferenceInput {
    pub fn image(bytes: Vec<u8>) -> Self {
        Self {
            payload: Some(Payload::Binary(bytes)),
            overrides: RequestOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: RequestOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// A request that passed validation and holds the node's gate.
#[must_use]
pub struct Admission {
    permit: GatePermit,
    request: InferenceRequest,
}

pub struct ComputeNode {
    settings: NodeConfig,
    gate: BusyGate,
    worker: Arc<WorkerManager>,
    owns_worker: bool,
    store: DescriptorStore,
    descriptors: RwLock<Option<Arc<LabeledDescriptorSet>>>,
}

impl ComputeNode {
    /// `owns_worker` is false when the worker is shared between nodes; such
    /// a worker is left running when this node shuts down.
    pub fn new(
        settings: NodeConfig,
        worker: Arc<WorkerManager>,
        owns_worker: bool,
        store: DescriptorStore,
    ) -> Self {
        Self {
            gate: BusyGate::new(&settings.id),
            settings,
            worker,
            owns_worker,
            store,
            descriptors: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    pub fn settings(&self) -> &NodeConfig {
        &self.settings
    }

    /// Label written when this node is enrolled.
    pub fn label(&self) -> &str {
        self.settings.display_name().unwrap_or(&self.settings.id)
    }

    pub fn gate(&self) -> &BusyGate {
        &self.gate
    }

    pub fn worker(&self) -> &Arc<WorkerManager> {
        &self.worker
    }

    /// Re-reads the enrolled set from the store. A configured name replaces
    /// the stored label.
    pub async fn load_descriptors(&self) -> Result<Option<Arc<LabeledDescriptorSet>>> {
        let loaded = self.store.load(self.id()).await?.map(|set| {
            let set = match self.settings.display_name() {
                Some(name) => set.relabeled(name),
                None => set,
            };
            Arc::new(set)
        });

        match &loaded {
            Some(set) => info!(node = self.id(), "Loaded {} descriptor(s) for {}", set.len(), set.label),
            None => debug!(node = self.id(), "No descriptors enrolled"),
        }
        *self.descriptors.write() = loaded.clone();
        Ok(loaded)
    }

    pub fn descriptor_snapshot(&self) -> Option<Arc<LabeledDescriptorSet>> {
        self.descriptors.read().clone()
    }

    pub(crate) fn clear_descriptors(&self) {
        *self.descriptors.write() = None;
    }

    /// Runs one image through this node's worker. Input problems are
    /// reported before the gate is touched; once admitted, the gate is
    /// released on every outcome.
    pub async fn compute(
        &self,
        input: InferenceInput,
        comparison_sets: Vec<LabeledDescriptorSet>,
    ) -> Result<InferenceResponse> {
        let admission = self.admit(input)?;
        self.run(admission, comparison_sets).await
    }

    /// Validates the input and takes the gate without suspending. Dropping
    /// the returned admission reopens the gate.
    pub fn admit(&self, input: InferenceInput) -> Result<Admission> {
        let image = match input.payload {
            Some(Payload::Binary(bytes)) if !bytes.is_empty() => bytes,
            Some(Payload::Binary(_)) => {
                return Err(NodeError::InvalidPayload("image is empty".into()))
            }
            Some(other) => {
                return Err(NodeError::InvalidPayload(format!(
                    "expected a binary image, got {}",
                    other.kind()
                )))
            }
            None => return Err(NodeError::InvalidPayload("no image supplied".into())),
        };
        let request = self.build_request(image, &input.overrides)?;
        let permit = self.gate.try_acquire()?;
        Ok(Admission { permit, request })
    }

    pub async fn run(
        &self,
        admission: Admission,
        comparison_sets: Vec<LabeledDescriptorSet>,
    ) -> Result<InferenceResponse> {
        let Admission { permit, mut request } = admission;
        request.comparison_sets = comparison_sets;
        let result = self.worker.submit(request).await;
        permit.release();

        match &result {
            Ok(response) => debug!(
                node = self.id(),
                "{} face(s) in {}ms",
                response.faces.len(),
                response.inference_time_ms
            ),
            Err(e) => warn!(node = self.id(), "Inference failed: {}", e),
        }
        result
    }

    fn build_request(
        &self,
        image: Vec<u8>,
        overrides: &RequestOverrides,
    ) -> Result<InferenceRequest> {
        let model_options = self.settings.model_options.merged(&overrides.model_options);
        model_options
            .validate()
            .map_err(|e| NodeError::InvalidPayload(e.to_string()))?;

        let detect_options = self
            .settings
            .detect_options
            .merged(&overrides.detect_options)
            .normalized();
        let face_mode = overrides.face_mode.unwrap_or(self.settings.face_mode);
        detect_options.plan(face_mode)?;

        let match_threshold = overrides.match_threshold.unwrap_or(self.settings.match_threshold);
        if !match_threshold.is_finite() {
            return Err(NodeError::InvalidPayload("matchThreshold must be a number".into()));
        }

        Ok(InferenceRequest {
            image,
            model_options,
            detect_options,
            face_mode,
            comparison_sets: Vec::new(),
            metric: overrides.metric.unwrap_or(self.settings.metric),
            match_threshold,
        })
    }

    /// Stops the node's worker unless it is shared. With `removed`, the
    /// enrolled descriptors are deleted as well.
    pub async fn shutdown(&self, removed: bool) -> Result<()> {
        if self.owns_worker {
            self.worker.stop().await;
        }
        if removed {
            self.store.delete(self.id()).await?;
            self.clear_descriptors();
        }
        Ok(())
    }
}
