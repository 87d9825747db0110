// src/core/services/enrollment.rs
use std::sync::Arc;

use tracing::{info, warn};

use crate::core::face::{
    Descriptor, DetectOptions, FaceMode, LabeledDescriptorSet, Metric, ModelOptions,
};
use crate::storage::validate_node_id;
use crate::utils::error::{NodeError, Result};
use crate::worker::{InferenceRequest, WorkerManager};
use super::registry::NodeRegistry;

#[derive(Debug, Clone, PartialEq)]
pub enum EnrollOutcome {
    /// The node is registered and already matches against the new set.
    Created(LabeledDescriptorSet),
    /// Stored for a node that is not registered yet; it is picked up when
    /// the node starts.
    Accepted(LabeledDescriptorSet),
}

impl EnrollOutcome {
    pub fn descriptor_set(&self) -> &LabeledDescriptorSet {
        match self {
            EnrollOutcome::Created(set) | EnrollOutcome::Accepted(set) => set,
        }
    }
}

/// Builds, counts and deletes enrolled descriptor sets. Every image is
/// processed by its own short-lived worker.
pub struct EnrollmentService {
    registry: Arc<NodeRegistry>,
    workers: WorkerManager,
}

impl EnrollmentService {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        let workers = registry.worker_manager("enrollment");
        Self { registry, workers }
    }

    /// Replaces the node's set with one descriptor per image that shows a
    /// face. Images without a face, or that fail in the engine or take
    /// their worker down, are skipped. A registered node is held busy for
    /// the duration.
    pub async fn create(&self, node_id: &str, images: Vec<Vec<u8>>) -> Result<EnrollOutcome> {
        validate_node_id(node_id)?;
        if images.is_empty() {
            return Err(NodeError::InvalidPayload("no images supplied".into()));
        }

        let Some(node) = self.registry.get(node_id) else {
            let set = self.enroll(node_id, node_id, images).await?;
            // registered while the images were processed
            if let Some(node) = self.registry.get(node_id) {
                node.load_descriptors().await?;
            }
            return Ok(EnrollOutcome::Accepted(set));
        };

        let permit = node.gate().try_acquire()?;
        let enrolled = self.enroll(node_id, node.label(), images).await;
        let reloaded = match &enrolled {
            Ok(_) => node.load_descriptors().await.map(|_| ()),
            Err(_) => Ok(()),
        };
        permit.release();

        let set = enrolled?;
        reloaded?;
        Ok(EnrollOutcome::Created(set))
    }

    pub async fn check(&self, node_id: &str) -> Result<usize> {
        self.registry.store().count(node_id).await
    }

    /// Returns whether anything was deleted. A registered node must be
    /// idle.
    pub async fn delete(&self, node_id: &str) -> Result<bool> {
        let Some(node) = self.registry.get(node_id) else {
            return self.registry.store().delete(node_id).await;
        };

        let permit = node.gate().try_acquire()?;
        let deleted = self.registry.store().delete(node_id).await;
        if deleted.is_ok() {
            node.clear_descriptors();
        }
        permit.release();
        deleted
    }

    async fn enroll(
        &self,
        node_id: &str,
        label: &str,
        images: Vec<Vec<u8>>,
    ) -> Result<LabeledDescriptorSet> {
        let total = images.len();
        let mut descriptors = Vec::with_capacity(total);
        let mut answered = 0;
        let mut last_fault = None;

        for (index, image) in images.into_iter().enumerate() {
            match self.extract(image).await {
                Ok(found) => {
                    answered += 1;
                    match found {
                        Some(descriptor) => descriptors.push(descriptor),
                        None => warn!(node = node_id, "No face found in image {}, skipping", index),
                    }
                }
                Err(e @ NodeError::WorkerSpawn(_)) => return Err(e),
                Err(e) if e.is_worker_fault() => {
                    warn!(node = node_id, "Worker failed on image {}, skipping: {}", index, e);
                    last_fault = Some(e);
                }
                Err(e) => {
                    answered += 1;
                    warn!(node = node_id, "Skipping image {}: {}", index, e);
                }
            }
        }

        if descriptors.is_empty() {
            // every worker failed: report that rather than a missing face
            return Err(match last_fault {
                Some(fault) if answered == 0 => fault,
                _ => NodeError::NoFacesDetected(node_id.to_string()),
            });
        }

        let set = LabeledDescriptorSet::new(label, descriptors);
        self.registry.store().save(node_id, &set).await?;
        info!(node = node_id, "Enrolled {} of {} image(s) as {}", set.len(), total, label);
        Ok(set)
    }

    async fn extract(&self, image: Vec<u8>) -> Result<Option<Descriptor>> {
        let request = InferenceRequest {
            image,
            model_options: ModelOptions {
                max_results: 1,
                ..ModelOptions::default()
            },
            detect_options: DetectOptions::descriptors_only(),
            face_mode: FaceMode::Single,
            comparison_sets: Vec::new(),
            metric: Metric::default(),
            match_threshold: 0.0,
        };

        let response = self.workers.submit_ephemeral(request).await?;
        Ok(response.faces.into_iter().find_map(|face| face.descriptor))
    }
}
