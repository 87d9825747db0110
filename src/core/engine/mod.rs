// src/core/engine/mod.rs
//! Seams to the detection network and the image annotator. Both run inside a
//! worker; the coordinating side only ever sees their serialized results.

pub mod render;
pub mod replay;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::core::face::{DetectOptions, DetectionPlan, FaceRecord, ModelOptions, PipelineStage};
use crate::utils::error::Result;

pub use render::PassthroughRenderer;
pub use replay::ReplayEngine;

/// Face detection backend.
///
/// Implementations receive the already-resolved stage plan and must return
/// one record per detected face (at most one in single-face mode). Image
/// bytes are encoded (JPEG/PNG); decoding is the engine's concern.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DetectionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this backend can run `stage`.
    fn supports(&self, stage: PipelineStage) -> bool;

    /// Loads model weights. Called once before the worker serves requests.
    async fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    async fn detect(
        &self,
        image: &[u8],
        model: &ModelOptions,
        plan: &DetectionPlan,
    ) -> Result<Vec<FaceRecord>>;
}

/// Draws detections onto the source image and re-encodes it.
pub trait Renderer: Send + Sync {
    fn annotate(
        &self,
        image: &[u8],
        faces: &[FaceRecord],
        options: &DetectOptions,
    ) -> Result<Vec<u8>>;
}
