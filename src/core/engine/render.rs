// src/core/engine/render.rs
use crate::core::face::{DetectOptions, FaceRecord};
use crate::utils::error::Result;
use super::Renderer;

/// Returns the source image untouched. Used when no drawing backend is linked
/// into the worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughRenderer;

impl Renderer for PassthroughRenderer {
    fn annotate(
        &self,
        image: &[u8],
        _faces: &[FaceRecord],
        _options: &DetectOptions,
    ) -> Result<Vec<u8>> {
        Ok(image.to_vec())
    }
}
