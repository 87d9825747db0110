// src/core/engine/replay.rs
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha3::{Digest, Sha3_256};
use tracing::{debug, info};

use crate::core::face::{DetectionPlan, FaceMode, FaceRecord, ModelOptions, PipelineStage};
use crate::utils::error::{NodeError, Result};
use super::DetectionEngine;

/// Deterministic engine that replays recorded detections.
///
/// Recordings are keyed by the SHA3-256 of the encoded image. They live either
/// in memory or as `<key>.json` files (a JSON array of face records) under a
/// fixtures directory. An image without a recording yields no faces.
pub struct ReplayEngine {
    fixtures_dir: Option<PathBuf>,
    recordings: HashMap<String, Vec<FaceRecord>>,
}

impl ReplayEngine {
    pub fn new() -> Self {
        Self {
            fixtures_dir: None,
            recordings: HashMap::new(),
        }
    }

    pub fn with_fixtures_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            fixtures_dir: Some(dir.into()),
            recordings: HashMap::new(),
        }
    }

    pub fn fixture_key(image: &[u8]) -> String {
        hex::encode(Sha3_256::digest(image))
    }

    pub fn record(&mut self, image: &[u8], faces: Vec<FaceRecord>) {
        self.recordings.insert(Self::fixture_key(image), faces);
    }

    /// Writes a recording where a fixtures-backed engine will find it.
    pub fn write_fixture(dir: &Path, image: &[u8], faces: &[FaceRecord]) -> Result<PathBuf> {
        let path = dir.join(format!("{}.json", Self::fixture_key(image)));
        std::fs::write(&path, serde_json::to_vec(faces)?)?;
        Ok(path)
    }

    async fn lookup(&self, key: &str) -> Result<Vec<FaceRecord>> {
        if let Some(faces) = self.recordings.get(key) {
            return Ok(faces.clone());
        }

        let Some(dir) = &self.fixtures_dir else {
            return Ok(Vec::new());
        };

        let path = dir.join(format!("{}.json", key));
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                NodeError::Engine(format!("Corrupt recording {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No recording for image {}", key);
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DetectionEngine for ReplayEngine {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn supports(&self, _stage: PipelineStage) -> bool {
        true
    }

    async fn warm_up(&mut self) -> Result<()> {
        if let Some(dir) = &self.fixtures_dir {
            if !tokio::fs::try_exists(dir).await? {
                return Err(NodeError::Engine(format!(
                    "Fixtures directory {} does not exist",
                    dir.display()
                )));
            }
            info!("Replaying detections from {}", dir.display());
        }
        Ok(())
    }

    async fn detect(
        &self,
        image: &[u8],
        model: &ModelOptions,
        plan: &DetectionPlan,
    ) -> Result<Vec<FaceRecord>> {
        if image.is_empty() {
            return Err(NodeError::Engine("Image buffer is empty".into()));
        }

        let floor = model.confidence_floor() as f32;
        let mut faces: Vec<FaceRecord> = self
            .lookup(&Self::fixture_key(image))
            .await?
            .into_iter()
            .filter(|face| face.score >= floor)
            .collect();

        faces.sort_by(|a, b| b.score.total_cmp(&a.score));
        let limit = match plan.mode {
            FaceMode::Single => 1,
            FaceMode::Multiple => model.max_results,
        };
        faces.truncate(limit);

        Ok(faces)
    }
}
