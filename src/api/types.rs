// src/api/types.rs
use serde::{Deserialize, Serialize};

use crate::core::face::{FaceMode, Metric};
use crate::core::node::RequestOverrides;

/// Image bytes sent as a hex string.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct HexImage(#[serde(with = "hex")] pub Vec<u8>);

#[derive(Debug, Deserialize)]
pub struct CreateDescriptorsRequest {
    #[serde(default)]
    pub images: Vec<HexImage>,
}

#[derive(Debug, Serialize)]
pub struct EnrollmentResponse {
    pub label: String,
    pub descriptors: usize,
}

/// Per-request overrides accepted on the query string of a compute call.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeQuery {
    pub metric: Option<Metric>,
    pub match_threshold: Option<f64>,
    pub face_mode: Option<FaceMode>,
}

impl From<ComputeQuery> for RequestOverrides {
    fn from(query: ComputeQuery) -> Self {
        Self {
            metric: query.metric,
            match_threshold: query.match_threshold,
            face_mode: query.face_mode,
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
