// src/worker/protocol.rs
//! Messages exchanged with a worker, one JSON document per line. Image bytes
//! travel as hex strings.

use serde::{Deserialize, Serialize};

use crate::core::face::{
    DetectOptions, FaceMode, FaceRecord, LabeledDescriptorSet, Metric, ModelOptions,
};
use crate::utils::error::{ErrorCode, NodeError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    #[serde(with = "hex")]
    pub image: Vec<u8>,
    pub model_options: ModelOptions,
    pub detect_options: DetectOptions,
    #[serde(default)]
    pub face_mode: FaceMode,
    #[serde(default)]
    pub comparison_sets: Vec<LabeledDescriptorSet>,
    #[serde(default)]
    pub metric: Metric,
    pub match_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResponse {
    pub faces: Vec<FaceRecord>,
    #[serde(with = "hex")]
    pub annotated_image: Vec<u8>,
    pub inference_time_ms: u64,
}

/// Parent to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEnvelope {
    pub id: String,
    pub request: InferenceRequest,
}

/// Worker to parent: a correlated response or a side-channel notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    Response {
        id: String,
        response: InferenceResponse,
    },
    Info {
        info: String,
    },
    Warn {
        warn: String,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

impl WorkerMessage {
    pub fn info(message: impl Into<String>) -> Self {
        WorkerMessage::Info { info: message.into() }
    }

    pub fn failure(id: Option<String>, error: &NodeError) -> Self {
        let (code, message) = error.worker_parts();
        WorkerMessage::Error {
            error: message,
            id,
            code: Some(code),
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Pulls the correlation id out of a line that failed to decode, so the
/// matching call can still be failed instead of left waiting.
pub fn salvage_id(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    value.get("id")?.as_str().map(str::to_string)
}
