// src/utils/error.rs
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Node {0} is busy")]
    NodeBusy(String),

    #[error("Unsupported option combination: {0}")]
    UnsupportedOptionCombination(String),

    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),

    #[error("Worker did not respond within {}ms", .0.as_millis())]
    WorkerTimeout(Duration),

    #[error("Failed to spawn worker: {0}")]
    WorkerSpawn(String),

    #[error("Descriptor set '{0}' has no descriptors")]
    EmptyDescriptorSet(String),

    #[error("No faces detected in any image for {0}")]
    NoFacesDetected(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("Detection engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;

/// Machine-readable failure kind carried by worker error notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidPayload,
    UnsupportedOptionCombination,
    InvalidDescriptor,
    Engine,
}

impl NodeError {
    /// Splits the error into the code and message sent in a worker error
    /// notice. Coded variants send their bare detail so the parent can
    /// rebuild the same variant.
    pub fn worker_parts(&self) -> (ErrorCode, String) {
        match self {
            NodeError::InvalidPayload(m) => (ErrorCode::InvalidPayload, m.clone()),
            NodeError::UnsupportedOptionCombination(m) => {
                (ErrorCode::UnsupportedOptionCombination, m.clone())
            }
            NodeError::InvalidDescriptor(m) => (ErrorCode::InvalidDescriptor, m.clone()),
            NodeError::Engine(m) => (ErrorCode::Engine, m.clone()),
            other => (ErrorCode::Engine, other.to_string()),
        }
    }

    /// Rebuilds an error reported by a worker.
    pub fn from_worker(code: Option<ErrorCode>, message: String) -> Self {
        match code {
            Some(ErrorCode::InvalidPayload) => NodeError::InvalidPayload(message),
            Some(ErrorCode::UnsupportedOptionCombination) => {
                NodeError::UnsupportedOptionCombination(message)
            }
            Some(ErrorCode::InvalidDescriptor) => NodeError::InvalidDescriptor(message),
            Some(ErrorCode::Engine) | None => NodeError::Engine(message),
        }
    }

    /// Worker lifecycle failures leave the handle unusable.
    pub fn is_worker_fault(&self) -> bool {
        matches!(self, NodeError::WorkerCrashed(_) | NodeError::WorkerTimeout(_))
    }
}

impl From<config::ConfigError> for NodeError {
    fn from(error: config::ConfigError) -> Self {
        NodeError::Config(error.to_string())
    }
}
