// src/worker/mod.rs
//! Inference workers: the message protocol, the ways a worker can be run
//! (child process or local task), call correlation and lifecycle management,
//! and the worker-side serve loop.

pub mod diagnostics;
pub mod handle;
pub mod manager;
pub mod pipeline;
pub mod protocol;
pub mod serve;
pub mod transport;

pub use diagnostics::{DiagnosticFilter, BENIGN_DIAGNOSTICS};
pub use handle::WorkerHandle;
pub use manager::WorkerManager;
pub use pipeline::InferencePipeline;
pub use protocol::{InferenceRequest, InferenceResponse, WorkerMessage};
pub use serve::{serve_stdio, WorkerHost};
pub use transport::{LocalSpawner, PipelineFactory, ProcessSpawner, WorkerSpawner};

use std::path::PathBuf;
use std::sync::Arc;

use crate::utils::config::{WorkerConfig, WorkerMode};
use crate::utils::error::Result;

/// Spawner for the configured worker mode. Process workers get the fixtures
/// directory and model load timeout through their environment.
pub fn spawner_for(config: &WorkerConfig) -> Result<Arc<dyn WorkerSpawner>> {
    let spawner: Arc<dyn WorkerSpawner> = match config.mode {
        WorkerMode::Process => {
            let mut spawner = ProcessSpawner::new(config.resolve_program()?, config.args.clone())
                .env(
                    transport::MODEL_LOAD_TIMEOUT_ENV,
                    config.model_load_timeout_ms.to_string(),
                );
            if let Some(dir) = &config.fixtures_dir {
                spawner = spawner.env(transport::FIXTURES_ENV, dir.as_str());
            }
            Arc::new(spawner)
        }
        WorkerMode::Local => {
            let fixtures = config.fixtures_dir.as_ref().map(PathBuf::from);
            Arc::new(LocalSpawner::new(
                Arc::new(move || InferencePipeline::replay(fixtures.clone())),
                config.model_load_timeout(),
            ))
        }
    };
    Ok(spawner)
}
