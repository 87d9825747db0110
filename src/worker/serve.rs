// src/worker/serve.rs
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

use crate::utils::error::{NodeError, Result};
use super::pipeline::InferencePipeline;
use super::protocol::{encode, salvage_id, WorkerEnvelope, WorkerMessage};

pub const MODELS_LOADED: &str = "Loaded models";
pub const MODELS_FAILED: &str = "Failed to load models";

/// Worker side of the protocol: warms up the pipeline, then answers one
/// request line with one reply line.
pub struct WorkerHost {
    pipeline: InferencePipeline,
    model_load_timeout: Duration,
}

impl WorkerHost {
    pub fn new(pipeline: InferencePipeline, model_load_timeout: Duration) -> Self {
        Self {
            pipeline,
            model_load_timeout,
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        let limit = self.model_load_timeout;
        match tokio::time::timeout(limit, self.pipeline.warm_up()).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::Engine(format!(
                "models did not load within {}ms",
                limit.as_millis()
            ))),
        }
    }

    /// Encoded `info`/`error` notice announcing the outcome of `start`.
    pub fn startup_notice(loaded: &Result<()>) -> String {
        let notice = match loaded {
            Ok(()) => WorkerMessage::info(MODELS_LOADED),
            Err(_) => WorkerMessage::Error {
                error: MODELS_FAILED.to_string(),
                id: None,
                code: None,
            },
        };
        encode_or_report(&notice)
    }

    pub async fn handle_line(&self, line: &str) -> String {
        let envelope: WorkerEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Rejecting malformed request: {}", e);
                let error = NodeError::InvalidPayload(e.to_string());
                return encode_or_report(&WorkerMessage::failure(salvage_id(line), &error));
            }
        };

        let reply = match self.pipeline.run(&envelope.request).await {
            Ok(response) => WorkerMessage::Response {
                id: envelope.id,
                response,
            },
            Err(e) => {
                warn!("Request {} failed: {}", envelope.id, e);
                WorkerMessage::failure(Some(envelope.id), &e)
            }
        };
        encode_or_report(&reply)
    }
}

fn encode_or_report(message: &WorkerMessage) -> String {
    encode(message).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

/// Serves the protocol over this process's stdin/stdout until stdin closes.
pub async fn serve_stdio(mut host: WorkerHost) -> Result<()> {
    let mut stdout = tokio::io::stdout();

    let loaded = host.start().await;
    write_line(&mut stdout, &WorkerHost::startup_notice(&loaded)).await?;
    if let Err(e) = loaded {
        error!("{}: {}", MODELS_FAILED, e);
        return Err(e);
    }
    info!("Worker ready ({} engine)", host.pipeline.engine_name());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = host.handle_line(&line).await;
        write_line(&mut stdout, &reply).await?;
    }

    info!("Input closed, worker exiting");
    Ok(())
}

async fn write_line(stdout: &mut tokio::io::Stdout, line: &str) -> Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
