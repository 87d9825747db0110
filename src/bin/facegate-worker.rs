use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use facegate::{
    utils::logging,
    worker::{serve_stdio, InferencePipeline, WorkerHost},
};
use tracing::info;

/// Inference worker. Reads one JSON request per line on stdin and answers
/// on stdout; logs go to stderr.
#[derive(Debug, Parser)]
#[command(name = "facegate-worker", version)]
struct Args {
    /// Directory of recorded detections, one `<sha3-256>.json` per image.
    #[arg(long, env = "FACEGATE_WORKER_FIXTURES")]
    fixtures: Option<PathBuf>,

    /// Give up if the models are not loaded within this many milliseconds.
    #[arg(long, env = "FACEGATE_WORKER_MODEL_LOAD_TIMEOUT_MS", default_value_t = 30_000)]
    model_load_timeout_ms: u64,

    #[arg(long, env = "FACEGATE_WORKER_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_worker(&args.log_level).context("Failed to initialise logging")?;

    let pipeline = InferencePipeline::replay(args.fixtures);
    info!("Loading {} engine", pipeline.engine_name());

    let host = WorkerHost::new(pipeline, Duration::from_millis(args.model_load_timeout_ms));
    serve_stdio(host).await.context("Worker failed")?;
    Ok(())
}
