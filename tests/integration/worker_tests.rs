// tests/integration/worker_tests.rs
use std::time::Duration;

use facegate::{
    core::node::{GateState, InferenceInput},
    utils::{config::NodeConfig, error::NodeError},
};

use crate::common::{face, first_run_then_worker, uniform, TestContext};

#[tokio::test]
async fn test_zero_detections_is_an_empty_result() {
    let ctx = TestContext::process().await;
    ctx.registry.register(NodeConfig::new("n1")).await.unwrap();

    let response = ctx
        .registry
        .compute("n1", InferenceInput::image(b"empty hallway".to_vec()))
        .await
        .unwrap();
    assert!(response.faces.is_empty());
    assert_eq!(response.annotated_image, b"empty hallway".to_vec());
    ctx.registry.shutdown().await;
}

#[tokio::test]
async fn test_crash_mid_request_recovers_with_fresh_worker() {
    let dir = tempfile::TempDir::new().unwrap();
    let script = first_run_then_worker(&dir.path().join("crashed"), "read line; exit 3");
    let ctx = TestContext::script(&script, 10_000).await;
    ctx.record(b"face", &[face(uniform(0.4))]);
    let node = ctx.registry.register(NodeConfig::new("n1")).await.unwrap();

    let err = ctx
        .registry
        .compute("n1", InferenceInput::image(b"face".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::WorkerCrashed(ref m) if m.contains("code 3")), "{}", err);
    assert_eq!(node.gate().state(), GateState::Idle);

    let response = ctx
        .registry
        .compute("n1", InferenceInput::image(b"face".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.faces.len(), 1);
    ctx.registry.shutdown().await;
}

#[tokio::test]
async fn test_timeout_discards_hung_worker() {
    let dir = tempfile::TempDir::new().unwrap();
    let script = first_run_then_worker(&dir.path().join("hung"), "exec sleep 30");
    let ctx = TestContext::script(&script, 2_000).await;
    let node = ctx.registry.register(NodeConfig::new("n1")).await.unwrap();

    let err = ctx
        .registry
        .compute("n1", InferenceInput::image(b"face".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::WorkerTimeout(_)));
    assert_eq!(node.gate().state(), GateState::Idle);

    ctx.registry
        .compute("n1", InferenceInput::image(b"face".to_vec()))
        .await
        .unwrap();
    ctx.registry.shutdown().await;
}

#[tokio::test]
async fn test_second_request_while_busy_is_rejected() {
    let ctx = TestContext::script("exec sleep 30", 1_500).await;
    let node = ctx.registry.register(NodeConfig::new("n1")).await.unwrap();

    let first = tokio::spawn({
        let registry = ctx.registry.clone();
        async move {
            registry
                .compute("n1", InferenceInput::image(b"first".to_vec()))
                .await
        }
    });

    for _ in 0..100 {
        if node.gate().state() == GateState::Busy {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(node.gate().state(), GateState::Busy);

    let err = ctx
        .registry
        .compute("n1", InferenceInput::image(b"second".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::NodeBusy(_)));

    // The rejected call does not disturb the first one.
    assert!(matches!(first.await.unwrap(), Err(NodeError::WorkerTimeout(_))));
    assert_eq!(node.gate().state(), GateState::Idle);
    ctx.registry.shutdown().await;
}

#[tokio::test]
async fn test_worker_that_cannot_load_models_is_a_crash() {
    let ctx = TestContext::process().await;
    std::fs::remove_dir(ctx.fixtures()).unwrap();
    ctx.registry.register(NodeConfig::new("n1")).await.unwrap();

    let err = ctx
        .registry
        .compute("n1", InferenceInput::image(b"face".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::WorkerCrashed(_)), "{}", err);
    ctx.registry.shutdown().await;
}
