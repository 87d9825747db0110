// tests/integration/enrollment_tests.rs
use facegate::{
    core::{
        face::{Metric, UNKNOWN_LABEL},
        node::{InferenceInput, RequestOverrides},
        services::EnrollOutcome,
    },
    utils::{config::NodeConfig, error::NodeError},
};

use crate::common::{face, uniform, TestContext};

fn euclidean(threshold: f64) -> RequestOverrides {
    RequestOverrides {
        metric: Some(Metric::Euclidean),
        match_threshold: Some(threshold),
        ..Default::default()
    }
}

#[test_log::test(tokio::test)]
async fn test_enroll_then_recognise() {
    let ctx = TestContext::process().await;
    let v1 = uniform(0.0);
    let v2 = uniform(0.1);
    let v3 = uniform(0.2);
    ctx.record(b"a-1", &[face(v1.clone())]);
    ctx.record(b"a-2", &[face(v2.clone())]);
    ctx.record(b"a-3", &[face(v3)]);

    let node = ctx
        .registry
        .register(NodeConfig { name: Some("Alice".into()), ..NodeConfig::new("a") })
        .await
        .unwrap();

    let outcome = ctx
        .enrollment
        .create("a", vec![b"a-1".to_vec(), b"a-2".to_vec(), b"a-3".to_vec()])
        .await
        .unwrap();
    assert!(matches!(outcome, EnrollOutcome::Created(ref set) if set.len() == 3));
    assert_eq!(node.descriptor_snapshot().unwrap().label, "Alice");

    // Exactly v2.
    ctx.record(b"probe-exact", &[face(v2)]);
    let response = ctx
        .registry
        .compute("a", InferenceInput::image(b"probe-exact".to_vec()).with_overrides(euclidean(1.0)))
        .await
        .unwrap();
    let matched = response.faces[0].face_match.clone().unwrap();
    assert_eq!((matched.label.as_str(), matched.distance), ("Alice", 0));

    // 0.5 away from v1 on one axis, farther from the others.
    let mut near = v1;
    near[0] = 0.5;
    ctx.record(b"probe-near", &[face(near)]);
    let response = ctx
        .registry
        .compute("a", InferenceInput::image(b"probe-near".to_vec()).with_overrides(euclidean(1.0)))
        .await
        .unwrap();
    let matched = response.faces[0].face_match.clone().unwrap();
    assert_eq!((matched.label.as_str(), matched.distance), (UNKNOWN_LABEL, 5000));

    ctx.registry.shutdown().await;
}

#[tokio::test]
async fn test_enrollment_round_trip_and_replace() {
    let ctx = TestContext::process().await;
    ctx.record(b"one", &[face(uniform(0.1))]);
    ctx.record(b"two", &[face(uniform(0.2))]);
    ctx.record(b"three", &[face(uniform(0.3))]);

    let images = vec![b"one".to_vec(), b"no-face".to_vec(), b"two".to_vec(), b"three".to_vec()];
    let outcome = ctx.enrollment.create("n1", images).await.unwrap();
    assert!(matches!(outcome, EnrollOutcome::Accepted(_)));

    let stored = ctx.registry.store().load("n1").await.unwrap().unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored.label, "n1");

    ctx.enrollment.create("n1", vec![b"two".to_vec()]).await.unwrap();
    let stored = ctx.registry.store().load("n1").await.unwrap().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored.descriptors[0].as_slice(), uniform(0.2).as_slice());

    // A node registered afterwards starts with the stored set.
    let node = ctx.registry.register(NodeConfig::new("n1")).await.unwrap();
    assert_eq!(node.descriptor_snapshot().unwrap().len(), 1);
    ctx.registry.shutdown().await;
}

#[tokio::test]
async fn test_enrollment_without_faces_fails() {
    let ctx = TestContext::process().await;
    let err = ctx
        .enrollment
        .create("n1", vec![b"wall".to_vec(), b"floor".to_vec()])
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::NoFacesDetected(_)));
    assert_eq!(ctx.enrollment.check("n1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_deleting_non_enrolled_node_is_not_an_error() {
    let ctx = TestContext::process().await;
    assert!(!ctx.enrollment.delete("never-enrolled").await.unwrap());
    assert!(!ctx.registry.remove("never-enrolled", true).await.unwrap());
}

#[tokio::test]
async fn test_removed_node_loses_its_descriptors() {
    let ctx = TestContext::process().await;
    ctx.record(b"one", &[face(uniform(0.1))]);
    ctx.registry.register(NodeConfig::new("n1")).await.unwrap();
    ctx.enrollment.create("n1", vec![b"one".to_vec()]).await.unwrap();

    assert!(ctx.registry.remove("n1", true).await.unwrap());
    assert_eq!(ctx.enrollment.check("n1").await.unwrap(), 0);
}
