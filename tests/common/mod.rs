// tests/common/mod.rs
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use facegate::{
    core::{
        engine::ReplayEngine,
        face::{BoundingBox, Descriptor, FaceRecord, DESCRIPTOR_LEN},
        services::{EnrollmentService, NodeRegistry},
    },
    storage::DescriptorStore,
    utils::config::Config,
    worker::spawner_for,
};
use tempfile::TempDir;

pub const WORKER_BIN: &str = env!("CARGO_BIN_EXE_facegate-worker");

pub struct TestContext {
    pub dir: TempDir,
    pub registry: Arc<NodeRegistry>,
    pub enrollment: EnrollmentService,
}

impl TestContext {
    /// Real `facegate-worker` processes replaying fixtures from the context
    /// directory.
    pub async fn process() -> Self {
        Self::with_worker(WORKER_BIN, &[], 10_000).await
    }

    /// Workers started through `sh -c <script>`. The script sees the same
    /// environment the worker binary would.
    pub async fn script(script: &str, timeout_ms: u64) -> Self {
        Self::with_worker("sh", &["-c", script], timeout_ms).await
    }

    pub async fn with_worker(program: &str, args: &[&str], timeout_ms: u64) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir_all(dir.path().join("fixtures")).unwrap();

        let args = args
            .iter()
            .map(|arg| format!("{:?}", arg))
            .collect::<Vec<_>>()
            .join(", ");
        let config = Config::from_toml(&format!(
            r#"
            [storage]
            descriptor_dir = {descriptors:?}

            [worker]
            mode = "process"
            program = {program:?}
            args = [{args}]
            fixtures_dir = {fixtures:?}
            timeout_ms = {timeout_ms}
            "#,
            descriptors = dir.path().join("descriptors").display().to_string(),
            fixtures = dir.path().join("fixtures").display().to_string(),
        ))
        .expect("Invalid test configuration");

        let store = DescriptorStore::open(&config.storage.descriptor_dir).await.unwrap();
        let spawner = spawner_for(&config.worker).unwrap();
        let registry = Arc::new(NodeRegistry::new(&config.worker, spawner, store));
        let enrollment = EnrollmentService::new(registry.clone());

        Self { dir, registry, enrollment }
    }

    pub fn fixtures(&self) -> PathBuf {
        self.dir.path().join("fixtures")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Makes the replay engine report `faces` for `image`.
    pub fn record(&self, image: &[u8], faces: &[FaceRecord]) {
        ReplayEngine::write_fixture(&self.fixtures(), image, faces).unwrap();
    }
}

pub fn face(values: Vec<f32>) -> FaceRecord {
    let mut face = FaceRecord::new(0.97, BoundingBox { x: 10.0, y: 12.0, width: 64.0, height: 64.0 });
    face.descriptor = Some(Descriptor::new(values).unwrap());
    face
}

pub fn uniform(value: f32) -> Vec<f32> {
    vec![value; DESCRIPTOR_LEN]
}

/// Shell line that behaves like `first_run` once, then execs the real worker.
pub fn first_run_then_worker(marker: &Path, first_run: &str) -> String {
    format!(
        "if [ -e '{marker}' ]; then exec '{bin}'; fi; touch '{marker}'; {first_run}",
        marker = marker.display(),
        bin = WORKER_BIN,
    )
}
