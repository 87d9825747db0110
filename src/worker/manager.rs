// src/worker/manager.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::utils::error::{NodeError, Result};
use super::diagnostics::DiagnosticFilter;
use super::handle::WorkerHandle;
use super::protocol::{InferenceRequest, InferenceResponse};
use super::transport::WorkerSpawner;

/// Owns at most one live worker and replaces it when it dies.
pub struct WorkerManager {
    name: String,
    spawner: Arc<dyn WorkerSpawner>,
    filter: DiagnosticFilter,
    timeout: Option<Duration>,
    current: Mutex<Option<Arc<WorkerHandle>>>,
}

impl WorkerManager {
    pub fn new(
        name: impl Into<String>,
        spawner: Arc<dyn WorkerSpawner>,
        filter: DiagnosticFilter,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            name: name.into(),
            spawner,
            filter,
            timeout,
            current: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the live worker, spawning one if there is none.
    pub async fn start(&self) -> Result<Arc<WorkerHandle>> {
        let mut current = self.current.lock().await;
        if let Some(handle) = current.as_ref() {
            if handle.is_alive() {
                return Ok(handle.clone());
            }
            warn!(worker = %self.name, "Replacing dead worker");
        }

        let handle = self.spawn_handle().await?;
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// Sends one request to the long-lived worker. A crashed or timed out
    /// worker is discarded so the next call starts a fresh one.
    pub async fn submit(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        let handle = self.start().await?;
        let result = self.call(&handle, request).await;

        if let Err(e) = &result {
            if e.is_worker_fault() {
                warn!(worker = %self.name, "Discarding worker: {}", e);
                self.discard(&handle).await;
            }
        }
        result
    }

    /// Runs one request on a worker spawned for it alone, then kills it.
    pub async fn submit_ephemeral(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        let handle = self.spawn_handle().await?;
        let result = self.call(&handle, request).await;
        handle.shutdown();
        result
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.current.lock().await.take() {
            info!(worker = %self.name, "Stopping worker");
            handle.shutdown();
        }
    }

    pub async fn is_running(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .map_or(false, |handle| handle.is_alive())
    }

    async fn spawn_handle(&self) -> Result<Arc<WorkerHandle>> {
        info!(worker = %self.name, "Starting worker ({})", self.spawner.describe());
        let channels = self.spawner.spawn().await?;
        Ok(WorkerHandle::attach(self.name.clone(), channels, self.filter.clone()))
    }

    async fn call(
        &self,
        handle: &WorkerHandle,
        request: InferenceRequest,
    ) -> Result<InferenceResponse> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, handle.submit(request))
                .await
                .map_err(|_| NodeError::WorkerTimeout(limit))?,
            None => handle.submit(request).await,
        }
    }

    async fn discard(&self, handle: &Arc<WorkerHandle>) {
        handle.shutdown();
        let mut current = self.current.lock().await;
        if current.as_ref().map_or(false, |c| Arc::ptr_eq(c, handle)) {
            *current = None;
        }
    }
}
