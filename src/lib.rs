pub mod api;
pub mod core;
pub mod storage;
pub mod utils;
pub mod worker;

use std::sync::Arc;

use actix_web::{dev::ServerHandle, web, App, HttpServer};
use parking_lot::Mutex;
use tracing::{error, info};

use crate::{
    core::services::{EnrollmentService, NodeRegistry},
    storage::DescriptorStore,
    utils::{config::Config, error::{NodeError, Result}},
};

pub struct Application {
    config: Arc<Config>,
    registry: Arc<NodeRegistry>,
    enrollment: Arc<EnrollmentService>,
    server: Mutex<Option<ServerHandle>>,
}

impl Application {
    pub async fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        info!("Opening descriptor store...");
        let store = DescriptorStore::open(&config.storage.descriptor_dir).await?;

        info!("Preparing {:?} workers...", config.worker.mode);
        let spawner = worker::spawner_for(&config.worker)?;
        let registry = Arc::new(NodeRegistry::new(&config.worker, spawner, store));
        let enrollment = Arc::new(EnrollmentService::new(registry.clone()));

        Ok(Self {
            config,
            registry,
            enrollment,
            server: Mutex::new(None),
        })
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Registers the configured nodes, then serves the HTTP API in the
    /// background.
    pub async fn start(&self) -> Result<()> {
        info!("Starting {} node(s)...", self.config.nodes.len());
        for node in &self.config.nodes {
            self.registry.register(node.clone()).await?;
        }

        info!("Starting API server...");
        self.start_api_server()?;

        info!("Application successfully started");
        Ok(())
    }

    fn start_api_server(&self) -> Result<()> {
        use crate::api::{cors, handlers};

        let registry = self.registry.clone();
        let enrollment = self.enrollment.clone();
        let server_config = self.config.server.clone();
        let limit = server_config.max_request_size;

        let server = HttpServer::new(move || {
            App::new()
                .wrap(cors(&server_config))
                .app_data(web::Data::from(registry.clone()))
                .app_data(web::Data::from(enrollment.clone()))
                .app_data(web::JsonConfig::default().limit(limit))
                .app_data(web::PayloadConfig::new(limit))
                .service(handlers::faceapi::scope())
        })
        .bind((self.config.server.host.as_str(), self.config.server.port))
        .map_err(|e| NodeError::Config(format!("Failed to bind API server: {}", e)))?
        .disable_signals()
        .run();

        *self.server.lock() = Some(server.handle());
        tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("API server stopped: {}", e);
            }
        });

        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down application...");

        let server = self.server.lock().take();
        if let Some(server) = server {
            info!("Stopping API server...");
            server.stop(true).await;
        }

        info!("Stopping workers...");
        self.registry.shutdown().await;

        info!("Application shutdown complete");
        Ok(())
    }
}
