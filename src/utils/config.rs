// src/utils/config.rs
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use config::builder::{ConfigBuilder, DefaultState};
use config::{Config as ConfigLib, Environment, File, FileFormat};
use serde::Deserialize;

use crate::core::face::{DetectOptions, FaceMode, Metric, ModelOptions};
use crate::storage::validate_node_id;
use crate::utils::error::{NodeError, Result};

pub const WORKER_BINARY: &str = "facegate-worker";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub max_request_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub descriptor_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    /// Child process speaking the line protocol.
    Process,
    /// Task inside this process.
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub mode: WorkerMode,
    pub program: String,
    pub args: Vec<String>,
    pub fixtures_dir: Option<String>,
    pub isolate: bool,
    pub timeout_ms: u64,
    pub model_load_timeout_ms: u64,
    pub ignored_diagnostics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<String>,
    pub file_prefix: String,
}

/// One compute node. Unset fields take the detection defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model_options: ModelOptions,
    #[serde(default = "DetectOptions::all")]
    pub detect_options: DetectOptions,
    #[serde(default)]
    pub face_mode: FaceMode,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    #[serde(default)]
    pub recognise_nodes: Vec<String>,
}

fn default_match_threshold() -> f64 {
    2000.0
}

impl NodeConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            model_options: ModelOptions::default(),
            detect_options: DetectOptions::all(),
            face_mode: FaceMode::default(),
            metric: Metric::default(),
            match_threshold: default_match_threshold(),
            recognise_nodes: Vec::new(),
        }
    }

    /// Configured display name, if any.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|name| !name.is_empty())
    }

    fn validate(&self) -> Result<()> {
        validate_node_id(&self.id)?;
        if !self.match_threshold.is_finite() || self.match_threshold < 0.0 {
            return Err(NodeError::Config(format!(
                "Node {}: match_threshold must be a non-negative number",
                self.id
            )));
        }
        self.model_options
            .validate()
            .map_err(|e| NodeError::Config(format!("Node {}: {}", self.id, e)))?;
        for id in &self.recognise_nodes {
            validate_node_id(id)?;
        }
        Ok(())
    }
}

impl WorkerConfig {
    /// `None` disables the response timeout.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn model_load_timeout(&self) -> Duration {
        Duration::from_millis(self.model_load_timeout_ms)
    }

    /// Worker executable: the configured program, or the `facegate-worker`
    /// binary installed next to the running executable.
    pub fn resolve_program(&self) -> Result<PathBuf> {
        if !self.program.trim().is_empty() {
            return Ok(PathBuf::from(self.program.trim()));
        }

        let exe = std::env::current_exe()
            .map_err(|e| NodeError::Config(format!("Cannot locate current executable: {}", e)))?;
        let dir = exe
            .parent()
            .ok_or_else(|| NodeError::Config("Current executable has no parent directory".into()))?;
        Ok(dir.join(format!("{}{}", WORKER_BINARY, std::env::consts::EXE_SUFFIX)))
    }
}

impl Config {
    /// Defaults, then `config/default`, then `config/local`, then
    /// `FACEGATE__SECTION__KEY` environment variables.
    pub fn new() -> Result<Self> {
        Self::build(
            Self::defaults()?
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false))
                .add_source(
                    Environment::with_prefix("FACEGATE")
                        .separator("__")
                        .try_parsing(true)
                        .list_separator(",")
                        .with_list_parse_key("server.allowed_origins")
                        .with_list_parse_key("worker.args")
                        .with_list_parse_key("worker.ignored_diagnostics"),
                ),
        )
    }

    /// Defaults overlaid with a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        Self::build(Self::defaults()?.add_source(File::from_str(content, FileFormat::Toml)))
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        Ok(ConfigLib::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.allowed_origins", Vec::<String>::new())?
            .set_default("server.max_request_size", 10_485_760)? // 10MB
            .set_default("storage.descriptor_dir", "data/descriptors")?
            .set_default("worker.mode", "process")?
            .set_default("worker.program", "")?
            .set_default("worker.args", Vec::<String>::new())?
            .set_default("worker.isolate", true)?
            .set_default("worker.timeout_ms", 30_000)?
            .set_default("worker.model_load_timeout_ms", 30_000)?
            .set_default("worker.ignored_diagnostics", Vec::<String>::new())?
            .set_default("logging.level", "info")?
            .set_default("logging.file_prefix", "facegate.log")?)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(NodeError::Config("Invalid port number".into()));
        }
        if self.server.max_request_size == 0 {
            return Err(NodeError::Config("max_request_size must be greater than 0".into()));
        }
        if self.worker.model_load_timeout_ms == 0 {
            return Err(NodeError::Config("model_load_timeout_ms must be greater than 0".into()));
        }

        if self.worker.mode == WorkerMode::Process {
            let program = self.worker.resolve_program()?;
            if self.worker.program.trim().is_empty() && !program.exists() {
                return Err(NodeError::Config(format!(
                    "Worker program {} not found; set worker.program",
                    program.display()
                )));
            }
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            node.validate()?;
            if !seen.insert(node.id.as_str()) {
                return Err(NodeError::Config(format!("Duplicate node id {}", node.id)));
            }
        }

        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|node| node.id == id)
    }
}
