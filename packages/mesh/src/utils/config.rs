// packages/mesh/src/utils/config.rs
//! Mesh configuration
//!
//! Layered with the `config` crate:
//!
//! 1. Built-in defaults
//! 2. Optional TOML/YAML/JSON file (`SENTRA_MESH_CONFIG`, else `sentra-mesh.toml`)
//! 3. Environment overrides with the `SENTRA_MESH__` prefix and `__` separator
//!    (e.g. `SENTRA_MESH__HOST__ADDRESS=0.0.0.0:50051`)

use crate::utils::errors::{MeshError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "SENTRA_MESH";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "SENTRA_MESH_CONFIG";

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "sentra-mesh.toml";

/// Default host endpoint, shared by the host bind address and worker dial address
pub const DEFAULT_HOST_ADDRESS: &str = "127.0.0.1:50051";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub host: HostConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Host router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Listen address (`host:port`, port 0 picks a free port)
    pub address: String,

    /// Whether a publisher's own connection receives its broadcast
    /// when one of its agent types subscribes to the topic
    pub deliver_to_origin: bool,

    /// Outbound frame buffer per worker connection
    pub channel_capacity: usize,

    /// Upper bound on shutdown, in milliseconds
    pub shutdown_grace_ms: u64,

    /// Serve the gRPC reflection service next to the host service
    pub enable_reflection: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_HOST_ADDRESS.to_string(),
            deliver_to_origin: true,
            channel_capacity: 1024,
            shutdown_grace_ms: 2_000,
            enable_reflection: false,
        }
    }
}

impl HostConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Parse the listen address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.address
            .parse()
            .map_err(|e| MeshError::ConfigError(format!("Invalid host address '{}': {}", self.address, e)))
    }
}

/// Worker runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Host endpoint to dial (`host:port`, optionally with an http:// scheme)
    pub host_address: String,

    /// Name announced to the host; generated when empty
    pub name: String,

    /// Connect + handshake timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Outbound frame buffer towards the host; also bounds handler posts
    pub outbound_capacity: usize,

    /// Envelopes queued per agent instance before delivery waits
    pub mailbox_capacity: usize,

    /// How long stop() waits for agent mailboxes to drain, in milliseconds
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host_address: DEFAULT_HOST_ADDRESS.to_string(),
            name: String::new(),
            connect_timeout_ms: 5_000,
            outbound_capacity: 1024,
            mailbox_capacity: 256,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl WorkerConfig {
    /// Worker config pointing at a specific host
    pub fn for_host(host_address: impl Into<String>) -> Self {
        Self {
            host_address: host_address.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Host endpoint as a URI tonic can dial
    pub fn endpoint_uri(&self) -> String {
        if self.host_address.starts_with("http://") || self.host_address.starts_with("https://") {
            self.host_address.clone()
        } else {
            format!("http://{}", self.host_address)
        }
    }
}

/// Logging and tracing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// OTLP collector endpoint (e.g. http://localhost:4317); disabled when unset
    pub otlp_endpoint: Option<String>,

    /// Service name reported to the collector
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            otlp_endpoint: None,
            service_name: "sentra-mesh".to_string(),
        }
    }
}

/// Prometheus exporter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9464".to_string(),
        }
    }
}

impl MeshConfig {
    /// Load configuration from the default file locations and environment
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::load_from(Path::new(&path)),
            _ => Self::build(None, ENV_PREFIX),
        }
    }

    /// Load configuration from a specific file, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::build(Some(path), ENV_PREFIX)
    }

    fn build(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let config: MeshConfig = builder
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.host.socket_addr()?;

        if self.host.channel_capacity == 0 {
            return Err(MeshError::ConfigError(
                "host.channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.worker.outbound_capacity == 0 {
            return Err(MeshError::ConfigError(
                "worker.outbound_capacity must be greater than 0".to_string(),
            ));
        }
        if self.worker.mailbox_capacity == 0 {
            return Err(MeshError::ConfigError(
                "worker.mailbox_capacity must be greater than 0".to_string(),
            ));
        }
        if self.worker.host_address.trim().is_empty() {
            return Err(MeshError::ConfigError(
                "worker.host_address must not be empty".to_string(),
            ));
        }
        if self.metrics.enabled {
            self.metrics.listen_addr.parse::<SocketAddr>().map_err(|e| {
                MeshError::ConfigError(format!(
                    "Invalid metrics listen address '{}': {}",
                    self.metrics.listen_addr, e
                ))
            })?;
        }

        Ok(())
    }
}
