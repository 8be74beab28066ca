//! Configuration management.
//!
//! Sources, lowest precedence first: built-in defaults, an optional file,
//! then `WORDHOARD__SECTION__KEY` environment variables.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{AuthzError, ErrorCode, Result};
use crate::gateway::UnmappedPolicy;

const ENV_PREFIX: &str = "WORDHOARD";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// gRPC bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// gRPC server port
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    /// HTTP/2 keep-alive interval in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Maximum decoded message size in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            grpc_port: default_grpc_port(),
            keepalive_secs: default_keepalive_secs(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Policy document used by the file backend
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// PostgreSQL connection URL, required by the postgres backend
    pub url: Option<String>,

    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Longest inheritance chain followed before traversal fails
    #[serde(default = "default_max_hierarchy_depth")]
    pub max_hierarchy_depth: usize,

    /// Capacity of the policy change broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_hierarchy_depth: default_max_hierarchy_depth(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// TOML catalog replacing the built-in one
    pub catalog_path: Option<PathBuf>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            catalog_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub unmapped_operations: UnmappedPolicy,

    /// Operations exempt from checks, on top of the built-in whitelist
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Metadata header carrying the authenticated user id
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    /// HS256 secret; when set, bearer tokens are accepted instead of the header
    pub jwt_secret: Option<String>,

    /// Take the user id from `identity_header` as-is. Only safe behind a
    /// proxy that authenticates callers and strips client-sent copies.
    #[serde(default)]
    pub trust_identity_header: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            unmapped_operations: UnmappedPolicy::default(),
            whitelist: Vec::new(),
            identity_header: default_identity_header(),
            jwt_secret: None,
            trust_identity_header: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Log level or full `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_true")]
    pub json_logging: bool,

    /// Prometheus scrape address, e.g. `0.0.0.0:9090`
    pub metrics_addr: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: true,
            metrics_addr: None,
        }
    }
}

// Default value functions
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_grpc_port() -> u16 { 50051 }
fn default_keepalive_secs() -> u64 { 30 }
fn default_max_message_bytes() -> usize { 4 * 1024 * 1024 }
fn default_store_path() -> PathBuf { PathBuf::from("data/policy.json") }
fn default_max_connections() -> u32 { 5 }
fn default_max_hierarchy_depth() -> usize { 10 }
fn default_event_buffer() -> usize { 256 }
fn default_identity_header() -> String { "x-user-id".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Config {
    /// Load configuration from the environment only.
    pub fn load() -> Result<Self> {
        Self::build(None)
    }

    /// Load from a specific file, overridden by the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(Some(path.as_ref()))
    }

    fn build(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let cfg: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("gateway.whitelist"),
            )
            .build()?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_hierarchy_depth == 0 {
            return Err(AuthzError::new(
                ErrorCode::ConfigurationError,
                "engine.max_hierarchy_depth must be at least 1",
            ));
        }
        if self.engine.event_buffer == 0 {
            return Err(AuthzError::new(
                ErrorCode::ConfigurationError,
                "engine.event_buffer must be at least 1",
            ));
        }
        if self.store.backend == StoreBackend::Postgres && self.store.url.is_none() {
            return Err(AuthzError::new(
                ErrorCode::ConfigurationError,
                "store.url is required for the postgres backend",
            ));
        }
        if self.gateway.jwt_secret.is_none() && !self.gateway.trust_identity_header {
            return Err(AuthzError::new(
                ErrorCode::ConfigurationError,
                "set gateway.jwt_secret, or gateway.trust_identity_header behind an authenticating proxy",
            ));
        }
        if self.gateway.jwt_secret.as_deref().is_some_and(|s| s.is_empty()) {
            return Err(AuthzError::new(
                ErrorCode::ConfigurationError,
                "gateway.jwt_secret must not be empty",
            ));
        }
        if self.gateway.identity_header.trim().is_empty() {
            return Err(AuthzError::new(
                ErrorCode::ConfigurationError,
                "gateway.identity_header must not be empty",
            ));
        }
        Ok(())
    }

    /// Socket address the gRPC server binds to.
    pub fn grpc_addr(&self) -> Result<std::net::SocketAddr> {
        format!("{}:{}", self.server.host, self.server.grpc_port)
            .parse()
            .map_err(|e| {
                AuthzError::with_internal(
                    ErrorCode::ConfigurationError,
                    "Invalid gRPC bind address",
                    format!("{}", e),
                )
            })
    }
}
