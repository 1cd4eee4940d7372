//! Service configuration.
//!
//! Settings are resolved in layers:
//! 1. Built-in defaults
//! 2. A TOML file: `--config <path>`, else `./dockmgr.toml`, else
//!    `/etc/dockmgr/config.toml`
//! 3. Environment variables (`SERVER_PORT`, `DOCKER_HOST`, ...)
//!
//! The merged result is validated once, before anything connects.

use crate::container::{NetworkMode, RestartPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Configuration file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "dockmgr.toml";

/// System-wide configuration file.
pub const SYSTEM_CONFIG_FILE: &str = "/etc/dockmgr/config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Grace period for in-flight requests on shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| ConfigError::invalid("server.host", e.to_string()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Container engine connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// `unix://`, `npipe://`, `tcp://`, `http://`, `https://` or a socket path
    pub host: String,
    /// `MAJOR.MINOR`; empty selects the client library default
    pub api_version: String,
    pub tls_verify: bool,
    /// Directory holding `cert.pem`, `key.pem` and `ca.pem`
    pub cert_path: Option<PathBuf>,
    /// Per-request timeout of the engine connection
    pub timeout_secs: u64,
    /// Deadline for a whole client operation, 0 for none
    pub operation_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            host: "unix:///var/run/docker.sock".to_string(),
            api_version: "1.41".to_string(),
            tls_verify: false,
            cert_path: None,
            timeout_secs: 120,
            operation_timeout_secs: 0,
        }
    }
}

impl EngineSettings {
    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_secs > 0).then(|| Duration::from_secs(self.operation_timeout_secs))
    }
}

/// Defaults applied to containers created through the REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerDefaults {
    pub cpu_shares: i64,
    /// Bytes
    pub memory_limit: i64,
    pub network_mode: NetworkMode,
    pub restart_policy: RestartPolicy,
}

impl Default for ContainerDefaults {
    fn default() -> Self {
        Self {
            cpu_shares: 1024,
            memory_limit: 512_000_000,
            network_mode: NetworkMode::Bridge,
            restart_policy: RestartPolicy::UnlessStopped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` takes precedence
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerSettings,
    pub engine: EngineSettings,
    pub container: ContainerDefaults,
    pub logging: LoggingSettings,
    /// File the configuration was read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl ServiceConfig {
    /// Resolve the configuration from file, process environment and defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// Like [`load`](Self::load), reading environment variables through `lookup`.
    pub fn load_with<F>(explicit: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match ConfigDiscovery::find_config_file(explicit)? {
            Some(path) => {
                debug!("Loading configuration from {:?}", path);
                let mut config = Self::from_toml_file(&path)?;
                config.source = Some(path);
                config
            }
            None => Self::default(),
        };

        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override settings from environment variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(host) = get("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("SERVER_PORT") {
            self.server.port = parse_env("SERVER_PORT", &port)?;
        }
        if let Some(secs) = get("SERVER_SHUTDOWN_TIMEOUT") {
            self.server.shutdown_timeout_secs = parse_env("SERVER_SHUTDOWN_TIMEOUT", &secs)?;
        }

        if let Some(host) = get("DOCKER_HOST") {
            self.engine.host = host;
        }
        if let Some(version) = get("DOCKER_API_VERSION") {
            self.engine.api_version = version;
        }
        if let Some(flag) = get("DOCKER_TLS_VERIFY") {
            self.engine.tls_verify = parse_flag("DOCKER_TLS_VERIFY", &flag)?;
        }
        if let Some(path) = get("DOCKER_CERT_PATH") {
            self.engine.cert_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = get("DOCKER_TIMEOUT") {
            self.engine.timeout_secs = parse_env("DOCKER_TIMEOUT", &secs)?;
        }
        if let Some(secs) = get("DOCKER_OPERATION_TIMEOUT") {
            self.engine.operation_timeout_secs = parse_env("DOCKER_OPERATION_TIMEOUT", &secs)?;
        }

        if let Some(shares) = get("CONTAINER_CPU_SHARES") {
            self.container.cpu_shares = parse_env("CONTAINER_CPU_SHARES", &shares)?;
        }
        if let Some(bytes) = get("CONTAINER_MEMORY_LIMIT") {
            self.container.memory_limit = parse_env("CONTAINER_MEMORY_LIMIT", &bytes)?;
        }
        if let Some(mode) = get("CONTAINER_NETWORK_MODE") {
            self.container.network_mode = parse_env("CONTAINER_NETWORK_MODE", &mode)?;
        }
        if let Some(policy) = get("CONTAINER_RESTART_POLICY") {
            self.container.restart_policy = parse_env("CONTAINER_RESTART_POLICY", &policy)?;
        }

        if let Some(filter) = get("LOG_FILTER") {
            self.logging.filter = filter;
        }

        Ok(())
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;

        if self.engine.host.trim().is_empty() {
            return Err(ConfigError::invalid("engine.host", "must not be empty"));
        }
        let version = self.engine.api_version.trim();
        if !version.is_empty() && !is_api_version(version) {
            return Err(ConfigError::invalid(
                "engine.api_version",
                format!("expected MAJOR.MINOR, got `{}`", version),
            ));
        }
        if self.engine.tls_verify && self.engine.cert_path.is_none() {
            return Err(ConfigError::invalid(
                "engine.cert_path",
                "required when tls_verify is enabled",
            ));
        }
        if self.engine.timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "engine.timeout_secs",
                "must be greater than zero",
            ));
        }

        if self.container.cpu_shares < 0 {
            return Err(ConfigError::invalid(
                "container.cpu_shares",
                "must not be negative",
            ));
        }
        if self.container.memory_limit < 0 {
            return Err(ConfigError::invalid(
                "container.memory_limit",
                "must not be negative",
            ));
        }

        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&self.logging.filter) {
            return Err(ConfigError::invalid("logging.filter", e.to_string()));
        }

        debug!("Configuration validated");
        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, format!("`{}`: {}", value, e)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(
            key,
            format!("expected a boolean, got `{}`", other),
        )),
    }
}

fn is_api_version(version: &str) -> bool {
    version
        .trim_start_matches('v')
        .split_once('.')
        .is_some_and(|(major, minor)| {
            major.parse::<u32>().is_ok() && minor.parse::<u32>().is_ok()
        })
}

/// Configuration file discovery.
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Find the configuration file to load.
    ///
    /// An explicit path must exist; otherwise the first existing candidate
    /// wins and having none is not an error.
    pub fn find_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "config file not found",
                    ),
                });
            }
            return Ok(Some(path.to_path_buf()));
        }

        for candidate in Self::candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        }

        debug!("No config file found in discovery hierarchy");
        Ok(None)
    }

    /// Candidate files in priority order.
    pub fn candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std::env::current_dir() {
            candidates.push(current_dir.join(LOCAL_CONFIG_FILE));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from(SYSTEM_CONFIG_FILE));

        candidates
    }
}
