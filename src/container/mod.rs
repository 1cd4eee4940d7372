//! Container management layer.
//!
//! This module talks to a Docker/Podman engine through the bollard API and
//! exposes a small set of lifecycle operations. It translates validated
//! container configurations into engine requests, normalizes inspect and list
//! payloads into [`ContainerInfo`], and classifies engine failures into a
//! fixed set of [`ErrorKind`]s.
//!
//! ## Architecture
//!
//! - [`client`]: the engine client, the only component that performs I/O
//! - [`config`]: container configuration, validation and translation into
//!   engine request bodies
//! - [`info`]: normalized container snapshots built from engine responses
//! - [`errors`]: classification of engine failures
//! - [`logs`]: demultiplexing of the engine's stdout/stderr log frames
//! - [`archive`]: tar packing for copies into a container
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dockmgr::config::EngineSettings;
//! use dockmgr::container::{ContainerConfig, EngineClient, LogTail};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = EngineClient::connect(&EngineSettings::default()).await?;
//!
//!     let config = ContainerConfig::builder()
//!         .image("node:18-alpine")
//!         .port("3000", "3000")
//!         .memory_limit(536_870_912)
//!         .build()?;
//!
//!     let created = client.create_container("app", &config).await?;
//!     client.start_container(&created.id).await?;
//!
//!     let info = client.get_container(&created.id).await?;
//!     println!("{} is {}", info.name, info.state);
//!
//!     let logs = client.get_container_logs(&created.id, LogTail::Lines(100)).await?;
//!     println!("{}", logs);
//!
//!     client.remove_container(&created.id, true).await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
mod client;
mod config;
mod errors;
mod info;
mod logs;

pub use client::{ContainerCreated, EngineClient};
pub use config::{
    ContainerConfig, ContainerConfigBuilder, NetworkMode, PortSpec, Protocol, RestartPolicy,
};
pub use errors::{ErrorKind, classify};
pub use info::{
    ContainerInfo, EndpointInfo, HostConfigInfo, MountInfo, NetworkInfo, PortMapping,
    RestartPolicyInfo, is_zero_time, zero_time,
};
pub use logs::{LogBuffer, LogSink, LogTail};

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Underlying cause of a failed container operation.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Docker/Podman API error
    #[error("engine API error: {0}")]
    ApiError(#[from] bollard::errors::Error),

    /// Container configuration violates an invariant
    #[error("invalid container configuration: {0}")]
    InvalidConfig(String),

    /// Port map entry is not `<containerPort>[/<protocol>]` -> `<hostPort>`
    #[error("invalid port mapping {0}")]
    InvalidPort(String),

    /// Argument rejected before reaching the engine
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// TLS material missing or unreadable
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// The client session was already released
    #[error("client is closed")]
    Closed,

    /// The operation exceeded its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// General error
    #[error("{0}")]
    Other(String),
}

/// Name of an engine client operation, carried by every [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Ping,
    CreateContainer,
    StartContainer,
    ListContainers,
    GetContainer,
    GetLogs,
    CopyToContainer,
    RemoveContainer,
    PullImage,
    Close,
}

impl Operation {
    /// Stable snake_case name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Ping => "ping",
            Operation::CreateContainer => "create_container",
            Operation::StartContainer => "start_container",
            Operation::ListContainers => "list_containers",
            Operation::GetContainer => "get_container",
            Operation::GetLogs => "get_logs",
            Operation::CopyToContainer => "copy_to_container",
            Operation::RemoveContainer => "remove_container",
            Operation::PullImage => "pull_image",
            Operation::Close => "close",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of an engine client operation.
///
/// Carries the operation name, the underlying cause and optional detail.
/// Run it through [`classify`] (or the `is_*` predicates) to get a semantic
/// [`ErrorKind`].
#[derive(Debug)]
pub struct ClientError {
    op: Operation,
    source: ContainerError,
    details: Option<String>,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(
                f,
                "engine {} failed: {} ({})",
                self.op, self.source, details
            ),
            None => write!(f, "engine {} failed: {}", self.op, self.source),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl ClientError {
    pub fn new(op: Operation, source: impl Into<ContainerError>) -> Self {
        Self {
            op,
            source: source.into(),
            details: None,
        }
    }

    /// Attach human-readable detail.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn op(&self) -> Operation {
        self.op
    }

    pub fn cause(&self) -> &ContainerError {
        &self.source
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn kind(&self) -> ErrorKind {
        classify(self)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_image_not_found(&self) -> bool {
        self.kind() == ErrorKind::ImageNotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    pub fn is_resource_constraint(&self) -> bool {
        self.kind() == ErrorKind::ResourceConstraint
    }

    /// True when the request was rejected locally, before any engine call.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self.source,
            ContainerError::InvalidConfig(_)
                | ContainerError::InvalidPort(_)
                | ContainerError::InvalidArgument(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.source, ContainerError::Timeout(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.source, ContainerError::Closed)
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// The container operations consumed by the REST layer.
///
/// [`EngineClient`] is the production implementation.
#[async_trait]
pub trait ContainerOperations: Send + Sync {
    async fn create_container(
        &self,
        name: &str,
        config: &ContainerConfig,
    ) -> Result<ContainerCreated>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn list_containers(
        &self,
        all: bool,
        label_filter: &HashMap<String, String>,
    ) -> Result<Vec<ContainerInfo>>;

    async fn get_container(&self, id: &str) -> Result<ContainerInfo>;

    async fn get_container_logs(&self, id: &str, tail: LogTail) -> Result<String>;

    async fn copy_to_container(&self, id: &str, dest_path: &str, archive: Vec<u8>) -> Result<()>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;
}
