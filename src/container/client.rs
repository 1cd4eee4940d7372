//! Docker/Podman engine client.
//!
//! Owns the single session to the engine and exposes the container lifecycle
//! operations. This is the only part of the crate that performs engine I/O.

use super::logs::{self, LogBuffer, LogSink, LogTail};
use super::{
    ClientError, ContainerConfig, ContainerError, ContainerInfo, ContainerOperations, Operation,
    Result,
};
use crate::config::EngineSettings;
use async_trait::async_trait;
use bollard::{ClientVersion, Docker};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, ListContainersOptions,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
};
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Result of a successful create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerCreated {
    pub id: String,
    /// Non-fatal warnings reported by the engine
    pub warnings: Vec<String>,
}

/// How the session reaches the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Transport {
    /// Unix socket or Windows named pipe
    Socket(String),
    /// Plain HTTP over TCP
    Http(String),
    /// HTTPS with client certificates
    Tls {
        addr: String,
        key: PathBuf,
        cert: PathBuf,
        ca: PathBuf,
    },
}

/// Docker/Podman engine client.
///
/// Cheap to clone; clones share one session. After [`close`](Self::close)
/// every operation on every clone fails with [`ContainerError::Closed`].
#[derive(Clone)]
pub struct EngineClient {
    session: Arc<RwLock<Option<Docker>>>,
    operation_timeout: Option<Duration>,
}

impl std::fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineClient")
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl EngineClient {
    /// Connect to the engine described by `settings` and verify the session
    /// with a ping.
    ///
    /// # Errors
    ///
    /// Returns a `connect` error if the host or API version is malformed, TLS
    /// material is missing, or the engine does not answer.
    pub async fn connect(settings: &EngineSettings) -> Result<Self> {
        let op = Operation::Connect;
        debug!("Connecting to container engine at {}", settings.host);

        let docker = open_session(settings)
            .map_err(|e| ClientError::new(op, e).with_details(format!("host {}", settings.host)))?;
        let client = Self::from_docker(docker, settings);

        let session = client.session(op).await?;
        client
            .guarded(op, async move {
                session.ping().await?;
                Ok(())
            })
            .await
            .map_err(|e| e.with_details(format!("host {}", settings.host)))?;

        info!("Connected to container engine at {}", settings.host);
        Ok(client)
    }

    /// Wrap an existing bollard session without any I/O.
    pub fn from_docker(docker: Docker, settings: &EngineSettings) -> Self {
        Self {
            session: Arc::new(RwLock::new(Some(docker))),
            operation_timeout: settings.operation_timeout(),
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub async fn is_closed(&self) -> bool {
        self.session.read().await.is_none()
    }

    async fn session(&self, op: Operation) -> Result<Docker> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| ClientError::new(op, ContainerError::Closed))
    }

    /// Run an engine call under the configured operation deadline.
    async fn guarded<T, F>(&self, op: Operation, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ContainerError>>,
    {
        let outcome = match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ClientError::new(op, ContainerError::Timeout(limit)))?,
            None => call.await,
        };
        outcome.map_err(|e| ClientError::new(op, e))
    }

    /// Ping the engine.
    ///
    /// # Errors
    ///
    /// Returns error if the engine does not answer.
    pub async fn ping(&self) -> Result<()> {
        let op = Operation::Ping;
        let docker = self.session(op).await?;
        self.guarded(op, async move {
            docker.ping().await?;
            Ok(())
        })
        .await?;
        debug!("Container engine ping successful");
        Ok(())
    }

    /// Create a container; it is not started.
    ///
    /// The configuration is validated and translated before any engine call,
    /// so an invalid config never reaches the engine. An empty `name` lets
    /// the engine pick one.
    ///
    /// # Errors
    ///
    /// Returns error if validation fails or the engine rejects the request.
    pub async fn create_container(
        &self,
        name: &str,
        config: &ContainerConfig,
    ) -> Result<ContainerCreated> {
        let op = Operation::CreateContainer;
        let body = config
            .validate()
            .and_then(|_| config.translate())
            .map_err(|e| ClientError::new(op, e))?;

        let docker = self.session(op).await?;
        let options = CreateContainerOptions {
            name: (!name.is_empty()).then(|| name.to_string()),
            ..Default::default()
        };

        debug!("Creating container {} from image {}", name, config.image);
        let response = self
            .guarded(op, async move {
                Ok(docker.create_container(Some(options), body).await?)
            })
            .await
            .map_err(|e| e.with_details(format!("container {}", name)))?;

        for warning in &response.warnings {
            warn!("Engine warning while creating container {}: {}", name, warning);
        }

        if response.id.is_empty() {
            return Err(ClientError::new(
                op,
                ContainerError::Other("engine returned an empty container ID".to_string()),
            ));
        }

        info!("Created container {} ({})", name, response.id);
        Ok(ContainerCreated {
            id: response.id,
            warnings: response.warnings,
        })
    }

    /// Start a created or stopped container.
    ///
    /// # Errors
    ///
    /// Returns error if the container does not exist or cannot be started.
    pub async fn start_container(&self, id: &str) -> Result<()> {
        let op = Operation::StartContainer;
        require_id(op, id)?;
        let docker = self.session(op).await?;

        self.guarded(op, async move {
            docker
                .start_container(id, None::<StartContainerOptions>)
                .await?;
            Ok(())
        })
        .await
        .map_err(|e| e.with_details(format!("container {}", id)))?;

        info!("Started container {}", id);
        Ok(())
    }

    /// List containers.
    ///
    /// With `all` false only running containers are returned. Every label in
    /// `label_filter` must match.
    ///
    /// # Errors
    ///
    /// Returns error if listing fails.
    pub async fn list_containers(
        &self,
        all: bool,
        label_filter: &HashMap<String, String>,
    ) -> Result<Vec<ContainerInfo>> {
        let op = Operation::ListContainers;
        let docker = self.session(op).await?;

        let mut labels: Vec<String> = label_filter
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        labels.sort();

        let mut filters = HashMap::new();
        if !labels.is_empty() {
            filters.insert("label".to_string(), labels);
        }

        let options = ListContainersOptions {
            all,
            filters: Some(filters),
            ..Default::default()
        };

        let summaries = self
            .guarded(op, async move { Ok(docker.list_containers(Some(options)).await?) })
            .await?;

        debug!("Listed {} containers", summaries.len());
        Ok(summaries
            .into_iter()
            .map(ContainerInfo::from_summary)
            .collect())
    }

    /// Inspect a container by ID or name.
    ///
    /// # Errors
    ///
    /// Returns error if the container does not exist or inspection fails.
    pub async fn get_container(&self, id: &str) -> Result<ContainerInfo> {
        let op = Operation::GetContainer;
        require_id(op, id)?;
        let docker = self.session(op).await?;

        let inspect = self
            .guarded(op, async move {
                Ok(docker
                    .inspect_container(id, None::<InspectContainerOptions>)
                    .await?)
            })
            .await
            .map_err(|e| e.with_details(format!("container {}", id)))?;

        Ok(ContainerInfo::from_inspect(inspect))
    }

    /// Stream both log streams of a container into `sink`.
    ///
    /// Chunks are delivered in the order the engine sends them.
    ///
    /// # Errors
    ///
    /// Returns error if the container does not exist or the stream breaks.
    pub async fn stream_container_logs<S: LogSink + ?Sized>(
        &self,
        id: &str,
        tail: LogTail,
        sink: &mut S,
    ) -> Result<()> {
        let op = Operation::GetLogs;
        require_id(op, id)?;
        let docker = self.session(op).await?;

        let options = LogsOptions {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        self.guarded(op, async move {
            let mut stream = docker.logs(id, Some(options));
            while let Some(frame) = stream.next().await {
                logs::dispatch(&mut *sink, frame?);
            }
            Ok(())
        })
        .await
        .map_err(|e| e.with_details(format!("container {}", id)))
    }

    /// Fetch logs rendered as `STDOUT:\n<stdout>\nSTDERR:\n<stderr>`.
    ///
    /// # Errors
    ///
    /// Returns error if the container does not exist or the stream breaks.
    pub async fn get_container_logs(&self, id: &str, tail: LogTail) -> Result<String> {
        let mut buffer = LogBuffer::new();
        self.stream_container_logs(id, tail, &mut buffer).await?;
        Ok(buffer.render())
    }

    /// Upload a tar archive and unpack it below `dest_path` in the container.
    ///
    /// # Errors
    ///
    /// Returns error if the container or destination does not exist.
    pub async fn copy_to_container(
        &self,
        id: &str,
        dest_path: &str,
        archive: Vec<u8>,
    ) -> Result<()> {
        let op = Operation::CopyToContainer;
        require_id(op, id)?;
        if dest_path.is_empty() {
            return Err(ClientError::new(
                op,
                ContainerError::InvalidArgument("destination path is required".to_string()),
            ));
        }
        let docker = self.session(op).await?;

        let size = archive.len();
        let options = UploadToContainerOptions {
            path: dest_path.to_string(),
            ..Default::default()
        };

        self.guarded(op, async move {
            docker
                .upload_to_container(id, Some(options), bollard::body_full(archive.into()))
                .await?;
            Ok(())
        })
        .await
        .map_err(|e| e.with_details(format!("container {} path {}", id, dest_path)))?;

        debug!("Copied {} bytes into {}:{}", size, id, dest_path);
        Ok(())
    }

    /// Remove a container. Without `force` a running container is refused.
    ///
    /// # Errors
    ///
    /// Returns error if the container does not exist or removal is refused.
    pub async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let op = Operation::RemoveContainer;
        require_id(op, id)?;
        let docker = self.session(op).await?;

        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        self.guarded(op, async move {
            docker.remove_container(id, Some(options)).await?;
            Ok(())
        })
        .await
        .map_err(|e| e.with_details(format!("container {}", id)))?;

        info!("Removed container {}", id);
        Ok(())
    }

    /// Pull an image from its registry.
    ///
    /// # Errors
    ///
    /// Returns error if the pull stream reports a failure.
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        let op = Operation::PullImage;
        if image.trim().is_empty() {
            return Err(ClientError::new(
                op,
                ContainerError::InvalidArgument("image is required".to_string()),
            ));
        }
        let docker = self.session(op).await?;

        info!("Pulling image {}", image);
        let options = CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };

        self.guarded(op, async move {
            let mut stream = docker.create_image(Some(options), None, None);
            while let Some(progress) = stream.next().await {
                let progress = progress?;
                if let Some(status) = progress.status {
                    debug!("Pull {}: {}", image, status);
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| e.with_details(format!("image {}", image)))?;

        info!("Pulled image {}", image);
        Ok(())
    }

    /// Release the engine session.
    ///
    /// # Errors
    ///
    /// Returns a `Closed` error if the session was already released.
    pub async fn close(&self) -> Result<()> {
        match self.session.write().await.take() {
            Some(_) => {
                info!("Closed container engine session");
                Ok(())
            }
            None => Err(ClientError::new(Operation::Close, ContainerError::Closed)),
        }
    }
}

#[async_trait]
impl ContainerOperations for EngineClient {
    async fn create_container(
        &self,
        name: &str,
        config: &ContainerConfig,
    ) -> Result<ContainerCreated> {
        EngineClient::create_container(self, name, config).await
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        EngineClient::start_container(self, id).await
    }

    async fn list_containers(
        &self,
        all: bool,
        label_filter: &HashMap<String, String>,
    ) -> Result<Vec<ContainerInfo>> {
        EngineClient::list_containers(self, all, label_filter).await
    }

    async fn get_container(&self, id: &str) -> Result<ContainerInfo> {
        EngineClient::get_container(self, id).await
    }

    async fn get_container_logs(&self, id: &str, tail: LogTail) -> Result<String> {
        EngineClient::get_container_logs(self, id, tail).await
    }

    async fn copy_to_container(&self, id: &str, dest_path: &str, archive: Vec<u8>) -> Result<()> {
        EngineClient::copy_to_container(self, id, dest_path, archive).await
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        EngineClient::remove_container(self, id, force).await
    }
}

fn require_id(op: Operation, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(ClientError::new(
            op,
            ContainerError::InvalidArgument("container ID is required".to_string()),
        ));
    }
    Ok(())
}

/// Parse `MAJOR.MINOR` (optionally prefixed with `v`). Empty means the
/// library default.
fn parse_api_version(raw: &str) -> std::result::Result<Option<ClientVersion>, ContainerError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let invalid = || {
        ContainerError::InvalidConfig(format!(
            "API version must be MAJOR.MINOR, got `{}`",
            raw
        ))
    };
    let (major, minor) = raw
        .trim_start_matches('v')
        .split_once('.')
        .ok_or_else(invalid)?;

    Ok(Some(ClientVersion {
        major_version: major.parse().map_err(|_| invalid())?,
        minor_version: minor.parse().map_err(|_| invalid())?,
    }))
}

/// Locate `cert.pem`, `key.pem` and `ca.pem` under `cert_path`.
fn tls_files(
    cert_path: Option<&Path>,
) -> std::result::Result<(PathBuf, PathBuf, PathBuf), ContainerError> {
    let dir = cert_path.ok_or_else(|| {
        ContainerError::Tls("TLS verification requires a certificate directory".to_string())
    })?;

    let cert = dir.join("cert.pem");
    let key = dir.join("key.pem");
    let ca = dir.join("ca.pem");
    for file in [&cert, &key, &ca] {
        if !file.is_file() {
            return Err(ContainerError::Tls(format!(
                "missing TLS file {}",
                file.display()
            )));
        }
    }

    Ok((cert, key, ca))
}

fn resolve_transport(settings: &EngineSettings) -> std::result::Result<Transport, ContainerError> {
    let host = settings.host.trim();
    if host.is_empty() {
        return Err(ContainerError::InvalidConfig(
            "engine host is required".to_string(),
        ));
    }

    // A bare path is a local socket.
    if host.starts_with('/') {
        return Ok(Transport::Socket(format!("unix://{}", host)));
    }

    let url = url::Url::parse(host).map_err(|e| {
        ContainerError::InvalidConfig(format!("invalid engine host `{}`: {}", host, e))
    })?;

    let use_tls = match url.scheme() {
        "unix" | "npipe" => return Ok(Transport::Socket(host.to_string())),
        "tcp" | "http" => settings.tls_verify,
        "https" => true,
        other => {
            return Err(ContainerError::InvalidConfig(format!(
                "unsupported engine host scheme `{}`",
                other
            )));
        }
    };

    if use_tls {
        let (cert, key, ca) = tls_files(settings.cert_path.as_deref())?;
        Ok(Transport::Tls {
            addr: host.to_string(),
            key,
            cert,
            ca,
        })
    } else {
        Ok(Transport::Http(host.to_string()))
    }
}

fn open_session(settings: &EngineSettings) -> std::result::Result<Docker, ContainerError> {
    let version = parse_api_version(&settings.api_version)?;
    let version = version.as_ref().unwrap_or(bollard::API_DEFAULT_VERSION);
    let timeout = settings.timeout_secs;

    let docker = match resolve_transport(settings)? {
        Transport::Socket(addr) => Docker::connect_with_socket(&addr, timeout, version)?,
        Transport::Http(addr) => Docker::connect_with_http(&addr, timeout, version)?,
        Transport::Tls { addr, key, cert, ca } => {
            Docker::connect_with_ssl(&addr, &key, &cert, &ca, timeout, version)?
        }
    };
    Ok(docker)
}
