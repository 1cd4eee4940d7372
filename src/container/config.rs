//! Container configuration and translation into engine requests.
//!
//! [`ContainerConfig`] is the application-level description of a container.
//! It is validated on construction (or with [`ContainerConfig::validate`])
//! and translated into the engine's create body and host configuration by
//! [`ContainerConfig::translate`].

use crate::container::ContainerError;
use bollard::models::{
    ContainerCreateBody, HostConfig, PortBinding, RestartPolicy as EngineRestartPolicy,
    RestartPolicyNameEnum,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

/// Host address every published port binds to.
pub const DEFAULT_HOST_IP: &str = "0.0.0.0";

const CONTAINER_NETWORK_PREFIX: &str = "container:";

/// Container network mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NetworkMode {
    Bridge,
    Host,
    None,
    /// Share the network stack of another container (`container:<id>`)
    Container(String),
}

impl FromStr for NetworkMode {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bridge" => Ok(NetworkMode::Bridge),
            "host" => Ok(NetworkMode::Host),
            "none" => Ok(NetworkMode::None),
            other => match other.strip_prefix(CONTAINER_NETWORK_PREFIX) {
                Some(target) if !target.is_empty() => {
                    Ok(NetworkMode::Container(target.to_string()))
                }
                _ => Err(ContainerError::InvalidConfig(format!(
                    "invalid network mode `{}` (expected bridge, host, none or container:<id>)",
                    s
                ))),
            },
        }
    }
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkMode::Bridge => f.write_str("bridge"),
            NetworkMode::Host => f.write_str("host"),
            NetworkMode::None => f.write_str("none"),
            NetworkMode::Container(target) => write!(f, "{}{}", CONTAINER_NETWORK_PREFIX, target),
        }
    }
}

impl TryFrom<String> for NetworkMode {
    type Error = ContainerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NetworkMode> for String {
    fn from(mode: NetworkMode) -> Self {
        mode.to_string()
    }
}

/// Container restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RestartPolicy {
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::UnlessStopped => "unless-stopped",
            RestartPolicy::OnFailure => "on-failure",
        }
    }

    fn engine_name(&self) -> RestartPolicyNameEnum {
        match self {
            RestartPolicy::No => RestartPolicyNameEnum::NO,
            RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
            RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
            RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        }
    }
}

impl FromStr for RestartPolicy {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no" => Ok(RestartPolicy::No),
            "always" => Ok(RestartPolicy::Always),
            "unless-stopped" => Ok(RestartPolicy::UnlessStopped),
            "on-failure" => Ok(RestartPolicy::OnFailure),
            other => Err(ContainerError::InvalidConfig(format!(
                "invalid restart policy `{}` (expected no, always, unless-stopped or on-failure)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for RestartPolicy {
    type Error = ContainerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RestartPolicy> for String {
    fn from(policy: RestartPolicy) -> Self {
        policy.as_str().to_string()
    }
}

/// Transport protocol of a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

impl FromStr for Protocol {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            other => Err(ContainerError::InvalidPort(format!(
                "unknown protocol `{}`",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed port map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    pub container_port: u16,
    pub protocol: Protocol,
    /// `None` lets the engine pick a free host port
    pub host_port: Option<u16>,
}

impl PortSpec {
    /// Parse a `<containerPort>[/<protocol>]` -> `<hostPort>` entry.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::InvalidPort`] if either side does not parse.
    pub fn parse(container: &str, host: &str) -> Result<Self, ContainerError> {
        let (port, protocol) = match container.split_once('/') {
            Some((port, protocol)) => (port, protocol.parse::<Protocol>()?),
            None => (container, Protocol::Tcp),
        };

        let container_port = parse_port(port).ok_or_else(|| {
            ContainerError::InvalidPort(format!("`{}`: container port must be 1-65535", container))
        })?;

        let host = host.trim();
        let host_port = if host.is_empty() {
            None
        } else {
            Some(parse_port(host).ok_or_else(|| {
                ContainerError::InvalidPort(format!(
                    "`{}` -> `{}`: host port must be 1-65535",
                    container, host
                ))
            })?)
        };

        Ok(Self {
            container_port,
            protocol,
            host_port,
        })
    }

    /// Engine port key, e.g. `3000/tcp`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

fn parse_port(s: &str) -> Option<u16> {
    s.parse::<u16>().ok().filter(|port| *port != 0)
}

/// Container configuration builder.
///
/// Provides a fluent interface for constructing container configurations;
/// [`ContainerConfigBuilder::build`] validates the result.
#[derive(Debug, Default)]
pub struct ContainerConfigBuilder {
    config: ContainerConfig,
}

impl ContainerConfigBuilder {
    /// Create a new container configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container image.
    pub fn image<S: Into<String>>(mut self, image: S) -> Self {
        self.config.image = image.into();
        self
    }

    /// Set the command to run in the container.
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.command = cmd.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set the working directory in the container.
    pub fn working_dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.config.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.config
            .env
            .push(format!("{}={}", key.into(), value.into()));
        self
    }

    /// Add raw `KEY=VALUE` environment entries.
    pub fn env_entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .env
            .extend(entries.into_iter().map(|s| s.into()));
        self
    }

    /// Add a label to the container.
    pub fn label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.config.labels.insert(key.into(), value.into());
        self
    }

    /// Set memory limit in bytes (0 = unlimited).
    pub fn memory_limit(mut self, bytes: i64) -> Self {
        self.config.memory_limit = bytes;
        self
    }

    /// Set the relative CPU weight.
    pub fn cpu_shares(mut self, shares: i64) -> Self {
        self.config.cpu_shares = shares;
        self
    }

    pub fn network_mode(mut self, mode: NetworkMode) -> Self {
        self.config.network_mode = Some(mode);
        self
    }

    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.config.restart_policy = Some(policy);
        self
    }

    /// Publish a container port (`3000` or `53/udp`) on a host port.
    pub fn port<C: Into<String>, H: Into<String>>(
        mut self,
        container_port: C,
        host_port: H,
    ) -> Self {
        self.config
            .ports
            .insert(container_port.into(), host_port.into());
        self
    }

    /// Build the container configuration.
    ///
    /// # Errors
    ///
    /// Returns error if required fields are missing or invalid.
    pub fn build(self) -> Result<ContainerConfig, ContainerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Application-level container configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Image reference
    pub image: String,
    /// Command to run, empty for the image default
    pub command: Vec<String>,
    /// Environment as `KEY=VALUE` entries
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    /// Relative CPU weight, 0 for the engine default
    pub cpu_shares: i64,
    /// Memory limit in bytes, 0 for unlimited
    pub memory_limit: i64,
    pub network_mode: Option<NetworkMode>,
    pub restart_policy: Option<RestartPolicy>,
    pub labels: HashMap<String, String>,
    /// `<containerPort>[/<protocol>]` -> `<hostPort>`
    pub ports: BTreeMap<String, String>,
}

impl ContainerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ContainerConfigBuilder {
        ContainerConfigBuilder::new()
    }

    /// Check the configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> Result<(), ContainerError> {
        if self.image.trim().is_empty() {
            return Err(ContainerError::InvalidConfig(
                "image is required".to_string(),
            ));
        }
        if self.memory_limit < 0 {
            return Err(ContainerError::InvalidConfig(
                "memory limit must be non-negative".to_string(),
            ));
        }
        if self.cpu_shares < 0 {
            return Err(ContainerError::InvalidConfig(
                "CPU shares must be non-negative".to_string(),
            ));
        }
        if let Some(entry) = self
            .env
            .iter()
            .find(|entry| !matches!(entry.split_once('='), Some((key, _)) if !key.is_empty()))
        {
            return Err(ContainerError::InvalidConfig(format!(
                "environment entry `{}` is not KEY=VALUE",
                entry
            )));
        }
        if let Some(NetworkMode::Container(target)) = &self.network_mode
            && target.is_empty()
        {
            return Err(ContainerError::InvalidConfig(
                "container network mode needs a container id".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse the port map.
    ///
    /// # Errors
    ///
    /// Fails on the first entry that is not `<containerPort>[/<protocol>]`.
    pub fn port_specs(&self) -> Result<Vec<PortSpec>, ContainerError> {
        self.ports
            .iter()
            .map(|(container, host)| PortSpec::parse(container, host))
            .collect()
    }

    /// Translate into the engine's create body, host configuration included.
    ///
    /// Every port map entry binds on `0.0.0.0` and is also exposed.
    ///
    /// # Errors
    ///
    /// Returns error if a port map entry does not parse.
    pub fn translate(&self) -> Result<ContainerCreateBody, ContainerError> {
        let mut bindings: HashMap<String, Vec<PortBinding>> = HashMap::new();
        let mut exposed_ports = HashMap::new();

        // `3000` and `3000/tcp` share a key; each entry keeps its own binding.
        for spec in self.port_specs()? {
            let key = spec.key();
            bindings.entry(key.clone()).or_default().push(PortBinding {
                host_ip: Some(DEFAULT_HOST_IP.to_string()),
                host_port: Some(spec.host_port.map(|p| p.to_string()).unwrap_or_default()),
            });
            exposed_ports.insert(key, HashMap::new());
        }
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = bindings
            .into_iter()
            .map(|(key, list)| (key, Some(list)))
            .collect();

        let host_config = HostConfig {
            memory: (self.memory_limit > 0).then_some(self.memory_limit),
            cpu_shares: (self.cpu_shares > 0).then_some(self.cpu_shares),
            network_mode: self.network_mode.as_ref().map(|mode| mode.to_string()),
            restart_policy: self.restart_policy.map(|policy| EngineRestartPolicy {
                name: Some(policy.engine_name()),
                maximum_retry_count: None,
            }),
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            ..Default::default()
        };

        Ok(ContainerCreateBody {
            image: Some(self.image.clone()),
            cmd: if self.command.is_empty() {
                None
            } else {
                Some(self.command.clone())
            },
            env: if self.env.is_empty() {
                None
            } else {
                Some(self.env.clone())
            },
            working_dir: self.working_dir.clone(),
            labels: if self.labels.is_empty() {
                None
            } else {
                Some(self.labels.clone())
            },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        })
    }
}
