//! Normalized container snapshots.
//!
//! The engine reports container state in two different shapes: the full
//! inspect payload and the summary returned by the list call. Both are mapped
//! here into one flat [`ContainerInfo`] record.

use bollard::models::{
    ContainerInspectResponse, ContainerSummary, EndpointSettings, HostConfig, MountPoint,
    PortBinding,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Seconds from the Unix epoch back to `0001-01-01T00:00:00Z`.
const ZERO_TIME_SECS: i64 = -62_135_596_800;

/// The zero-time sentinel, `0001-01-01T00:00:00Z`.
///
/// The engine reports this value for containers that never started or
/// finished; unparsable timestamps are normalized to it as well.
pub fn zero_time() -> DateTime<Utc> {
    DateTime::from_timestamp(ZERO_TIME_SECS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Check whether a timestamp is the zero-time sentinel.
pub fn is_zero_time(time: &DateTime<Utc>) -> bool {
    *time <= zero_time()
}

fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(zero_time)
}

/// Point-in-time snapshot of one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    /// Container name without the engine's leading `/`
    pub name: String,
    /// Image reference the container was created from
    pub image: String,
    /// Resolved image ID
    pub image_id: String,
    pub command: String,
    /// Lifecycle state (`created`, `running`, `exited`, ...)
    pub state: String,
    /// Human readable status
    pub status: String,
    pub created: DateTime<Utc>,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub exit_code: i64,
    pub restart_count: i64,
    pub platform: String,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub mounts: Vec<MountInfo>,
    pub network_settings: NetworkInfo,
    pub host_config: HostConfigInfo,
}

impl Default for ContainerInfo {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            image: String::new(),
            image_id: String::new(),
            command: String::new(),
            state: String::new(),
            status: String::new(),
            created: zero_time(),
            started: zero_time(),
            finished: zero_time(),
            exit_code: 0,
            restart_count: 0,
            platform: String::new(),
            labels: HashMap::new(),
            ports: Vec::new(),
            mounts: Vec::new(),
            network_settings: NetworkInfo::default(),
            host_config: HostConfigInfo::default(),
        }
    }
}

/// Published port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    /// 0 when the engine has not assigned a host port yet
    pub host_port: u16,
    pub host_ip: String,
    /// `tcp`, `udp` or `sctp`
    #[serde(rename = "type")]
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountInfo {
    #[serde(rename = "type")]
    pub typ: String,
    pub source: String,
    pub destination: String,
    pub mode: String,
    pub rw: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub networks: BTreeMap<String, EndpointInfo>,
    /// Primary address, taken from the endpoint of the container's network mode
    pub ip_address: String,
    pub gateway: String,
    pub mac_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub ip_address: String,
    pub gateway: String,
    pub mac_address: String,
    pub network_id: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicyInfo {
    pub name: String,
    pub maximum_retry_count: i64,
}

/// Host configuration summary, in the engine's native units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfigInfo {
    pub network_mode: String,
    pub restart_policy: RestartPolicyInfo,
    pub auto_remove: bool,
    /// Bytes, 0 for unlimited
    pub memory: i64,
    pub cpu_shares: i64,
    pub cpu_quota: i64,
    pub cpu_period: i64,
}

impl ContainerInfo {
    /// Normalize a full inspect payload.
    pub fn from_inspect(inspect: ContainerInspectResponse) -> Self {
        let config = inspect.config.unwrap_or_default();
        let state = inspect.state.unwrap_or_default();
        let network_settings = inspect.network_settings.unwrap_or_default();
        let host_config = inspect.host_config.unwrap_or_default();

        let started = parse_timestamp(state.started_at.as_deref());
        let finished = parse_timestamp(state.finished_at.as_deref());
        let exit_code = state.exit_code.unwrap_or(0);
        let state_name = state.status.map(|s| s.to_string()).unwrap_or_default();

        let mut ports = network_settings
            .ports
            .as_ref()
            .map(port_mappings)
            .unwrap_or_default();
        if ports.is_empty() {
            // Runtime ports are only reported while the container runs.
            ports = host_config
                .port_bindings
                .as_ref()
                .map(port_mappings)
                .unwrap_or_default();
        }

        let networks = network_settings.networks.unwrap_or_default();
        let host_config_info = host_config_info(&host_config);

        Self {
            id: inspect.id.unwrap_or_default(),
            name: trim_name(inspect.name.as_deref().unwrap_or_default()),
            image: config.image.unwrap_or_default(),
            image_id: inspect.image.unwrap_or_default(),
            command: config.cmd.unwrap_or_default().join(" "),
            status: human_status(&state_name, exit_code, &started, &finished),
            state: state_name,
            created: parse_timestamp(inspect.created.as_deref()),
            started,
            finished,
            exit_code,
            restart_count: inspect.restart_count.unwrap_or(0),
            platform: inspect.platform.unwrap_or_default(),
            labels: config.labels.unwrap_or_default(),
            ports,
            mounts: inspect
                .mounts
                .unwrap_or_default()
                .into_iter()
                .map(mount_info)
                .collect(),
            network_settings: network_info(networks, &host_config_info.network_mode),
            host_config: host_config_info,
        }
    }

    /// Normalize a list summary.
    ///
    /// The list call reports less than inspect; timestamps other than
    /// `created` stay at the zero-time sentinel.
    pub fn from_summary(summary: ContainerSummary) -> Self {
        let network_mode = summary
            .host_config
            .and_then(|hc| hc.network_mode)
            .unwrap_or_default();
        let networks = summary
            .network_settings
            .and_then(|ns| ns.networks)
            .unwrap_or_default();

        let mut ports: Vec<PortMapping> = summary
            .ports
            .unwrap_or_default()
            .into_iter()
            .filter_map(|port| {
                Some(PortMapping {
                    container_port: port.private_port,
                    host_port: port.public_port?,
                    host_ip: port.ip.unwrap_or_default(),
                    protocol: port
                        .typ
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "tcp".to_string()),
                })
            })
            .collect();
        sort_ports(&mut ports);

        Self {
            id: summary.id.unwrap_or_default(),
            name: summary
                .names
                .unwrap_or_default()
                .first()
                .map(|n| trim_name(n))
                .unwrap_or_default(),
            image: summary.image.unwrap_or_default(),
            image_id: summary.image_id.unwrap_or_default(),
            command: summary.command.unwrap_or_default(),
            state: summary.state.map(|s| s.to_string()).unwrap_or_default(),
            status: summary.status.unwrap_or_default(),
            created: summary
                .created
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or_else(zero_time),
            labels: summary.labels.unwrap_or_default(),
            ports,
            mounts: summary
                .mounts
                .unwrap_or_default()
                .into_iter()
                .map(mount_info)
                .collect(),
            network_settings: network_info(networks, &network_mode),
            host_config: HostConfigInfo {
                network_mode,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    /// Short form of the container ID, as shown by the engine CLI.
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }
}

fn trim_name(name: &str) -> String {
    name.trim_start_matches('/').to_string()
}

fn human_status(
    state: &str,
    exit_code: i64,
    started: &DateTime<Utc>,
    finished: &DateTime<Utc>,
) -> String {
    match state {
        "running" if !is_zero_time(started) => format!("Up since {}", started.to_rfc3339()),
        "exited" if !is_zero_time(finished) => {
            format!("Exited ({}) at {}", exit_code, finished.to_rfc3339())
        }
        "exited" => format!("Exited ({})", exit_code),
        other => other.to_string(),
    }
}

/// Split `"3000/tcp"` into its port and protocol; a missing suffix is tcp.
fn split_port_key(key: &str) -> Option<(u16, String)> {
    let (port, protocol) = key.split_once('/').unwrap_or((key, "tcp"));
    Some((port.parse().ok()?, protocol.to_string()))
}

fn port_mappings(map: &HashMap<String, Option<Vec<PortBinding>>>) -> Vec<PortMapping> {
    let mut ports = Vec::new();
    for (key, bindings) in map {
        let Some((container_port, protocol)) = split_port_key(key) else {
            continue;
        };
        for binding in bindings.iter().flatten() {
            ports.push(PortMapping {
                container_port,
                host_port: binding
                    .host_port
                    .as_deref()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(0),
                host_ip: binding.host_ip.clone().unwrap_or_default(),
                protocol: protocol.clone(),
            });
        }
    }
    sort_ports(&mut ports);
    ports
}

fn sort_ports(ports: &mut [PortMapping]) {
    ports.sort_by(|a, b| {
        (a.container_port, &a.protocol, &a.host_ip, a.host_port).cmp(&(
            b.container_port,
            &b.protocol,
            &b.host_ip,
            b.host_port,
        ))
    });
}

fn mount_info(mount: MountPoint) -> MountInfo {
    MountInfo {
        typ: mount.typ.map(|t| t.to_string()).unwrap_or_default(),
        source: mount.source.unwrap_or_default(),
        destination: mount.destination.unwrap_or_default(),
        mode: mount.mode.unwrap_or_default(),
        rw: mount.rw.unwrap_or(false),
    }
}

fn network_info(networks: HashMap<String, EndpointSettings>, network_mode: &str) -> NetworkInfo {
    let networks: BTreeMap<String, EndpointInfo> = networks
        .into_iter()
        .map(|(name, endpoint)| {
            (
                name,
                EndpointInfo {
                    ip_address: endpoint.ip_address.unwrap_or_default(),
                    gateway: endpoint.gateway.unwrap_or_default(),
                    mac_address: endpoint.mac_address.unwrap_or_default(),
                    network_id: endpoint.network_id.unwrap_or_default(),
                    aliases: endpoint.aliases.unwrap_or_default(),
                },
            )
        })
        .collect();

    let primary_name = match network_mode {
        "" | "default" => "bridge",
        mode => mode,
    };
    let primary = networks
        .get(primary_name)
        .or_else(|| networks.values().next())
        .cloned()
        .unwrap_or_default();

    NetworkInfo {
        ip_address: primary.ip_address,
        gateway: primary.gateway,
        mac_address: primary.mac_address,
        networks,
    }
}

fn host_config_info(host_config: &HostConfig) -> HostConfigInfo {
    let restart_policy = host_config.restart_policy.clone().unwrap_or_default();
    HostConfigInfo {
        network_mode: host_config.network_mode.clone().unwrap_or_default(),
        restart_policy: RestartPolicyInfo {
            name: restart_policy
                .name
                .map(|n| n.to_string())
                .unwrap_or_default(),
            maximum_retry_count: restart_policy.maximum_retry_count.unwrap_or(0),
        },
        auto_remove: host_config.auto_remove.unwrap_or(false),
        memory: host_config.memory.unwrap_or(0),
        cpu_shares: host_config.cpu_shares.unwrap_or(0),
        cpu_quota: host_config.cpu_quota.unwrap_or(0),
        cpu_period: host_config.cpu_period.unwrap_or(0),
    }
}
