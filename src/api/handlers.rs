use super::{ApiError, AppState};
use crate::config::ContainerDefaults;
use crate::container::{
    ContainerConfig, ContainerCreated, ContainerInfo, LogTail, NetworkMode, RestartPolicy,
};
use crate::project::{NodeProject, ProjectContainerOptions};
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{debug, info};

/// Body of `POST /containers`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateContainerRequest {
    /// Empty lets the engine choose a name
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub cpu_shares: Option<i64>,
    pub memory_limit: Option<i64>,
    pub network_mode: Option<NetworkMode>,
    pub restart_policy: Option<RestartPolicy>,
    pub labels: HashMap<String, String>,
    pub ports: BTreeMap<String, String>,
    /// Start the container right after creating it
    pub start: bool,
}

impl CreateContainerRequest {
    fn into_config(self, defaults: &ContainerDefaults) -> ContainerConfig {
        ContainerConfig {
            image: self.image,
            command: self.command,
            env: self.env,
            working_dir: self.working_dir,
            cpu_shares: self.cpu_shares.unwrap_or(defaults.cpu_shares),
            memory_limit: self.memory_limit.unwrap_or(defaults.memory_limit),
            network_mode: Some(
                self.network_mode
                    .unwrap_or_else(|| defaults.network_mode.clone()),
            ),
            restart_policy: Some(self.restart_policy.unwrap_or(defaults.restart_policy)),
            labels: self.labels,
            ports: self.ports,
        }
    }
}

/// Body of `POST /api/v1/projects`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectRequest {
    /// Directory holding `package.json`
    pub project_path: PathBuf,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub env: Vec<String>,
    /// Defaults to `npm start`
    pub command: Option<Vec<String>>,
    /// Defaults to `/app`
    pub working_dir: Option<String>,
    #[serde(default = "default_true")]
    pub inject_project_name: bool,
    pub cpu_shares: Option<i64>,
    pub memory_limit: Option<i64>,
    pub network_mode: Option<NetworkMode>,
    pub restart_policy: Option<RestartPolicy>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub start: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: String,
    pub warnings: Vec<String>,
}

impl From<ContainerCreated> for CreatedResponse {
    fn from(created: ContainerCreated) -> Self {
        Self {
            id: created.id,
            warnings: created.warnings,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    tail: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveQuery {
    #[serde(default)]
    force: bool,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "UP" }))
}

pub async fn create_container(
    State(state): State<AppState>,
    payload: Result<Json<CreateContainerRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let Json(request) =
        payload.map_err(|e| ApiError::bad_request("invalid request body", e.body_text()))?;
    let name = request.name.clone();
    let start = request.start;
    let config = request.into_config(&state.defaults);

    let created = state.ops.create_container(&name, &config).await?;
    if start {
        state.ops.start_container(&created.id).await?;
    }

    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn list_containers(
    State(state): State<AppState>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<Vec<ContainerInfo>>, ApiError> {
    let Query(pairs) =
        query.map_err(|e| ApiError::bad_request("invalid query", e.body_text()))?;

    let mut all = true;
    let mut labels = HashMap::new();
    for (key, value) in pairs {
        match key.as_str() {
            "all" => {
                all = value.parse().map_err(|_| {
                    ApiError::bad_request(
                        "invalid query",
                        format!("all must be a boolean, got `{}`", value),
                    )
                })?;
            }
            "label" => {
                let (label, expected) = value.split_once('=').ok_or_else(|| {
                    ApiError::bad_request(
                        "invalid query",
                        format!("label filter must be key=value, got `{}`", value),
                    )
                })?;
                labels.insert(label.to_string(), expected.to_string());
            }
            _ => {}
        }
    }

    let containers = state.ops.list_containers(all, &labels).await?;
    Ok(Json(containers))
}

pub async fn get_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContainerInfo>, ApiError> {
    let resolved = resolve_container_id(&state, &id).await?;
    let info = state.ops.get_container(&resolved).await?;
    Ok(Json(info))
}

/// Resolve a full ID, a name or a unique ID prefix against the container
/// list. Unknown references are passed through so inspect reports them.
async fn resolve_container_id(state: &AppState, reference: &str) -> Result<String, ApiError> {
    let containers = state.ops.list_containers(true, &HashMap::new()).await?;

    if let Some(exact) = containers
        .iter()
        .find(|c| c.id == reference || c.name == reference)
    {
        return Ok(exact.id.clone());
    }

    let matches: Vec<&ContainerInfo> = containers
        .iter()
        .filter(|c| c.id.starts_with(reference))
        .collect();
    match matches.as_slice() {
        [only] => {
            debug!("Resolved container prefix {} to {}", reference, only.id);
            Ok(only.id.clone())
        }
        [] => Ok(reference.to_string()),
        _ => Err(ApiError::bad_request(
            "ambiguous container ID",
            format!("`{}` matches {} containers", reference, matches.len()),
        )),
    }
}

pub async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(query) =
        query.map_err(|e| ApiError::bad_request("invalid query", e.body_text()))?;

    let tail = match query.tail.as_deref() {
        None | Some("") => LogTail::All,
        Some(raw) => raw
            .parse::<LogTail>()
            .map_err(|e| ApiError::bad_request("invalid tail", e.to_string()))?,
    };

    let logs = state.ops.get_container_logs(&id, tail).await?;
    Ok(Json(json!({ "logs": logs })))
}

pub async fn start_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.ops.start_container(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<RemoveQuery>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let Query(query) =
        query.map_err(|e| ApiError::bad_request("invalid query", e.body_text()))?;
    state.ops.remove_container(&id, query.force).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_project(
    State(state): State<AppState>,
    payload: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let Json(request) =
        payload.map_err(|e| ApiError::bad_request("invalid request body", e.body_text()))?;

    let project = NodeProject::new(&request.project_path, state.project.clone());
    let (manifest, archive) = tokio::task::spawn_blocking({
        let project = project.clone();
        move || {
            let manifest = project.prepare_build_context()?;
            let archive = project.archive()?;
            Ok::<_, crate::project::ProjectError>((manifest, archive))
        }
    })
    .await
    .map_err(|e| ApiError::internal("failed to prepare project", e.to_string()))??;

    let options = ProjectContainerOptions {
        command: request.command,
        working_dir: request.working_dir,
        env: request.env,
        inject_project_name: request.inject_project_name,
    };
    let defaults = &state.defaults;
    let mut builder = project
        .container_config(&manifest, &options)
        .cpu_shares(request.cpu_shares.unwrap_or(defaults.cpu_shares))
        .memory_limit(request.memory_limit.unwrap_or(defaults.memory_limit))
        .network_mode(
            request
                .network_mode
                .unwrap_or_else(|| defaults.network_mode.clone()),
        )
        .restart_policy(request.restart_policy.unwrap_or(defaults.restart_policy));
    for (key, value) in request.labels {
        builder = builder.label(key, value);
    }
    let config = builder
        .build()
        .map_err(|e| ApiError::bad_request("invalid container configuration", e.to_string()))?;

    let working_dir = config
        .working_dir
        .clone()
        .unwrap_or_else(|| crate::project::DEFAULT_WORKING_DIR.to_string());

    let created = state.ops.create_container(&request.name, &config).await?;
    state
        .ops
        .copy_to_container(&created.id, &working_dir, archive)
        .await?;
    if request.start {
        state.ops.start_container(&created.id).await?;
    }

    info!(
        "Created container {} for project {}",
        created.id,
        manifest.name()
    );
    Ok((StatusCode::CREATED, Json(created.into())))
}
