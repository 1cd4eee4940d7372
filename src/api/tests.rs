use super::*;
use crate::container::{
    ContainerConfig, ContainerCreated, ContainerInfo, LogTail, NetworkMode, Operation,
    RestartPolicy,
};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;
use tempfile::TempDir;
use tower::ServiceExt;

/// In-memory stand-in for the engine.
#[derive(Default)]
struct FakeEngine {
    containers: Mutex<Vec<ContainerInfo>>,
    configs: Mutex<HashMap<String, ContainerConfig>>,
    copies: Mutex<Vec<(String, String, usize)>>,
    closed: bool,
    broken_list: bool,
}

fn server_error(op: Operation, status_code: u16, message: String) -> ClientError {
    ClientError::new(
        op,
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        },
    )
}

impl FakeEngine {
    fn with(containers: Vec<ContainerInfo>) -> Self {
        Self {
            containers: Mutex::new(containers),
            ..Default::default()
        }
    }

    fn check_open(&self, op: Operation) -> crate::container::Result<()> {
        if self.closed {
            return Err(ClientError::new(op, ContainerError::Closed));
        }
        Ok(())
    }

    fn find(&self, op: Operation, id: &str) -> crate::container::Result<ContainerInfo> {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id || c.name == id)
            .cloned()
            .ok_or_else(|| server_error(op, 404, format!("No such container: {}", id)))
    }
}

#[async_trait]
impl ContainerOperations for FakeEngine {
    async fn create_container(
        &self,
        name: &str,
        config: &ContainerConfig,
    ) -> crate::container::Result<ContainerCreated> {
        let op = Operation::CreateContainer;
        self.check_open(op)?;
        config.validate().map_err(|e| ClientError::new(op, e))?;
        config.port_specs().map_err(|e| ClientError::new(op, e))?;

        let mut containers = self.containers.lock().unwrap();
        if containers.iter().any(|c| c.name == name) {
            return Err(server_error(
                op,
                409,
                format!("Conflict. The container name \"/{}\" is already in use", name),
            ));
        }

        let id = format!("{:0<64}", format!("c0ffee{}", containers.len()));
        containers.push(ContainerInfo {
            id: id.clone(),
            name: name.to_string(),
            image: config.image.clone(),
            state: "created".to_string(),
            labels: config.labels.clone(),
            ..Default::default()
        });
        self.configs
            .lock()
            .unwrap()
            .insert(id.clone(), config.clone());

        Ok(ContainerCreated {
            id,
            warnings: Vec::new(),
        })
    }

    async fn start_container(&self, id: &str) -> crate::container::Result<()> {
        let op = Operation::StartContainer;
        self.check_open(op)?;
        self.find(op, id)?;
        for container in self.containers.lock().unwrap().iter_mut() {
            if container.id == id || container.name == id {
                container.state = "running".to_string();
            }
        }
        Ok(())
    }

    async fn list_containers(
        &self,
        all: bool,
        label_filter: &HashMap<String, String>,
    ) -> crate::container::Result<Vec<ContainerInfo>> {
        self.check_open(Operation::ListContainers)?;
        if self.broken_list {
            panic!("container list state corrupted");
        }
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .filter(|c| all || c.is_running())
            .filter(|c| {
                label_filter
                    .iter()
                    .all(|(k, v)| c.labels.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }

    async fn get_container(&self, id: &str) -> crate::container::Result<ContainerInfo> {
        self.check_open(Operation::GetContainer)?;
        self.find(Operation::GetContainer, id)
    }

    async fn get_container_logs(
        &self,
        id: &str,
        tail: LogTail,
    ) -> crate::container::Result<String> {
        self.find(Operation::GetLogs, id)?;
        Ok(format!("STDOUT:\ntail={}\nSTDERR:\n", tail))
    }

    async fn copy_to_container(
        &self,
        id: &str,
        dest_path: &str,
        archive: Vec<u8>,
    ) -> crate::container::Result<()> {
        self.find(Operation::CopyToContainer, id)?;
        self.copies
            .lock()
            .unwrap()
            .push((id.to_string(), dest_path.to_string(), archive.len()));
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> crate::container::Result<()> {
        let op = Operation::RemoveContainer;
        let container = self.find(op, id)?;
        if container.is_running() && !force {
            return Err(server_error(
                op,
                409,
                format!("You cannot remove a running container {}", container.id),
            ));
        }
        self.containers
            .lock()
            .unwrap()
            .retain(|c| c.id != container.id);
        Ok(())
    }
}

fn container(id: &str, name: &str, state: &str) -> ContainerInfo {
    ContainerInfo {
        id: id.to_string(),
        name: name.to_string(),
        image: "alpine:latest".to_string(),
        state: state.to_string(),
        ..Default::default()
    }
}

fn app_with(engine: Arc<FakeEngine>) -> Router {
    router(AppState::new(engine, ContainerDefaults::default()))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json, request_id)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = app_with(Arc::new(FakeEngine::default()));
    let (status, json, request_id) = send(app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "UP");
    let request_id = request_id.unwrap();
    assert!(Uuid::parse_str(&request_id).is_ok());
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = app_with(Arc::new(FakeEngine::default()));
    let request = Request::builder()
        .uri("/health")
        .header(REQUEST_ID_HEADER, "trace-1234")
        .body(Body::empty())
        .unwrap();

    let (_, _, request_id) = send(app, request).await;
    assert_eq!(request_id.as_deref(), Some("trace-1234"));
}

#[tokio::test]
async fn test_create_container_applies_defaults() {
    let engine = Arc::new(FakeEngine::default());
    let app = app_with(engine.clone());

    let (status, json, _) = send(
        app,
        post_json(
            "/api/v1/containers",
            json!({
                "name": "web",
                "image": "node:18-alpine",
                "memory_limit": 536870912,
                "ports": { "3000": "3000" },
                "labels": { "tier": "frontend" }
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let id = json["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 64);
    assert_eq!(json["warnings"], json!([]));

    let configs = engine.configs.lock().unwrap();
    let config = &configs[&id];
    assert_eq!(config.memory_limit, 536_870_912);
    assert_eq!(config.cpu_shares, 1024);
    assert_eq!(config.network_mode, Some(NetworkMode::Bridge));
    assert_eq!(config.restart_policy, Some(RestartPolicy::UnlessStopped));

    let containers = engine.containers.lock().unwrap();
    assert_eq!(containers[0].state, "created");
}

#[tokio::test]
async fn test_create_and_start() {
    let engine = Arc::new(FakeEngine::default());
    let app = app_with(engine.clone());

    let (status, _, _) = send(
        app,
        post_json(
            "/api/v1/containers",
            json!({ "name": "worker", "image": "alpine:latest", "start": true }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(engine.containers.lock().unwrap()[0].is_running());
}

#[tokio::test]
async fn test_create_container_validation_error() {
    let app = app_with(Arc::new(FakeEngine::default()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/containers")
        .header("content-type", "application/json")
        .header(REQUEST_ID_HEADER, "req-42")
        .body(Body::from(
            json!({ "name": "web", "image": "alpine", "ports": { "http": "80" } }).to_string(),
        ))
        .unwrap();

    let (status, json, request_id) = send(app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");
    assert_eq!(json["error"], "failed to create container");
    assert_eq!(json["request_id"], "req-42");
    assert_eq!(request_id.as_deref(), Some("req-42"));
}

#[tokio::test]
async fn test_create_container_rejects_unknown_enum_value() {
    let app = app_with(Arc::new(FakeEngine::default()));
    let (status, json, _) = send(
        app,
        post_json(
            "/api/v1/containers",
            json!({ "image": "alpine", "restart_policy": "sometimes" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid request body");
}

#[tokio::test]
async fn test_create_duplicate_name_conflicts() {
    let engine = Arc::new(FakeEngine::with(vec![container(
        "aaa111",
        "web",
        "running",
    )]));
    let app = app_with(engine);

    let (status, json, _) = send(
        app,
        post_json(
            "/api/v1/containers",
            json!({ "name": "web", "image": "alpine" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "already_exists");
}

#[tokio::test]
async fn test_malformed_body() {
    let app = app_with(Arc::new(FakeEngine::default()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/containers")
        .header("content-type", "application/json")
        .body(Body::from("{ not json"))
        .unwrap();

    let (status, json, _) = send(app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");
    assert!(json["request_id"].is_string());
}

#[tokio::test]
async fn test_list_containers_filters() {
    let mut labelled = container("bbb222", "api", "running");
    labelled.labels.insert("tier".to_string(), "backend".to_string());
    let engine = Arc::new(FakeEngine::with(vec![
        container("aaa111", "web", "running"),
        labelled,
        container("ccc333", "job", "exited"),
    ]));

    let (status, json, _) = send(app_with(engine.clone()), get("/api/v1/containers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 3);

    let (_, json, _) = send(
        app_with(engine.clone()),
        get("/api/v1/containers?all=false"),
    )
    .await;
    assert_eq!(json.as_array().unwrap().len(), 2);

    let (_, json, _) = send(
        app_with(engine.clone()),
        get("/api/v1/containers?all=false&label=tier=backend"),
    )
    .await;
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["api"]);

    let (status, _, _) = send(app_with(engine), get("/api/v1/containers?label=tier")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_container_by_prefix() {
    let engine = Arc::new(FakeEngine::with(vec![
        container("abc123def456", "web", "running"),
        container("abd999", "api", "running"),
    ]));

    let (status, json, _) = send(app_with(engine.clone()), get("/api/v1/containers/abc1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], "abc123def456");
    assert_eq!(json["name"], "web");
    assert_eq!(json["created"], "0001-01-01T00:00:00Z");

    let (status, json, _) = send(app_with(engine.clone()), get("/api/v1/containers/api")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], "abd999");

    let (status, json, _) = send(app_with(engine.clone()), get("/api/v1/containers/ab")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "ambiguous container ID");

    let (status, json, _) = send(app_with(engine), get("/api/v1/containers/zzz")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "not_found");
}

#[tokio::test]
async fn test_get_logs() {
    let engine = Arc::new(FakeEngine::with(vec![container("aaa111", "web", "running")]));

    let (status, json, _) = send(
        app_with(engine.clone()),
        get("/api/v1/containers/aaa111/logs"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["logs"], "STDOUT:\ntail=all\nSTDERR:\n");

    let (_, json, _) = send(
        app_with(engine.clone()),
        get("/api/v1/containers/aaa111/logs?tail=50"),
    )
    .await;
    assert_eq!(json["logs"], "STDOUT:\ntail=50\nSTDERR:\n");

    let (status, json, _) = send(
        app_with(engine),
        get("/api/v1/containers/aaa111/logs?tail=lots"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid tail");
}

#[tokio::test]
async fn test_start_and_remove() {
    let engine = Arc::new(FakeEngine::with(vec![container("aaa111", "web", "created")]));

    let (status, _, _) = send(
        app_with(engine.clone()),
        post_json("/api/v1/containers/aaa111/start", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let delete = |uri: &str| {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };

    let (status, json, _) = send(
        app_with(engine.clone()),
        delete("/api/v1/containers/aaa111"),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "failed to remove container");

    let (status, _, _) = send(
        app_with(engine.clone()),
        delete("/api/v1/containers/aaa111?force=true"),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, json, _) = send(
        app_with(engine),
        delete("/api/v1/containers/aaa111?force=true"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "not_found");
}

#[tokio::test]
async fn test_legacy_routes() {
    let engine = Arc::new(FakeEngine::with(vec![container("aaa111", "web", "running")]));

    let (status, json, _) = send(app_with(engine.clone()), get("/containers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);

    let (status, json, _) = send(app_with(engine), get("/containers/aaa111")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "web");
}

#[tokio::test]
async fn test_closed_client_is_unavailable() {
    let engine = Arc::new(FakeEngine {
        closed: true,
        ..Default::default()
    });

    let (status, json, _) = send(app_with(engine), get("/api/v1/containers")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["kind"], "unavailable");
}

#[tokio::test]
async fn test_handler_panic_becomes_error_body() {
    let engine = Arc::new(FakeEngine {
        broken_list: true,
        ..Default::default()
    });
    let request = Request::builder()
        .uri("/api/v1/containers")
        .header(REQUEST_ID_HEADER, "req-panic")
        .body(Body::empty())
        .unwrap();

    let (status, json, request_id) = send(app_with(engine), request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "internal server error");
    assert_eq!(json["details"], "container list state corrupted");
    assert_eq!(json["kind"], "generic");
    assert_eq!(json["request_id"], "req-panic");
    assert_eq!(request_id.as_deref(), Some("req-panic"));
}

#[tokio::test]
async fn test_create_project() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("package.json"),
        json!({
            "name": "hello-node",
            "version": "1.0.0",
            "dependencies": { "express": "^4.18.0" }
        })
        .to_string(),
    )
    .unwrap();
    fs::write(temp.path().join("index.js"), "require('express')").unwrap();

    let engine = Arc::new(FakeEngine::default());
    let (status, json, _) = send(
        app_with(engine.clone()),
        post_json(
            "/api/v1/projects",
            json!({
                "project_path": temp.path(),
                "name": "hello",
                "env": ["NODE_ENV=production"]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let id = json["id"].as_str().unwrap().to_string();

    let configs = engine.configs.lock().unwrap();
    let config = &configs[&id];
    assert_eq!(config.image, "node:18-alpine");
    assert_eq!(config.command, vec!["npm", "start"]);
    assert_eq!(config.working_dir.as_deref(), Some("/app"));
    assert_eq!(
        config.env,
        vec!["NODE_ENV=production", "NODE_PROJECT_NAME=hello-node"]
    );
    assert_eq!(config.memory_limit, 512_000_000);

    let copies = engine.copies.lock().unwrap();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].0, id);
    assert_eq!(copies[0].1, "/app");
    assert!(copies[0].2 > 0);

    assert!(temp.path().join("Dockerfile").is_file());
    assert!(temp.path().join(".dockerignore").is_file());
    assert!(temp.path().join(".env").is_file());
}

#[tokio::test]
async fn test_create_project_invalid() {
    let temp = TempDir::new().unwrap();
    let engine = Arc::new(FakeEngine::default());

    let (status, json, _) = send(
        app_with(engine.clone()),
        post_json("/api/v1/projects", json!({ "project_path": temp.path() })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid Node.js project");
    assert!(engine.containers.lock().unwrap().is_empty());
}

#[test]
fn test_status_mapping() {
    let cases = [
        (
            ClientError::new(
                Operation::CreateContainer,
                ContainerError::InvalidConfig("image is required".to_string()),
            ),
            StatusCode::BAD_REQUEST,
            "validation",
        ),
        (
            server_error(
                Operation::CreateContainer,
                404,
                "No such image: nope:latest".to_string(),
            ),
            StatusCode::NOT_FOUND,
            "image_not_found",
        ),
        (
            ClientError::new(
                Operation::StartContainer,
                ContainerError::Other("Resource constraints exceeded".to_string()),
            ),
            StatusCode::SERVICE_UNAVAILABLE,
            "resource_constraint",
        ),
        (
            ClientError::new(
                Operation::GetLogs,
                ContainerError::Timeout(std::time::Duration::from_secs(5)),
            ),
            StatusCode::GATEWAY_TIMEOUT,
            "timeout",
        ),
        (
            ClientError::new(
                Operation::Ping,
                ContainerError::Other("connection reset".to_string()),
            ),
            StatusCode::INTERNAL_SERVER_ERROR,
            "generic",
        ),
    ];

    for (err, status, kind) in cases {
        assert_eq!(status_for(&err), (status, kind), "{}", err);
    }
}
