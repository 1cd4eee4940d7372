//! # dockmgr
//!
//! A container management service for Docker and Podman workloads.
//!
//! ## Architecture Overview
//!
//! - **[`container`]**: Engine client, config translation, inspect normalization
//!   and error classification
//! - **[`project`]**: Node.js project scaffolding and build context packaging
//! - **[`config`]**: Layered service configuration (defaults, TOML, environment)
//! - **[`api`]**: REST API over the container operations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dockmgr::api::{AppState, router};
//! use dockmgr::config::ServiceConfig;
//! use dockmgr::container::EngineClient;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::load(None)?;
//!     let client = Arc::new(EngineClient::connect(&config.engine).await?);
//!
//!     let app = router(AppState::new(client, config.container.clone()));
//!     let listener = tokio::net::TcpListener::bind(config.server.socket_addr()?).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

/// REST API routes, handlers and error mapping.
pub mod api;

/// Service configuration loading and validation.
pub mod config;

/// Container engine client and the types around it.
pub mod container;

/// Node.js project support.
pub mod project;

pub use config::ServiceConfig;
pub use container::{
    ClientError, ContainerConfig, ContainerInfo, ContainerOperations, EngineClient,
};
