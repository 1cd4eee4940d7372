//! Node.js project scaffolding.
//!
//! Validates a project's `package.json`, writes the build-context files
//! (`Dockerfile`, `.dockerignore`, `.env`) and derives the container configuration
//! used to run the project on the base image.

use crate::container::{ContainerConfigBuilder, archive};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MANIFEST_FILE: &str = "package.json";
pub const DOCKERFILE: &str = "Dockerfile";
pub const DOCKERIGNORE: &str = ".dockerignore";
pub const ENV_FILE: &str = ".env";

/// Entries written to `.dockerignore`.
pub const IGNORED_ENTRIES: &[&str] = &[
    "node_modules",
    "npm-debug.log",
    "Dockerfile",
    ".dockerignore",
    ".git",
    ".gitignore",
    "README.md",
];

/// Directories never copied into a project container.
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git"];

/// Label attached to containers created from a project.
pub const PROJECT_LABEL: &str = "dockmgr.project";

/// Default container command.
pub const DEFAULT_COMMAND: &[&str] = &["npm", "start"];

/// Default working directory inside the container.
pub const DEFAULT_WORKING_DIR: &str = "/app";

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("package.json not found in {}", .0.display())]
    ManifestMissing(PathBuf),

    #[error("failed to parse {}: {source}", .path.display())]
    ManifestInvalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("package.json is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("required dependency {0} not found")]
    MissingDependency(String),

    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProjectError {
    /// True when the project itself is malformed, as opposed to an I/O failure.
    pub fn is_invalid_project(&self) -> bool {
        !matches!(self, ProjectError::Io { .. })
    }
}

/// Scaffolding settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSettings {
    pub required_deps: Vec<String>,
    pub base_image: String,
    pub default_port: u16,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            required_deps: vec!["express".to_string()],
            base_image: "node:18-alpine".to_string(),
            default_port: 3000,
        }
    }
}

/// The parts of `package.json` the scaffolder reads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
    #[serde(default)]
    pub scripts: HashMap<String, String>,
}

impl PackageManifest {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

/// Per-request container options for a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectContainerOptions {
    /// Defaults to `npm start`
    pub command: Option<Vec<String>>,
    /// Defaults to `/app`
    pub working_dir: Option<String>,
    pub env: Vec<String>,
    /// Add `NODE_PROJECT_NAME=<manifest name>` to the environment
    pub inject_project_name: bool,
}

impl Default for ProjectContainerOptions {
    fn default() -> Self {
        Self {
            command: None,
            working_dir: None,
            env: Vec::new(),
            inject_project_name: true,
        }
    }
}

/// A Node.js project on disk.
#[derive(Debug, Clone)]
pub struct NodeProject {
    root: PathBuf,
    settings: ProjectSettings,
}

impl NodeProject {
    pub fn new<P: Into<PathBuf>>(root: P, settings: ProjectSettings) -> Self {
        Self {
            root: root.into(),
            settings,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    /// Read and check `package.json`.
    ///
    /// # Errors
    ///
    /// Fails if the manifest is missing or unparsable, lacks `name` or
    /// `version`, or does not declare a required dependency.
    pub fn validate(&self) -> Result<PackageManifest, ProjectError> {
        let path = self.root.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(ProjectError::ManifestMissing(self.root.clone()));
        }

        let content = fs::read_to_string(&path).map_err(|source| ProjectError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest: PackageManifest = serde_json::from_str(&content)
            .map_err(|source| ProjectError::ManifestInvalid { path, source })?;

        if manifest.name.as_deref().is_none_or(str::is_empty) {
            return Err(ProjectError::MissingField("name"));
        }
        if manifest.version.as_deref().is_none_or(str::is_empty) {
            return Err(ProjectError::MissingField("version"));
        }

        for dep in &self.settings.required_deps {
            if !manifest.dependencies.contains_key(dep) {
                return Err(ProjectError::MissingDependency(dep.clone()));
            }
        }

        debug!("Validated project {} at {:?}", manifest.name(), self.root);
        Ok(manifest)
    }

    pub fn dockerfile_contents(&self) -> String {
        format!(
            "FROM {image}

WORKDIR {workdir}

COPY package*.json ./

RUN npm install

COPY . .

EXPOSE {port}

CMD [\"npm\", \"start\"]
",
            image = self.settings.base_image,
            workdir = DEFAULT_WORKING_DIR,
            port = self.settings.default_port,
        )
    }

    pub fn generate_dockerfile(&self) -> Result<PathBuf, ProjectError> {
        self.write_file(DOCKERFILE, &self.dockerfile_contents())
    }

    pub fn write_dockerignore(&self) -> Result<PathBuf, ProjectError> {
        let mut contents = IGNORED_ENTRIES.join("\n");
        contents.push('\n');
        self.write_file(DOCKERIGNORE, &contents)
    }

    pub fn env_file_contents(&self) -> String {
        format!(
            "NODE_ENV=production\nPORT=${{PORT:-{}}}\n",
            self.settings.default_port
        )
    }

    pub fn write_env_file(&self) -> Result<PathBuf, ProjectError> {
        self.write_file(ENV_FILE, &self.env_file_contents())
    }

    /// Validate the project and write its build-context files.
    pub fn prepare_build_context(&self) -> Result<PackageManifest, ProjectError> {
        let manifest = self.validate()?;
        self.generate_dockerfile()?;
        self.write_dockerignore()?;
        self.write_env_file()?;
        info!(
            "Prepared build context for {} at {:?}",
            manifest.name(),
            self.root
        );
        Ok(manifest)
    }

    /// Pack the project for upload, leaving out dependencies and VCS data.
    pub fn archive(&self) -> Result<Vec<u8>, ProjectError> {
        archive::directory(&self.root, SKIPPED_DIRS).map_err(|source| ProjectError::Io {
            path: self.root.clone(),
            source,
        })
    }

    /// Container configuration running the project on the base image.
    ///
    /// Resource limits, network and restart policy are left to the caller.
    pub fn container_config(
        &self,
        manifest: &PackageManifest,
        options: &ProjectContainerOptions,
    ) -> ContainerConfigBuilder {
        let command = options
            .command
            .clone()
            .unwrap_or_else(|| DEFAULT_COMMAND.iter().map(|s| s.to_string()).collect());
        let working_dir = options
            .working_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_WORKING_DIR.to_string());
        let port = self.settings.default_port.to_string();

        let mut builder = crate::container::ContainerConfig::builder()
            .image(self.settings.base_image.clone())
            .cmd(command)
            .working_dir(working_dir)
            .env_entries(options.env.iter().cloned())
            .label(PROJECT_LABEL, manifest.name())
            .port(port.clone(), port);

        if options.inject_project_name {
            builder = builder.env("NODE_PROJECT_NAME", manifest.name());
        }
        builder
    }

    fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf, ProjectError> {
        let path = self.root.join(name);
        fs::write(&path, contents).map_err(|source| ProjectError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Wrote {:?}", path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VALID_MANIFEST: &str = r#"{
        "name": "test-project",
        "version": "1.0.0",
        "dependencies": { "express": "^4.17.1" },
        "scripts": { "start": "node index.js" }
    }"#;

    fn project_with(manifest: Option<&str>) -> (TempDir, NodeProject) {
        let temp = TempDir::new().unwrap();
        if let Some(manifest) = manifest {
            fs::write(temp.path().join(MANIFEST_FILE), manifest).unwrap();
        }
        let project = NodeProject::new(temp.path(), ProjectSettings::default());
        (temp, project)
    }

    #[test]
    fn test_validate_project() {
        let (_temp, project) = project_with(Some(VALID_MANIFEST));
        let manifest = project.validate().unwrap();
        assert_eq!(manifest.name(), "test-project");
        assert_eq!(manifest.version.as_deref(), Some("1.0.0"));
        assert_eq!(manifest.scripts["start"], "node index.js");
    }

    #[test]
    fn test_missing_manifest() {
        let (_temp, project) = project_with(None);
        let err = project.validate().unwrap_err();
        assert!(matches!(err, ProjectError::ManifestMissing(_)));
        assert!(err.is_invalid_project());
    }

    #[test]
    fn test_manifest_required_fields() {
        let (_temp, project) = project_with(Some(r#"{ "version": "1.0.0" }"#));
        assert!(matches!(
            project.validate(),
            Err(ProjectError::MissingField("name"))
        ));

        let (_temp, project) = project_with(Some(r#"{ "name": "app", "version": "" }"#));
        assert!(matches!(
            project.validate(),
            Err(ProjectError::MissingField("version"))
        ));
    }

    #[test]
    fn test_manifest_malformed() {
        let (_temp, project) = project_with(Some("{ not json"));
        assert!(matches!(
            project.validate(),
            Err(ProjectError::ManifestInvalid { .. })
        ));
    }

    #[test]
    fn test_required_dependency() {
        let (_temp, project) =
            project_with(Some(r#"{ "name": "app", "version": "0.1.0", "dependencies": {} }"#));
        match project.validate() {
            Err(ProjectError::MissingDependency(dep)) => assert_eq!(dep, "express"),
            other => panic!("expected missing dependency, got {:?}", other),
        }

        let settings = ProjectSettings {
            required_deps: Vec::new(),
            ..Default::default()
        };
        let project = NodeProject::new(project.root(), settings);
        assert!(project.validate().is_ok());
    }

    #[test]
    fn test_generate_dockerfile() {
        let (temp, project) = project_with(Some(VALID_MANIFEST));
        let path = project.generate_dockerfile().unwrap();
        assert_eq!(path, temp.path().join(DOCKERFILE));

        let content = fs::read_to_string(path).unwrap();
        for expected in [
            "FROM node:18-alpine",
            "WORKDIR /app",
            "RUN npm install",
            "EXPOSE 3000",
            "CMD [\"npm\", \"start\"]",
        ] {
            assert!(content.contains(expected), "missing `{}`", expected);
        }
    }

    #[test]
    fn test_prepare_build_context() {
        let (temp, project) = project_with(Some(VALID_MANIFEST));
        project.prepare_build_context().unwrap();

        assert!(temp.path().join(DOCKERFILE).is_file());
        let ignore = fs::read_to_string(temp.path().join(DOCKERIGNORE)).unwrap();
        let lines: Vec<&str> = ignore.lines().collect();
        assert_eq!(lines, IGNORED_ENTRIES);

        let env = fs::read_to_string(temp.path().join(ENV_FILE)).unwrap();
        assert_eq!(env, "NODE_ENV=production\nPORT=${PORT:-3000}\n");
    }

    #[test]
    fn test_env_file_uses_default_port() {
        let temp = TempDir::new().unwrap();
        let settings = ProjectSettings {
            default_port: 8081,
            ..Default::default()
        };
        let project = NodeProject::new(temp.path(), settings);

        let path = project.write_env_file().unwrap();
        assert_eq!(path, temp.path().join(ENV_FILE));
        let content = fs::read_to_string(path).unwrap();
        assert!(content.lines().any(|line| line == "PORT=${PORT:-8081}"));
        assert!(content.lines().any(|line| line == "NODE_ENV=production"));
    }

    #[test]
    fn test_prepare_build_context_requires_valid_project() {
        let (temp, project) = project_with(None);
        assert!(project.prepare_build_context().is_err());
        assert!(!temp.path().join(DOCKERFILE).exists());
        assert!(!temp.path().join(ENV_FILE).exists());
    }

    #[test]
    fn test_container_config_defaults() {
        let (_temp, project) = project_with(Some(VALID_MANIFEST));
        let manifest = project.validate().unwrap();

        let config = project
            .container_config(&manifest, &ProjectContainerOptions::default())
            .build()
            .unwrap();

        assert_eq!(config.image, "node:18-alpine");
        assert_eq!(config.command, vec!["npm", "start"]);
        assert_eq!(config.working_dir.as_deref(), Some("/app"));
        assert_eq!(config.env, vec!["NODE_PROJECT_NAME=test-project"]);
        assert_eq!(config.ports.get("3000").map(String::as_str), Some("3000"));
        assert_eq!(config.labels[PROJECT_LABEL], "test-project");
    }

    #[test]
    fn test_container_config_explicit_options() {
        let (_temp, project) = project_with(Some(VALID_MANIFEST));
        let manifest = project.validate().unwrap();
        let options = ProjectContainerOptions {
            command: Some(vec!["node".to_string(), "server.js".to_string()]),
            working_dir: Some("/srv".to_string()),
            env: vec!["NODE_ENV=production".to_string()],
            inject_project_name: false,
        };

        let config = project
            .container_config(&manifest, &options)
            .build()
            .unwrap();

        assert_eq!(config.command, vec!["node", "server.js"]);
        assert_eq!(config.working_dir.as_deref(), Some("/srv"));
        assert_eq!(config.env, vec!["NODE_ENV=production"]);
    }

    #[test]
    fn test_archive_skips_dependencies() {
        let (temp, project) = project_with(Some(VALID_MANIFEST));
        fs::create_dir_all(temp.path().join("node_modules/express")).unwrap();
        fs::write(temp.path().join("node_modules/express/index.js"), "").unwrap();
        fs::write(temp.path().join("index.js"), "require('express')").unwrap();

        let bytes = project.archive().unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["index.js", "package.json"]);
    }
}
