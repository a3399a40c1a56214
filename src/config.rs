//! Configuration file loading.
//!
//! Searches a fixed, ordered list of candidate paths for a JSON configuration
//! file. The first path that exists wins; if none exist the list of searched
//! paths is reported back so the operator can see exactly where we looked.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::registry::DeploymentSpec;

fn default_server_port() -> u16 {
    8080
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_docker_executable() -> String {
    "docker".to_string()
}

fn default_replicas() -> u32 {
    1
}

fn default_container_port() -> u16 {
    8080
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

fn default_health_check_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_server_host")]
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfig {
    #[serde(default = "default_docker_executable")]
    pub executable_path: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            executable_path: default_docker_executable(),
            environment: HashMap::new(),
        }
    }
}

/// Raw `deployment` section of the config file, before defaults and the
/// image/dockerfile mutual-exclusion check are applied.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub dockerfile: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,
    #[serde(default)]
    pub remote_url: Option<String>,
}

impl DeploymentConfig {
    pub fn into_spec(self) -> Result<DeploymentSpec, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidSpec(
                "deployment.name must not be empty".to_string(),
            ));
        }
        match (&self.image, &self.dockerfile) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidSpec(
                    "deployment must specify exactly one of image or dockerfile, not both"
                        .to_string(),
                ));
            }
            (None, None) => {
                return Err(ConfigError::InvalidSpec(
                    "deployment must specify either image or dockerfile".to_string(),
                ));
            }
            _ => {}
        }
        if self.replicas < 1 {
            return Err(ConfigError::InvalidSpec(
                "deployment.replicas must be at least 1".to_string(),
            ));
        }
        Ok(DeploymentSpec {
            name: self.name,
            image: self.image,
            dockerfile: self.dockerfile,
            context: self.context,
            replicas: self.replicas,
            container_port: self.container_port,
            health_check_path: self.health_check_path,
            health_check_interval: self.health_check_interval,
            remote_url: self.remote_url,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub docker: Option<DockerConfig>,
    pub deployment: DeploymentConfig,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub docker: DockerConfig,
    pub deployment: DeploymentSpec,
}

/// Candidate paths searched, in order, when no explicit path is given.
pub fn search_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./config.json"),
        PathBuf::from("./appconfig.json"),
        PathBuf::from("/etc/myloadbalancer/config.json"),
    ]
}

/// Load configuration from the first candidate path that exists.
///
/// Mirrors the teacher's project-config search (`rise.toml` / `.rise.toml`):
/// probe paths in order, read the first hit, and surface the exact path on
/// parse failure rather than a generic message.
pub fn load() -> Result<Config, ConfigError> {
    let candidates = search_paths();
    let found = candidates.iter().find(|p| p.exists());
    match found {
        Some(path) => load_from(path),
        None => Err(ConfigError::NotFound(candidates)),
    }
}

pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
        path: path.to_path_buf(),
        cause: e.to_string(),
    })?;
    let raw: RawConfig = serde_json::from_str(&content).map_err(|cause| ConfigError::Invalid {
        path: path.to_path_buf(),
        cause: cause.to_string(),
    })?;
    let deployment = raw.deployment.into_spec().map_err(|e| match e {
        ConfigError::InvalidSpec(msg) => ConfigError::Invalid {
            path: path.to_path_buf(),
            cause: msg,
        },
        other => other,
    })?;
    Ok(Config {
        server: raw.server.unwrap_or(ServerConfig {
            port: default_server_port(),
            host: default_server_host(),
        }),
        docker: raw.docker.unwrap_or_default(),
        deployment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "config.json",
            r#"{"server":{"port":9090,"host":"127.0.0.1"},"docker":{"executablePath":"docker"},"deployment":{"name":"web","image":"nginx:alpine"}}"#,
        );
        let config = load_from(&path).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.deployment.replicas, 1);
        assert_eq!(config.deployment.container_port, 8080);
        assert_eq!(config.deployment.health_check_path, "/health");
        assert_eq!(config.deployment.health_check_interval, 10);
        assert!(!config.deployment.needs_build());
        assert_eq!(config.deployment.resolved_image(), "nginx:alpine");
    }

    #[test]
    fn camel_case_json_keys_populate_snake_case_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "config.json",
            r#"{"docker":{"executablePath":"podman"},"deployment":{"name":"web","image":"nginx:alpine","containerPort":9090,"healthCheckPath":"/healthz","healthCheckInterval":5,"remoteUrl":"https://github.com/acme/widgets"}}"#,
        );
        let config = load_from(&path).unwrap();
        assert_eq!(config.docker.executable_path, "podman");
        assert_eq!(config.deployment.container_port, 9090);
        assert_eq!(config.deployment.health_check_path, "/healthz");
        assert_eq!(config.deployment.health_check_interval, 5);
        assert_eq!(
            config.deployment.remote_url.as_deref(),
            Some("https://github.com/acme/widgets")
        );
    }

    #[test]
    fn rejects_both_image_and_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "config.json",
            r#"{"deployment":{"name":"web","image":"nginx:alpine","dockerfile":"Dockerfile"}}"#,
        );
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn rejects_neither_image_nor_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "config.json", r#"{"deployment":{"name":"web"}}"#);
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn missing_file_lists_searched_paths() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let err = load_from(&missing).unwrap_err();
        match err {
            ConfigError::Invalid { .. } => {}
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn not_found_error_lists_all_candidates() {
        // load() itself only probes the real filesystem, so we exercise the
        // error shape directly against the known candidate list.
        let err = ConfigError::NotFound(search_paths());
        let msg = err.to_string();
        assert!(msg.contains("config.json"));
        assert!(msg.contains("appconfig.json"));
        assert!(msg.contains("/etc/myloadbalancer/config.json"));
    }

    #[test]
    fn resolved_image_falls_back_to_name_local() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "config.json",
            r#"{"deployment":{"name":"web","dockerfile":"Dockerfile","context":"."}}"#,
        );
        let config = load_from(&path).unwrap();
        assert!(config.deployment.needs_build());
        assert_eq!(config.deployment.resolved_image(), "web:local");
    }
}
