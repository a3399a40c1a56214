use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{EnvPair, RuntimeAdapter};
use crate::error::RuntimeError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const BUILD_TIMEOUT: Duration = Duration::from_secs(600);
const STOP_GRACE_SECS: &str = "5";

/// Shells out to a container runtime CLI (`docker`, `podman`, or any
/// CLI-compatible binary configured via `docker.executablePath`).
///
/// Every invocation merges the configured environment overlay onto the
/// inherited process environment rather than replacing it, the same
/// merge-not-replace posture the teacher uses for build-arg injection.
pub struct DockerRuntime {
    executable: String,
    environment: HashMap<String, String>,
}

impl DockerRuntime {
    pub fn new(executable: impl Into<String>, environment: HashMap<String, String>) -> Self {
        Self {
            executable: executable.into(),
            environment,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.envs(&self.environment);
        cmd
    }

    async fn run(
        &self,
        mut cmd: Command,
        timeout_duration: Duration,
    ) -> Result<std::process::Output, RuntimeError> {
        let output = timeout(timeout_duration, cmd.output())
            .await
            .map_err(|_| RuntimeError::CommandFailed("timed out".to_string()))?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RuntimeError::NotFound
                } else {
                    RuntimeError::CommandFailed(e.to_string())
                }
            })?;
        Ok(output)
    }
}

#[async_trait]
impl RuntimeAdapter for DockerRuntime {
    async fn build_image(
        &self,
        dockerfile: &str,
        context: &str,
        tag: &str,
        build_args: &[EnvPair],
    ) -> Result<(), RuntimeError> {
        let mut cmd = self.command();
        cmd.args(["build", "-t", tag, "-f", dockerfile]);
        for (key, value) in build_args {
            cmd.arg("--build-arg").arg(format!("{key}={value}"));
        }
        cmd.arg(context);

        debug!(tag, context, "building image");
        let output = self.run(cmd, BUILD_TIMEOUT).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(RuntimeError::BuildFailed(stderr));
        }
        Ok(())
    }

    async fn run_container(
        &self,
        image: &str,
        name: &str,
        host_port: u16,
        container_port: u16,
    ) -> Result<String, RuntimeError> {
        let mut cmd = self.command();
        cmd.args([
            "run",
            "-d",
            "--name",
            name,
            "-p",
            &format!("{host_port}:{container_port}"),
            image,
        ]);

        let output = self.run(cmd, DEFAULT_TIMEOUT).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(RuntimeError::CommandFailed(stderr));
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::CommandFailed(
                "runtime returned an empty container id".to_string(),
            ));
        }
        Ok(id)
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut cmd = self.command();
        cmd.args(["stop", "-t", STOP_GRACE_SECS, id]);
        let output = self.run(cmd, DEFAULT_TIMEOUT).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(id, stderr = %stderr, "stop_container failed");
            return Err(RuntimeError::CommandFailed(stderr));
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut cmd = self.command();
        cmd.args(["rm", "-f", id]);
        let output = self.run(cmd, DEFAULT_TIMEOUT).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(id, stderr = %stderr, "remove_container failed");
            return Err(RuntimeError::CommandFailed(stderr));
        }
        Ok(())
    }

    async fn get_container_ip(&self, id: &str) -> Result<Option<String>, RuntimeError> {
        let mut cmd = self.command();
        cmd.args([
            "inspect",
            "-f",
            "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}",
            id,
        ]);
        let output = self.run(cmd, DEFAULT_TIMEOUT).await?;
        if !output.status.success() {
            return Ok(None);
        }
        let ip = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if ip.is_empty() {
            Ok(None)
        } else {
            Ok(Some(ip))
        }
    }

    async fn is_running(&self, id: &str) -> bool {
        let mut cmd = self.command();
        cmd.args(["inspect", "-f", "{{.State.Running}}", id]);
        match self.run(cmd, DEFAULT_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim() == "true"
            }
            _ => false,
        }
    }

    async fn list_containers(&self, name_prefix: &str) -> Result<Vec<String>, RuntimeError> {
        let mut cmd = self.command();
        cmd.args([
            "ps",
            "-a",
            "--filter",
            &format!("name=^{name_prefix}"),
            "--format",
            "{{.ID}}",
        ]);
        let output = self.run(cmd, DEFAULT_TIMEOUT).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(RuntimeError::CommandFailed(stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn cleanup_orphans(&self) -> Result<(), RuntimeError> {
        let ids = self.list_containers("pod-").await?;
        if ids.is_empty() {
            return Ok(());
        }
        debug!(count = ids.len(), "removing orphaned pod containers");
        let mut cmd = self.command();
        cmd.arg("rm").arg("-f").args(&ids);
        let output = self.run(cmd, DEFAULT_TIMEOUT).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(RuntimeError::CommandFailed(stderr));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nonexistent_binary_surfaces_not_found() {
        let runtime = DockerRuntime::new("podlb-nonexistent-binary-xyz", HashMap::new());
        let err = runtime.stop_container("whatever").await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound));
    }

    #[tokio::test]
    async fn is_running_collapses_errors_to_false() {
        let runtime = DockerRuntime::new("podlb-nonexistent-binary-xyz", HashMap::new());
        assert!(!runtime.is_running("whatever").await);
    }
}
