//! Container runtime abstraction.
//!
//! The orchestrator never talks to the container engine directly — it goes
//! through this trait, so tests can substitute a fake and the supervisor
//! stays engine-agnostic. The concrete implementation shells out to whatever
//! CLI is configured (`docker`, `podman`, ...); see [`docker::DockerRuntime`].

mod docker;

pub use docker::DockerRuntime;

use async_trait::async_trait;

use crate::error::RuntimeError;

/// A single `key=value` build argument or environment entry.
pub type EnvPair = (String, String);

#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Build an image from `dockerfile` within `context`, tagging it `tag`.
    /// Long-running; callers should expect multi-minute builds.
    async fn build_image(
        &self,
        dockerfile: &str,
        context: &str,
        tag: &str,
        build_args: &[EnvPair],
    ) -> Result<(), RuntimeError>;

    /// Run `image` detached, publishing `host_port:container_port`, naming
    /// the container `name`. Returns the (trimmed, non-empty) container id.
    async fn run_container(
        &self,
        image: &str,
        name: &str,
        host_port: u16,
        container_port: u16,
    ) -> Result<String, RuntimeError>;

    /// Gracefully stop a container, with a bounded in-runtime grace period.
    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Force-remove a container.
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Inspect a container's primary network address. `None` if it can't be
    /// determined (non-Linux host, bridge network misconfigured, ...).
    async fn get_container_ip(&self, id: &str) -> Result<Option<String>, RuntimeError>;

    /// Whether the container is currently running. Inspect errors collapse
    /// to `false` rather than propagating — an unreachable container is an
    /// unhealthy one, not a crash.
    async fn is_running(&self, id: &str) -> bool;

    /// List container ids whose name begins with `name_prefix`.
    async fn list_containers(&self, name_prefix: &str) -> Result<Vec<String>, RuntimeError>;

    /// Force-remove every container named with the `pod-` prefix. Run once
    /// at startup to recover from a previous crash.
    async fn cleanup_orphans(&self) -> Result<(), RuntimeError>;
}

#[cfg(test)]
pub mod fake {
    //! An in-memory fake used by supervisor tests, in place of a mocking
    //! framework.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct FakeContainer {
        pub image: String,
        pub running: bool,
        pub ip: Option<String>,
    }

    pub struct FakeRuntime {
        pub containers: Mutex<HashMap<String, FakeContainer>>,
        pub next_id: AtomicU64,
        pub fail_run: std::sync::atomic::AtomicBool,
        pub fail_build: std::sync::atomic::AtomicBool,
        pub default_ip: Option<String>,
    }

    impl FakeRuntime {
        pub fn new() -> Self {
            Self {
                containers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                fail_run: std::sync::atomic::AtomicBool::new(false),
                fail_build: std::sync::atomic::AtomicBool::new(false),
                // No bridge network in the fake: probes fall back to the
                // unique host_port, which is what lets tests target one
                // specific pod among several without a real container IP.
                default_ip: None,
            }
        }

        pub async fn running_count(&self) -> usize {
            self.containers
                .lock()
                .await
                .values()
                .filter(|c| c.running)
                .count()
        }
    }

    #[async_trait]
    impl RuntimeAdapter for FakeRuntime {
        async fn build_image(
            &self,
            _dockerfile: &str,
            _context: &str,
            _tag: &str,
            _build_args: &[EnvPair],
        ) -> Result<(), RuntimeError> {
            if self.fail_build.load(Ordering::SeqCst) {
                return Err(RuntimeError::BuildFailed("fake build failure".to_string()));
            }
            Ok(())
        }

        async fn run_container(
            &self,
            image: &str,
            _name: &str,
            _host_port: u16,
            _container_port: u16,
        ) -> Result<String, RuntimeError> {
            if self.fail_run.load(Ordering::SeqCst) {
                return Err(RuntimeError::CommandFailed("fake run failure".to_string()));
            }
            let id = format!("fake{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.containers.lock().await.insert(
                id.clone(),
                FakeContainer {
                    image: image.to_string(),
                    running: true,
                    ip: self.default_ip.clone(),
                },
            );
            Ok(id)
        }

        async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
            if let Some(c) = self.containers.lock().await.get_mut(id) {
                c.running = false;
            }
            Ok(())
        }

        async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
            self.containers.lock().await.remove(id);
            Ok(())
        }

        async fn get_container_ip(&self, id: &str) -> Result<Option<String>, RuntimeError> {
            Ok(self
                .containers
                .lock()
                .await
                .get(id)
                .and_then(|c| c.ip.clone()))
        }

        async fn is_running(&self, id: &str) -> bool {
            self.containers
                .lock()
                .await
                .get(id)
                .map(|c| c.running)
                .unwrap_or(false)
        }

        async fn list_containers(&self, name_prefix: &str) -> Result<Vec<String>, RuntimeError> {
            Ok(self
                .containers
                .lock()
                .await
                .keys()
                .filter(|id| id.starts_with(name_prefix))
                .cloned()
                .collect())
        }

        async fn cleanup_orphans(&self) -> Result<(), RuntimeError> {
            Ok(())
        }
    }
}
