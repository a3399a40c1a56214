//! In-process pod table and deployment bookkeeping.
//!
//! `PodRegistry` is the sole owner of `Pod` records and the per-deployment
//! state (current release version, rolling-update flag). Every read and
//! write goes through one `tokio::sync::Mutex` so state transitions never
//! interleave; callers are responsible for never holding the guard across an
//! `.await` that performs I/O (container CLI calls, HTTP probes).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

const STARTING_PORT: u16 = 9000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PodStatus {
    Pending,
    Running,
    Unhealthy,
    Terminating,
    Terminated,
}

impl std::fmt::Display for PodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PodStatus::Pending => "pending",
            PodStatus::Running => "running",
            PodStatus::Unhealthy => "unhealthy",
            PodStatus::Terminating => "terminating",
            PodStatus::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct Pod {
    pub id: Uuid,
    pub deployment_name: String,
    pub image: String,
    pub container_port: u16,
    pub host_port: u16,
    pub container_id: Option<String>,
    pub container_ip: Option<String>,
    pub status: PodStatus,
    pub health_check_failures: u32,
    pub release_version: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Pod {
    /// First 8 characters of the pod id, used for display and container naming.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    /// Derived container name: `pod-<first 8 chars of id>`.
    pub fn container_name(&self) -> String {
        format!("pod-{}", self.short_id())
    }

    /// The address the dispatcher should route traffic to: the container's
    /// own IP when known (bridge networking worked), else the published host
    /// port on loopback.
    pub fn host_address(&self) -> String {
        match &self.container_ip {
            Some(ip) => format!("{ip}:{}", self.container_port),
            None => format!("127.0.0.1:{}", self.host_port),
        }
    }
}

/// A declarative deployment description, immutable for the lifetime of the
/// deployment name.
#[derive(Debug, Clone)]
pub struct DeploymentSpec {
    pub name: String,
    pub image: Option<String>,
    pub dockerfile: Option<String>,
    pub context: Option<String>,
    pub replicas: u32,
    pub container_port: u16,
    pub health_check_path: String,
    pub health_check_interval: u64,
    pub remote_url: Option<String>,
}

impl DeploymentSpec {
    pub fn needs_build(&self) -> bool {
        self.dockerfile.is_some()
    }

    pub fn resolved_image(&self) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| format!("{}:local", self.name))
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentState {
    pub spec: DeploymentSpec,
    pub current_version: Option<String>,
    pub rolling_update_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PodInfo {
    pub id: String,
    pub name: String,
    pub status: String,
    pub version: Option<String>,
}

struct RegistryInner {
    pods: HashMap<Uuid, Pod>,
    /// Insertion order of `pods`' keys. `HashMap` iteration order is
    /// unspecified and reshuffles per process (seeded by a random hash key),
    /// but callers like `Dispatcher::LeastConnections` need a stable "first"
    /// pod — so every read that has an order-sensitive consumer walks this
    /// index instead of `pods.values()` directly.
    pod_order: Vec<Uuid>,
    deployments: HashMap<String, DeploymentState>,
    next_port: u16,
}

impl RegistryInner {
    /// Pods in insertion order, oldest first.
    fn pods_in_order(&self) -> impl Iterator<Item = &Pod> {
        self.pod_order.iter().filter_map(|id| self.pods.get(id))
    }
}

pub struct PodRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for PodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PodRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                pods: HashMap::new(),
                pod_order: Vec::new(),
                deployments: HashMap::new(),
                next_port: STARTING_PORT,
            }),
        }
    }

    /// Register (or re-register) a deployment spec, preserving an existing
    /// current version if one is already tracked.
    pub async fn register_deployment(&self, spec: DeploymentSpec) {
        let mut inner = self.inner.lock().await;
        let name = spec.name.clone();
        inner
            .deployments
            .entry(name)
            .and_modify(|state| state.spec = spec.clone())
            .or_insert(DeploymentState {
                spec,
                current_version: None,
                rolling_update_active: false,
            });
    }

    pub async fn deployment(&self, name: &str) -> Option<DeploymentState> {
        let inner = self.inner.lock().await;
        inner.deployments.get(name).cloned()
    }

    pub async fn deployment_names(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.deployments.keys().cloned().collect()
    }

    pub async fn set_current_version(&self, name: &str, version: Option<String>) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.deployments.get_mut(name) {
            state.current_version = version;
        }
    }

    /// Atomically check-and-set the rolling-update flag. Returns `true` if
    /// this call claimed the flag (it was previously clear), `false` if
    /// another rolling update already owns it.
    pub async fn try_begin_rolling_update(&self, name: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.deployments.get_mut(name) {
            Some(state) if !state.rolling_update_active => {
                state.rolling_update_active = true;
                true
            }
            _ => false,
        }
    }

    pub async fn clear_rolling_update(&self, name: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.deployments.get_mut(name) {
            state.rolling_update_active = false;
        }
    }

    pub async fn rolling_update_names(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .deployments
            .iter()
            .filter(|(_, s)| s.rolling_update_active)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Allocate the next host port, starting at 9000 and never reused within
    /// the process lifetime.
    pub async fn allocate_port(&self) -> u16 {
        let mut inner = self.inner.lock().await;
        let port = inner.next_port;
        inner.next_port += 1;
        port
    }

    pub async fn insert_pod(&self, pod: Pod) {
        let mut inner = self.inner.lock().await;
        if !inner.pods.contains_key(&pod.id) {
            inner.pod_order.push(pod.id);
        }
        inner.pods.insert(pod.id, pod);
    }

    pub async fn remove_pod(&self, id: Uuid) -> Option<Pod> {
        let mut inner = self.inner.lock().await;
        inner.pod_order.retain(|&pid| pid != id);
        inner.pods.remove(&id)
    }

    pub async fn get_pod(&self, id: Uuid) -> Option<Pod> {
        let inner = self.inner.lock().await;
        inner.pods.get(&id).cloned()
    }

    pub async fn set_status(&self, id: Uuid, status: PodStatus) {
        let mut inner = self.inner.lock().await;
        if let Some(pod) = inner.pods.get_mut(&id) {
            pod.status = status;
        }
    }

    pub async fn set_container_id(&self, id: Uuid, container_id: String) {
        let mut inner = self.inner.lock().await;
        if let Some(pod) = inner.pods.get_mut(&id) {
            pod.container_id = Some(container_id);
        }
    }

    pub async fn set_container_ip(&self, id: Uuid, container_ip: Option<String>) {
        let mut inner = self.inner.lock().await;
        if let Some(pod) = inner.pods.get_mut(&id) {
            pod.container_ip = container_ip;
        }
    }

    pub async fn reset_failures(&self, id: Uuid) {
        let mut inner = self.inner.lock().await;
        if let Some(pod) = inner.pods.get_mut(&id) {
            pod.health_check_failures = 0;
        }
    }

    /// Increment the failure counter and return the new value.
    pub async fn increment_failures(&self, id: Uuid) -> u32 {
        let mut inner = self.inner.lock().await;
        if let Some(pod) = inner.pods.get_mut(&id) {
            pod.health_check_failures += 1;
            pod.health_check_failures
        } else {
            0
        }
    }

    /// Healthy pods for `deployment`, in insertion order — the dispatcher's
    /// `LeastConnections` strategy relies on "first" being stable here.
    pub async fn healthy_pods(&self, deployment: &str) -> Vec<Pod> {
        let inner = self.inner.lock().await;
        inner
            .pods_in_order()
            .filter(|p| p.deployment_name == deployment && p.status == PodStatus::Running)
            .cloned()
            .collect()
    }

    pub async fn all_healthy_pods(&self) -> Vec<Pod> {
        let inner = self.inner.lock().await;
        inner
            .pods_in_order()
            .filter(|p| p.status == PodStatus::Running)
            .cloned()
            .collect()
    }

    pub async fn running_pods(&self, deployment: &str) -> Vec<Pod> {
        self.healthy_pods(deployment).await
    }

    pub async fn pod_counts_by_version(&self, deployment: &str) -> HashMap<String, usize> {
        let inner = self.inner.lock().await;
        let mut counts = HashMap::new();
        for pod in inner
            .pods_in_order()
            .filter(|p| p.deployment_name == deployment)
        {
            let key = pod.release_version.clone().unwrap_or_default();
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }

    pub async fn all_pod_counts_by_version(&self) -> HashMap<String, HashMap<String, usize>> {
        let names = self.deployment_names().await;
        let mut result = HashMap::new();
        for name in names {
            result.insert(name.clone(), self.pod_counts_by_version(&name).await);
        }
        result
    }

    pub async fn all_pods_info(&self) -> HashMap<String, Vec<PodInfo>> {
        let inner = self.inner.lock().await;
        let mut result: HashMap<String, Vec<PodInfo>> = HashMap::new();
        for pod in inner.pods_in_order() {
            result
                .entry(pod.deployment_name.clone())
                .or_default()
                .push(PodInfo {
                    id: pod.short_id(),
                    name: pod.container_name(),
                    status: pod.status.to_string(),
                    version: pod.release_version.clone(),
                });
        }
        result
    }

    pub async fn is_empty(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.pods.is_empty()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.pods.clear();
        inner.pod_order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> DeploymentSpec {
        DeploymentSpec {
            name: name.to_string(),
            image: Some("nginx:alpine".to_string()),
            dockerfile: None,
            context: None,
            replicas: 2,
            container_port: 8080,
            health_check_path: "/health".to_string(),
            health_check_interval: 10,
            remote_url: None,
        }
    }

    fn new_pod(deployment: &str, status: PodStatus, host_port: u16) -> Pod {
        Pod {
            id: Uuid::new_v4(),
            deployment_name: deployment.to_string(),
            image: "nginx:alpine".to_string(),
            container_port: 8080,
            host_port,
            container_id: Some("abc123".to_string()),
            container_ip: None,
            status,
            health_check_failures: 0,
            release_version: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ports_allocate_monotonically_and_never_repeat() {
        let registry = PodRegistry::new();
        let a = registry.allocate_port().await;
        let b = registry.allocate_port().await;
        let c = registry.allocate_port().await;
        assert_eq!(a, 9000);
        assert_eq!(b, 9001);
        assert_eq!(c, 9002);
    }

    #[tokio::test]
    async fn healthy_pods_only_includes_running_in_the_named_deployment() {
        let registry = PodRegistry::new();
        let running = new_pod("web", PodStatus::Running, 9000);
        let pending = new_pod("web", PodStatus::Pending, 9001);
        let other_deployment = new_pod("worker", PodStatus::Running, 9002);
        registry.insert_pod(running.clone()).await;
        registry.insert_pod(pending).await;
        registry.insert_pod(other_deployment).await;

        let healthy = registry.healthy_pods("web").await;
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].id, running.id);
    }

    #[tokio::test]
    async fn healthy_pods_preserves_insertion_order_across_many_pods() {
        let registry = PodRegistry::new();
        let mut ids = Vec::new();
        for port in 9000..9020 {
            let pod = new_pod("web", PodStatus::Running, port);
            ids.push(pod.id);
            registry.insert_pod(pod).await;
        }

        let healthy = registry.healthy_pods("web").await;
        let seen: Vec<Uuid> = healthy.iter().map(|p| p.id).collect();
        assert_eq!(seen, ids, "HashMap iteration order must not leak through");
    }

    #[tokio::test]
    async fn removing_a_pod_does_not_disturb_the_order_of_the_rest() {
        let registry = PodRegistry::new();
        let a = new_pod("web", PodStatus::Running, 9000);
        let b = new_pod("web", PodStatus::Running, 9001);
        let c = new_pod("web", PodStatus::Running, 9002);
        registry.insert_pod(a.clone()).await;
        registry.insert_pod(b.clone()).await;
        registry.insert_pod(c.clone()).await;

        registry.remove_pod(b.id).await;

        let remaining = registry.healthy_pods("web").await;
        assert_eq!(remaining.iter().map(|p| p.id).collect::<Vec<_>>(), vec![a.id, c.id]);
    }

    #[tokio::test]
    async fn rolling_update_flag_is_exclusive() {
        let registry = PodRegistry::new();
        registry.register_deployment(spec("web")).await;
        assert!(registry.try_begin_rolling_update("web").await);
        assert!(!registry.try_begin_rolling_update("web").await);
        registry.clear_rolling_update("web").await;
        assert!(registry.try_begin_rolling_update("web").await);
    }

    #[tokio::test]
    async fn host_address_prefers_container_ip() {
        let mut pod = new_pod("web", PodStatus::Running, 9005);
        assert_eq!(pod.host_address(), "127.0.0.1:9005");
        pod.container_ip = Some("172.17.0.4".to_string());
        assert_eq!(pod.host_address(), "172.17.0.4:8080");
    }

    #[tokio::test]
    async fn failure_counter_increments_and_resets() {
        let registry = PodRegistry::new();
        let pod = new_pod("web", PodStatus::Running, 9000);
        registry.insert_pod(pod.clone()).await;
        assert_eq!(registry.increment_failures(pod.id).await, 1);
        assert_eq!(registry.increment_failures(pod.id).await, 2);
        registry.reset_failures(pod.id).await;
        let fetched = registry.get_pod(pod.id).await.unwrap();
        assert_eq!(fetched.health_check_failures, 0);
    }

    #[tokio::test]
    async fn shutdown_clears_registry() {
        let registry = PodRegistry::new();
        registry.insert_pod(new_pod("web", PodStatus::Running, 9000)).await;
        assert!(!registry.is_empty().await);
        registry.clear().await;
        assert!(registry.is_empty().await);
    }
}
