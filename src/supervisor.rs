//! Supervisory control plane: the health tick loop, pod replacement, rolling
//! updates, and throttled release polling.
//!
//! All mutation goes through [`PodRegistry`], which serializes state
//! transitions behind its own mutex; this module is careful never to hold a
//! registry guard across an `.await` that performs I/O (container CLI,
//! health probes, upstream HTTP, pacing sleeps) — it snapshots state,
//! releases the lock, does the I/O, then writes the result back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::health::{HealthChecker, HealthProbe};
use crate::registry::{DeploymentSpec, Pod, PodRegistry, PodStatus};
use crate::release::ReleasePoller;
use crate::runtime::RuntimeAdapter;

const HEALTH_TICK_INTERVAL: Duration = Duration::from_secs(10);
const RELEASE_POLL_THROTTLE: Duration = Duration::from_secs(120);
const FAILURE_THRESHOLD: u32 = 3;
const WAIT_HEALTHY_TIMEOUT: Duration = Duration::from_secs(60);
const WAIT_HEALTHY_INTERVAL: Duration = Duration::from_secs(2);
const ROLLING_UPDATE_PACING: Duration = Duration::from_secs(2);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Supervisor {
    registry: Arc<PodRegistry>,
    runtime: Arc<dyn RuntimeAdapter>,
    health_probe: Arc<dyn HealthChecker>,
    release_poller: ReleasePoller,
    last_release_check: Mutex<Option<Instant>>,
    shutting_down: Arc<AtomicBool>,
    wake: Arc<Notify>,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(registry: Arc<PodRegistry>, runtime: Arc<dyn RuntimeAdapter>) -> Self {
        Self::with_health_checker(registry, runtime, Arc::new(HealthProbe::new()))
    }

    /// Dependency-inject the health checker independently of the runtime,
    /// per the "resolve by injection at start, not self-reference in the
    /// constructor" guidance — also what lets tests substitute a fake.
    pub fn with_health_checker(
        registry: Arc<PodRegistry>,
        runtime: Arc<dyn RuntimeAdapter>,
        health_probe: Arc<dyn HealthChecker>,
    ) -> Self {
        Self {
            registry,
            runtime,
            health_probe,
            release_poller: ReleasePoller::new(),
            last_release_check: Mutex::new(None),
            shutting_down: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            tick_handle: Mutex::new(None),
        }
    }

    /// Register `spec`, resolve its starting release version, build its
    /// image if needed, start its replicas, and (on first call) launch the
    /// health tick loop.
    pub async fn deploy(self: &Arc<Self>, spec: DeploymentSpec) -> anyhow::Result<()> {
        let name = spec.name.clone();
        self.registry.register_deployment(spec.clone()).await;

        let version = if let Some(remote_url) = &spec.remote_url {
            match self.release_poller.get_latest(remote_url).await {
                Some(release) => Some(release.tag_name),
                None => {
                    warn!(deployment = %name, "could not resolve an initial release version");
                    Some("unknown".to_string())
                }
            }
        } else {
            None
        };
        self.registry
            .set_current_version(&name, version.clone())
            .await;

        if spec.needs_build() {
            self.build_for(&spec, version.as_deref()).await?;
        }

        for _ in 0..spec.replicas {
            match self.start_pod(&spec, version.clone()).await {
                Ok(pod) => {
                    info!(deployment = %name, pod_id = %pod.id, "started pod");
                }
                Err(e) => {
                    error!(deployment = %name, error = %e, "failed to start pod during deploy");
                }
            }
        }

        let mut handle_guard = self.tick_handle.lock().await;
        if handle_guard.is_none() {
            let this = Arc::clone(self);
            *handle_guard = Some(tokio::spawn(async move {
                this.health_tick_loop().await;
            }));
        }

        Ok(())
    }

    async fn build_for(&self, spec: &DeploymentSpec, version: Option<&str>) -> anyhow::Result<()> {
        let dockerfile = spec
            .dockerfile
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("deployment {} has no dockerfile", spec.name))?;
        let context = spec.context.as_deref().unwrap_or(".");
        let mut build_args = Vec::new();
        if let Some(version) = version {
            build_args.push(("RELEASE_VERSION".to_string(), version.to_string()));
        }
        self.runtime
            .build_image(dockerfile, context, &spec.resolved_image(), &build_args)
            .await?;
        Ok(())
    }

    async fn start_pod(&self, spec: &DeploymentSpec, version: Option<String>) -> anyhow::Result<Pod> {
        let host_port = self.registry.allocate_port().await;
        let id = Uuid::new_v4();
        let mut pod = Pod {
            id,
            deployment_name: spec.name.clone(),
            image: spec.resolved_image(),
            container_port: spec.container_port,
            host_port,
            container_id: None,
            container_ip: None,
            status: PodStatus::Pending,
            health_check_failures: 0,
            release_version: version,
            created_at: Utc::now(),
        };

        let container_name = pod.container_name();
        let container_id = match self
            .runtime
            .run_container(&pod.image, &container_name, host_port, pod.container_port)
            .await
        {
            Ok(id) => id,
            Err(e) => return Err(anyhow::anyhow!("failed to run container: {e}")),
        };
        pod.container_id = Some(container_id.clone());

        let ip = self
            .runtime
            .get_container_ip(&container_id)
            .await
            .unwrap_or(None);
        pod.container_ip = ip;
        pod.status = PodStatus::Running;

        self.registry.insert_pod(pod.clone()).await;
        Ok(pod)
    }

    /// Try to start a pod; if the container was created but a later step
    /// fails, best-effort stop+remove it rather than leaking it.
    async fn start_pod_or_cleanup(&self, spec: &DeploymentSpec, version: Option<String>) -> Option<Pod> {
        match self.start_pod(spec, version).await {
            Ok(pod) => Some(pod),
            Err(e) => {
                warn!(deployment = %spec.name, error = %e, "pod start failed");
                None
            }
        }
    }

    async fn wait_for_pod_healthy(&self, pod: &Pod, spec: &DeploymentSpec) -> bool {
        let deadline = Instant::now() + WAIT_HEALTHY_TIMEOUT;
        loop {
            let (host, port) = probe_target(pod);
            if self
                .health_probe
                .check(&host, port, &spec.health_check_path)
                .await
            {
                return true;
            }
            if Instant::now() >= deadline || self.shutting_down.load(Ordering::SeqCst) {
                return false;
            }
            tokio::time::sleep(WAIT_HEALTHY_INTERVAL).await;
        }
    }

    async fn terminate(&self, pod: &Pod) {
        self.registry
            .set_status(pod.id, PodStatus::Terminating)
            .await;
        if let Some(container_id) = &pod.container_id {
            if let Err(e) = self.runtime.stop_container(container_id).await {
                warn!(pod_id = %pod.id, error = %e, "stop_container failed during terminate");
            }
            if let Err(e) = self.runtime.remove_container(container_id).await {
                warn!(pod_id = %pod.id, error = %e, "remove_container failed during terminate");
            }
        }
        self.registry
            .set_status(pod.id, PodStatus::Terminated)
            .await;
        self.registry.remove_pod(pod.id).await;
    }

    /// Replace a single unhealthy pod: start a fresh one at the same
    /// version, and only tear down the old pod once the new one proves
    /// healthy. If the new pod never becomes healthy, it is discarded and
    /// the old pod is left in place to be retried on the next tick.
    async fn replace(&self, spec: &DeploymentSpec, pod: Pod) {
        let new_pod = match self
            .start_pod_or_cleanup(spec, pod.release_version.clone())
            .await
        {
            Some(p) => p,
            None => {
                warn!(deployment = %spec.name, pod_id = %pod.id, "replacement pod failed to start");
                return;
            }
        };

        if self.wait_for_pod_healthy(&new_pod, spec).await {
            self.terminate(&pod).await;
            info!(deployment = %spec.name, old_pod = %pod.id, new_pod = %new_pod.id, "replaced unhealthy pod");
        } else {
            warn!(deployment = %spec.name, new_pod = %new_pod.id, "replacement pod did not become healthy, rolling it back");
            self.terminate(&new_pod).await;
        }
    }

    /// Drive a rolling update of `name` to `new_version`: rebuild if needed,
    /// then sequentially replace each currently-running pod, new-first /
    /// old-after, so the dispatcher is never left with zero healthy pods
    /// solely because of the update.
    pub async fn perform_rolling_update(&self, name: &str, new_version: String) {
        if !self.registry.try_begin_rolling_update(name).await {
            return;
        }

        let state = match self.registry.deployment(name).await {
            Some(s) => s,
            None => {
                self.registry.clear_rolling_update(name).await;
                return;
            }
        };
        let spec = state.spec;

        if spec.needs_build() {
            if let Err(e) = self.build_for(&spec, Some(&new_version)).await {
                error!(deployment = name, error = %e, "rolling update build failed");
                self.registry.clear_rolling_update(name).await;
                return;
            }
        }

        self.registry
            .set_current_version(name, Some(new_version.clone()))
            .await;

        let current_pods = self.registry.running_pods(name).await;
        if current_pods.is_empty() {
            for _ in 0..spec.replicas {
                self.start_pod_or_cleanup(&spec, Some(new_version.clone()))
                    .await;
            }
            self.registry.clear_rolling_update(name).await;
            return;
        }

        for old_pod in current_pods {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            let new_pod = match self
                .start_pod_or_cleanup(&spec, Some(new_version.clone()))
                .await
            {
                Some(p) => p,
                None => continue,
            };
            if self.wait_for_pod_healthy(&new_pod, &spec).await {
                self.terminate(&old_pod).await;
                info!(deployment = name, old_pod = %old_pod.id, new_pod = %new_pod.id, "rolling update step complete");
            } else {
                warn!(deployment = name, new_pod = %new_pod.id, "rolling update step failed health check, keeping old pod");
                self.terminate(&new_pod).await;
            }
            tokio::time::sleep(ROLLING_UPDATE_PACING).await;
        }

        self.registry.clear_rolling_update(name).await;
    }

    /// For every deployment with a `remoteUrl` and no rolling update already
    /// in flight, check for a new release and kick off an update on a hit.
    async fn release_sweep(&self) {
        for name in self.registry.deployment_names().await {
            let Some(state) = self.registry.deployment(&name).await else {
                continue;
            };
            if state.rolling_update_active {
                continue;
            }
            let Some(remote_url) = state.spec.remote_url.clone() else {
                continue;
            };
            let update = self
                .release_poller
                .check_for_update(&remote_url, state.current_version.as_deref())
                .await;
            if let Some(release) = update {
                info!(deployment = %name, new_version = %release.tag_name, "release sweep found an update");
                self.perform_rolling_update(&name, release.tag_name).await;
            }
        }
    }

    async fn health_tick_loop(self: Arc<Self>) {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }

            let mut last_check = self.last_release_check.lock().await;
            let should_poll = match *last_check {
                None => true,
                Some(t) => t.elapsed() >= RELEASE_POLL_THROTTLE,
            };
            if should_poll {
                *last_check = Some(Instant::now());
            }
            drop(last_check);

            if should_poll {
                self.release_sweep().await;
            }

            for pod in self.registry.all_healthy_pods().await {
                if self.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                self.check_pod(&pod).await;
            }

            tokio::select! {
                _ = tokio::time::sleep(HEALTH_TICK_INTERVAL) => {}
                _ = self.wake.notified() => {
                    if self.shutting_down.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
    }

    async fn check_pod(&self, pod: &Pod) {
        let Some(state) = self.registry.deployment(&pod.deployment_name).await else {
            return;
        };
        let (host, port) = probe_target(pod);
        let healthy = self
            .health_probe
            .check(&host, port, &state.spec.health_check_path)
            .await;

        if healthy {
            self.registry.reset_failures(pod.id).await;
            return;
        }

        let failures = self.registry.increment_failures(pod.id).await;
        if failures >= FAILURE_THRESHOLD {
            warn!(deployment = %pod.deployment_name, pod_id = %pod.id, failures, "pod failed health checks, replacing");
            self.replace(&state.spec, pod.clone()).await;
        }
    }

    /// Cancel the health tick loop and best-effort stop+remove every pod.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();

        let handle = self.tick_handle.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle)
                .await
                .is_err()
            {
                warn!("health tick loop did not exit within the shutdown timeout");
            }
        }

        let pods = self.registry.all_healthy_pods().await;
        for pod in pods {
            self.terminate(&pod).await;
        }
        self.registry.clear().await;
    }
}

fn probe_target(pod: &Pod) -> (String, u16) {
    match &pod.container_ip {
        Some(ip) => (ip.clone(), pod.container_port),
        None => ("127.0.0.1".to_string(), pod.host_port),
    }
}
