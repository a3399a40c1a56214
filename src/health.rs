//! Single-shot HTTP health probing.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Abstracts the health check so the supervisor can be exercised with a
/// fake in tests, the same way [`crate::runtime::RuntimeAdapter`] is.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, host: &str, port: u16, path: &str) -> bool;
}

#[derive(Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(PROBE_TIMEOUT)
                .build()
                .expect("failed to build health probe client"),
        }
    }
}

#[async_trait]
impl HealthChecker for HealthProbe {
    /// Issue a GET to `http://{host}:{port}{path}`. Any transport error or
    /// non-2xx response collapses to `false` — there are no retries here,
    /// the supervisor's failure counter provides that semantics.
    async fn check(&self, host: &str, port: u16, path: &str) -> bool {
        let url = format!("http://{host}:{port}{path}");
        match self.client.get(&url).send().await {
            Ok(response) => {
                let status = response.status();
                status.as_u16() >= 200 && status.as_u16() < 300
            }
            Err(e) => {
                debug!(url, error = %e, "health probe unreachable");
                false
            }
        }
    }
}


#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// A health checker whose verdict is fixed by default but can be
    /// overridden per-port, avoiding a real HTTP round trip against a fake
    /// container address. Ports (not hosts) distinguish pods here because
    /// the fake runtime has no real bridge network to assign distinct IPs.
    pub struct FakeHealthChecker {
        default_healthy: AtomicBool,
        unhealthy_ports: Mutex<HashSet<u16>>,
    }

    impl FakeHealthChecker {
        pub fn always_healthy() -> Self {
            Self {
                default_healthy: AtomicBool::new(true),
                unhealthy_ports: Mutex::new(HashSet::new()),
            }
        }

        pub fn always_unhealthy() -> Self {
            Self {
                default_healthy: AtomicBool::new(false),
                unhealthy_ports: Mutex::new(HashSet::new()),
            }
        }

        pub fn set_healthy(&self, healthy: bool) {
            self.default_healthy.store(healthy, Ordering::SeqCst);
        }

        pub fn set_port_healthy(&self, port: u16, healthy: bool) {
            let mut ports = self.unhealthy_ports.lock().unwrap();
            if healthy {
                ports.remove(&port);
            } else {
                ports.insert(port);
            }
        }
    }

    #[async_trait]
    impl HealthChecker for FakeHealthChecker {
        async fn check(&self, _host: &str, port: u16, _path: &str) -> bool {
            if self.unhealthy_ports.lock().unwrap().contains(&port) {
                return false;
            }
            self.default_healthy.load(Ordering::SeqCst)
        }
    }
}
