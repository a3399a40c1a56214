//! Backend selection for a deployment's healthy pods.

use rand::Rng;
use tokio::sync::Mutex;

use crate::registry::{Pod, PodRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    RoundRobin,
    Random,
    LeastConnections,
}

/// Chooses the next pod to route a request to. The round-robin counter is
/// process-global rather than per-deployment: its identity is immaterial,
/// only its monotonicity matters, and it never shares a lock with the
/// registry (it snapshots the healthy-pods view before advancing).
pub struct Dispatcher {
    strategy: Strategy,
    round_robin_counter: Mutex<usize>,
}

impl Dispatcher {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            round_robin_counter: Mutex::new(0),
        }
    }

    pub async fn next_pod(&self, registry: &PodRegistry, deployment: &str) -> Option<Pod> {
        let candidates = registry.healthy_pods(deployment).await;
        if candidates.is_empty() {
            return None;
        }
        match self.strategy {
            Strategy::RoundRobin => {
                let mut counter = self.round_robin_counter.lock().await;
                let index = *counter % candidates.len();
                *counter = counter.wrapping_add(1);
                Some(candidates[index].clone())
            }
            Strategy::Random => {
                let index = rand::thread_rng().gen_range(0..candidates.len());
                Some(candidates[index].clone())
            }
            // Placeholder: real connection tracking is not yet implemented.
            Strategy::LeastConnections => Some(candidates[0].clone()),
        }
    }

    pub async fn next_address(&self, registry: &PodRegistry, deployment: &str) -> Option<String> {
        self.next_pod(registry, deployment)
            .await
            .map(|pod| pod.host_address())
    }
}
