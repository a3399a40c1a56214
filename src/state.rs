//! Shared axum router state.

use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::registry::PodRegistry;

pub struct AppState {
    pub registry: Arc<PodRegistry>,
    pub dispatcher: Dispatcher,
    pub http_client: reqwest::Client,
    /// The single deployment name configured for this process; traffic not
    /// matched by an admin route is forwarded to it.
    pub deployment_name: String,
    pub version: String,
}
