use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Failures surfaced by the container runtime adapter.
///
/// Mirrors the taxonomy a CLI-backed runtime can actually produce: a command
/// that ran but exited non-zero, a build that failed, or a binary that isn't
/// on `$PATH` at all.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container command failed: {0}")]
    CommandFailed(String),
    #[error("image build failed: {0}")]
    BuildFailed(String),
    #[error("container runtime not found")]
    NotFound,
}

/// Failures loading the deployment configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no configuration file found, searched: {}", .0.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    NotFound(Vec<PathBuf>),
    #[error("failed to parse configuration file {path}: {cause}")]
    Invalid { path: PathBuf, cause: String },
    #[error("invalid deployment spec: {0}")]
    InvalidSpec(String),
}

/// Failures surfaced by the reverse proxy when forwarding a request.
///
/// These map directly onto the two response codes the proxy is allowed to
/// manufacture itself; every other status comes verbatim from the backend.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy backends available")]
    NoBackend,
    #[error("Backend error: {0}")]
    Upstream(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::NoBackend => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}
