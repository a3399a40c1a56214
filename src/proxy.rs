//! Reverse proxy: forwards every non-admin request to the single configured
//! deployment's currently healthy pods, chosen by the [`Dispatcher`].
//!
//! Grounded in the corpus's gateway-to-backend forwarding pattern: strip
//! hop-by-hop headers, rewrite the path/query onto the chosen backend, and
//! surface backend failures as a typed `BAD_GATEWAY` rather than panicking.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::state::AppState;

const HOP_BY_HOP_REQUEST: &[&str] = &["host", "connection"];
const HOP_BY_HOP_RESPONSE: &[&str] = &["connection", "transfer-encoding"];

pub async fn handler(
    State(state): State<Arc<AppState>>,
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    match forward(&state, method, uri, headers, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn forward(
    state: &AppState,
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ProxyError> {
    let deployment = state.deployment_name.as_str();
    let address = state
        .dispatcher
        .next_address(&state.registry, deployment)
        .await
        .ok_or(ProxyError::NoBackend)?;

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target_url = format!("http://{address}{path_and_query}");
    debug!(target_url, "forwarding request");

    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    let mut request = state.http_client.request(method, &target_url);
    for (name, value) in headers.iter() {
        if HOP_BY_HOP_REQUEST.contains(&name.as_str().to_ascii_lowercase().as_str()) {
            continue;
        }
        request = request.header(name, value);
    }
    let request = request.body(bytes);

    let upstream = request.send().await.map_err(|e| {
        warn!(target_url, error = %e, "upstream request failed");
        ProxyError::Upstream(e.to_string())
    })?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers().iter() {
        if HOP_BY_HOP_RESPONSE.contains(&name.as_str().to_ascii_lowercase().as_str()) {
            continue;
        }
        if let Ok(header_name) = HeaderName::from_bytes(name.as_str().as_bytes()) {
            response_headers.insert(header_name, value.clone());
        }
    }

    let body_bytes = upstream
        .bytes()
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    let mut response = Response::builder().status(status);
    if let Some(builder_headers) = response.headers_mut() {
        *builder_headers = response_headers;
    }
    response
        .body(Body::from(body_bytes))
        .map_err(|e| ProxyError::Upstream(e.to_string()))
}
