//! Request router / reverse proxy.
//!
//! Maps the external path prefixes to downstream base URLs, strips the
//! matched prefix, and forwards method, JSON body, query string, and the
//! gateway-set trust headers. Downstream responses are relayed verbatim,
//! structured error responses included; transport-level failures become a
//! generic 500 so clients never see connection internals.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use super::GatewayState;
use crate::client::INTERNAL_API_KEY_HEADER;
use crate::trust::{INTERNAL_TOKEN_HEADER, USER_EMAIL_HEADER, USER_ID_HEADER};
use crate::{Error, Result};

/// Largest proxied request body.
const MAX_PROXY_BODY: usize = 10 * 1024 * 1024;

/// Headers the gateway forwards downstream. Everything else inbound stays
/// at the boundary.
const FORWARDED_HEADERS: [&str; 5] = [
    INTERNAL_TOKEN_HEADER,
    INTERNAL_API_KEY_HEADER,
    USER_ID_HEADER,
    USER_EMAIL_HEADER,
    "content-type",
];

/// Forward an authenticated request to the downstream service owning its
/// path prefix.
pub async fn proxy_handler(
    State(state): State<Arc<GatewayState>>,
    request: Request,
) -> Response {
    match forward(&state, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn forward(state: &GatewayState, request: Request) -> Result<Response> {
    let path = request.uri().path().to_string();
    let route = state
        .routes
        .iter()
        .find(|r| path.starts_with(r.prefix))
        .ok_or_else(|| Error::NotFound("Unknown route".to_string()))?
        .clone();

    let remainder = &path[route.prefix.len()..];
    let query = request
        .uri()
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();
    let target = format!("{}{remainder}{query}", route.base_url);

    let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
        .map_err(|_| Error::Validation("Unsupported method".to_string()))?;
    let forwarded = forwarded_headers(request.headers());

    let body = axum::body::to_bytes(request.into_body(), MAX_PROXY_BODY)
        .await
        .map_err(|_| Error::Validation("Request body too large".to_string()))?;

    debug!(method = %method, path = %path, url = %target, service = route.service, "Proxying");

    let failsafe = state.mesh.client().failsafe(route.service);
    let http = state.mesh.client().http().clone();
    let (status, content_type, response_body) = failsafe
        .call_once(async move {
            let mut req = http.request(method, &target);
            for (name, value) in &forwarded {
                req = req.header(name.as_str(), value.clone());
            }
            if !body.is_empty() {
                req = req.body(body.to_vec());
            }
            let response = req.send().await.map_err(|e| {
                warn!(url = %target, error = %e, "Downstream transport failure");
                Error::Http(e)
            })?;
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let bytes = response.bytes().await.map_err(Error::Http)?;
            // A downstream HTTP response of any status is a delivery
            // success as far as the circuit is concerned.
            Ok((status, content_type, bytes))
        })
        .await?;

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));
    if let Some(ct) = content_type {
        if let Ok(value) = HeaderValue::from_str(&ct) {
            builder = builder.header(CONTENT_TYPE, value);
        }
    }
    builder
        .body(Body::from(response_body))
        .map_err(|e| Error::Internal(format!("Failed to build relayed response: {e}")))
}

fn forwarded_headers(headers: &HeaderMap) -> Vec<(String, HeaderValue)> {
    FORWARDED_HEADERS
        .iter()
        .filter_map(|name| {
            headers
                .get(*name)
                .map(|value| ((*name).to_string(), value.clone()))
        })
        .collect()
}
