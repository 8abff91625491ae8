//! Gateway authentication middleware, the system's single trust boundary.
//!
//! Verifies the external provider token once, resolves the internal user,
//! mints the internal token, and injects the trust headers downstream
//! services rely on. No downstream service ever re-verifies the provider
//! token.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, header::AUTHORIZATION};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::{debug, warn};

use super::GatewayState;
use crate::client::INTERNAL_API_KEY_HEADER;
use crate::principal::Principal;
use crate::trust::{INTERNAL_TOKEN_HEADER, USER_EMAIL_HEADER, USER_ID_HEADER};
use crate::{Error, Result};

/// Largest request body the sync bootstrap path will buffer.
const MAX_SYNC_BODY: usize = 64 * 1024;

/// Authenticate the request and attach the trust headers.
pub async fn auth_middleware(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    match authenticate(&state, request).await {
        Ok(request) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

async fn authenticate(state: &GatewayState, request: Request) -> Result<Request> {
    let path = request.uri().path().to_string();

    let token = bearer_token(&request)
        .ok_or_else(|| Error::Unauthenticated("No token provided".to_string()))?
        .to_string();

    let identity = state.identity.verify(&token).await?;

    // The sync endpoint bootstraps first-time users, so it cannot require
    // the user record to exist yet.
    let is_user_sync = request.method() == Method::POST && is_sync_path(&path);

    let (mut request, principal) = if is_user_sync {
        debug!(subject = %identity.subject, "Bootstrapping principal for user sync");
        let (request, body) = buffer_body(request).await?;
        let email = body.as_ref().and_then(|b| b["email"].as_str().map(String::from));
        let name = body.as_ref().and_then(|b| b["name"].as_str().map(String::from));
        let mut principal = Principal::bootstrap(&identity, email.as_deref());
        if principal.name.is_none() {
            principal.name = name;
        }
        (request, principal)
    } else {
        let user = state
            .mesh
            .user_by_external_id(&identity.subject)
            .await
            .map_err(|e| {
                warn!(subject = %identity.subject, error = %e, "User lookup failed");
                Error::Unauthenticated("User not found".to_string())
            })?;
        (request, principal_from_record(&identity.subject, &user)?)
    };

    let internal_token = state.codec.issue(&principal)?;

    // The gateway is the only writer of trust headers; anything the client
    // supplied under those names is dropped here.
    let headers = request.headers_mut();
    headers.remove(INTERNAL_TOKEN_HEADER);
    headers.remove(INTERNAL_API_KEY_HEADER);
    headers.remove(USER_ID_HEADER);
    headers.remove(USER_EMAIL_HEADER);
    headers.insert(INTERNAL_TOKEN_HEADER, header_value(&internal_token)?);
    headers.insert(INTERNAL_API_KEY_HEADER, header_value(&state.internal_api_key)?);
    headers.insert(USER_ID_HEADER, header_value(&principal.user_id)?);
    headers.insert(USER_EMAIL_HEADER, header_value(&principal.email)?);

    debug!(user = %principal.user_id, path = %path, "Authenticated request");
    request.extensions_mut().insert(principal);
    Ok(request)
}

/// Exact match for the bootstrap endpoint. A prefix match would also
/// cover sibling routes like `/api/users/sync-status` and widen the
/// no-user-record bypass.
fn is_sync_path(path: &str) -> bool {
    path == "/api/users/sync" || path == "/api/users/sync/"
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .filter(|t| !t.is_empty())
}

/// Buffer the body so the bootstrap path can read it, then rebuild the
/// request with the same bytes for the proxy hop.
async fn buffer_body(request: Request) -> Result<(Request, Option<Value>)> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_SYNC_BODY)
        .await
        .map_err(|_| Error::Validation("Request body too large or unreadable".to_string()))?;
    let parsed = serde_json::from_slice(&bytes).ok();
    Ok((Request::from_parts(parts, Body::from(bytes)), parsed))
}

fn principal_from_record(external_id: &str, user: &Value) -> Result<Principal> {
    let user_id = user["id"]
        .as_str()
        .ok_or_else(|| Error::Internal("User record missing id".to_string()))?;
    let email = user["email"]
        .as_str()
        .ok_or_else(|| Error::Internal("User record missing email".to_string()))?;
    Ok(Principal {
        user_id: user_id.to_string(),
        external_id: user["externalId"]
            .as_str()
            .unwrap_or(external_id)
            .to_string(),
        email: email.to_string(),
        name: user["name"].as_str().map(String::from),
    })
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::Internal("Identity value not header-safe".to_string()))
}
