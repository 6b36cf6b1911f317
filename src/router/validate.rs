//! `GET /validate` — the internal contract between the Edge Router and the
//! Auth Resolver. Exposed as a real HTTP endpoint so an external router
//! deployment could delegate to this process too, even though the in-process
//! proxy handler calls the resolver directly rather than looping back here.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use super::AppState;

pub async fn validate_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let credential = headers
        .get("x-authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .unwrap_or("");

    match state.auth.validate_bearer(credential).await {
        Ok(principal) => {
            let mut response_headers = HeaderMap::new();
            response_headers.insert("x-user", header_value(&principal.username));
            response_headers.insert("x-username", header_value(&principal.username));
            response_headers.insert("x-scopes", header_value(&principal.scopes_header_value()));
            response_headers.insert(
                "x-auth-method",
                header_value(match principal.auth_method {
                    crate::auth::AuthMethod::OidcBearer => "oidc-bearer",
                    crate::auth::AuthMethod::SessionCookie => "session-cookie",
                    crate::auth::AuthMethod::MintedToken => "minted-token",
                }),
            );
            (StatusCode::NO_CONTENT, response_headers).into_response()
        }
        Err(e) => {
            let status = StatusCode::from_u16(e.to_status_code()).unwrap_or(StatusCode::UNAUTHORIZED);
            (status, Json(json!({ "detail": e.to_string() }))).into_response()
        }
    }
}

fn header_value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static(""))
}
