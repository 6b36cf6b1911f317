//! `/auth/token` credential exchange surface (minting and revoking
//! registry-issued bearer tokens).

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct MintTokenRequest {
    #[serde(default)]
    scopes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MintTokenResponse {
    token: String,
    jti: String,
    expires_at: u64,
}

pub async fn mint_token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<MintTokenRequest>,
) -> Response {
    let id_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .unwrap_or("");

    let identity = match state.auth.verify_identity(id_token).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(error = %e, "token exchange rejected: identity token invalid");
            let status = StatusCode::from_u16(e.to_status_code()).unwrap_or(StatusCode::UNAUTHORIZED);
            return (status, Json(json!({ "detail": e.to_string() }))).into_response();
        }
    };

    let requested: HashSet<String> = body.scopes.into_iter().collect();
    match state.auth.mint_token(identity, &requested) {
        Ok(minted) => {
            tracing::info!(jti = %minted.jti, username = %minted.principal.username, "issued registry token");
            Json(MintTokenResponse {
                token: minted.token,
                jti: minted.jti,
                expires_at: minted.exp,
            })
            .into_response()
        }
        Err(e) => {
            let status = StatusCode::from_u16(e.to_status_code()).unwrap_or(StatusCode::FORBIDDEN);
            (status, Json(json!({ "detail": e.to_string() }))).into_response()
        }
    }
}

pub async fn revoke_token_handler(State(state): State<Arc<AppState>>, Path(jti): Path<String>) -> Response {
    if state.auth.revoke_token(&jti) {
        tracing::info!(jti = %jti, "revoked registry token via /auth/token");
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "detail": "unknown token" }))).into_response()
    }
}
