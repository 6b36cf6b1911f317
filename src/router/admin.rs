//! Admin endpoints: service lifecycle and scope-group membership.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::auth::Principal;
use crate::config::{AuthConfig, ScopeAccessConfig};
use crate::registry::{AuthProvider, HealthState, Service};
use crate::Error;

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<Principal, Response> {
    let credential = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .unwrap_or("");

    let principal = state
        .auth
        .validate_bearer(credential)
        .await
        .map_err(|e| error_response(&e))?;

    if !principal.is_admin {
        return Err(error_response(&Error::Forbidden("admin scope required".to_string())));
    }
    Ok(principal)
}

#[derive(Debug, Deserialize)]
pub struct RegisterServiceRequest {
    name: String,
    path: String,
    proxy_pass_url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    auth_provider: AuthProvider,
    #[serde(default)]
    headers_template: std::collections::HashMap<String, String>,
}

pub async fn register_service_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RegisterServiceRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers).await {
        return resp;
    }

    let service = Service {
        name: body.name,
        path: body.path,
        proxy_pass_url: body.proxy_pass_url,
        description: body.description,
        tags: body.tags,
        supported_transports: vec![crate::registry::SupportedTransport::StreamableHttp],
        enabled: false,
        auth_provider: body.auth_provider,
        headers_template: expand_headers_template(body.headers_template),
        tools: Vec::new(),
        health: HealthState::Unknown,
        last_checked_ms: 0,
        scan_status: None,
    };

    if let Err(e) = service.validate() {
        return error_response(&e);
    }

    match state.registry.register(service) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => error_response(&e),
    }
}

fn expand_headers_template(
    template: std::collections::HashMap<String, String>,
) -> std::collections::HashMap<String, String> {
    let re = regex::Regex::new(r"\$([A-Z_][A-Z0-9_]*)").unwrap();
    template
        .into_iter()
        .map(|(k, v)| {
            let expanded = re
                .replace_all(&v, |caps: &regex::Captures| {
                    std::env::var(&caps[1]).unwrap_or_default()
                })
                .into_owned();
            (k, expanded)
        })
        .collect()
}

pub async fn remove_service_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers).await {
        return resp;
    }
    match state.registry.remove(&with_leading_slash(&path)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    enabled: bool,
}

pub async fn set_enabled_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(path): Path<String>,
    Json(body): Json<SetEnabledRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers).await {
        return resp;
    }
    match state.registry.set_enabled(&with_leading_slash(&path), body.enabled) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthcheckQuery {
    path: String,
}

pub async fn healthcheck_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HealthcheckQuery>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers).await {
        return resp;
    }
    let path = with_leading_slash(&query.path);
    match state.registry.get_by_path(&path) {
        Some(service) => Json(json!({
            "path": service.path,
            "health": service.health.label(),
            "lastCheckedMs": service.last_checked_ms,
            "toolCount": service.tools.len(),
        }))
        .into_response(),
        None => error_response(&Error::ServiceNotFound(path)),
    }
}

fn with_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Admin mutation of the Group -> Scope mapping. Persists `scopes.yml` and
/// triggers an atomic reload of the in-memory mapping.
#[derive(Debug, Deserialize)]
pub struct ScopeGroupRequest {
    scope: String,
    service: String,
    #[serde(default)]
    tools: Vec<String>,
}

pub async fn add_server_to_scope_group_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ScopeGroupRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers).await {
        return resp;
    }

    let mut config = load_scopes_document(&state.scopes_file).unwrap_or_default();
    config.scope_access.insert(
        body.scope.clone(),
        ScopeAccessConfig {
            service: body.service,
            tools: if body.tools.is_empty() { vec!["*".to_string()] } else { body.tools },
        },
    );

    if let Err(e) = save_scopes_document(&state.scopes_file, &config) {
        return error_response(&e);
    }
    state.auth.reload_scopes(&config);
    StatusCode::NO_CONTENT.into_response()
}

pub async fn remove_server_from_scope_group_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ScopeGroupRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers).await {
        return resp;
    }

    let mut config = load_scopes_document(&state.scopes_file).unwrap_or_default();
    config.scope_access.remove(&body.scope);

    if let Err(e) = save_scopes_document(&state.scopes_file, &config) {
        return error_response(&e);
    }
    state.auth.reload_scopes(&config);
    StatusCode::NO_CONTENT.into_response()
}

fn load_scopes_document(path: &std::path::Path) -> Option<AuthConfig> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_yaml::from_str(&text).ok()
}

fn save_scopes_document(path: &std::path::Path, config: &AuthConfig) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::Persistence(e.to_string()))?;
    }
    let yaml = serde_yaml::to_string(config).map_err(|e| Error::Persistence(e.to_string()))?;
    let tmp = path.with_extension("yml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| Error::Persistence(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::Persistence(e.to_string()))
}

fn error_response(e: &Error) -> Response {
    let status = StatusCode::from_u16(e.to_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "detail": e.to_string() }))).into_response()
}
