//! `/v0.1/servers*` catalog surface and `/v0.1/tools/find` tool-index query.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AppState;
use crate::auth::Principal;
use crate::registry::{ListFilter, Service};

fn bearer_from(headers: &HeaderMap) -> &str {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .unwrap_or("")
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> crate::Result<Principal> {
    state.auth.validate_bearer(bearer_from(headers)).await
}

fn catalog_name(namespace: &str, path: &str) -> String {
    let flattened = path.trim_start_matches('/').replace('/', "-");
    format!("{namespace}/{flattened}")
}

#[derive(Debug, Serialize)]
struct CatalogEntry {
    name: String,
    path: String,
    description: String,
    tags: Vec<String>,
    health: &'static str,
}

impl CatalogEntry {
    fn from_service(namespace: &str, service: &Service) -> Self {
        Self {
            name: catalog_name(namespace, &service.path),
            path: service.path.clone(),
            description: service.description.clone(),
            tags: service.tags.clone(),
            health: service.health.label(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListServersQuery {
    cursor: Option<String>,
    limit: Option<usize>,
}

pub async fn list_servers_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListServersQuery>,
) -> Response {
    let principal = match authenticate(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return auth_error(&e),
    };

    if query.limit == Some(0) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "limit must be greater than 0" })),
        )
            .into_response();
    }

    let limit = query
        .limit
        .unwrap_or(state.catalog.default_limit)
        .clamp(1, state.catalog.max_limit);

    let mut services = state.registry.list(&ListFilter::default());
    services.sort_by(|a, b| a.name.cmp(&b.name));

    let visible: Vec<_> = services
        .into_iter()
        .filter(|s| s.enabled || principal.is_admin)
        .filter(|s| principal.is_admin || principal.can_access_service(&s.path))
        .collect();

    let start = match &query.cursor {
        Some(cursor) => visible.iter().position(|s| s.name.as_str() > cursor.as_str()).unwrap_or(visible.len()),
        None => 0,
    };

    let page: Vec<CatalogEntry> = visible[start..]
        .iter()
        .take(limit)
        .map(|s| CatalogEntry::from_service(&state.catalog.namespace, s))
        .collect();

    let next_cursor = visible[start..].iter().nth(limit).map(|s| s.name.clone());

    Json(json!({
        "servers": page,
        "metadata": {
            "nextCursor": next_cursor,
            "count": visible.len(),
        }
    }))
    .into_response()
}

pub async fn server_versions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    axum::extract::Path(rest): axum::extract::Path<String>,
) -> Response {
    let principal = match authenticate(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return auth_error(&e),
    };

    let (server_name, requested_version) = split_versions_path(&rest);

    let Some(service) = find_by_catalog_name(&state, &server_name) else {
        return not_found();
    };
    if !service.enabled && !principal.is_admin {
        return not_found();
    }
    if !principal.is_admin && !principal.can_access_service(&service.path) {
        return not_found();
    }

    if let Some(version) = requested_version {
        if version != "latest" && version != "1" {
            return not_found();
        }
    }

    Json(json!({
        "name": catalog_name(&state.catalog.namespace, &service.path),
        "versions": [{
            "version": "1",
            "description": service.description,
            "isLatest": true,
        }]
    }))
    .into_response()
}

fn split_versions_path(rest: &str) -> (String, Option<String>) {
    match rest.split_once("/versions/") {
        Some((name, version)) => (name.to_string(), Some(version.to_string())),
        None => (rest.trim_end_matches("/versions").to_string(), None),
    }
}

fn find_by_catalog_name(state: &AppState, name: &str) -> Option<Arc<Service>> {
    state
        .registry
        .list(&ListFilter::default())
        .into_iter()
        .find(|s| catalog_name(&state.catalog.namespace, &s.path) == name)
}

#[derive(Debug, Deserialize)]
pub struct FindToolsQuery {
    q: String,
    tags: Option<String>,
    top_k: Option<usize>,
}

pub async fn find_tools_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<FindToolsQuery>,
) -> Response {
    let principal = match authenticate(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return auth_error(&e),
    };

    let Some(index) = &state.index else {
        return Json(json!({ "results": [], "error": "tool index unavailable" })).into_response();
    };

    let tags: Vec<String> = query
        .tags
        .map(|t| t.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let hits = match index.query(&query.q, query.top_k, &tags) {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!(error = %e, "tool index query failed");
            return Json(json!({ "results": [], "error": e.to_string() })).into_response();
        }
    };

    let filtered: Vec<_> = hits
        .into_iter()
        .filter(|hit| principal.is_admin || principal.can_access_tool(&hit.service_path, &hit.tool_name))
        .collect();

    Json(json!({ "results": filtered })).into_response()
}

fn auth_error(e: &crate::Error) -> Response {
    let status = StatusCode::from_u16(e.to_status_code()).unwrap_or(StatusCode::UNAUTHORIZED);
    (status, Json(json!({ "detail": e.to_string() }))).into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "no such server" }))).into_response()
}
