//! Catch-all proxy handler: path-prefix match, auth delegation, upstream forward.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use serde_json::json;

use super::AppState;
use crate::auth::Principal;
use crate::registry::{AuthProvider, Service};
use crate::Error;

/// Matches the incoming request's path against the registry's longest-prefix
/// Service mapping, authenticates it, and forwards it upstream.
pub async fn proxy_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let _permit = match state.inflight.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => return error_response(StatusCode::SERVICE_UNAVAILABLE, "server is draining"),
    };

    let path = request.uri().path().to_string();
    let snapshot = state.registry.snapshot();
    let Some(service) = snapshot.match_path(&path) else {
        return error_response(StatusCode::NOT_FOUND, "no service matches this path");
    };
    let service = service.clone();

    if !service.enabled {
        return error_response(StatusCode::NOT_FOUND, "no service matches this path");
    }

    let mut headers = request.headers().clone();
    let principal = match authenticate(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return map_error(&e),
    };

    if !principal.can_access_service(&service.path) {
        return map_error(&Error::Forbidden(format!(
            "principal has no scope granting access to {}",
            service.path
        )));
    }

    apply_principal_headers(&mut headers, &principal, service.auth_provider);

    let method = request.method().clone();
    let upstream_url = rewrite_url(&service, &path, request.uri());
    forward(&state, &service, method, upstream_url, headers, request.into_body()).await
}

/// Ingress auth validation is identical across auth providers; they differ
/// only in how the `Authorization` header is treated on the forwarded
/// request (see [`apply_principal_headers`]).
async fn authenticate(state: &AppState, headers: &HeaderMap) -> crate::Result<Principal> {
    let credential = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .unwrap_or("");

    state.auth.validate_bearer(credential).await
}

/// Applies the resolver's identity headers onto the upstream request.
/// For `default`/`bedrock-agentcore`, the client's `Authorization` is
/// stripped (the upstream gets its own credentials from `headers_template`
/// instead); for `passthrough`, it is forwarded unchanged.
fn apply_principal_headers(headers: &mut HeaderMap, principal: &Principal, auth_provider: AuthProvider) {
    if auth_provider != AuthProvider::Passthrough {
        headers.remove(axum::http::header::AUTHORIZATION);
    }
    set_header(headers, "x-user", &principal.username);
    set_header(headers, "x-username", &principal.username);
    set_header(headers, "x-scopes", &principal.scopes_header_value());
    set_header(headers, "x-auth-method", auth_method_label(principal));
}

fn auth_method_label(principal: &Principal) -> &'static str {
    match principal.auth_method {
        crate::auth::AuthMethod::OidcBearer => "oidc-bearer",
        crate::auth::AuthMethod::SessionCookie => "session-cookie",
        crate::auth::AuthMethod::MintedToken => "minted-token",
    }
}

fn set_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(n), Ok(v)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
        headers.insert(n, v);
    }
}

/// Rewrites the forwarded path per `auth_provider`: `bedrock-agentcore`
/// strips a trailing `/mcp/` from `proxy_pass_url` and guarantees the
/// forwarded path ends with exactly one `/`.
fn rewrite_url(service: &Service, request_path: &str, uri: &Uri) -> String {
    let remainder = request_path.strip_prefix(&service.path).unwrap_or("");
    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();

    let base = if service.auth_provider == AuthProvider::BedrockAgentcore {
        service
            .proxy_pass_url
            .strip_suffix("/mcp/")
            .or_else(|| service.proxy_pass_url.strip_suffix("/mcp"))
            .unwrap_or(&service.proxy_pass_url)
    } else {
        service.proxy_pass_url.trim_end_matches('/')
    };

    let mut forwarded = format!("{base}{remainder}");
    if service.auth_provider == AuthProvider::BedrockAgentcore && !forwarded.ends_with('/') {
        forwarded.push('/');
    }
    format!("{forwarded}{query}")
}

async fn forward(
    state: &AppState,
    service: &Service,
    method: axum::http::Method,
    url: String,
    mut headers: HeaderMap,
    body: Body,
) -> Response {
    for (key, value) in &service.headers_template {
        set_header(&mut headers, key, value);
    }

    let reqwest_headers = to_reqwest_headers(&headers);
    let reqwest_method =
        reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::POST);

    let upstream_response = state
        .http_client
        .request(reqwest_method, &url)
        .headers(reqwest_headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream().map(
            |r| r.map_err(|e| std::io::Error::other(e.to_string())),
        )))
        .send()
        .await;

    let upstream_response = match upstream_response {
        Ok(r) => r,
        Err(e) if e.is_timeout() => {
            return error_response(StatusCode::GATEWAY_TIMEOUT, &format!("upstream timeout: {e}"));
        }
        Err(e) => {
            return error_response(StatusCode::BAD_GATEWAY, &format!("upstream unreachable: {e}"));
        }
    };

    let status = StatusCode::from_u16(upstream_response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response_headers = HeaderMap::new();
    for (key, value) in upstream_response.headers() {
        if let (Ok(name), Ok(val)) = (
            HeaderName::from_bytes(key.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            response_headers.insert(name, val);
        }
    }

    let stream = upstream_response.bytes_stream();
    let body = Body::from_stream(stream);

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

fn to_reqwest_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        if let (Ok(name), Ok(val)) = (
            reqwest::header::HeaderName::from_bytes(key.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.insert(name, val);
        }
    }
    out
}

fn map_error(e: &Error) -> Response {
    error_response(
        StatusCode::from_u16(e.to_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        &e.to_string(),
    )
}

fn error_response(status: StatusCode, detail: &str) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}
