//! Edge Router — path-prefix classification, auth delegation, upstream proxying.

mod admin;
mod auth_routes;
mod catalog;
mod proxy;
mod validate;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};

use crate::auth::AuthResolver;
use crate::config::CatalogConfig;
use crate::index::ToolIndex;
use crate::registry::RegistryStore;

/// Shared application state reachable from every handler.
pub struct AppState {
    /// Registry Store (C).
    pub registry: Arc<RegistryStore>,
    /// Auth Resolver (B).
    pub auth: Arc<AuthResolver>,
    /// Tool Index (E), `None` if disabled by configuration.
    pub index: Option<Arc<ToolIndex>>,
    /// Catalog listing configuration.
    pub catalog: CatalogConfig,
    /// In-flight request tracker for graceful drain.
    pub inflight: Arc<tokio::sync::Semaphore>,
    /// Shared HTTP client used to forward proxied requests upstream.
    pub http_client: reqwest::Client,
    /// Path to the persisted Group -> Scope mapping document.
    pub scopes_file: std::path::PathBuf,
}

/// Build the full axum router: public surface, internal `/validate`
/// contract, and the catch-all proxy route.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/validate", get(validate::validate_handler))
        .route(
            "/auth/token",
            axum::routing::post(auth_routes::mint_token_handler),
        )
        .route(
            "/auth/token/{jti}",
            axum::routing::delete(auth_routes::revoke_token_handler),
        )
        .route("/v0.1/servers", get(catalog::list_servers_handler))
        .route(
            "/v0.1/servers/{*rest}",
            get(catalog::server_versions_handler),
        )
        .route("/v0.1/tools/find", get(catalog::find_tools_handler))
        .route(
            "/admin/servers",
            axum::routing::post(admin::register_service_handler),
        )
        .route(
            "/admin/servers/{*path}",
            axum::routing::delete(admin::remove_service_handler).patch(admin::set_enabled_handler),
        )
        .route(
            "/admin/servers/healthcheck",
            axum::routing::post(admin::healthcheck_handler),
        )
        .route(
            "/admin/scopes/grant",
            axum::routing::post(admin::add_server_to_scope_group_handler),
        )
        .route(
            "/admin/scopes/revoke",
            axum::routing::post(admin::remove_server_from_scope_group_handler),
        )
        .fallback(proxy::proxy_handler)
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
