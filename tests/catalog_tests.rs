//! Tests for the `/v0.1/servers*` catalog and `/v0.1/tools/find` surface.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use mcp_registry_gateway::auth::AuthResolver;
use mcp_registry_gateway::config::{AuthConfig, CatalogConfig};
use mcp_registry_gateway::registry::{AuthProvider, RegistryStore, Service, SupportedTransport};
use mcp_registry_gateway::router::{AppState, create_router};
use tower::ServiceExt;

fn service(path: &str, enabled: bool) -> Service {
    Service {
        name: path.trim_start_matches('/').to_string(),
        path: path.to_string(),
        proxy_pass_url: "http://upstream.example/mcp".to_string(),
        description: String::new(),
        tags: Vec::new(),
        supported_transports: vec![SupportedTransport::StreamableHttp],
        enabled,
        auth_provider: AuthProvider::Default,
        headers_template: HashMap::new(),
        tools: Vec::new(),
        health: Default::default(),
        last_checked_ms: 0,
        scan_status: None,
    }
}

fn admin_token(auth: &AuthResolver) -> String {
    use mcp_registry_gateway::auth::VerifiedIdentity;
    let identity = VerifiedIdentity {
        subject: "root".to_string(),
        username: "root".to_string(),
        groups: vec!["mcp-registry-admins".to_string()],
        scope: Vec::new(),
        issuer: "https://idp.example.com".to_string(),
    };
    auth.mint_token(identity, &std::collections::HashSet::new()).unwrap().token
}

fn test_state(registry: Arc<RegistryStore>, auth: Arc<AuthResolver>) -> Arc<AppState> {
    Arc::new(AppState {
        registry,
        auth,
        index: None,
        catalog: CatalogConfig { namespace: "local".to_string(), default_limit: 100, max_limit: 1000 },
        inflight: Arc::new(tokio::sync::Semaphore::new(100)),
        http_client: reqwest::Client::new(),
        scopes_file: std::env::temp_dir().join("mcp-registry-test-scopes-catalog.yml"),
    })
}

#[tokio::test]
async fn disabled_services_are_hidden_from_non_admin_listing() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(RegistryStore::load(dir.path().to_path_buf()).unwrap());
    registry.register(service("/alpha", true)).unwrap();
    registry.register(service("/beta", false)).unwrap();

    let auth = Arc::new(AuthResolver::from_config(&AuthConfig::default()));
    let admin = admin_token(&auth);

    let state = test_state(registry, auth);
    let app = create_router(state);

    let request = Request::builder()
        .uri("/v0.1/servers")
        .header("authorization", format!("Bearer {admin}"))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    // An admin-minted principal bypasses service-level filtering but
    // disabled Services are still hidden by the `enabled` gate.
    let names: Vec<&str> = json["servers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["path"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"/alpha"));
    assert!(!names.contains(&"/beta"));
}

#[tokio::test]
async fn catalog_listing_requires_authentication() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(RegistryStore::load(dir.path().to_path_buf()).unwrap());
    let auth = Arc::new(AuthResolver::from_config(&AuthConfig::default()));
    let state = test_state(registry, auth);
    let app = create_router(state);

    let request = Request::builder().uri("/v0.1/servers").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn find_tools_reports_unavailable_index_with_200() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(RegistryStore::load(dir.path().to_path_buf()).unwrap());
    let auth = Arc::new(AuthResolver::from_config(&AuthConfig::default()));
    let admin = admin_token(&auth);
    let state = test_state(registry, auth);
    let app = create_router(state);

    let request = Request::builder()
        .uri("/v0.1/tools/find?q=what+time+is+it")
        .header("authorization", format!("Bearer {admin}"))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["results"], serde_json::json!([]));
    assert!(json["error"].is_string());
}
