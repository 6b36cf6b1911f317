//! Health Monitor — periodic MCP handshake probes through the gateway's own
//! proxy path, keeping each Service's [`HealthState`] fresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;

use crate::auth::AuthResolver;
use crate::config::HealthMonitorConfig;
use crate::registry::{HealthState, MutationEvent, RegistryStore, RegistryTool, Service};
use crate::transport::HttpTransport;
use crate::Error;

const CLIENT_NAME: &str = "mcp-registry-health-monitor";

/// Why a probe attempt did not reach `healthy`.
#[derive(Debug)]
enum ProbeOutcome {
    HandshakeFailed(String),
    InitNotifyFailed(String),
    ToolsListFailed(String),
    AuthExpired,
    Timeout,
}

impl ProbeOutcome {
    fn into_health_state(self) -> HealthState {
        match self {
            Self::HandshakeFailed(reason) => HealthState::Unhealthy {
                reason: format!("handshake-failed: {reason}"),
            },
            Self::InitNotifyFailed(reason) => HealthState::Unhealthy {
                reason: format!("init-notify-failed: {reason}"),
            },
            Self::ToolsListFailed(reason) => HealthState::Unhealthy {
                reason: format!("tools-list-failed: {reason}"),
            },
            Self::AuthExpired => HealthState::HealthyAuthExpired,
            Self::Timeout => HealthState::Unhealthy {
                reason: "timeout".to_string(),
            },
        }
    }
}

/// Periodically probes every enabled Service through the gateway's own
/// proxy path (not directly against the upstream), bounded by a worker pool.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    registry: Arc<RegistryStore>,
    auth: Arc<AuthResolver>,
    base_url: String,
    semaphore: Arc<Semaphore>,
    loops: DashMap<String, JoinHandle<()>>,
}

impl HealthMonitor {
    /// Build a monitor that probes Services at `base_url` (the gateway's own
    /// externally-reachable address, e.g. `http://127.0.0.1:8080`).
    #[must_use]
    pub fn new(
        config: HealthMonitorConfig,
        registry: Arc<RegistryStore>,
        auth: Arc<AuthResolver>,
        base_url: String,
    ) -> Arc<Self> {
        let worker_pool_size = config.worker_pool_size.max(1);
        Arc::new(Self {
            config,
            registry,
            auth,
            base_url,
            semaphore: Arc::new(Semaphore::new(worker_pool_size)),
            loops: DashMap::new(),
        })
    }

    /// Start probing every currently-enabled Service, and keep the set of
    /// probe loops in sync with registry mutations until `shutdown` fires.
    pub fn spawn(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("health monitor disabled by configuration");
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            for service in this.registry.list(&crate::registry::ListFilter {
                enabled: Some(true),
                tags: Vec::new(),
            }) {
                this.ensure_loop(&service.path, shutdown.resubscribe());
            }

            let mut events = this.registry.subscribe();
            let mut shutdown = shutdown;
            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Ok(MutationEvent::Registered(_)) | Ok(MutationEvent::EnabledChanged(_)) => {
                                this.resync(shutdown.resubscribe());
                            }
                            Ok(MutationEvent::Removed(_)) => {
                                this.resync(shutdown.resubscribe());
                            }
                            Ok(MutationEvent::HealthUpdated(_)) => {}
                            Err(_) => continue,
                        }
                    }
                    _ = shutdown.recv() => {
                        for entry in this.loops.iter() {
                            entry.value().abort();
                        }
                        break;
                    }
                }
            }
        });
    }

    fn resync(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) {
        let enabled_paths: Vec<String> = self
            .registry
            .list(&crate::registry::ListFilter {
                enabled: Some(true),
                tags: Vec::new(),
            })
            .iter()
            .map(|s| s.path.clone())
            .collect();

        for path in &enabled_paths {
            self.ensure_loop(path, shutdown.resubscribe());
        }

        let stale: Vec<String> = self
            .loops
            .iter()
            .map(|e| e.key().clone())
            .filter(|p| !enabled_paths.contains(p))
            .collect();
        for path in stale {
            if let Some((_, handle)) = self.loops.remove(&path) {
                handle.abort();
            }
        }
    }

    fn ensure_loop(self: &Arc<Self>, path: &str, shutdown: broadcast::Receiver<()>) {
        if self.loops.contains_key(path) {
            return;
        }
        let this = self.clone();
        let loop_path = path.to_string();
        let handle = tokio::spawn(async move { this.probe_loop(loop_path, shutdown).await });
        self.loops.insert(path.to_string(), handle);
    }

    async fn probe_loop(self: Arc<Self>, path: String, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(service) = self.registry.get_by_path(&path) else {
                        self.loops.remove(&path);
                        break;
                    };
                    if !service.enabled {
                        self.loops.remove(&path);
                        break;
                    }
                    self.run_probe(service).await;
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    async fn run_probe(&self, service: Arc<Service>) {
        let Ok(_permit) = self.semaphore.clone().acquire_owned().await else {
            return;
        };

        let deadline = self.config.probe_timeout;
        let result = tokio::time::timeout(deadline, self.attempt(&service)).await;

        let (health, tools) = match result {
            Ok(Ok(tools)) => (HealthState::Healthy, Some(tools)),
            Ok(Err(outcome)) => (outcome.into_health_state(), None),
            Err(_) => (ProbeOutcome::Timeout.into_health_state(), None),
        };

        let checked_at_ms = now_ms();
        if let Err(e) = self.registry.update_health(&service.path, health, tools, checked_at_ms) {
            tracing::warn!(path = %service.path, error = %e, "failed to record probe result");
        }
    }

    async fn attempt(&self, service: &Service) -> std::result::Result<Vec<RegistryTool>, ProbeOutcome> {
        let token = self.auth.mint_probe_token();
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));

        let url = self.probe_url(service);
        let transport = HttpTransport::new(&url, headers, self.config.probe_timeout)
            .map_err(|e| ProbeOutcome::HandshakeFailed(e.to_string()))?;

        match self.run_handshake(&transport).await {
            Ok(()) => {}
            Err(ProbeOutcome::AuthExpired) => {
                let refreshed = self.auth.mint_probe_token();
                let mut headers = HashMap::new();
                headers.insert("Authorization".to_string(), format!("Bearer {refreshed}"));
                let retry_transport = HttpTransport::new(&url, headers, self.config.probe_timeout)
                    .map_err(|e| ProbeOutcome::HandshakeFailed(e.to_string()))?;
                self.run_handshake(&retry_transport).await?;
                return self.list_tools(&retry_transport).await;
            }
            Err(other) => return Err(other),
        }

        self.list_tools(&transport).await
    }

    async fn run_handshake(&self, transport: &Arc<HttpTransport>) -> std::result::Result<(), ProbeOutcome> {
        use crate::transport::Transport;

        let params = HttpTransport::initialize_request(CLIENT_NAME, env!("CARGO_PKG_VERSION")).params;
        let response = transport
            .request("initialize", params)
            .await
            .map_err(classify_error)?;
        if response.error.is_some() {
            return Err(ProbeOutcome::HandshakeFailed("initialize returned a JSON-RPC error".to_string()));
        }

        transport
            .notify("notifications/initialized", None)
            .await
            .map_err(|e| ProbeOutcome::InitNotifyFailed(e.to_string()))?;

        transport.mark_connected();
        Ok(())
    }

    async fn list_tools(&self, transport: &Arc<HttpTransport>) -> std::result::Result<Vec<RegistryTool>, ProbeOutcome> {
        use crate::transport::Transport;

        let response = transport
            .request("tools/list", None)
            .await
            .map_err(classify_error)?;

        let Some(result) = response.result else {
            return Err(ProbeOutcome::ToolsListFailed("empty tools/list result".to_string()));
        };

        let tools = result
            .get("tools")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut parsed = Vec::with_capacity(tools.len());
        for tool in tools {
            let name = tool.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let description = tool.get("description").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let schema = tool.get("inputSchema").cloned().unwrap_or_else(|| serde_json::json!({}));
            let tags = tool
                .get("tags")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            parsed.push(RegistryTool { name, description, schema, tags });
        }
        Ok(parsed)
    }

    fn probe_url(&self, service: &Service) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = service.path.trim_end_matches('/');
        format!("{base}{path}/mcp")
    }
}

fn classify_error(e: Error) -> ProbeOutcome {
    match e {
        Error::AuthFailed(_) => ProbeOutcome::AuthExpired,
        Error::UpstreamTimeout(_) => ProbeOutcome::Timeout,
        other => ProbeOutcome::HandshakeFailed(other.to_string()),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_outcome_maps_to_expected_health_states() {
        assert_eq!(
            ProbeOutcome::HandshakeFailed("x".to_string()).into_health_state(),
            HealthState::Unhealthy { reason: "handshake-failed: x".to_string() }
        );
        assert_eq!(ProbeOutcome::AuthExpired.into_health_state(), HealthState::HealthyAuthExpired);
        assert_eq!(
            ProbeOutcome::Timeout.into_health_state(),
            HealthState::Unhealthy { reason: "timeout".to_string() }
        );
    }

    #[test]
    fn classify_error_maps_auth_failed_to_auth_expired() {
        let outcome = classify_error(Error::AuthFailed("nope".to_string()));
        assert!(matches!(outcome, ProbeOutcome::AuthExpired));
    }

    #[test]
    fn classify_error_maps_timeout() {
        let outcome = classify_error(Error::UpstreamTimeout("slow".to_string()));
        assert!(matches!(outcome, ProbeOutcome::Timeout));
    }
}
