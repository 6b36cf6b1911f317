//! Data model for registered Services and their Tools.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Authentication provider for a registered Service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthProvider {
    /// The gateway strips the client's credential and substitutes its own
    /// upstream credentials from `headers_template`.
    Default,
    /// The client's `Authorization` header is forwarded to the upstream
    /// unchanged; the gateway only validates the ingress layer.
    Passthrough,
    /// Same as `Default`, but the forwarded path has a trailing `/mcp/`
    /// segment stripped from `proxy_pass_url` before the remainder of the
    /// request path is appended.
    BedrockAgentcore,
}

impl Default for AuthProvider {
    fn default() -> Self {
        Self::Default
    }
}

/// Out-of-band vulnerability scan result gating whether a Service may be enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanStatus {
    /// Passed: the Service may be enabled freely.
    Passed,
    /// Failed: the Service may never be enabled until rescanned.
    Failed,
    /// Pending: a scan is outstanding; the Service may not be enabled yet.
    SecurityPending,
}

/// MCP transport supported by a Service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SupportedTransport {
    /// Server-sent events.
    Sse,
    /// Bidirectional chunked HTTP.
    StreamableHttp,
}

/// A single callable exposed by a Service, populated from `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryTool {
    /// Tool name, unique within its Service.
    pub name: String,
    /// Free-text description, used as the basis for embedding.
    #[serde(default)]
    pub description: String,
    /// JSON-Schema describing the tool's arguments.
    #[serde(default)]
    pub schema: serde_json::Value,
    /// Tags inherited from the Service plus any tool-specific tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Health state of a registered Service, refreshed by the Health Monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum HealthState {
    /// No probe has completed yet.
    Unknown,
    /// Last probe completed the full handshake successfully.
    Healthy,
    /// Last probe failed; `reason` identifies the failure mode.
    Unhealthy {
        /// Machine-readable failure reason (e.g. `"handshake-failed"`, `"timeout"`).
        reason: String,
    },
    /// The upstream is reachable but rejected our credentials (HTTP 401).
    HealthyAuthExpired,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl HealthState {
    /// Short machine-readable label, used in admin API responses and logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy { .. } => "unhealthy",
            Self::HealthyAuthExpired => "healthy-auth-expired",
        }
    }
}

/// A registered upstream MCP endpoint fronted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Display name, unique across all Services.
    pub name: String,
    /// URL path prefix, unique across all Services. Must start with `/` and
    /// contain more than just `/`.
    pub path: String,
    /// Upstream absolute URL the gateway forwards requests to.
    pub proxy_pass_url: String,
    /// Free-text description, consulted by the tool index alongside tool
    /// descriptions.
    #[serde(default)]
    pub description: String,
    /// Tags used for filtering and semantic search.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Transports this Service supports, preference order left to right.
    #[serde(default = "default_transports")]
    pub supported_transports: Vec<SupportedTransport>,
    /// Whether the Service currently accepts proxied traffic.
    #[serde(default)]
    pub enabled: bool,
    /// How the gateway handles the `Authorization` header for this Service.
    #[serde(default)]
    pub auth_provider: AuthProvider,
    /// Outbound headers applied to every upstream request; values may
    /// reference environment variables, expanded once at registration time.
    #[serde(default)]
    pub headers_template: HashMap<String, String>,
    /// Tools last observed on this Service, via `tools/list`.
    #[serde(default)]
    pub tools: Vec<RegistryTool>,
    /// Current health, recomputed by the Health Monitor; never trusted from
    /// a loaded document (always reset to `Unknown` on load).
    #[serde(skip_serializing, default)]
    pub health: HealthState,
    /// Timestamp of the last completed probe, in epoch milliseconds.
    #[serde(skip_serializing, default)]
    pub last_checked_ms: u64,
    /// Result of an out-of-band vulnerability scan, if one has run.
    #[serde(default)]
    pub scan_status: Option<ScanStatus>,
}

fn default_transports() -> Vec<SupportedTransport> {
    vec![SupportedTransport::StreamableHttp]
}

impl Service {
    /// Validate the invariants a Service must uphold before it can be
    /// registered: `path` starts with `/` and has more than one character,
    /// and `proxy_pass_url` parses as an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing which invariant failed.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.path.starts_with('/') || self.path.len() < 2 {
            return Err(crate::Error::Config(format!(
                "service path must start with '/' and be non-trivial: {:?}",
                self.path
            )));
        }
        url::Url::parse(&self.proxy_pass_url).map_err(|e| {
            crate::Error::Config(format!(
                "service proxy_pass_url is not a valid absolute URL: {e}"
            ))
        })?;
        if self.scan_status == Some(ScanStatus::SecurityPending) && self.enabled {
            return Err(crate::Error::Config(
                "service cannot be registered enabled with scan_status=security-pending".into(),
            ));
        }
        Ok(())
    }

    /// Can this Service be transitioned to `enabled = true`?
    #[must_use]
    pub fn can_enable(&self) -> bool {
        !matches!(
            self.scan_status,
            Some(ScanStatus::Failed) | Some(ScanStatus::SecurityPending)
        )
    }
}
