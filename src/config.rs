//! Configuration management

use std::{collections::HashMap, env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Where the registry persists Service documents and derived indexes
    pub data_root: DataRootConfig,
    /// Authentication and authorization configuration
    pub auth: AuthConfig,
    /// Health monitor configuration
    pub health: HealthMonitorConfig,
    /// Tool index (semantic search) configuration
    pub index: IndexConfig,
    /// Catalog listing configuration
    pub catalog: CatalogConfig,
}

/// Where persisted state lives on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataRootConfig {
    /// Base directory for all persisted state
    pub path: String,
}

impl Default for DataRootConfig {
    fn default() -> Self {
        Self {
            path: "./data".to_string(),
        }
    }
}

impl DataRootConfig {
    /// Directory holding one JSON document per registered Service
    #[must_use]
    pub fn servers_dir(&self) -> PathBuf {
        PathBuf::from(&self.path).join("servers")
    }

    /// Path to the persisted scope-mapping YAML
    #[must_use]
    pub fn scopes_file(&self) -> PathBuf {
        PathBuf::from(&self.path).join("auth_server").join("scopes.yml")
    }

    /// Path to the tool usage-ranking JSON sidecar
    #[must_use]
    pub fn usage_file(&self) -> PathBuf {
        PathBuf::from(&self.path).join("auth_server").join("usage.json")
    }

    /// Path to the binary tool-index vector file
    #[must_use]
    pub fn index_file(&self) -> PathBuf {
        self.servers_dir().join("service_index.bin")
    }

    /// Path to the tool-index metadata sidecar
    #[must_use]
    pub fn index_metadata_file(&self) -> PathBuf {
        self.servers_dir().join("service_index_metadata.json")
    }
}

/// Catalog (`/v0.1/servers`) listing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Namespace prefix used to compose catalog server names
    pub namespace: String,
    /// Default page size when `limit` is not supplied
    pub default_limit: usize,
    /// Maximum allowed page size
    pub max_limit: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            namespace: "local".to_string(),
            default_limit: 100,
            max_limit: 1000,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Upstream proxy body timeout
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,
    /// Graceful shutdown drain bound
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            upstream_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Authentication and authorization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// OIDC providers trusted to issue bearer tokens
    #[serde(default)]
    pub oidc_providers: Vec<OidcProviderConfig>,
    /// Groups treated as administrators (implicit access to everything)
    #[serde(default)]
    pub admin_groups: Vec<String>,
    /// Group name -> list of scope identifiers it confers
    #[serde(default)]
    pub group_scopes: HashMap<String, Vec<String>>,
    /// Scope identifier -> service/tool access it grants
    #[serde(default)]
    pub scope_access: HashMap<String, ScopeAccessConfig>,
    /// Maximum age of an OIDC token's `iat` claim before it is rejected as a replay
    #[serde(with = "humantime_serde")]
    pub max_token_age: Duration,
    /// Principal-resolution cache TTL (keyed by token signature bytes)
    #[serde(with = "humantime_serde")]
    pub principal_cache_ttl: Duration,
    /// Registry-minted token lifetime
    #[serde(with = "humantime_serde")]
    pub minted_token_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            oidc_providers: Vec::new(),
            admin_groups: vec!["mcp-registry-admins".to_string()],
            group_scopes: HashMap::new(),
            scope_access: HashMap::new(),
            max_token_age: Duration::from_secs(300),
            principal_cache_ttl: Duration::from_secs(300),
            minted_token_ttl: Duration::from_secs(3600),
        }
    }
}

/// A trusted OIDC issuer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcProviderConfig {
    /// Issuer URL (matched against the token's `iss` claim)
    pub issuer: String,
    /// JWKS endpoint; defaults to `<issuer>/.well-known/jwks.json`
    #[serde(default)]
    pub jwks_uri: Option<String>,
    /// Acceptable audiences; empty means audience is not checked
    #[serde(default)]
    pub audiences: Vec<String>,
}

/// What a scope grants access to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeAccessConfig {
    /// Service path this scope grants access to
    pub service: String,
    /// Tool names granted, or `["*"]` for all tools on the service
    #[serde(default = "default_all_tools")]
    pub tools: Vec<String>,
}

fn default_all_tools() -> Vec<String> {
    vec!["*".to_string()]
}

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    /// Enable periodic probing
    pub enabled: bool,
    /// Probe period per service
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Per-probe deadline before it is abandoned
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    /// Maximum number of probes running concurrently
    pub worker_pool_size: usize,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            worker_pool_size: 16,
        }
    }
}

/// Tool index (semantic search) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Enable the semantic tool index
    pub enabled: bool,
    /// Default number of results returned by a query
    pub default_top_k: usize,
    /// Debounce window before a dirty index is rebuilt
    #[serde(with = "humantime_serde")]
    pub rebuild_debounce: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_top_k: 10,
            rebuild_debounce: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("MCP_REGISTRY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` patterns in config values that
    /// are allowed to reference the process environment at load time.
    fn expand_env_vars(&mut self) {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        self.data_root.path = Self::expand_string(&re, &self.data_root.path);
    }

    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_env_files_sets_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "MCP_REG_TEST_KEY_A=hello_from_env_file").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        config.load_env_files();

        assert_eq!(env::var("MCP_REG_TEST_KEY_A").unwrap(), "hello_from_env_file");
    }

    #[test]
    fn test_load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }

    #[test]
    fn test_default_config_has_sane_data_root() {
        let config = Config::default();
        assert_eq!(config.data_root.path, "./data");
        assert!(config.data_root.servers_dir().ends_with("servers"));
    }

    #[test]
    fn test_scope_access_default_tools_is_wildcard() {
        let yaml = r#"
service: /currenttime
"#;
        let access: ScopeAccessConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(access.tools, vec!["*".to_string()]);
    }

    #[test]
    fn test_expand_data_root_uses_default_when_var_unset() {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        let expanded = Config::expand_string(&re, "${MCP_REG_TEST_UNSET_VAR:-/var/lib/mcp}");
        assert_eq!(expanded, "/var/lib/mcp");
    }
}
