//! Process bootstrap: wires configuration into the Registry Store, Auth
//! Resolver, Health Monitor and Tool Index, then serves the Edge Router.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::auth::AuthResolver;
use crate::config::Config;
use crate::health::HealthMonitor;
use crate::index::{Embedder, ToolIndex};
use crate::ranking::SearchRanker;
use crate::registry::RegistryStore;
use crate::router::{self, AppState};
use crate::{Error, Result};

/// The running registry process.
pub struct App {
    config: Config,
}

impl App {
    /// Construct from loaded configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until a shutdown signal is received, draining in-flight requests
    /// before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the configured address
    /// or encounters an unrecoverable runtime error.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("invalid host: {e}")))?,
            self.config.server.port,
        );

        std::fs::create_dir_all(self.config.data_root.servers_dir())
            .map_err(|e| Error::Config(format!("cannot create data root: {e}")))?;

        let registry = Arc::new(RegistryStore::load(self.config.data_root.servers_dir())?);
        info!(services = registry.snapshot().len(), "registry store loaded");

        let auth = Arc::new(AuthResolver::from_config(&self.config.auth));
        if let Some(scopes) = load_scopes_file(&self.config.data_root.scopes_file()) {
            auth.reload_scopes(&scopes);
            info!("loaded persisted group-scope mapping");
        }

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let ranker = Arc::new(SearchRanker::new());
        let usage_file = self.config.data_root.usage_file();
        if usage_file.exists() {
            if let Err(e) = ranker.load(&usage_file) {
                warn!(error = %e, "failed to load tool usage ranking data");
            }
        }

        let index = if self.config.index.enabled {
            match Embedder::load() {
                Ok(embedder) => {
                    let index = Arc::new(ToolIndex::new(Arc::new(embedder), Arc::clone(&ranker), &self.config.index));
                    let index_file = self.config.data_root.index_file();
                    let metadata_file = self.config.data_root.index_metadata_file();
                    if let Err(e) = index.load_or_rebuild(&registry, &index_file, &metadata_file) {
                        warn!(error = %e, "tool index failed to build, search disabled");
                    } else {
                        info!(tools = index.len(), "tool index ready");
                    }
                    crate::index::spawn_rebuild_task(
                        Arc::clone(&index),
                        Arc::clone(&registry),
                        self.config.index.rebuild_debounce,
                        index_file,
                        metadata_file,
                        shutdown_tx.subscribe(),
                    );
                    Some(index)
                }
                Err(e) => {
                    warn!(error = %e, "embedding model failed to load, tool index disabled");
                    None
                }
            }
        } else {
            None
        };

        let monitor = HealthMonitor::new(
            self.config.health.clone(),
            Arc::clone(&registry),
            Arc::clone(&auth),
            format!("http://{}:{}", self.config.server.host, self.config.server.port),
        );
        monitor.spawn(shutdown_tx.subscribe());

        let inflight = Arc::new(tokio::sync::Semaphore::new(10_000));

        let state = Arc::new(AppState {
            registry: Arc::clone(&registry),
            auth: Arc::clone(&auth),
            index,
            catalog: self.config.catalog.clone(),
            inflight: Arc::clone(&inflight),
            http_client: reqwest::Client::builder()
                .timeout(self.config.server.upstream_timeout)
                .build()
                .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?,
            scopes_file: self.config.data_root.scopes_file(),
        });

        let app = router::create_router(state);
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("MCP REGISTRY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "listening");
        info!(services = registry.snapshot().len(), "services registered");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        if let Err(e) = ranker.save(&usage_file) {
            warn!(error = %e, "failed to save tool usage ranking data");
        }

        let drain_timeout = self.config.server.shutdown_timeout;
        info!(timeout = ?drain_timeout, "draining in-flight requests");
        match tokio::time::timeout(drain_timeout, inflight.acquire_many(10_000)).await {
            Ok(Ok(_permits)) => info!("all in-flight requests completed"),
            Ok(Err(_)) => warn!("inflight semaphore closed unexpectedly during drain"),
            Err(_) => {
                let remaining = 10_000_usize.saturating_sub(inflight.available_permits());
                warn!(remaining_requests = remaining, "drain timeout reached, proceeding with shutdown");
            }
        }

        Ok(())
    }
}

fn load_scopes_file(path: &std::path::Path) -> Option<crate::config::AuthConfig> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_yaml::from_str(&text) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to parse persisted scopes file, ignoring");
            None
        }
    }
}

async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
}
