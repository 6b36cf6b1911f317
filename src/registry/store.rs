//! In-memory, disk-backed catalog of Services and their Tools.
//!
//! Readers take a clone of the current [`Snapshot`] `Arc` via [`RegistryStore::snapshot`]
//! — an `ArcSwap` load — and never block on writers. Writers are serialized
//! through an internal mutex; each mutation builds a new snapshot from the
//! previous one and swaps the pointer atomically, so no reader ever observes
//! a partially-applied mutation.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::{Error, Result};

use super::model::{HealthState, RegistryTool, Service};
use super::persistence;

/// An immutable view of the registry at a point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    by_path: HashMap<String, Arc<Service>>,
    by_name: HashMap<String, String>,
}

impl Snapshot {
    /// Look up a Service by its path prefix.
    #[must_use]
    pub fn get_by_path(&self, path: &str) -> Option<&Arc<Service>> {
        self.by_path.get(path)
    }

    /// Longest-prefix match: the enabled Service whose `path` is the longest
    /// prefix of `request_path`. Ties broken by lexicographic order of `path`.
    #[must_use]
    pub fn match_path<'a>(&'a self, request_path: &str) -> Option<&'a Arc<Service>> {
        self.by_path
            .values()
            .filter(|s| s.enabled && is_prefix_match(&s.path, request_path))
            .max_by(|a, b| a.path.len().cmp(&b.path.len()).then_with(|| b.path.cmp(&a.path)))
    }

    /// All Services, optionally filtered.
    #[must_use]
    pub fn list(&self, filter: &ListFilter) -> Vec<Arc<Service>> {
        self.by_path
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect()
    }

    /// Total number of registered Services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    /// Whether the registry holds no Services.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

fn is_prefix_match(service_path: &str, request_path: &str) -> bool {
    if request_path == service_path {
        return true;
    }
    request_path.starts_with(service_path)
        && request_path.as_bytes().get(service_path.len()) == Some(&b'/')
}

/// Filter applied to [`RegistryStore::list`] / [`Snapshot::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Restrict to a specific enabled state, if set.
    pub enabled: Option<bool>,
    /// Restrict to Services carrying all of these tags.
    pub tags: Vec<String>,
}

impl ListFilter {
    fn matches(&self, service: &Service) -> bool {
        if let Some(enabled) = self.enabled {
            if service.enabled != enabled {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|tag| service.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
    }
}

/// A mutation that just landed in the registry; consumed by the Tool Index's
/// dirty-tracking and by anything else that cares about registry changes.
#[derive(Debug, Clone)]
pub enum MutationEvent {
    /// A Service was registered.
    Registered(String),
    /// A Service was removed.
    Removed(String),
    /// A Service's enabled flag changed.
    EnabledChanged(String),
    /// A Service's health/tool list was updated by the Health Monitor.
    HealthUpdated(String),
}

/// The Registry Store: single source of truth for Services.
pub struct RegistryStore {
    snapshot: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
    servers_dir: std::path::PathBuf,
    events: broadcast::Sender<MutationEvent>,
}

impl RegistryStore {
    /// Load the registry from `servers_dir`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted documents exist but the directory
    /// cannot be read.
    pub fn load(servers_dir: std::path::PathBuf) -> Result<Self> {
        let services = persistence::load_all(&servers_dir)?;
        let mut by_path = HashMap::new();
        let mut by_name = HashMap::new();
        for service in services {
            by_name.insert(service.name.clone(), service.path.clone());
            by_path.insert(service.path.clone(), Arc::new(service));
        }
        let (events, _rx) = broadcast::channel(256);
        Ok(Self {
            snapshot: ArcSwap::from_pointee(Snapshot { by_path, by_name }),
            write_lock: Mutex::new(()),
            servers_dir,
            events,
        })
    }

    /// Subscribe to mutation events (used by the Tool Index to know when to
    /// rebuild).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.events.subscribe()
    }

    /// A cheap, lock-free, point-in-time view of the registry.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Look up a Service by path.
    #[must_use]
    pub fn get_by_path(&self, path: &str) -> Option<Arc<Service>> {
        self.snapshot().get_by_path(path).cloned()
    }

    /// List Services matching `filter`.
    #[must_use]
    pub fn list(&self, filter: &ListFilter) -> Vec<Arc<Service>> {
        self.snapshot().list(filter)
    }

    /// Register a new Service.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServiceConflict` if `path` or `name` is already taken,
    /// `Error::Config` if the Service fails its own invariants, or
    /// `Error::Persistence` if the document cannot be written to disk.
    pub fn register(&self, service: Service) -> Result<()> {
        service.validate()?;
        let _guard = self.write_lock.lock();
        let current = self.snapshot.load();

        if current.by_path.contains_key(&service.path) {
            return Err(Error::ServiceConflict(format!("path already registered: {}", service.path)));
        }
        if current.by_name.contains_key(&service.name) {
            return Err(Error::ServiceConflict(format!("name already registered: {}", service.name)));
        }

        persistence::save(&self.servers_dir, &service)?;

        let mut next = (**current).clone();
        next.by_name.insert(service.name.clone(), service.path.clone());
        let path = service.path.clone();
        let name = service.name.clone();
        next.by_path.insert(path, Arc::new(service));
        self.snapshot.store(Arc::new(next));

        let _ = self.events.send(MutationEvent::Registered(name));
        Ok(())
    }

    /// Remove a Service by path.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServiceNotFound` if no Service has that path.
    pub fn remove(&self, path: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let current = self.snapshot.load();

        let Some(service) = current.by_path.get(path).cloned() else {
            return Err(Error::ServiceNotFound(path.to_string()));
        };

        persistence::remove(&self.servers_dir, &service.name)?;

        let mut next = (**current).clone();
        next.by_path.remove(path);
        next.by_name.remove(&service.name);
        self.snapshot.store(Arc::new(next));

        let _ = self.events.send(MutationEvent::Removed(service.name.clone()));
        Ok(())
    }

    /// Enable or disable a Service.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServiceNotFound` if no Service has that path, or
    /// `Error::ForbiddenByScanStatus` if enabling is blocked by scan status.
    pub fn set_enabled(&self, path: &str, enabled: bool) -> Result<()> {
        let _guard = self.write_lock.lock();
        let current = self.snapshot.load();

        let Some(existing) = current.by_path.get(path).cloned() else {
            return Err(Error::ServiceNotFound(path.to_string()));
        };

        if enabled && !existing.can_enable() {
            return Err(Error::ForbiddenByScanStatus(format!(
                "service {:?} has scan_status {:?}",
                existing.name, existing.scan_status
            )));
        }

        let mut updated = (*existing).clone();
        updated.enabled = enabled;
        persistence::save(&self.servers_dir, &updated)?;

        let mut next = (**current).clone();
        let name = updated.name.clone();
        next.by_path.insert(path.to_string(), Arc::new(updated));
        self.snapshot.store(Arc::new(next));

        let _ = self.events.send(MutationEvent::EnabledChanged(name));
        Ok(())
    }

    /// Record the outcome of a Health Monitor probe.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServiceNotFound` if no Service has that path.
    pub fn update_health(
        &self,
        path: &str,
        health: HealthState,
        tools: Option<Vec<RegistryTool>>,
        checked_at_ms: u64,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();
        let current = self.snapshot.load();

        let Some(existing) = current.by_path.get(path).cloned() else {
            return Err(Error::ServiceNotFound(path.to_string()));
        };

        let mut updated = (*existing).clone();
        updated.health = health;
        updated.last_checked_ms = checked_at_ms;
        if let Some(tools) = tools {
            updated.tools = tools;
        }

        let mut next = (**current).clone();
        let name = updated.name.clone();
        next.by_path.insert(path.to_string(), Arc::new(updated));
        self.snapshot.store(Arc::new(next));

        let _ = self.events.send(MutationEvent::HealthUpdated(name));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::model::AuthProvider;

    fn sample(path: &str, name: &str) -> Service {
        Service {
            name: name.to_string(),
            path: path.to_string(),
            proxy_pass_url: "http://upstream:8000/mcp".to_string(),
            description: String::new(),
            tags: Vec::new(),
            supported_transports: vec![crate::registry::model::SupportedTransport::StreamableHttp],
            enabled: true,
            auth_provider: AuthProvider::Default,
            headers_template: Default::default(),
            tools: Vec::new(),
            health: Default::default(),
            last_checked_ms: 0,
            scan_status: None,
        }
    }

    fn store() -> RegistryStore {
        let dir = tempfile::tempdir().unwrap();
        RegistryStore::load(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn register_then_get_by_path() {
        let store = store();
        store.register(sample("/currenttime", "currenttime")).unwrap();
        assert!(store.get_by_path("/currenttime").is_some());
    }

    #[test]
    fn register_rejects_duplicate_path() {
        let store = store();
        store.register(sample("/currenttime", "a")).unwrap();
        let err = store.register(sample("/currenttime", "b")).unwrap_err();
        assert!(matches!(err, Error::ServiceConflict(_)));
    }

    #[test]
    fn register_rejects_duplicate_name() {
        let store = store();
        store.register(sample("/a", "dup")).unwrap();
        let err = store.register(sample("/b", "dup")).unwrap_err();
        assert!(matches!(err, Error::ServiceConflict(_)));
    }

    #[test]
    fn remove_then_not_found() {
        let store = store();
        store.register(sample("/a", "a")).unwrap();
        store.remove("/a").unwrap();
        assert!(store.get_by_path("/a").is_none());
        assert!(matches!(store.remove("/a").unwrap_err(), Error::ServiceNotFound(_)));
    }

    #[test]
    fn set_enabled_blocked_by_scan_status() {
        let store = store();
        let mut svc = sample("/a", "a");
        svc.enabled = false;
        svc.scan_status = Some(super::super::model::ScanStatus::SecurityPending);
        store.register(svc).unwrap();

        let err = store.set_enabled("/a", true).unwrap_err();
        assert!(matches!(err, Error::ForbiddenByScanStatus(_)));
    }

    #[test]
    fn longest_prefix_match_picks_most_specific() {
        let store = store();
        store.register(sample("/a", "a")).unwrap();
        store.register(sample("/a/b", "ab")).unwrap();

        let snap = store.snapshot();
        let matched = snap.match_path("/a/b/tool").unwrap();
        assert_eq!(matched.name, "ab");
    }

    #[test]
    fn disabled_service_does_not_match() {
        let store = store();
        let mut svc = sample("/a", "a");
        svc.enabled = false;
        store.register(svc).unwrap();

        let snap = store.snapshot();
        assert!(snap.match_path("/a/tool").is_none());
    }

    #[test]
    fn snapshot_outlives_subsequent_mutation() {
        let store = store();
        store.register(sample("/a", "a")).unwrap();
        let old_snapshot = store.snapshot();

        store.register(sample("/b", "b")).unwrap();

        assert_eq!(old_snapshot.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn update_health_replaces_tools() {
        let store = store();
        store.register(sample("/a", "a")).unwrap();
        store
            .update_health(
                "/a",
                HealthState::Healthy,
                Some(vec![RegistryTool {
                    name: "t1".to_string(),
                    description: "does a thing".to_string(),
                    schema: serde_json::json!({}),
                    tags: vec![],
                }]),
                1000,
            )
            .unwrap();

        let svc = store.get_by_path("/a").unwrap();
        assert_eq!(svc.health, HealthState::Healthy);
        assert_eq!(svc.tools.len(), 1);
    }
}
