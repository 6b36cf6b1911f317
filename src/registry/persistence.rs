//! Atomic on-disk persistence for registered Services.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

use super::model::Service;

/// Load every Service document found directly under `servers_dir`.
/// Files that fail to parse are logged and skipped rather than aborting
/// the whole load — a single corrupt document should not prevent the
/// registry from starting with everything else intact.
pub fn load_all(servers_dir: &Path) -> Result<Vec<Service>> {
    if !servers_dir.exists() {
        return Ok(Vec::new());
    }

    let mut services = Vec::new();
    for entry in std::fs::read_dir(servers_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Service>(&content) {
                Ok(mut service) => {
                    service.health = super::model::HealthState::Unknown;
                    service.last_checked_ms = 0;
                    services.push(service);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping corrupt service document");
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read service document");
            }
        }
    }
    Ok(services)
}

/// Persist a single Service document, atomically (write to a temp file in
/// the same directory, then rename over the destination).
///
/// # Errors
///
/// Returns `Error::Persistence` if the directory cannot be created or the
/// write/rename fails.
pub fn save(servers_dir: &Path, service: &Service) -> Result<()> {
    std::fs::create_dir_all(servers_dir)
        .map_err(|e| Error::Persistence(format!("creating servers dir: {e}")))?;

    let path = document_path(servers_dir, &service.name);
    let tmp_path = path.with_extension("json.tmp");

    let json = serde_json::to_string_pretty(service)
        .map_err(|e| Error::Persistence(format!("serializing service document: {e}")))?;

    std::fs::write(&tmp_path, json)
        .map_err(|e| Error::Persistence(format!("writing service document: {e}")))?;
    std::fs::rename(&tmp_path, &path)
        .map_err(|e| Error::Persistence(format!("renaming service document: {e}")))?;

    Ok(())
}

/// Remove a Service's persisted document, if present.
///
/// # Errors
///
/// Returns `Error::Persistence` if the file exists but cannot be removed.
pub fn remove(servers_dir: &Path, name: &str) -> Result<()> {
    let path = document_path(servers_dir, name);
    if path.exists() {
        std::fs::remove_file(&path)
            .map_err(|e| Error::Persistence(format!("removing service document: {e}")))?;
    }
    Ok(())
}

/// Deterministic file name for a Service's document: its name, slugified.
fn document_path(servers_dir: &Path, name: &str) -> PathBuf {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    servers_dir.join(format!("{slug}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::model::AuthProvider;

    fn sample_service(name: &str) -> Service {
        Service {
            name: name.to_string(),
            path: format!("/{name}"),
            proxy_pass_url: "http://upstream:8000/mcp".to_string(),
            description: "test service".to_string(),
            tags: vec!["test".to_string()],
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

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let service = sample_service("currenttime");
        save(dir.path(), &service).unwrap();

        let loaded = load_all(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "currenttime");
        assert_eq!(loaded[0].path, "/currenttime");
        // Health is never trusted from disk.
        assert_eq!(loaded[0].health, super::super::model::HealthState::Unknown);
    }

    #[test]
    fn load_all_on_missing_dir_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let loaded = load_all(&missing).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn load_all_skips_corrupt_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not valid json").unwrap();
        save(dir.path(), &sample_service("good")).unwrap();

        let loaded = load_all(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "good");
    }

    #[test]
    fn remove_deletes_document() {
        let dir = tempfile::tempdir().unwrap();
        let service = sample_service("currenttime");
        save(dir.path(), &service).unwrap();
        assert_eq!(load_all(dir.path()).unwrap().len(), 1);

        remove(dir.path(), "currenttime").unwrap();
        assert_eq!(load_all(dir.path()).unwrap().len(), 0);
    }

    #[test]
    fn remove_missing_document_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        remove(dir.path(), "never-existed").unwrap();
    }
}
