//! Group -> Scope -> (Service, Tools) mapping, reloadable atomically.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::AuthConfig;

use super::principal::ToolAccess;

/// The resolved set of Services and tools that a scope set unlocks.
#[derive(Debug, Clone, Default)]
pub struct Access {
    /// Service paths reachable.
    pub servers: HashSet<String>,
    /// Per-Service tool grants, unioned across every contributing scope.
    pub tools: HashMap<String, ToolAccess>,
}

/// An immutable, swappable mapping document.
#[derive(Debug, Clone, Default)]
struct Mapping {
    group_scopes: HashMap<String, Vec<String>>,
    scope_access: HashMap<String, Vec<(String, ToolAccess)>>,
    admin_groups: HashSet<String>,
}

/// Group -> Scope -> Access mapping, with atomic reload.
///
/// Readers call [`ScopeMapping::resolve`], which loads the current mapping
/// pointer once and computes against it; a concurrent [`ScopeMapping::reload`]
/// swaps in a new mapping without ever exposing a mixed old/new view to an
/// in-flight resolution.
pub struct ScopeMapping {
    current: ArcSwap<Mapping>,
}

impl ScopeMapping {
    /// Build from the loaded `AuthConfig`.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(Self::build(config)),
        }
    }

    /// Atomically replace the mapping with the one derived from `config`.
    pub fn reload(&self, config: &AuthConfig) {
        self.current.store(Arc::new(Self::build(config)));
    }

    fn build(config: &AuthConfig) -> Mapping {
        let mut scope_access: HashMap<String, Vec<(String, ToolAccess)>> = HashMap::new();
        for (scope, access) in &config.scope_access {
            let grant = if access.tools.iter().any(|t| t == "*") {
                ToolAccess::All
            } else {
                ToolAccess::Named(access.tools.iter().cloned().collect())
            };
            scope_access
                .entry(scope.clone())
                .or_default()
                .push((access.service.clone(), grant));
        }

        Mapping {
            group_scopes: config.group_scopes.clone(),
            scope_access,
            admin_groups: config.admin_groups.iter().cloned().collect(),
        }
    }

    /// Is any of `groups` an admin group?
    #[must_use]
    pub fn is_admin(&self, groups: &HashSet<String>) -> bool {
        let mapping = self.current.load();
        groups.iter().any(|g| mapping.admin_groups.contains(g))
    }

    /// Resolve `groups` into the effective scope set. Unknown groups
    /// contribute no scopes (this is a warning condition for the caller to
    /// log, not a failure).
    #[must_use]
    pub fn scopes_for_groups(&self, groups: &HashSet<String>) -> HashSet<String> {
        let mapping = self.current.load();
        let mut scopes = HashSet::new();
        for group in groups {
            if let Some(granted) = mapping.group_scopes.get(group) {
                scopes.extend(granted.iter().cloned());
            }
        }
        scopes
    }

    /// Resolve a scope set into the Services/tools it unlocks, using union
    /// semantics when multiple scopes grant access to the same Service.
    #[must_use]
    pub fn access_for_scopes(&self, scopes: &HashSet<String>) -> Access {
        let mapping = self.current.load();
        let mut access = Access::default();
        for scope in scopes {
            let Some(grants) = mapping.scope_access.get(scope) else {
                continue;
            };
            for (service, grant) in grants {
                access.servers.insert(service.clone());
                access
                    .tools
                    .entry(service.clone())
                    .and_modify(|existing| *existing = existing.clone().union(grant.clone()))
                    .or_insert_with(|| grant.clone());
            }
        }
        access
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScopeAccessConfig;

    fn config() -> AuthConfig {
        let mut group_scopes = HashMap::new();
        group_scopes.insert(
            "ml-engineers".to_string(),
            vec!["mcp-servers-restricted/read".to_string(), "finance/read".to_string()],
        );

        let mut scope_access = HashMap::new();
        scope_access.insert(
            "mcp-servers-restricted/read".to_string(),
            ScopeAccessConfig {
                service: "/currenttime".to_string(),
                tools: vec!["get_time".to_string()],
            },
        );
        scope_access.insert(
            "finance/read".to_string(),
            ScopeAccessConfig {
                service: "/currenttime".to_string(),
                tools: vec!["list_zones".to_string()],
            },
        );

        AuthConfig {
            admin_groups: vec!["mcp-registry-admins".to_string()],
            group_scopes,
            scope_access,
            ..Default::default()
        }
    }

    #[test]
    fn unknown_group_contributes_no_scopes() {
        let mapping = ScopeMapping::from_config(&AuthConfig::default());
        let groups: HashSet<String> = ["nonexistent".to_string()].into_iter().collect();
        assert!(mapping.scopes_for_groups(&groups).is_empty());
    }

    #[test]
    fn overlapping_scopes_union_tool_grants() {
        let mapping = ScopeMapping::from_config(&config());
        let groups: HashSet<String> = ["ml-engineers".to_string()].into_iter().collect();
        let scopes = mapping.scopes_for_groups(&groups);
        assert_eq!(scopes.len(), 2);

        let access = mapping.access_for_scopes(&scopes);
        assert!(access.servers.contains("/currenttime"));
        let grant = access.tools.get("/currenttime").unwrap();
        assert!(grant.allows("get_time"));
        assert!(grant.allows("list_zones"));
        assert!(!grant.allows("delete_everything"));
    }

    #[test]
    fn admin_group_detected() {
        let mapping = ScopeMapping::from_config(&config());
        let groups: HashSet<String> = ["mcp-registry-admins".to_string()].into_iter().collect();
        assert!(mapping.is_admin(&groups));
        let groups: HashSet<String> = ["ml-engineers".to_string()].into_iter().collect();
        assert!(!mapping.is_admin(&groups));
    }

    #[test]
    fn reload_swaps_mapping_atomically() {
        let mapping = ScopeMapping::from_config(&config());
        let groups: HashSet<String> = ["ml-engineers".to_string()].into_iter().collect();
        assert_eq!(mapping.scopes_for_groups(&groups).len(), 2);

        let mut new_config = AuthConfig::default();
        new_config.group_scopes.insert("ml-engineers".to_string(), vec!["only-one".to_string()]);
        mapping.reload(&new_config);

        assert_eq!(mapping.scopes_for_groups(&groups).len(), 1);
    }
}
