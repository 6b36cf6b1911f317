//! The resolved identity of an authenticated request.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

/// Which tools within a Service a principal may call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ToolAccess {
    /// All tools on the Service.
    All,
    /// Exactly these tool names.
    Named(HashSet<String>),
}

impl ToolAccess {
    /// Does this grant cover `tool`?
    #[must_use]
    pub fn allows(&self, tool: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(set) => set.contains(tool),
        }
    }

    /// Union two grants for the same Service (used when several scopes grant
    /// access to the same Service with different tool sets).
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::Named(mut a), Self::Named(b)) => {
                a.extend(b);
                Self::Named(a)
            }
        }
    }
}

/// How the caller's identity was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// OIDC bearer token (JWT), machine or human.
    OidcBearer,
    /// Opaque session cookie issued by the registry's own web session store.
    SessionCookie,
    /// Registry-minted opaque bearer token (see `/auth/token`).
    MintedToken,
}

/// The resolved identity and authorization of an authenticated request.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    /// Display username (`preferred_username`, falling back to `sub`).
    pub username: String,
    /// Group memberships as asserted by the identity provider.
    pub groups: HashSet<String>,
    /// Effective scopes after the Group -> Scope mapping.
    pub scopes: HashSet<String>,
    /// How this principal was authenticated.
    pub auth_method: AuthMethod,
    /// Issuing provider identifier (issuer URL, or `"registry"` for minted tokens).
    pub provider: String,
    /// Whether this principal belongs to an admin group (implicit access to
    /// every Service and tool).
    pub is_admin: bool,
    /// Service paths this principal may reach. Ignored when `is_admin`.
    pub accessible_servers: HashSet<String>,
    /// Per-Service tool access. Ignored when `is_admin`.
    pub accessible_tools: HashMap<String, ToolAccess>,
}

impl Principal {
    /// Can this principal reach the Service at `path` at all?
    #[must_use]
    pub fn can_access_service(&self, path: &str) -> bool {
        self.is_admin || self.accessible_servers.contains(path)
    }

    /// Can this principal call `tool` on the Service at `path`?
    #[must_use]
    pub fn can_access_tool(&self, path: &str, tool: &str) -> bool {
        if self.is_admin {
            return true;
        }
        self.accessible_tools
            .get(path)
            .is_some_and(|grant| grant.allows(tool))
    }

    /// Space-separated scopes, as carried in the `X-Scopes` header.
    #[must_use]
    pub fn scopes_header_value(&self) -> String {
        let mut scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        scopes.sort_unstable();
        scopes.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_access_union_named_merges() {
        let a = ToolAccess::Named(["x".to_string()].into_iter().collect());
        let b = ToolAccess::Named(["y".to_string()].into_iter().collect());
        let merged = a.union(b);
        assert!(merged.allows("x"));
        assert!(merged.allows("y"));
        assert!(!merged.allows("z"));
    }

    #[test]
    fn tool_access_union_with_all_is_all() {
        let a = ToolAccess::Named(["x".to_string()].into_iter().collect());
        let merged = a.union(ToolAccess::All);
        assert!(merged.allows("anything"));
    }

    #[test]
    fn admin_bypasses_accessible_sets() {
        let principal = Principal {
            username: "root".to_string(),
            groups: HashSet::new(),
            scopes: HashSet::new(),
            auth_method: AuthMethod::OidcBearer,
            provider: "https://idp.example.com".to_string(),
            is_admin: true,
            accessible_servers: HashSet::new(),
            accessible_tools: HashMap::new(),
        };
        assert!(principal.can_access_service("/anything"));
        assert!(principal.can_access_tool("/anything", "any-tool"));
    }

    #[test]
    fn non_admin_respects_grants() {
        let mut tools = HashMap::new();
        tools.insert(
            "/currenttime".to_string(),
            ToolAccess::Named(["get_time".to_string()].into_iter().collect()),
        );
        let principal = Principal {
            username: "alice".to_string(),
            groups: HashSet::new(),
            scopes: HashSet::new(),
            auth_method: AuthMethod::OidcBearer,
            provider: "https://idp.example.com".to_string(),
            is_admin: false,
            accessible_servers: ["/currenttime".to_string()].into_iter().collect(),
            accessible_tools: tools,
        };
        assert!(principal.can_access_service("/currenttime"));
        assert!(!principal.can_access_service("/finance"));
        assert!(principal.can_access_tool("/currenttime", "get_time"));
        assert!(!principal.can_access_tool("/currenttime", "delete_all"));
    }
}
