//! Auth Resolver — validates bearer credentials and resolves them into a
//! [`Principal`] with an effective Group -> Scope -> Service/Tool grant set.

mod oidc;
mod principal;
mod scopes;
mod token_store;

pub use oidc::{OidcError, OidcVerifier, VerifiedIdentity};
pub use principal::{AuthMethod, Principal, ToolAccess};
pub use scopes::{Access, ScopeMapping};
pub use token_store::{MintedToken, TokenStore};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::AuthConfig;
use crate::{Error, Result};

struct CachedPrincipal {
    principal: Principal,
    cached_at: Instant,
}

/// Resolves credentials presented at the ingress into a [`Principal`].
pub struct AuthResolver {
    oidc: OidcVerifier,
    scopes: ScopeMapping,
    minted_tokens: Arc<TokenStore>,
    sessions: Arc<TokenStore>,
    principal_cache: DashMap<String, CachedPrincipal>,
    principal_cache_ttl: Duration,
    minted_token_ttl: Duration,
}

impl AuthResolver {
    /// Build from the loaded auth config.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            oidc: OidcVerifier::from_config(config),
            scopes: ScopeMapping::from_config(config),
            minted_tokens: Arc::new(TokenStore::new()),
            sessions: Arc::new(TokenStore::new()),
            principal_cache: DashMap::new(),
            principal_cache_ttl: config.principal_cache_ttl,
            minted_token_ttl: config.minted_token_ttl,
        }
    }

    /// Reload the Group -> Scope -> Access mapping atomically.
    pub fn reload_scopes(&self, config: &AuthConfig) {
        self.scopes.reload(config);
    }

    /// The minted-token store, shared with the `/auth/token` HTTP handlers.
    #[must_use]
    pub fn minted_tokens(&self) -> Arc<TokenStore> {
        self.minted_tokens.clone()
    }

    /// The session-cookie store, shared with the web UI login handlers.
    #[must_use]
    pub fn sessions(&self) -> Arc<TokenStore> {
        self.sessions.clone()
    }

    /// Validate a bearer credential (`Authorization: Bearer <token>` header
    /// value's token part, or a session cookie value) and resolve it into a
    /// `Principal`.
    ///
    /// # Errors
    ///
    /// Returns `Error::AuthFailed` for any credential that is missing,
    /// malformed, expired, or fails signature/issuer verification.
    pub async fn validate_bearer(&self, token: &str) -> Result<Principal> {
        if token.is_empty() {
            return Err(Error::AuthFailed("missing credential".to_string()));
        }

        if let Some(minted) = self.minted_tokens.get(token) {
            return Ok(minted.principal);
        }

        let cache_key = Self::fingerprint(token);
        if let Some(cached) = self.principal_cache.get(&cache_key) {
            if cached.cached_at.elapsed() < self.principal_cache_ttl {
                return Ok(cached.principal.clone());
            }
        }

        let identity = self
            .oidc
            .verify(token)
            .await
            .map_err(|e| Error::AuthFailed(e.to_string()))?;

        let principal = self.resolve_principal(identity, AuthMethod::OidcBearer);

        self.principal_cache.insert(
            cache_key,
            CachedPrincipal {
                principal: principal.clone(),
                cached_at: Instant::now(),
            },
        );

        Ok(principal)
    }

    /// Validate an opaque session cookie value.
    ///
    /// # Errors
    ///
    /// Returns `Error::AuthFailed` if the cookie does not resolve to a live
    /// session.
    pub fn validate_session(&self, cookie_value: &str) -> Result<Principal> {
        self.sessions
            .get(cookie_value)
            .map(|s| s.principal)
            .ok_or_else(|| Error::AuthFailed("session expired or unknown".to_string()))
    }

    /// Verify a raw OIDC identity token, without resolving it into a
    /// `Principal`. Used by the `/auth/token` exchange endpoint, which needs
    /// the underlying `VerifiedIdentity` to pass to [`Self::mint_token`].
    ///
    /// # Errors
    ///
    /// Returns `Error::AuthFailed` if the token fails verification.
    pub async fn verify_identity(&self, token: &str) -> Result<VerifiedIdentity> {
        self.oidc.verify(token).await.map_err(|e| Error::AuthFailed(e.to_string()))
    }

    /// Mint a new opaque bearer token scoped to the intersection of what
    /// `identity` is granted and `requested_scopes` asked for.
    ///
    /// # Errors
    ///
    /// Returns `Error::AuthFailed` if none of the requested scopes are
    /// actually granted to this identity.
    pub fn mint_token(
        &self,
        identity: VerifiedIdentity,
        requested_scopes: &HashSet<String>,
    ) -> Result<MintedToken> {
        let groups: HashSet<String> = identity.groups.iter().cloned().collect();
        let granted_scopes = self.scopes.scopes_for_groups(&groups);
        let effective: HashSet<String> = if requested_scopes.is_empty() {
            granted_scopes.clone()
        } else {
            granted_scopes.intersection(requested_scopes).cloned().collect()
        };

        if effective.is_empty() && !self.scopes.is_admin(&groups) {
            return Err(Error::AuthFailed(
                "no requested scope is granted to this identity".to_string(),
            ));
        }

        let mut principal = self.build_principal(identity, &groups, &effective, AuthMethod::MintedToken);
        principal.scopes = effective;

        tracing::info!(username = %principal.username, "minted registry token");
        Ok(self.minted_tokens.mint(principal, self.minted_token_ttl))
    }

    /// Revoke a minted token by its JTI.
    pub fn revoke_token(&self, jti: &str) -> bool {
        let revoked = self.minted_tokens.revoke_by_jti(jti);
        if revoked {
            tracing::info!(jti, "revoked registry token");
        }
        revoked
    }

    /// Mint a short-lived admin-scoped bearer token for the Health Monitor's
    /// own probes. The probe identity is internal and trusted, not asserted
    /// by an external IdP, so this bypasses OIDC verification entirely.
    #[must_use]
    pub fn mint_probe_token(&self) -> String {
        let principal = Principal {
            username: "health-monitor".to_string(),
            groups: HashSet::new(),
            scopes: HashSet::new(),
            auth_method: AuthMethod::MintedToken,
            provider: "internal".to_string(),
            is_admin: true,
            accessible_servers: HashSet::new(),
            accessible_tools: std::collections::HashMap::new(),
        };
        self.minted_tokens.mint(principal, Duration::from_secs(60)).token
    }

    fn resolve_principal(&self, identity: VerifiedIdentity, auth_method: AuthMethod) -> Principal {
        let groups: HashSet<String> = identity.groups.iter().cloned().collect();
        let scopes = self.scopes.scopes_for_groups(&groups);
        if scopes.is_empty() && !groups.is_empty() {
            warn!(groups = ?groups, "no scopes resolved for principal's groups");
        }
        self.build_principal(identity, &groups, &scopes, auth_method)
    }

    fn build_principal(
        &self,
        identity: VerifiedIdentity,
        groups: &HashSet<String>,
        scopes: &HashSet<String>,
        auth_method: AuthMethod,
    ) -> Principal {
        let is_admin = self.scopes.is_admin(groups);
        let access = self.scopes.access_for_scopes(scopes);

        Principal {
            username: identity.username,
            groups: groups.clone(),
            scopes: scopes.clone(),
            auth_method,
            provider: identity.issuer,
            is_admin,
            accessible_servers: access.servers,
            accessible_tools: access.tools,
        }
    }

    fn fingerprint(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScopeAccessConfig;
    use std::collections::HashMap;

    fn config() -> AuthConfig {
        let mut group_scopes = HashMap::new();
        group_scopes.insert("ml-engineers".to_string(), vec!["time/read".to_string()]);
        let mut scope_access = HashMap::new();
        scope_access.insert(
            "time/read".to_string(),
            ScopeAccessConfig {
                service: "/currenttime".to_string(),
                tools: vec!["get_time".to_string()],
            },
        );
        AuthConfig {
            admin_groups: vec!["mcp-registry-admins".to_string()],
            group_scopes,
            scope_access,
            ..Default::default()
        }
    }

    fn identity(groups: Vec<String>) -> VerifiedIdentity {
        VerifiedIdentity {
            subject: "u1".to_string(),
            username: "alice".to_string(),
            groups,
            scope: Vec::new(),
            issuer: "https://idp.example.com".to_string(),
        }
    }

    #[test]
    fn mint_token_scopes_to_intersection() {
        let resolver = AuthResolver::from_config(&config());
        let requested: HashSet<String> = ["time/read".to_string()].into_iter().collect();
        let minted = resolver
            .mint_token(identity(vec!["ml-engineers".to_string()]), &requested)
            .unwrap();
        assert!(minted.principal.can_access_service("/currenttime"));
        assert!(minted.principal.can_access_tool("/currenttime", "get_time"));
    }

    #[test]
    fn mint_token_rejects_ungranted_request() {
        let resolver = AuthResolver::from_config(&config());
        let requested: HashSet<String> = ["nonexistent/scope".to_string()].into_iter().collect();
        let result = resolver.mint_token(identity(vec!["ml-engineers".to_string()]), &requested);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn validate_bearer_rejects_empty_token() {
        let resolver = AuthResolver::from_config(&config());
        let result = resolver.validate_bearer("").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn validate_bearer_accepts_minted_token() {
        let resolver = AuthResolver::from_config(&config());
        let requested: HashSet<String> = ["time/read".to_string()].into_iter().collect();
        let minted = resolver
            .mint_token(identity(vec!["ml-engineers".to_string()]), &requested)
            .unwrap();

        let principal = resolver.validate_bearer(&minted.token).await.unwrap();
        assert_eq!(principal.username, "alice");
    }

    #[test]
    fn validate_session_rejects_unknown_cookie() {
        let resolver = AuthResolver::from_config(&config());
        assert!(resolver.validate_session("no-such-cookie").is_err());
    }

    #[test]
    fn revoke_token_invalidates_it() {
        let resolver = AuthResolver::from_config(&config());
        let requested: HashSet<String> = ["time/read".to_string()].into_iter().collect();
        let minted = resolver
            .mint_token(identity(vec!["ml-engineers".to_string()]), &requested)
            .unwrap();
        assert!(resolver.revoke_token(&minted.jti));
        assert!(resolver.minted_tokens.get(&minted.token).is_none());
    }
}
