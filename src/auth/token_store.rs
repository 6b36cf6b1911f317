//! Store for registry-minted opaque bearer tokens (`/auth/token` exchange).
//!
//! Tokens are indexed by their **opaque bearer value** for O(1) validation,
//! and by their **JTI** for O(1) revocation.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rand::Rng;
use tracing::debug;

use super::principal::Principal;

/// A registry-minted bearer token and the principal it was issued for.
#[derive(Debug, Clone)]
pub struct MintedToken {
    /// Unique token identifier (used for revocation).
    pub jti: String,
    /// The opaque bearer value (`mcpreg_<base64>`).
    pub token: String,
    /// The principal this token resolves to, frozen at mint time.
    pub principal: Principal,
    /// Issued-at (Unix epoch seconds).
    pub iat: u64,
    /// Expires-at (Unix epoch seconds).
    pub exp: u64,
}

impl MintedToken {
    /// Returns `true` if the token has passed its expiry time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        now >= self.exp
    }
}

/// In-memory minted-token store backed by two `DashMap` indices.
pub struct TokenStore {
    by_bearer: DashMap<String, MintedToken>,
    by_jti: DashMap<String, String>,
}

impl TokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_bearer: DashMap::new(),
            by_jti: DashMap::new(),
        }
    }

    /// Generate a cryptographically random opaque bearer value.
    ///
    /// Format: `mcpreg_<43-char URL-safe base64>` (256 bits of entropy). The
    /// prefix makes tokens greppable by secret scanners.
    #[must_use]
    pub fn generate_bearer() -> String {
        let random_bytes: [u8; 32] = rand::rng().random();
        format!(
            "mcpreg_{}",
            base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, random_bytes)
        )
    }

    /// Generate a UUID v4 JTI.
    #[must_use]
    pub fn generate_jti() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Mint and insert a new token for `principal`, valid for `ttl`.
    pub fn mint(&self, principal: Principal, ttl: Duration) -> MintedToken {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        let token = MintedToken {
            jti: Self::generate_jti(),
            token: Self::generate_bearer(),
            principal,
            iat: now,
            exp: now + ttl.as_secs(),
        };
        self.by_bearer.insert(token.token.clone(), token.clone());
        self.by_jti.insert(token.jti.clone(), token.token.clone());
        token
    }

    /// Look up a token by its opaque bearer value.
    ///
    /// Returns `None` if the token does not exist or is expired (an expired
    /// token is lazily evicted on access).
    #[must_use]
    pub fn get(&self, bearer: &str) -> Option<MintedToken> {
        let entry = self.by_bearer.get(bearer)?;
        let token = entry.clone();
        drop(entry);

        if token.is_expired() {
            self.by_bearer.remove(bearer);
            self.by_jti.remove(&token.jti);
            debug!(jti = %token.jti, "lazy-evicted expired minted token");
            return None;
        }

        Some(token)
    }

    /// Revoke a token by its JTI. Returns `true` if it existed.
    pub fn revoke_by_jti(&self, jti: &str) -> bool {
        if let Some((_, bearer)) = self.by_jti.remove(jti) {
            self.by_bearer.remove(&bearer);
            true
        } else {
            false
        }
    }

    /// Remove all expired tokens. Intended to run on a periodic reaper.
    pub fn reap_expired(&self) -> usize {
        let expired: Vec<String> = self
            .by_bearer
            .iter()
            .filter(|e| e.value().is_expired())
            .map(|e| e.key().clone())
            .collect();

        let count = expired.len();
        for bearer in expired {
            if let Some((_, token)) = self.by_bearer.remove(&bearer) {
                self.by_jti.remove(&token.jti);
            }
        }
        count
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that reaps expired tokens every `interval`,
/// exiting when `shutdown` fires.
pub fn spawn_reaper(
    store: Arc<TokenStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = store.reap_expired();
                    if reaped > 0 {
                        debug!(count = reaped, "reaped expired minted tokens");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("minted token reaper shutting down");
                    break;
                }
            }
        }
    });
}
