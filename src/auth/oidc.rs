//! OIDC bearer token verification — JWT signature validation and JWKS caching.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Decode the claims without verification to extract `iss` and `iat`.
//! 3. Find the matching provider config by `iss`.
//! 4. Reject tokens issued more than `max_token_age` ago (replay protection).
//! 5. Fetch the provider's JWKS (cached 1 hour; refreshed once on unknown `kid`).
//! 6. Verify the JWT signature and standard claims (`exp`, `aud`, `iss`).
//! 7. Return a [`VerifiedIdentity`] carrying `groups` and `scope`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, Header, TokenData, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{AuthConfig, OidcProviderConfig};

/// Error variants for OIDC verification failures.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// JWT decode / signature verification failed.
    #[error("JWT verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The token's issuer does not match any configured provider.
    #[error("Unknown issuer: {0}")]
    UnknownIssuer(String),

    /// The JWT header contains no `kid` field.
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` in the JWT header is not in the provider's JWKS.
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    /// Network or HTTP error while fetching JWKS.
    #[error("JWKS fetch error: {0}")]
    Http(#[from] reqwest::Error),

    /// The OIDC token is older than `max_token_age` (replay protection).
    #[error("OIDC token too old (issued {iat_ago}s ago, max {max}s)")]
    TokenTooOld {
        /// Seconds since the token was issued.
        iat_ago: u64,
        /// Maximum allowed age in seconds.
        max: u64,
    },

    /// The token is structurally malformed.
    #[error("Malformed token")]
    Malformed,
}

/// Verified identity extracted from a valid OIDC bearer token.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    /// OIDC `sub` claim (opaque user ID).
    pub subject: String,
    /// `preferred_username`, falling back to `sub`.
    pub username: String,
    /// Group memberships (from a custom `groups` claim).
    pub groups: Vec<String>,
    /// Space-delimited `scope` claim, if present.
    pub scope: Vec<String>,
    /// Issuer URL.
    pub issuer: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    iss: String,
    sub: String,
    #[serde(default)]
    aud: serde_json::Value,
    #[allow(dead_code)]
    exp: u64,
    iat: u64,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    groups: Option<Vec<String>>,
    #[serde(default)]
    scope: Option<String>,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedJwks {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }
}

/// JWKS cache, one entry per issuer.
///
/// Tracks fetch failures separately so a flapping JWKS endpoint doesn't get
/// hammered on every request: a failed refresh is negative-cached for 60s,
/// during which the last known (even if stale) key set is served instead.
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    failures: DashMap<String, Instant>,
    http: reqwest::Client,
    ttl: Duration,
    negative_ttl: Duration,
}

impl JwksCache {
    /// Create with a 1-hour default TTL.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
            failures: DashMap::new(),
            http: reqwest::Client::builder()
                .https_only(true)
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            ttl: Duration::from_secs(3600),
            negative_ttl: Duration::from_secs(60),
        }
    }

    async fn get_or_fetch(
        &self,
        issuer: &str,
        jwks_uri: &str,
        force_refresh: bool,
    ) -> Result<JwkSet, OidcError> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(issuer) {
                if !cached.is_stale() {
                    return Ok(cached.keys.clone());
                }
            }
        }

        if let Some(failed_at) = self.failures.get(issuer) {
            if failed_at.elapsed() < self.negative_ttl {
                if let Some(cached) = self.inner.get(issuer) {
                    debug!(issuer = %issuer, "JWKS refresh negative-cached, using last known keys");
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(issuer = %issuer, "fetching JWKS from {jwks_uri}");
        let fetched = async {
            let jwks: JwkSet = self.http.get(jwks_uri).send().await?.json().await?;
            Ok::<_, OidcError>(jwks)
        }
        .await;

        match fetched {
            Ok(jwks) => {
                self.failures.remove(issuer);
                self.inner.insert(
                    issuer.to_string(),
                    CachedJwks {
                        keys: jwks.clone(),
                        fetched_at: Instant::now(),
                        ttl: self.ttl,
                    },
                );
                Ok(jwks)
            }
            Err(err) => {
                self.failures.insert(issuer.to_string(), Instant::now());
                if let Some(cached) = self.inner.get(issuer) {
                    warn!(issuer = %issuer, error = %err, "JWKS refresh failed, falling back to last known keys");
                    return Ok(cached.keys.clone());
                }
                Err(err)
            }
        }
    }
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies OIDC bearer tokens against a set of trusted providers.
pub struct OidcVerifier {
    providers: Vec<OidcProviderConfig>,
    jwks_cache: Arc<JwksCache>,
    max_token_age: Duration,
}

impl OidcVerifier {
    /// Build from the loaded auth config.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            providers: config.oidc_providers.clone(),
            jwks_cache: Arc::new(JwksCache::new()),
            max_token_age: config.max_token_age,
        }
    }

    /// Verify a bearer token and return the extracted identity.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError`] if the token is malformed, expired, from an
    /// unknown issuer, signed with an unknown key, or too old to accept.
    pub async fn verify(&self, token: &str) -> Result<VerifiedIdentity, OidcError> {
        let header = jsonwebtoken::decode_header(token)?;
        let unverified = extract_unverified_claims(token)?;

        let provider = self
            .providers
            .iter()
            .find(|p| p.issuer == unverified.iss)
            .ok_or_else(|| OidcError::UnknownIssuer(unverified.iss.clone()))?;

        if !provider.issuer.starts_with("https://") {
            warn!(issuer = %provider.issuer, "OIDC issuer is not HTTPS");
        }

        let now_secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        let iat_ago = now_secs.saturating_sub(unverified.iat);
        let max_age_secs = self.max_token_age.as_secs();
        if iat_ago > max_age_secs {
            return Err(OidcError::TokenTooOld {
                iat_ago,
                max: max_age_secs,
            });
        }

        let kid = header.kid.clone().ok_or(OidcError::MissingKeyId)?;
        let jwks_uri = provider
            .jwks_uri
            .clone()
            .unwrap_or_else(|| default_jwks_uri(&provider.issuer));

        let decoding_key = self
            .find_decoding_key(&kid, &provider.issuer, &jwks_uri)
            .await?;

        let mut validation = build_validation(&header);
        validation.validate_aud = false;

        let token_data: TokenData<Claims> = jsonwebtoken::decode(token, &decoding_key, &validation)?;
        let claims = token_data.claims;

        if !provider.audiences.is_empty() {
            check_audience(&claims.aud, &provider.audiences)?;
        }

        let username = claims.preferred_username.unwrap_or_else(|| claims.sub.clone());
        let scope = claims
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(VerifiedIdentity {
            subject: claims.sub,
            username,
            groups: claims.groups.unwrap_or_default(),
            scope,
            issuer: claims.iss,
        })
    }

    async fn find_decoding_key(
        &self,
        kid: &str,
        issuer: &str,
        jwks_uri: &str,
    ) -> Result<DecodingKey, OidcError> {
        let jwks = self.jwks_cache.get_or_fetch(issuer, jwks_uri, false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        debug!(kid = %kid, "key not found in cached JWKS, refreshing");
        let jwks = self.jwks_cache.get_or_fetch(issuer, jwks_uri, true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| OidcError::UnknownKeyId(kid.to_string()))
    }
}

fn extract_unverified_claims(token: &str) -> Result<Claims, OidcError> {
    let parts: Vec<&str> = token.splitn(3, '.').collect();
    if parts.len() < 2 {
        return Err(OidcError::Malformed);
    }

    let payload = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, parts[1])
        .map_err(|_| OidcError::Malformed)?;

    serde_json::from_slice::<Claims>(&payload).map_err(|_| OidcError::Malformed)
}

fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        let jwk_kid = jwk.common.key_id.as_deref().unwrap_or("");
        if jwk_kid != kid {
            continue;
        }

        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y).ok(),
            AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
        };
    }
    None
}

fn build_validation(header: &Header) -> Validation {
    let alg = match header.alg {
        Algorithm::RS256 => Algorithm::RS256,
        Algorithm::RS384 => Algorithm::RS384,
        Algorithm::RS512 => Algorithm::RS512,
        Algorithm::ES256 => Algorithm::ES256,
        Algorithm::ES384 => Algorithm::ES384,
        other => {
            warn!(alg = ?other, "unsupported JWT algorithm, defaulting to RS256");
            Algorithm::RS256
        }
    };

    let mut v = Validation::new(alg);
    v.leeway = 60;
    v
}

fn check_audience(aud_claim: &serde_json::Value, expected: &[String]) -> Result<(), OidcError> {
    let matches = match aud_claim {
        serde_json::Value::String(s) => expected.iter().any(|e| e == s),
        serde_json::Value::Array(arr) => arr
            .iter()
            .any(|v| v.as_str().is_some_and(|s| expected.iter().any(|e| e == s))),
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(OidcError::Jwt(jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::InvalidAudience,
        )))
    }
}

fn default_jwks_uri(issuer: &str) -> String {
    let base = issuer.trim_end_matches('/');
    format!("{base}/.well-known/jwks.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_jwks_uri_appends_well_known() {
        assert_eq!(
            default_jwks_uri("https://idp.example.com"),
            "https://idp.example.com/.well-known/jwks.json"
        );
    }

    #[test]
    fn default_jwks_uri_handles_trailing_slash() {
        assert_eq!(
            default_jwks_uri("https://idp.example.com/"),
            "https://idp.example.com/.well-known/jwks.json"
        );
    }

    #[test]
    fn check_audience_accepts_string_match() {
        let aud = serde_json::json!("my-client-id");
        assert!(check_audience(&aud, &["my-client-id".to_string()]).is_ok());
    }

    #[test]
    fn check_audience_accepts_array_member_match() {
        let aud = serde_json::json!(["other", "my-client-id"]);
        assert!(check_audience(&aud, &["my-client-id".to_string()]).is_ok());
    }

    #[test]
    fn check_audience_rejects_no_match() {
        let aud = serde_json::json!("wrong-client");
        assert!(check_audience(&aud, &["my-client-id".to_string()]).is_err());
    }

    #[test]
    fn extract_unverified_claims_rejects_malformed_token() {
        assert!(extract_unverified_claims("not-a-jwt").is_err());
    }

    #[test]
    fn extract_unverified_claims_reads_scope_and_groups() {
        let header = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            r#"{"alg":"RS256","kid":"k1"}"#,
        );
        let payload = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            r#"{"iss":"https://idp.example.com","sub":"u1","exp":9999999999,"iat":1,"groups":["ml-engineers"],"scope":"a b"}"#,
        );
        let token = format!("{header}.{payload}.sig");
        let claims = extract_unverified_claims(&token).unwrap();
        assert_eq!(claims.iss, "https://idp.example.com");
        assert_eq!(claims.groups, Some(vec!["ml-engineers".to_string()]));
        assert_eq!(claims.scope, Some("a b".to_string()));
    }
}
