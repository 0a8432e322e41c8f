use std::sync::Arc;
use std::time::{Duration, Instant};

use http::HeaderMap;
use http::header;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use portal_contracts::Identity;
use serde_json::Value;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub issuer: String,
    pub audience: Option<String>,
    pub jwks_url: Option<String>,
    pub jwks_json: Option<String>,
    pub jwks_timeout: Duration,
    pub jwks_refresh_ttl: Duration,
    pub clock_skew: Duration,
    pub identity_claim: String,
    /// Cookie carrying the session JWT for browser page loads.
    pub session_cookie: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl AuthError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: "ERR_AUTH_INVALID",
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

#[derive(Clone)]
pub struct OidcAuthenticator {
    config: OidcConfig,
    http: reqwest::Client,
    jwks: Arc<RwLock<JwksCache>>,
}

#[derive(Debug)]
struct JwksCache {
    jwks: Option<JwkSet>,
    fetched_at: Option<Instant>,
}

impl OidcAuthenticator {
    pub async fn new(config: OidcConfig) -> Result<Self, AuthError> {
        if config.issuer.trim().is_empty() {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "oidc issuer must be non-empty".to_string(),
            });
        }

        if config.identity_claim.trim().is_empty() {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "oidc identity_claim must be non-empty".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.jwks_timeout)
            .build()
            .map_err(|_| AuthError {
                code: "ERR_INTERNAL",
                message: "failed to initialize oidc http client".to_string(),
            })?;

        let mut cache = JwksCache {
            jwks: None,
            fetched_at: None,
        };
        cache.refresh(&http, &config).await?;

        Ok(Self {
            config,
            http,
            jwks: Arc::new(RwLock::new(cache)),
        })
    }

    /// `Ok(None)` means the request carried no credentials at all.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Identity>, AuthError> {
        let Some(token) = session_token(headers, self.config.session_cookie.as_deref())? else {
            return Ok(None);
        };

        let header =
            decode_header(&token).map_err(|_| AuthError::invalid("invalid JWT header"))?;

        if header.alg != Algorithm::RS256 {
            return Err(AuthError::invalid("unsupported JWT alg (expected RS256)"));
        }

        let kid = header
            .kid
            .ok_or_else(|| AuthError::invalid("JWT header missing kid"))?;

        let decoding_key = self.decoding_key_for_kid(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(std::slice::from_ref(&self.config.issuer));
        match self.config.audience.as_ref() {
            Some(audience) => validation.set_audience(std::slice::from_ref(audience)),
            None => validation.validate_aud = false,
        }
        validation.leeway = self.config.clock_skew.as_secs();

        let decoded = decode::<Value>(&token, &decoding_key, &validation)
            .map_err(|_| AuthError::invalid("JWT validation failed"))?;

        let identity_id = claim_string(&decoded.claims, &self.config.identity_claim)?;
        let identity = Identity::new(identity_id).ok_or_else(|| {
            AuthError::invalid(format!(
                "claim `{}` is blank",
                self.config.identity_claim
            ))
        })?;

        Ok(Some(identity))
    }

    async fn decoding_key_for_kid(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        {
            let cache = self.jwks.read().await;
            if let Some(jwk) = cache.jwk_for_kid(kid) {
                return DecodingKey::from_jwk(jwk)
                    .map_err(|_| AuthError::invalid("failed to parse JWK decoding key"));
            }
        }

        {
            let mut cache = self.jwks.write().await;
            let refresh_needed = cache
                .fetched_at
                .map(|t| t.elapsed() > self.config.jwks_refresh_ttl)
                .unwrap_or(true);
            if refresh_needed {
                cache.refresh(&self.http, &self.config).await?;
            }

            if let Some(jwk) = cache.jwk_for_kid(kid) {
                return DecodingKey::from_jwk(jwk)
                    .map_err(|_| AuthError::invalid("failed to parse JWK decoding key"));
            }
        }

        Err(AuthError::invalid("JWT kid not found in JWKS"))
    }
}

impl JwksCache {
    fn jwk_for_kid(&self, kid: &str) -> Option<&jsonwebtoken::jwk::Jwk> {
        self.jwks.as_ref()?.find(kid)
    }

    async fn refresh(
        &mut self,
        http: &reqwest::Client,
        config: &OidcConfig,
    ) -> Result<(), AuthError> {
        let jwks = if let Some(jwks_json) = config.jwks_json.as_ref() {
            serde_json::from_str::<JwkSet>(jwks_json).map_err(|_| AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "PORTAL_OIDC_JWKS_JSON is not valid JWKS JSON".to_string(),
            })?
        } else if let Some(url) = config.jwks_url.as_ref() {
            let unavailable = |message: &str| AuthError {
                code: "ERR_AUTH_UNAVAILABLE",
                message: message.to_string(),
            };
            http.get(url)
                .send()
                .await
                .map_err(|_| unavailable("failed to fetch JWKS"))?
                .error_for_status()
                .map_err(|_| unavailable("JWKS endpoint returned non-success status"))?
                .json::<JwkSet>()
                .await
                .map_err(|_| unavailable("failed to parse JWKS JSON"))?
        } else {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "oidc requires jwks_url or jwks_json".to_string(),
            });
        };

        self.jwks = Some(jwks);
        self.fetched_at = Some(Instant::now());
        Ok(())
    }
}

/// Bearer header wins over the session cookie. A present but malformed
/// Authorization header is an error, not an absent credential.
fn session_token(
    headers: &HeaderMap,
    session_cookie: Option<&str>,
) -> Result<Option<String>, AuthError> {
    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty());

    if let Some(authz) = authz {
        let token = authz
            .strip_prefix("Bearer ")
            .or_else(|| authz.strip_prefix("bearer "))
            .map(|t| t.trim())
            .ok_or_else(|| AuthError::invalid("Authorization must be a Bearer token"))?;
        if token.is_empty() {
            return Err(AuthError::invalid("Bearer token is empty"));
        }
        return Ok(Some(token.to_string()));
    }

    let Some(cookie_name) = session_cookie else {
        return Ok(None);
    };
    Ok(cookie_value(headers, cookie_name))
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

fn claim_string(claims: &Value, claim: &str) -> Result<String, AuthError> {
    claims
        .get(claim)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            AuthError::invalid(format!(
                "required claim `{}` is missing or not a string",
                claim
            ))
        })
}
