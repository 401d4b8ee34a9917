//! Auth: validates caller credentials (static API keys, optional signed
//! bearer tokens) and issues/revokes per-cluster executor tokens.
//!
//! This is a leaf component — depended on by the frontend middleware only,
//! never the other way around.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use rand::RngCore;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::{self, AuditEvent};
use crate::error::{GatewayError, GatewayResult};
use crate::keystore::{Keystore, keys};

const JWKS_CACHE_TTL: Duration = Duration::from_secs(600);
const EXECUTOR_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct ApiKeyEntry {
    pub key: String,
    pub service_identity: Option<String>,
}

/// Process-configured set of accepted API keys. Immutable for the process
/// lifetime; parsed once at startup.
#[derive(Debug, Clone)]
pub struct ApiKeys(Vec<ApiKeyEntry>);

impl ApiKeys {
    /// Parses the `API_KEYS` wire form: comma-separated, each entry either a
    /// bare key or `service:key`. Fails startup (via `MissingConfiguration`)
    /// if the resulting set is empty.
    pub fn parse(raw: &[String]) -> anyhow::Result<Self> {
        let mut entries = Vec::new();
        for entry in raw {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match entry.split_once(':') {
                Some((service, key)) if !key.is_empty() => entries.push(ApiKeyEntry {
                    key: key.to_string(),
                    service_identity: Some(service.to_string()),
                }),
                _ => entries.push(ApiKeyEntry {
                    key: entry.to_string(),
                    service_identity: None,
                }),
            }
        }
        if entries.is_empty() {
            anyhow::bail!("MissingConfiguration: no api_keys configured");
        }
        Ok(Self(entries))
    }

    /// Constant-time lookup: every candidate is compared in full regardless
    /// of whether an earlier candidate already matched, so timing does not
    /// leak which (if any) key position matched.
    fn find(&self, presented: &str) -> Option<Option<String>> {
        let presented = presented.as_bytes();
        let mut found = None;
        for entry in &self.0 {
            let matches: bool = entry.key.as_bytes().ct_eq(presented).into();
            if matches {
                found = Some(entry.service_identity.clone());
            }
        }
        found
    }
}

#[derive(Debug, Clone, Default)]
pub struct JwtConfig {
    pub jwks_url: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl JwtConfig {
    pub fn enabled(&self) -> bool {
        self.jwks_url.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    email: Option<String>,
}

struct JwksCache {
    fetched_at: Instant,
    set: JwkSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    Jwt,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMethod::ApiKey => "api_key",
            AuthMethod::Jwt => "jwt",
        }
    }
}

pub struct AuthOutcome {
    pub identity: Option<String>,
    pub method: AuthMethod,
}

pub struct Auth {
    keystore: Keystore,
    api_keys: ApiKeys,
    jwt: JwtConfig,
    http: reqwest::Client,
    jwks_cache: RwLock<Option<JwksCache>>,
}

impl Auth {
    pub fn new(keystore: Keystore, api_keys: ApiKeys, jwt: JwtConfig) -> Arc<Self> {
        Arc::new(Self {
            keystore,
            api_keys,
            jwt,
            http: reqwest::Client::new(),
            jwks_cache: RwLock::new(None),
        })
    }

    pub fn jwt_enabled(&self) -> bool {
        self.jwt.enabled()
    }

    /// `authenticate(api_key?, bearer?)`. Bearer is tried first when both are
    /// present; on bearer failure, falls back to api_key rather than failing
    /// closed.
    pub async fn authenticate(
        &self,
        api_key: Option<&str>,
        bearer: Option<&str>,
        caller_ip: Option<String>,
    ) -> GatewayResult<AuthOutcome> {
        if let Some(bearer) = bearer
            && self.jwt_enabled()
            && let Ok(identity) = self.verify_jwt(bearer).await
        {
            let outcome = AuthOutcome {
                identity: Some(identity.clone()),
                method: AuthMethod::Jwt,
            };
            self.audit(
                "auth.success",
                Some(identity),
                Some(AuthMethod::Jwt),
                caller_ip,
            )
            .await;
            return Ok(outcome);
        }

        if let Some(api_key) = api_key
            && let Some(identity) = self.api_keys.find(api_key)
        {
            self.audit(
                "auth.success",
                identity.clone(),
                Some(AuthMethod::ApiKey),
                caller_ip,
            )
            .await;
            return Ok(AuthOutcome {
                identity,
                method: AuthMethod::ApiKey,
            });
        }

        self.audit("auth.failure", None, None, caller_ip).await;
        Err(GatewayError::InvalidCredentials)
    }

    /// `authenticate_executor(bearer, cluster_id)`. Constant-time compare
    /// against the stored `executor_token/<cluster_id>`.
    pub async fn authenticate_executor(&self, bearer: &str, cluster_id: &str) -> GatewayResult<bool> {
        let stored = self.keystore.get_string(&keys::executor_token(cluster_id)).await?;
        let ok = match stored {
            Some(stored) => stored.as_bytes().ct_eq(bearer.as_bytes()).into(),
            None => false,
        };
        self.audit(
            if ok { "executor_auth.success" } else { "executor_auth.failure" },
            Some(cluster_id.to_string()),
            None,
            None,
        )
        .await;
        Ok(ok)
    }

    /// Conflict if a token already exists for this cluster.
    pub async fn create_executor_token(&self, cluster_id: &str) -> GatewayResult<String> {
        let key = keys::executor_token(cluster_id);
        if self.keystore.exists(&key).await? {
            return Err(GatewayError::Conflict(format!(
                "executor token already exists for cluster '{cluster_id}'"
            )));
        }
        let token = generate_token();
        self.keystore.set_no_ttl(&key, &token).await?;
        self.audit(
            "executor_token.created",
            Some(cluster_id.to_string()),
            None,
            None,
        )
        .await;
        Ok(token)
    }

    pub async fn revoke_executor_token(&self, cluster_id: &str) -> GatewayResult<()> {
        self.keystore.del(&keys::executor_token(cluster_id)).await?;
        self.keystore.del(&keys::cluster_active(cluster_id)).await?;
        self.audit(
            "executor_token.revoked",
            Some(cluster_id.to_string()),
            None,
            None,
        )
        .await;
        Ok(())
    }

    pub async fn has_executor_token(&self, cluster_id: &str) -> GatewayResult<bool> {
        self.keystore.exists(&keys::executor_token(cluster_id)).await
    }

    async fn audit(
        &self,
        event: &str,
        identity: Option<String>,
        method: Option<AuthMethod>,
        ip: Option<String>,
    ) {
        let mut entry = AuditEvent::new(event).identity(identity).ip(ip);
        if let Some(method) = method {
            entry = entry.method(method.as_str());
        }
        if let Err(e) = audit::record(&self.keystore, entry).await {
            tracing::warn!(error = %e, "failed to record audit event");
        }
    }

    async fn verify_jwt(&self, token: &str) -> GatewayResult<String> {
        let jwks = self.jwks().await?;
        let header = decode_header(token).map_err(|_| GatewayError::InvalidCredentials)?;
        let kid = header.kid.ok_or(GatewayError::InvalidCredentials)?;
        let jwk = jwks
            .find(&kid)
            .ok_or(GatewayError::InvalidCredentials)?;

        let decoding_key = match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => {
                DecodingKey::from_rsa_components(&rsa.n, &rsa.e).map_err(|_| GatewayError::InvalidCredentials)?
            }
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).map_err(|_| GatewayError::InvalidCredentials)?
            }
            _ => return Err(GatewayError::InvalidCredentials),
        };

        let mut validation = Validation::new(header.alg.unwrap_or(Algorithm::RS256));
        if let Some(aud) = &self.jwt.audience {
            validation.set_audience(&[aud]);
        } else {
            validation.validate_aud = false;
        }
        if let Some(iss) = &self.jwt.issuer {
            validation.set_issuer(&[iss]);
        }

        let data = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|_| GatewayError::InvalidCredentials)?;
        Ok(data.claims.email.unwrap_or(data.claims.sub))
    }

    async fn jwks(&self) -> GatewayResult<JwkSet> {
        let url = self
            .jwt
            .jwks_url
            .as_deref()
            .ok_or(GatewayError::InvalidCredentials)?;

        {
            let cache = self.jwks_cache.read().await;
            if let Some(entry) = cache.as_ref()
                && entry.fetched_at.elapsed() < JWKS_CACHE_TTL
            {
                return Ok(entry.set.clone());
            }
        }

        let set = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|_| GatewayError::InvalidCredentials)?
            .json::<JwkSet>()
            .await
            .map_err(|_| GatewayError::InvalidCredentials)?;

        let mut cache = self.jwks_cache.write().await;
        *cache = Some(JwksCache {
            fetched_at: Instant::now(),
            set: set.clone(),
        });
        Ok(set)
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; EXECUTOR_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    format!("exec_{}", Uuid::new_v4().simple())
        + "_"
        + &bytes.iter().map(|b| format!("{b:02x}")).collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_service_keys() {
        let keys = ApiKeys::parse(&["abc123".to_string(), "svc-a:def456".to_string()]).unwrap();
        assert_eq!(keys.find("abc123"), Some(None));
        assert_eq!(keys.find("def456"), Some(Some("svc-a".to_string())));
        assert_eq!(keys.find("nope"), None);
    }

    #[test]
    fn empty_api_keys_fails() {
        assert!(ApiKeys::parse(&[]).is_err());
        assert!(ApiKeys::parse(&["".to_string(), " ".to_string()]).is_err());
    }

    #[test]
    fn jwt_disabled_when_no_jwks_url() {
        let cfg = JwtConfig::default();
        assert!(!cfg.enabled());
    }

    #[test]
    fn generated_tokens_are_unique_and_opaque() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.starts_with("exec_"));
    }
}
