//! Bearer token verification against a remote JWKS.
//!
//! A token is accepted when its signature verifies under the JWK named by its
//! `kid`, it has not expired, its `iss` matches the configured issuer and its
//! `claims` array contains the configured application id. Keys are cached and
//! the set is fetched again when a token names a `kid` the cache lacks, at most
//! once per cooldown window.
//!
//! The accepted algorithms come from the key, never from the token header.

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use takbridge_core::config::ProducerConfig;
use takbridge_core::AuthError;
use tracing::{debug, warn};

/// Claims the bridge reads from a verified token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalystClaims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<u64>,
    /// Application ids the bearer may access
    #[serde(default)]
    pub claims: Option<Vec<serde_json::Value>>,
}

impl CatalystClaims {
    fn grants(&self, app_id: &str) -> Result<(), AuthError> {
        let claims = self.claims.as_ref().ok_or(AuthError::ClaimsMissing)?;
        if claims.iter().any(|c| c.as_str() == Some(app_id)) {
            Ok(())
        } else {
            Err(AuthError::ClaimsDoNotAlign {
                app_id: app_id.to_string(),
            })
        }
    }
}

/// How long an unknown `kid` must wait before the JWKS is fetched again
pub const DEFAULT_REFETCH_COOLDOWN: Duration = Duration::from_secs(30);

/// A verification key and the algorithms it may verify.
#[derive(Clone)]
pub struct VerificationKey {
    key: DecodingKey,
    algorithms: Vec<Algorithm>,
}

impl VerificationKey {
    pub fn new(key: DecodingKey, algorithms: impl Into<Vec<Algorithm>>) -> Self {
        Self {
            key,
            algorithms: algorithms.into(),
        }
    }

    /// Key from a JWK. The JWK's `alg` pins a single algorithm; without one
    /// the algorithms of the key's family are allowed. Returns `None` for
    /// keys no supported algorithm can use.
    pub fn from_jwk(jwk: &Jwk) -> Option<Self> {
        let algorithms = match jwk.common.key_algorithm {
            Some(alg) => signing_algorithm(alg).into_iter().collect(),
            None => family_algorithms(&jwk.algorithm),
        };
        if algorithms.is_empty() {
            return None;
        }
        let key = DecodingKey::from_jwk(jwk).ok()?;
        Some(Self::new(key, algorithms))
    }

    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }
}

fn signing_algorithm(alg: KeyAlgorithm) -> Option<Algorithm> {
    Some(match alg {
        KeyAlgorithm::HS256 => Algorithm::HS256,
        KeyAlgorithm::HS384 => Algorithm::HS384,
        KeyAlgorithm::HS512 => Algorithm::HS512,
        KeyAlgorithm::ES256 => Algorithm::ES256,
        KeyAlgorithm::ES384 => Algorithm::ES384,
        KeyAlgorithm::RS256 => Algorithm::RS256,
        KeyAlgorithm::RS384 => Algorithm::RS384,
        KeyAlgorithm::RS512 => Algorithm::RS512,
        KeyAlgorithm::PS256 => Algorithm::PS256,
        KeyAlgorithm::PS384 => Algorithm::PS384,
        KeyAlgorithm::PS512 => Algorithm::PS512,
        KeyAlgorithm::EdDSA => Algorithm::EdDSA,
        // Encryption algorithms
        _ => return None,
    })
}

fn family_algorithms(params: &AlgorithmParameters) -> Vec<Algorithm> {
    use Algorithm::*;
    match params {
        AlgorithmParameters::RSA(_) => vec![RS256, RS384, RS512, PS256, PS384, PS512],
        AlgorithmParameters::EllipticCurve(ec) => match ec.curve {
            EllipticCurve::P256 => vec![ES256],
            EllipticCurve::P384 => vec![ES384],
            _ => Vec::new(),
        },
        AlgorithmParameters::OctetKeyPair(_) => vec![EdDSA],
        AlgorithmParameters::OctetKey(_) => vec![HS256, HS384, HS512],
    }
}

/// Where verification keys come from, keyed by `kid`.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<HashMap<String, VerificationKey>, AuthError>;
}

/// Fetches a JWKS document over HTTPS.
pub struct HttpJwks {
    client: reqwest::Client,
    url: String,
}

impl HttpJwks {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl KeySource for HttpJwks {
    async fn fetch(&self) -> Result<HashMap<String, VerificationKey>, AuthError> {
        let fetch_err = |e: reqwest::Error| AuthError::JwksFetch { reason: e.to_string() };

        let set: JwkSet = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_err)?
            .json()
            .await
            .map_err(fetch_err)?;

        let mut keys = HashMap::new();
        for jwk in &set.keys {
            let kid = jwk.common.key_id.clone().unwrap_or_default();
            match VerificationKey::from_jwk(jwk) {
                Some(key) => {
                    keys.insert(kid, key);
                }
                None => warn!(kid = %kid, "Skipping unusable JWK"),
            }
        }
        debug!(url = %self.url, keys = keys.len(), "JWKS fetched");
        Ok(keys)
    }
}

/// Verifies bearer tokens for one issuer and application.
pub struct JwksVerifier {
    jwks_url: String,
    issuer: String,
    app_id: String,
    source: Arc<dyn KeySource>,
    keys: RwLock<HashMap<String, VerificationKey>>,
    refetch_cooldown: Duration,
    last_fetch: Mutex<Option<Instant>>,
}

impl JwksVerifier {
    pub fn new(jwks_url: impl Into<String>, issuer: impl Into<String>, app_id: impl Into<String>) -> Self {
        let jwks_url = jwks_url.into();
        let source = Arc::new(HttpJwks::new(jwks_url.clone()));
        Self::with_source(jwks_url, issuer, app_id, source)
    }

    pub fn with_source(
        jwks_url: impl Into<String>,
        issuer: impl Into<String>,
        app_id: impl Into<String>,
        source: Arc<dyn KeySource>,
    ) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            issuer: issuer.into(),
            app_id: app_id.into(),
            source,
            keys: RwLock::new(HashMap::new()),
            refetch_cooldown: DEFAULT_REFETCH_COOLDOWN,
            last_fetch: Mutex::new(None),
        }
    }

    pub fn with_refetch_cooldown(mut self, cooldown: Duration) -> Self {
        self.refetch_cooldown = cooldown;
        self
    }

    pub async fn verify(&self, token: &str) -> Result<CatalystClaims, AuthError> {
        if self.jwks_url.is_empty() {
            return Err(AuthError::JwksProviderUrlRequired);
        }
        if token.is_empty() {
            return Err(AuthError::TokenRequired);
        }

        let header = decode_header(token).map_err(jwt_error)?;
        let kid = header.kid.unwrap_or_default();
        let key = self.key_for(&kid).await?;

        let Some(&algorithm) = key.algorithms.first() else {
            return Err(AuthError::Unexpected {
                reason: format!("key '{}' allows no algorithm", kid),
            });
        };
        let mut validation = Validation::new(algorithm);
        validation.algorithms = key.algorithms.clone();
        validation.validate_aud = false;
        let claims = decode::<CatalystClaims>(token, &key.key, &validation)
            .map_err(jwt_error)?
            .claims;

        if claims.iss.as_deref() != Some(self.issuer.as_str()) {
            return Err(AuthError::IssuerInvalid {
                expected: self.issuer.clone(),
                actual: claims.iss.unwrap_or_default(),
            });
        }
        claims.grants(&self.app_id)?;
        Ok(claims)
    }

    async fn key_for(&self, kid: &str) -> Result<VerificationKey, AuthError> {
        if let Some(key) = self.cached(kid) {
            return Ok(key);
        }

        {
            let mut last_fetch = self.last_fetch.lock();
            if last_fetch.is_some_and(|at| at.elapsed() < self.refetch_cooldown) {
                return Err(AuthError::JwksFetch {
                    reason: format!("no key with id '{}' in JWKS", kid),
                });
            }
            *last_fetch = Some(Instant::now());
        }

        debug!(kid = %kid, "Unknown key id, refreshing JWKS");
        let fetched = self.source.fetch().await?;
        *self.keys.write() = fetched;

        self.cached(kid).ok_or_else(|| AuthError::JwksFetch {
            reason: format!("no key with id '{}' in JWKS", kid),
        })
    }

    fn cached(&self, kid: &str) -> Option<VerificationKey> {
        let keys = self.keys.read();
        match keys.get(kid) {
            Some(key) => Some(key.clone()),
            // A token without a kid may use a set holding a single key
            None if kid.is_empty() && keys.len() == 1 => keys.values().next().cloned(),
            None => None,
        }
    }
}

fn jwt_error(e: jsonwebtoken::errors::Error) -> AuthError {
    match e.kind() {
        ErrorKind::Json(_) | ErrorKind::Utf8(_) | ErrorKind::Crypto(_) => AuthError::Unexpected {
            reason: e.to_string(),
        },
        _ => AuthError::ValidationFailed { reason: e.to_string() },
    }
}

/// Request authentication policy.
#[derive(Clone)]
pub enum Authenticator {
    /// Dev mode: every request is accepted
    Disabled,
    Jwks(Arc<JwksVerifier>),
}

impl Authenticator {
    pub fn from_producer(producer: &ProducerConfig, dev: bool) -> Self {
        if dev {
            warn!("Dev mode enabled, bearer token verification is disabled");
            return Authenticator::Disabled;
        }
        let setting = |value: &Option<String>| value.clone().unwrap_or_default();
        Authenticator::Jwks(Arc::new(JwksVerifier::new(
            setting(&producer.catalyst_jwks_url),
            setting(&producer.catalyst_jwt_issuer),
            setting(&producer.catalyst_app_id),
        )))
    }

    /// Verifies the request's bearer token. `None` means verification is off.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<CatalystClaims>, AuthError> {
        match self {
            Authenticator::Disabled => Ok(None),
            Authenticator::Jwks(verifier) => {
                let token = bearer_token(headers).ok_or(AuthError::TokenRequired)?;
                verifier.verify(token).await.map(Some)
            }
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_claims_grant() {
        let mut claims = CatalystClaims {
            iss: None,
            sub: None,
            exp: None,
            claims: None,
        };
        assert_eq!(claims.grants("app"), Err(AuthError::ClaimsMissing));

        claims.claims = Some(vec![json!("other"), json!(7)]);
        assert!(matches!(
            claims.grants("app"),
            Err(AuthError::ClaimsDoNotAlign { .. })
        ));

        claims.claims = Some(vec![json!("other"), json!("app")]);
        assert!(claims.grants("app").is_ok());
    }

    #[test]
    fn test_jwk_algorithms() {
        let rsa = json!({"kty": "RSA", "kid": "r1", "n": "sXchDaQe", "e": "AQAB"});
        let jwk: Jwk = serde_json::from_value(rsa.clone()).unwrap();
        let key = VerificationKey::from_jwk(&jwk).unwrap();
        assert!(key.algorithms().contains(&Algorithm::RS256));
        assert!(!key.algorithms().contains(&Algorithm::HS256));

        let mut pinned = rsa;
        pinned["alg"] = json!("RS256");
        let jwk: Jwk = serde_json::from_value(pinned).unwrap();
        assert_eq!(VerificationKey::from_jwk(&jwk).unwrap().algorithms(), [Algorithm::RS256]);

        let secret: Jwk = serde_json::from_value(json!({"kty": "oct", "kid": "h1", "alg": "HS256", "k": "c2VjcmV0"})).unwrap();
        assert_eq!(VerificationKey::from_jwk(&secret).unwrap().algorithms(), [Algorithm::HS256]);
    }

    #[tokio::test]
    async fn test_empty_settings() {
        let verifier = JwksVerifier::new("", "issuer", "app");
        assert_eq!(
            verifier.verify("token").await,
            Err(AuthError::JwksProviderUrlRequired)
        );

        let verifier = JwksVerifier::new("https://auth.example.com/jwks", "issuer", "app");
        assert_eq!(verifier.verify("").await, Err(AuthError::TokenRequired));
        assert!(matches!(
            verifier.verify("not-a-jwt").await,
            Err(AuthError::ValidationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_dev_mode_accepts_anything() {
        let auth = Authenticator::Disabled;
        assert_eq!(auth.authenticate(&HeaderMap::new()).await, Ok(None));
    }
}
