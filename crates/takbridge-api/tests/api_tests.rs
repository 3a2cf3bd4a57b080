use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use takbridge_api::{app, ApiState, Authenticator, JwksVerifier, KeySource, VerificationKey};
use takbridge_core::AuthError;
use takbridge_cot::{Event, Point};
use takbridge_store::{CotStore, StoreOptions};
use tower::ServiceExt;

const ISSUER: &str = "https://auth.example.com";
const APP_ID: &str = "app-123";

struct StaticKeys {
    secrets: Mutex<Vec<(&'static str, &'static str)>>,
    fetches: AtomicUsize,
}

impl StaticKeys {
    fn new(secrets: Vec<(&'static str, &'static str)>) -> Arc<Self> {
        Arc::new(Self {
            secrets: Mutex::new(secrets),
            fetches: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl KeySource for StaticKeys {
    async fn fetch(&self) -> Result<HashMap<String, VerificationKey>, AuthError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .secrets
            .lock()
            .iter()
            .map(|(kid, secret)| {
                let key = DecodingKey::from_secret(secret.as_bytes());
                (kid.to_string(), VerificationKey::new(key, [Algorithm::HS256]))
            })
            .collect())
    }
}

fn token(kid: &str, secret: &str, claims: Value) -> String {
    token_with(Algorithm::HS256, kid, secret, claims)
}

fn token_with(alg: Algorithm, kid: &str, secret: &str, claims: Value) -> String {
    let header = Header {
        kid: Some(kid.to_string()),
        ..Header::new(alg)
    };
    encode(&header, &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

fn valid_claims() -> Value {
    json!({
        "iss": ISSUER,
        "sub": "user-1",
        "exp": Utc::now().timestamp() + 600,
        "claims": ["other-app", APP_ID]
    })
}

async fn store_with_event(dir: &tempfile::TempDir) -> CotStore {
    let store = CotStore::open(StoreOptions::in_memory(dir.path())).unwrap();
    let event = Event::new(
        "N123",
        "a-f-G",
        "h-g-i-g-o",
        Point::new(10.0, 20.0),
        Utc::now() + chrono::Duration::minutes(5),
    );
    store.put(&event).await.unwrap();
    store
}

fn jwks_router(store: CotStore, keys: Arc<StaticKeys>) -> Router {
    jwks_router_with_cooldown(store, keys, Duration::ZERO)
}

fn jwks_router_with_cooldown(store: CotStore, keys: Arc<StaticKeys>, cooldown: Duration) -> Router {
    let verifier = JwksVerifier::with_source("https://auth.example.com/jwks", ISSUER, APP_ID, keys)
        .with_refetch_cooldown(cooldown);
    app(ApiState {
        store,
        auth: Authenticator::Jwks(Arc::new(verifier)),
    })
}

async fn send(router: &Router, method: &str, uri: &str, bearer: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        request = request.header("Authorization", format!("Bearer {}", token));
    }
    let response = router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let router = jwks_router(store_with_event(&dir).await, StaticKeys::new(vec![("k1", "secret")]));

    let (status, body) = send(&router, "GET", "/cots", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "CATALYST_TOKEN_REQUIRED");
}

#[tokio::test]
async fn test_health_is_unauthenticated() {
    let dir = tempfile::tempdir().unwrap();
    let router = jwks_router(store_with_event(&dir).await, StaticKeys::new(vec![]));

    let (status, body) = send(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_valid_token_lists_events() {
    let dir = tempfile::tempdir().unwrap();
    let keys = StaticKeys::new(vec![("k1", "secret")]);
    let router = jwks_router(store_with_event(&dir).await, keys.clone());
    let bearer = token("k1", "secret", valid_claims());

    let (status, body) = send(&router, "GET", "/cots", Some(&bearer)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["uid"], "N123");

    let (status, _) = send(&router, "GET", "/cots/N123", Some(&bearer)).await;
    assert_eq!(status, StatusCode::OK);

    // Keys stay cached across requests
    assert_eq!(keys.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_token_rejections() {
    let dir = tempfile::tempdir().unwrap();
    let router = jwks_router(store_with_event(&dir).await, StaticKeys::new(vec![("k1", "secret")]));

    let mut wrong_issuer = valid_claims();
    wrong_issuer["iss"] = json!("https://evil.example.com");
    let mut no_claims = valid_claims();
    no_claims.as_object_mut().unwrap().remove("claims");
    let mut other_app = valid_claims();
    other_app["claims"] = json!(["other-app"]);
    let mut expired = valid_claims();
    expired["exp"] = json!(Utc::now().timestamp() - 3600);

    let cases = [
        (token("k1", "secret", wrong_issuer), "JWT_ISSUER_INVALID"),
        (token("k1", "secret", no_claims), "JWT_CLAIMS_MISSING"),
        (token("k1", "secret", other_app), "JWT_CLAIMS_DO_NOT_ALIGN"),
        (token("k1", "secret", expired), "JWT_VALIDATION_FAILED"),
        (token("k1", "forged", valid_claims()), "JWT_VALIDATION_FAILED"),
        (token("k9", "secret", valid_claims()), "JWKS_ERROR_FETCHING"),
    ];

    for (bearer, code) in cases {
        let (status, body) = send(&router, "GET", "/cots", Some(&bearer)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "expected {}", code);
        assert_eq!(body["code"], code);
    }
}

#[tokio::test]
async fn test_unknown_kid_refetches_keys() {
    let dir = tempfile::tempdir().unwrap();
    let keys = StaticKeys::new(vec![("k1", "secret")]);
    let router = jwks_router(store_with_event(&dir).await, keys.clone());

    let (status, _) = send(&router, "GET", "/cots", Some(&token("k1", "secret", valid_claims()))).await;
    assert_eq!(status, StatusCode::OK);

    keys.secrets.lock().push(("k2", "rotated"));
    let (status, _) = send(&router, "GET", "/cots", Some(&token("k2", "rotated", valid_claims()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(keys.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unknown_kid_waits_for_cooldown() {
    let dir = tempfile::tempdir().unwrap();
    let keys = StaticKeys::new(vec![("k1", "secret")]);
    let router = jwks_router_with_cooldown(
        store_with_event(&dir).await,
        keys.clone(),
        Duration::from_secs(30),
    );

    let (status, _) = send(&router, "GET", "/cots", Some(&token("k1", "secret", valid_claims()))).await;
    assert_eq!(status, StatusCode::OK);

    keys.secrets.lock().push(("k2", "rotated"));
    for _ in 0..5 {
        let bearer = token("k2", "rotated", valid_claims());
        let (status, body) = send(&router, "GET", "/cots", Some(&bearer)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "JWKS_ERROR_FETCHING");
    }
    assert_eq!(keys.fetches.load(Ordering::SeqCst), 1);

    // Known keys keep working inside the window
    let (status, _) = send(&router, "GET", "/cots", Some(&token("k1", "secret", valid_claims()))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_algorithm_comes_from_key_not_header() {
    let dir = tempfile::tempdir().unwrap();
    let router = jwks_router(store_with_event(&dir).await, StaticKeys::new(vec![("k1", "secret")]));

    let bearer = token_with(Algorithm::HS384, "k1", "secret", valid_claims());
    let (status, body) = send(&router, "GET", "/cots", Some(&bearer)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "JWT_VALIDATION_FAILED");
}

#[tokio::test]
async fn test_dev_mode_bypasses_auth() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(ApiState {
        store: store_with_event(&dir).await,
        auth: Authenticator::Disabled,
    });

    let (status, body) = send(&router, "GET", "/cots", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["uid"], "N123");

    let (status, body) = send(&router, "GET", "/cots/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, body) = send(&router, "GET", "/cots/N123/file", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, body) = send(&router, "DELETE", "/cots/N123", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"deleted": true}));

    let (_, body) = send(&router, "DELETE", "/cots/N123", None).await;
    assert_eq!(body, json!({"deleted": false}));
}
