//! Consumer polling against a mock GraphQL gateway

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use takbridge::{empty_response, Consumer, GraphqlClient};
use takbridge_core::AppConfig;

#[derive(Clone)]
struct Gateway {
    status: StatusCode,
    body: String,
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn graphql(State(gateway): State<Gateway>, headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, String) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    gateway.requests.lock().unwrap().push((auth, body));
    (gateway.status, gateway.body.clone())
}

async fn spawn_gateway(status: StatusCode, body: impl Into<String>) -> (String, Gateway) {
    let gateway = Gateway {
        status,
        body: body.into(),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/graphql", post(graphql))
        .with_state(gateway.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/graphql", addr), gateway)
}

#[tokio::test]
async fn test_query_posts_token_and_variables() {
    let (url, gateway) = spawn_gateway(StatusCode::OK, r#"{"data":{"planes":[]}}"#).await;
    let client = GraphqlClient::new(url, "secret-token");

    let response = client.query("query { planes { id } }", &json!({"limit": 5})).await;
    assert_eq!(response, json!({"data": {"planes": []}}));

    let requests = gateway.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0.as_deref(), Some("Bearer secret-token"));
    assert_eq!(requests[0].1["query"], "query { planes { id } }");
    assert_eq!(requests[0].1["variables"]["limit"], 5);
}

#[tokio::test]
async fn test_failures_yield_empty_data() {
    let (url, _) = spawn_gateway(StatusCode::INTERNAL_SERVER_ERROR, r#"{"errors":[]}"#).await;
    assert_eq!(GraphqlClient::new(url, "t").query("q", &json!({})).await, empty_response());

    let (url, _) = spawn_gateway(StatusCode::OK, "not json").await;
    assert_eq!(GraphqlClient::new(url, "t").query("q", &json!({})).await, empty_response());

    let unreachable = GraphqlClient::new("http://127.0.0.1:1/graphql", "t");
    assert_eq!(unreachable.query("q", &json!({})).await, empty_response());
}

#[tokio::test]
async fn test_poll_transforms_and_dedups_chat() {
    let body = json!({"data": {
        "planes": [
            {"id": "N123", "lat": 10, "lon": 20},
            {"id": "N456", "lat": 11}
        ],
        "alerts": [{"id": "a1", "text": "fire"}]
    }});
    let (url, _) = spawn_gateway(StatusCode::OK, body.to_string()).await;
    let dir = tempfile::tempdir().unwrap();

    let toml = format!(
        r#"
[tak]
endpoint = "ssl://tak.example.com:8089"
key_file = "client.key"
cert_file = "client.pem"
callsign = "BRIDGE"

[consumer]
catalyst_endpoint = "{url}"
catalyst_token = "t"
catalyst_query = "query {{ planes {{ id lat lon }} }}"
local_db_path = "{db}"

[consumer.parser.planes]
transform = {{ uid = "id", lat = "lat", lon = "lon" }}

[consumer.chat.alerts]
message_id = "id"
message_template = "Alert: {{text}}"
message_vars = {{ text = "text" }}
"#,
        url = url,
        db = dir.path().display()
    );
    let config = AppConfig::from_toml_str(&toml).unwrap();
    let consumer = Consumer::from_config(&config.tak, config.consumer().unwrap()).unwrap();

    let first = consumer.poll().await;
    assert_eq!(first.events.len(), 1);
    assert_eq!(first.events[0].event.uid, "N123");
    assert_eq!(first.chats.len(), 1);
    assert_eq!(first.chats[0].event.uid, "GeoChat.BRIDGE.All Chat Rooms.a1");

    let second = consumer.poll().await;
    assert_eq!(second.events.len(), 1);
    assert!(second.chats.is_empty());
    assert!(!second.is_empty());
}
