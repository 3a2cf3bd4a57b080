//! Session lifecycle tests over in-memory duplex streams.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use takbridge_client::{
    BoxedStream, ConnectionState, CotCodec, TakConnection, TakConnectionConfig, TakConnector,
    TakHandler,
};
use takbridge_core::ConnectionError;
use takbridge_cot::{parse_cot_bytes, ping_event, Event};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::codec::Framed;

const COT: &str = r#"<event version="2.0" uid="N123" type="a-f-A" time="2024-01-15T10:30:00Z" start="2024-01-15T10:30:00Z" stale="2024-01-15T10:35:00Z" how="m-g"><point lat="42.1" lon="-71.2" hae="100" ce="10" le="5"/><detail><contact callsign="N123"/></detail></event>"#;
const SERVER_PING: &str = r#"<event version="2.0" uid="takPong" type="t-x-c-t-r" time="2024-01-15T10:30:00Z" start="2024-01-15T10:30:00Z" stale="2024-01-15T10:30:20Z" how="h-g-i-g-o"><point lat="0" lon="0" hae="0" ce="9999999" le="9999999"/></event>"#;

/// Hands the server half of every new session to the test.
struct DuplexConnector {
    servers: mpsc::UnboundedSender<DuplexStream>,
    fail: AtomicBool,
    attempts: AtomicUsize,
}

impl DuplexConnector {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            servers,
            fail: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TakConnector for DuplexConnector {
    async fn connect(&self) -> Result<BoxedStream, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectionError::failed("localhost", 8089, "connection refused"));
        }
        let (client, server) = tokio::io::duplex(64 * 1024);
        let _ = self.servers.send(server);
        Ok(Box::new(client))
    }

    fn endpoint(&self) -> String {
        "duplex".to_string()
    }
}

struct Recorder {
    events: mpsc::UnboundedSender<Event>,
    pings: AtomicUsize,
    connected: AtomicUsize,
}

impl Recorder {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Self {
            events,
            pings: AtomicUsize::new(0),
            connected: AtomicUsize::new(0),
        });
        (recorder, rx)
    }
}

#[async_trait]
impl TakHandler for Recorder {
    async fn on_cot(&self, event: Event) {
        let _ = self.events.send(event);
    }

    async fn on_ping(&self) {
        self.pings.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_connected(&self, _session: takbridge_client::SessionWriter) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }
}

fn fast_config(id: &str) -> TakConnectionConfig {
    TakConnectionConfig {
        reconnect_base: Duration::from_millis(50),
        reconnect_max: Duration::from_millis(200),
        ..TakConnectionConfig::local(id)
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}

async fn next_server(rx: &mut mpsc::UnboundedReceiver<DuplexStream>) -> Framed<DuplexStream, CotCodec> {
    let server = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no session opened")
        .expect("connector dropped");
    Framed::new(server, CotCodec::new())
}

async fn next_event(server: &mut Framed<DuplexStream, CotCodec>) -> Event {
    let frame = timeout(Duration::from_secs(5), server.next())
        .await
        .expect("no frame received")
        .expect("stream ended")
        .expect("frame error");
    parse_cot_bytes(&frame).expect("invalid CoT from client")
}

#[tokio::test]
async fn test_setup_ping_announces_connection_id() {
    let (connector, mut servers) = DuplexConnector::new();
    let connection = TakConnection::new(fast_config("bridge-N123"), connector);
    connection.connect().await.unwrap();

    let mut server = next_server(&mut servers).await;
    let hello = next_event(&mut server).await;
    assert!(hello.is_ping());
    assert_eq!(hello.uid, "bridge-N123");
    assert_eq!(connection.state(), ConnectionState::Connected);

    connection.stop();
}

#[tokio::test]
async fn test_inbound_dispatch_skips_malformed_frames() {
    let (connector, mut servers) = DuplexConnector::new();
    let connection = TakConnection::new(fast_config("dispatch"), connector);
    let (recorder, mut events) = Recorder::new();
    let _subscription = connection.subscribe(recorder.clone());
    connection.connect().await.unwrap();

    let mut server = next_server(&mut servers).await.into_inner();
    server.write_all(b"<event uid=\"broken\"></event>").await.unwrap();
    server.write_all(SERVER_PING.as_bytes()).await.unwrap();
    server.write_all(b"\n").await.unwrap();
    server.write_all(COT.as_bytes()).await.unwrap();

    let event = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
    assert_eq!(event.uid, "N123");
    assert_eq!(event.callsign(), Some("N123"));
    assert_eq!(recorder.pings.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.connected.load(Ordering::SeqCst), 1);
    assert!(events.try_recv().is_err());

    connection.stop();
}

#[tokio::test]
async fn test_cancelled_subscription_stops_delivery() {
    let (connector, mut servers) = DuplexConnector::new();
    let connection = TakConnection::new(fast_config("unsubscribe"), connector);
    let (recorder, mut events) = Recorder::new();
    let subscription = connection.subscribe(recorder);
    assert_eq!(connection.listener_count(), 1);

    subscription.cancel();
    assert_eq!(connection.listener_count(), 0);

    connection.connect().await.unwrap();
    let mut server = next_server(&mut servers).await.into_inner();
    server.write_all(COT.as_bytes()).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());

    connection.stop();
}

#[tokio::test]
async fn test_session_end_reconnects_with_backoff() {
    let (connector, mut servers) = DuplexConnector::new();
    let connection = TakConnection::new(fast_config("reconnect"), connector.clone());
    connection.connect().await.unwrap();
    let server = next_server(&mut servers).await;

    connector.fail.store(true, Ordering::SeqCst);
    drop(server);

    wait_until("reconnect attempts", || connector.attempts() >= 3).await;
    assert!(connection.is_reconnecting());
    assert!(!connection.is_connected());
    assert!(connection.backoff_attempts() >= 2);

    connector.fail.store(false, Ordering::SeqCst);
    wait_until("reconnect", || connection.is_connected()).await;
    assert!(!connection.is_reconnecting());
    assert_eq!(connection.backoff_attempts(), 0);

    let mut server = next_server(&mut servers).await;
    let hello = next_event(&mut server).await;
    assert_eq!(hello.uid, "reconnect");

    connection.stop();
}

#[tokio::test]
async fn test_stop_during_backoff_prevents_reconnect() {
    let (connector, mut servers) = DuplexConnector::new();
    let config = TakConnectionConfig {
        reconnect_base: Duration::from_millis(300),
        reconnect_max: Duration::from_millis(300),
        ..TakConnectionConfig::local("stop-backoff")
    };
    let connection = TakConnection::new(config, connector.clone());
    connection.connect().await.unwrap();
    let server = next_server(&mut servers).await;

    drop(server);
    wait_until("reconnecting", || connection.is_reconnecting()).await;
    let attempts = connector.attempts();

    connection.stop();
    sleep(Duration::from_millis(600)).await;

    assert_eq!(connector.attempts(), attempts);
    assert_eq!(connection.state(), ConnectionState::Stopped);
    assert!(!connection.is_reconnecting());
    assert!(servers.try_recv().is_err());
}

#[tokio::test]
async fn test_stop_clears_listeners_and_timers() {
    let (connector, _servers) = DuplexConnector::new();
    let connection = TakConnection::new(fast_config("stop"), connector);
    let (recorder, _events) = Recorder::new();
    let _subscription = connection.subscribe(recorder);
    connection.connect().await.unwrap();

    assert!(connection.schedule_repeating("heartbeat", Duration::from_secs(10), |_| async {}));
    assert_eq!(connection.listener_count(), 1);
    assert_eq!(connection.timer_count(), 1);

    connection.stop();
    connection.stop();

    assert_eq!(connection.listener_count(), 0);
    assert_eq!(connection.timer_count(), 0);
    assert_eq!(connection.state(), ConnectionState::Stopped);
    assert!(matches!(connection.connect().await, Err(ConnectionError::Stopped)));
    assert!(!connection.schedule_repeating("late", Duration::from_secs(1), |_| async {}));
}

#[tokio::test]
async fn test_timer_writes_on_session_and_replaces_by_name() {
    let (connector, mut servers) = DuplexConnector::new();
    let connection = TakConnection::new(fast_config("timers"), connector);
    connection.connect().await.unwrap();
    let mut server = next_server(&mut servers).await;
    let _hello = next_event(&mut server).await;

    assert!(connection.schedule_repeating("beacon", Duration::from_millis(30), |writer| async move {
        writer.write([ping_event("first")]);
    }));
    assert!(connection.schedule_repeating("beacon", Duration::from_millis(30), |writer| async move {
        writer.write([ping_event("second")]);
    }));
    assert_eq!(connection.timer_count(), 1);

    let event = next_event(&mut server).await;
    assert_eq!(event.uid, "second");

    assert!(connection.cancel_repeating("beacon"));
    assert!(!connection.cancel_repeating("beacon"));
    assert_eq!(connection.timer_count(), 0);

    connection.stop();
}

#[tokio::test]
async fn test_timer_requires_active_session() {
    let (connector, _servers) = DuplexConnector::new();
    let connection = TakConnection::new(fast_config("no-session"), connector);

    assert!(!connection.schedule_repeating("heartbeat", Duration::from_secs(1), |_| async {}));
    assert_eq!(connection.timer_count(), 0);

    // Logged and dropped
    connection.write([ping_event("nobody")]);
}

#[tokio::test]
async fn test_read_timeout_triggers_reconnect() {
    let (connector, mut servers) = DuplexConnector::new();
    let config = TakConnectionConfig {
        read_timeout: Duration::from_millis(100),
        ..fast_config("read-timeout")
    };
    let connection = TakConnection::new(config, connector.clone());
    connection.connect().await.unwrap();

    let _silent = next_server(&mut servers).await;
    let _second = next_server(&mut servers).await;
    assert!(connector.attempts() >= 2);

    connection.stop();
}

#[tokio::test]
async fn test_failed_connect_does_not_retry() {
    let (connector, _servers) = DuplexConnector::new();
    connector.fail.store(true, Ordering::SeqCst);
    let connection = TakConnection::new(fast_config("refused"), connector.clone());

    let err = connection.connect().await.unwrap_err();
    assert!(matches!(err, ConnectionError::ConnectionFailed { .. }));

    sleep(Duration::from_millis(200)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(connection.status().last_error().is_some());
}
