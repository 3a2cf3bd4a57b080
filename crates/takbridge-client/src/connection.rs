//! TAK connection manager.
//!
//! A [`TakConnection`] owns at most one live session to a TAK server. When the
//! session ends, times out or fails, it reconnects with exponential backoff
//! until [`TakConnection::stop`] retires it for good.
//!
//! Each session runs two tasks: a reader that parses inbound frames and
//! dispatches them to subscribed handlers in wire order, and a writer that
//! drains the outbound queue and emits keep-alive pings. Both hang off a
//! per-session child of the connection's cancellation token.

use crate::backoff::ExponentialBackoff;
use crate::codec::CotCodec;
use crate::state::{ConnectionState, ConnectionStatus, MetricsSnapshot};
use crate::tls::{BoxedStream, TakConnectionConfig, TakConnector, TlsTakConnector};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use takbridge_core::ConnectionError;
use takbridge_cot::{parse_cot_bytes, ping_event, serialize_event, Event};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outbound events buffered per session before writes are dropped
const WRITE_QUEUE_CAPACITY: usize = 1024;

/// uid of keep-alive pings after session setup
const KEEPALIVE_UID: &str = "takPing";

/// Time allowed to flush and close the stream on shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type CotFramed = Framed<BoxedStream, CotCodec>;

/// Receives inbound traffic from a [`TakConnection`].
///
/// Calls for one connection are made sequentially, in wire order.
#[async_trait]
pub trait TakHandler: Send + Sync {
    /// Any inbound event that is not a keep-alive ping
    async fn on_cot(&self, event: Event);

    /// Keep-alive ping (`t-x-c-t*`) from the server
    async fn on_ping(&self) {}

    /// A new session is up; timers bound to the previous one no longer write.
    async fn on_connected(&self, _session: SessionWriter) {}
}

/// Write handle bound to one session.
#[derive(Clone)]
pub struct SessionWriter {
    connection_id: Arc<str>,
    session_id: u64,
    tx: mpsc::Sender<Event>,
}

impl SessionWriter {
    /// Queues events on this session. Failures are logged, never returned.
    pub fn write(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            match self.tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    warn!(
                        connection_id = %self.connection_id,
                        uid = %event.uid,
                        "Write queue full, dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(event)) => {
                    error!(
                        connection_id = %self.connection_id,
                        session = self.session_id,
                        uid = %event.uid,
                        "Session closed, event not sent"
                    );
                }
            }
        }
    }

    /// True once the session this writer belongs to has ended.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }
}

impl std::fmt::Debug for SessionWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWriter")
            .field("connection_id", &self.connection_id)
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Handle returned by [`TakConnection::subscribe`].
///
/// Dropping it keeps the handler attached; call [`cancel`](Self::cancel).
#[must_use = "call cancel() to detach the handler"]
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn cancel(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handlers.write().retain(|(id, _)| *id != self.id);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Disconnect {
    End,
    Timeout,
    Error,
}

struct Session {
    id: u64,
    writer: SessionWriter,
    token: CancellationToken,
}

struct Inner {
    config: TakConnectionConfig,
    connection_id: Arc<str>,
    connector: Arc<dyn TakConnector>,
    status: ConnectionStatus,
    stopped: AtomicBool,
    reconnecting: AtomicBool,
    backoff: Mutex<ExponentialBackoff>,
    session: Mutex<Option<Session>>,
    handlers: RwLock<Vec<(u64, Arc<dyn TakHandler>)>>,
    timers: DashMap<String, JoinHandle<()>>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

/// One managed TAK connection; cheap to clone.
#[derive(Clone)]
pub struct TakConnection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TakConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TakConnection")
            .field("connection_id", &self.inner.connection_id)
            .field("state", &self.state())
            .finish()
    }
}

impl TakConnection {
    pub fn new(config: TakConnectionConfig, connector: Arc<dyn TakConnector>) -> Self {
        let backoff = ExponentialBackoff::new(config.reconnect_base, config.reconnect_max);
        Self {
            inner: Arc::new(Inner {
                connection_id: Arc::from(config.connection_id.as_str()),
                config,
                connector,
                status: ConnectionStatus::new(),
                stopped: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                backoff: Mutex::new(backoff),
                session: Mutex::new(None),
                handlers: RwLock::new(Vec::new()),
                timers: DashMap::new(),
                shutdown: CancellationToken::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Connection over TLS using the configured client certificate.
    pub fn tls(config: TakConnectionConfig) -> Result<Self, ConnectionError> {
        let connector = TlsTakConnector::new(&config)?;
        Ok(Self::new(config, Arc::new(connector)))
    }

    /// Establishes the first session. Does not retry on failure.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.establish().await.inspect_err(|e| {
            self.inner.status.set_error(e.to_string());
            self.inner.status.set_state(ConnectionState::Disconnected);
        })
    }

    /// Connects, falling back to the reconnect loop in the background when
    /// the first attempt fails.
    pub async fn connect_or_retry(&self) {
        if let Err(e) = self.connect().await {
            error!(
                connection_id = %self.inner.connection_id,
                endpoint = %self.inner.connector.endpoint(),
                error = %e,
                "Initial TAK connection failed, retrying in background"
            );
            self.spawn_reconnect();
        }
    }

    /// Retries session establishment with exponential backoff until it
    /// succeeds or the connection is stopped. Concurrent calls collapse into
    /// the one already running.
    pub async fn reconnect(&self) {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::SeqCst) || inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.status.set_state(ConnectionState::Reconnecting);

        loop {
            let delay = inner.backoff.lock().next_delay();
            let attempt = inner.backoff.lock().attempts();
            inner.status.metrics().record_reconnect();
            info!(
                connection_id = %inner.connection_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to TAK server"
            );

            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
            if inner.stopped.load(Ordering::SeqCst) {
                debug!(connection_id = %inner.connection_id, "Stopped during backoff, not reconnecting");
                break;
            }

            match self.establish().await {
                Ok(()) => {
                    info!(connection_id = %inner.connection_id, attempt, "Reconnected to TAK server");
                    return;
                }
                Err(ConnectionError::Stopped) => break,
                Err(e) => {
                    inner.status.set_error(e.to_string());
                    inner.status.set_state(ConnectionState::Reconnecting);
                    warn!(
                        connection_id = %inner.connection_id,
                        attempt,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                }
            }
        }

        inner.reconnecting.store(false, Ordering::SeqCst);
    }

    /// Attaches a handler for inbound events.
    pub fn subscribe(&self, handler: Arc<dyn TakHandler>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if self.inner.stopped.load(Ordering::SeqCst) {
            warn!(connection_id = %self.inner.connection_id, "Subscribe on a stopped connection ignored");
        } else {
            self.inner.handlers.write().push((id, handler));
        }
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Writes events on the current session; logs and drops them when no
    /// session is active.
    pub fn write(&self, events: impl IntoIterator<Item = Event>) {
        match self.session_writer() {
            Some(writer) => writer.write(events),
            None => {
                let dropped = events.into_iter().count();
                error!(
                    connection_id = %self.inner.connection_id,
                    dropped,
                    "Not connected, events not sent"
                );
            }
        }
    }

    /// Writer for the current session, if one is live.
    pub fn session_writer(&self) -> Option<SessionWriter> {
        self.inner.session.lock().as_ref().map(|s| s.writer.clone())
    }

    /// Runs `action` every `interval` with the writer of the session that is
    /// current right now. A timer with the same name is replaced.
    ///
    /// Returns false when there is no session to bind to.
    pub fn schedule_repeating<F, Fut>(&self, name: &str, interval: Duration, action: F) -> bool
    where
        F: Fn(SessionWriter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::SeqCst) {
            warn!(connection_id = %inner.connection_id, timer = name, "Connection stopped, timer not scheduled");
            return false;
        }
        let Some(writer) = self.session_writer() else {
            warn!(connection_id = %inner.connection_id, timer = name, "No active session, timer not scheduled");
            return false;
        };

        let shutdown = inner.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => action(writer.clone()).await,
                }
            }
        });

        if let Some(previous) = inner.timers.insert(name.to_string(), handle) {
            previous.abort();
        }
        if inner.stopped.load(Ordering::SeqCst) {
            if let Some((_, handle)) = inner.timers.remove(name) {
                handle.abort();
            }
            return false;
        }
        debug!(connection_id = %inner.connection_id, timer = name, interval_ms = interval.as_millis() as u64, "Timer scheduled");
        true
    }

    pub fn cancel_repeating(&self, name: &str) -> bool {
        match self.inner.timers.remove(name) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Retires the connection: cancels timers, detaches handlers, closes the
    /// session and prevents any further reconnect. Idempotent.
    pub fn stop(&self) {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        inner.shutdown.cancel();
        inner.handlers.write().clear();

        let names: Vec<String> = inner.timers.iter().map(|t| t.key().clone()).collect();
        for name in names {
            if let Some((_, handle)) = inner.timers.remove(&name) {
                handle.abort();
            }
        }

        if let Some(session) = inner.session.lock().take() {
            session.token.cancel();
        }

        inner.reconnecting.store(false, Ordering::SeqCst);
        inner.status.metrics().mark_disconnected();
        inner.status.set_stopped();
        info!(connection_id = %inner.connection_id, "TAK connection stopped");
    }

    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.state()
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.inner.status
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.status.metrics().snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status.is_connected()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// True when both handles refer to the same managed connection.
    pub fn ptr_eq(&self, other: &TakConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attempts counted by the backoff generator since the last session.
    pub fn backoff_attempts(&self) -> u32 {
        self.inner.backoff.lock().attempts()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.handlers.read().len()
    }

    pub fn timer_count(&self) -> usize {
        self.inner.timers.len()
    }

    fn spawn_reconnect(&self) {
        let connection = self.clone();
        tokio::spawn(async move { connection.reconnect().await });
    }

    /// Opens the transport, announces the connection id and starts the
    /// session tasks.
    async fn establish(&self) -> Result<(), ConnectionError> {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::SeqCst) {
            return Err(ConnectionError::Stopped);
        }
        inner.status.set_state(ConnectionState::Connecting);

        let stream = inner.connector.connect().await?;
        let mut framed = Framed::new(stream, CotCodec::new());

        let hello = serialize_event(&ping_event(inner.connection_id.as_ref()));
        let hello_len = hello.len() as u64 + 1;
        framed
            .send(hello)
            .await
            .map_err(|e| ConnectionError::closed(e.to_string()))?;
        inner.status.metrics().record_sent(hello_len);

        let (sink, stream) = framed.split::<String>();
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let session_id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = inner.shutdown.child_token();
        let writer = SessionWriter {
            connection_id: inner.connection_id.clone(),
            session_id,
            tx,
        };

        {
            let mut session = inner.session.lock();
            if inner.stopped.load(Ordering::SeqCst) {
                token.cancel();
                return Err(ConnectionError::Stopped);
            }
            if let Some(previous) = session.replace(Session {
                id: session_id,
                writer: writer.clone(),
                token: token.clone(),
            }) {
                previous.token.cancel();
            }
        }

        inner.backoff.lock().reset();
        inner.status.metrics().mark_connected();
        inner.reconnecting.store(false, Ordering::SeqCst);
        inner.status.set_state(ConnectionState::Connected);
        info!(
            connection_id = %inner.connection_id,
            endpoint = %inner.connector.endpoint(),
            session = session_id,
            "Connected to TAK server"
        );

        tokio::spawn(run_writer(inner.clone(), session_id, token.clone(), sink, rx));
        tokio::spawn(run_reader(inner.clone(), session_id, token, stream, writer));
        Ok(())
    }
}

/// Tears down the session if it is still current and schedules a reconnect.
fn handle_disconnect(inner: &Arc<Inner>, session_id: u64, reason: Disconnect, detail: String) {
    {
        let mut session = inner.session.lock();
        if session.as_ref().map(|s| s.id) != Some(session_id) {
            return;
        }
        if let Some(current) = session.take() {
            current.token.cancel();
        }
    }

    inner.status.metrics().mark_disconnected();
    if inner.stopped.load(Ordering::SeqCst) {
        return;
    }

    match reason {
        Disconnect::End => warn!(connection_id = %inner.connection_id, session = session_id, "Connection End"),
        Disconnect::Timeout => warn!(connection_id = %inner.connection_id, session = session_id, detail = %detail, "Connection Timeout"),
        Disconnect::Error => {
            inner.status.set_error(detail.clone());
            error!(connection_id = %inner.connection_id, session = session_id, error = %detail, "Connection Error");
        }
    }

    inner.status.set_state(ConnectionState::Reconnecting);
    let connection = TakConnection { inner: inner.clone() };
    tokio::spawn(async move { connection.reconnect().await });
}

async fn run_writer(
    inner: Arc<Inner>,
    session_id: u64,
    token: CancellationToken,
    mut sink: SplitSink<CotFramed, String>,
    mut rx: mpsc::Receiver<Event>,
) {
    let period = inner.config.keepalive_interval;
    let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            _ = keepalive.tick() => ping_event(KEEPALIVE_UID),
            next = rx.recv() => match next {
                Some(event) => event,
                None => break,
            },
        };

        let frame = serialize_event(&event);
        let len = frame.len() as u64 + 1;
        if let Err(e) = sink.send(frame).await {
            handle_disconnect(&inner, session_id, Disconnect::Error, e.to_string());
            return;
        }
        inner.status.metrics().record_sent(len);
    }

    let _ = timeout(CLOSE_TIMEOUT, sink.close()).await;
}

async fn run_reader(
    inner: Arc<Inner>,
    session_id: u64,
    token: CancellationToken,
    mut stream: SplitStream<CotFramed>,
    writer: SessionWriter,
) {
    for handler in snapshot_handlers(&inner) {
        handler.on_connected(writer.clone()).await;
    }
    drop(writer);

    let read_timeout = inner.config.read_timeout;
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return,
            next = timeout(read_timeout, stream.next()) => next,
        };

        match next {
            Ok(Some(Ok(frame))) => {
                inner.status.metrics().record_received(frame.len() as u64);
                match parse_cot_bytes(&frame) {
                    Ok(event) => dispatch(&inner, event).await,
                    Err(e) => warn!(
                        connection_id = %inner.connection_id,
                        error = %e,
                        len = frame.len(),
                        "Skipping unparsable CoT frame"
                    ),
                }
            }
            Ok(Some(Err(e))) => {
                handle_disconnect(&inner, session_id, Disconnect::Error, e.to_string());
                return;
            }
            Ok(None) => {
                handle_disconnect(&inner, session_id, Disconnect::End, String::new());
                return;
            }
            Err(_) => {
                let detail = ConnectionError::ReadTimeout {
                    timeout_ms: read_timeout.as_millis() as u64,
                }
                .to_string();
                handle_disconnect(&inner, session_id, Disconnect::Timeout, detail);
                return;
            }
        }
    }
}

async fn dispatch(inner: &Inner, event: Event) {
    let handlers = snapshot_handlers(inner);
    if event.is_ping() {
        debug!(connection_id = %inner.connection_id, "TAK Server Ping");
        for handler in handlers {
            handler.on_ping().await;
        }
        return;
    }

    for handler in handlers {
        handler.on_cot(event.clone()).await;
    }
}

fn snapshot_handlers(inner: &Inner) -> Vec<Arc<dyn TakHandler>> {
    inner.handlers.read().iter().map(|(_, h)| h.clone()).collect()
}
