//! Contact book
//!
//! Keeps one live TAK connection per contact callsign, creates it at most once
//! under concurrent requests, and stops it when the contact goes stale.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use takbridge_client::{TakConnection, TakConnectionConfig, TakHandler};
use takbridge_core::ConnectionError;
use takbridge_cot::builders::{DEFAULT_GROUP, DEFAULT_ROLE};
use takbridge_cot::{heartbeat_event, Event, HeartbeatSpec};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How often stale contacts are swept
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

type PendingConnection = Shared<BoxFuture<'static, Result<TakConnection, ConnectionError>>>;

/// An external entity presented to TAK as a live participant.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub callsign: String,
    pub cot_type: String,
    pub how: String,
    pub lat: f64,
    pub lon: f64,
    pub group: String,
    pub role: String,
    pub stale: DateTime<Utc>,
}

impl Contact {
    /// Contact mirroring an event produced by the transform pipeline.
    ///
    /// The callsign comes from the `contact` detail, falling back to the uid.
    pub fn from_event(event: &Event) -> Self {
        let callsign = event
            .callsign()
            .filter(|c| !c.is_empty())
            .unwrap_or(&event.uid);

        Self {
            callsign: callsign.to_string(),
            cot_type: event.event_type.clone(),
            how: event.how.clone(),
            lat: event.point.lat,
            lon: event.point.lon,
            group: DEFAULT_GROUP.to_string(),
            role: DEFAULT_ROLE.to_string(),
            stale: event.stale,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>, role: impl Into<String>) -> Self {
        self.group = group.into();
        self.role = role.into();
        self
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.stale < now
    }

    /// Presence event announcing this contact.
    pub fn heartbeat(&self) -> Event {
        heartbeat_event(
            &HeartbeatSpec::new(self.lat, self.lon, self.stale)
                .callsign(&self.callsign)
                .cot_type(&self.cot_type)
                .how(&self.how)
                .group(&self.group, &self.role),
        )
    }
}

/// Opens the dedicated connection for a contact.
#[async_trait]
pub trait ContactConnectionFactory: Send + Sync {
    async fn create(&self, callsign: &str) -> Result<TakConnection, ConnectionError>;
}

/// Opens contact connections over TLS with the primary connection's
/// credentials, under connection id `{base}-{callsign}`.
pub struct TlsContactFactory {
    base: TakConnectionConfig,
    handler: Option<Arc<dyn TakHandler>>,
}

impl TlsContactFactory {
    pub fn new(base: TakConnectionConfig) -> Self {
        Self {
            base,
            handler: None,
        }
    }

    /// Handler subscribed on every contact connection.
    pub fn with_handler(mut self, handler: Arc<dyn TakHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn contact_config(&self, callsign: &str) -> TakConnectionConfig {
        let connection_id = format!("{}-{}", self.base.connection_id, callsign);
        self.base.clone().with_connection_id(connection_id)
    }
}

#[async_trait]
impl ContactConnectionFactory for TlsContactFactory {
    async fn create(&self, callsign: &str) -> Result<TakConnection, ConnectionError> {
        let connection = TakConnection::tls(self.contact_config(callsign))?;
        if let Some(handler) = &self.handler {
            let _ = connection.subscribe(handler.clone());
        }

        connection
            .connect()
            .await
            .inspect_err(|_| connection.stop())?;
        Ok(connection)
    }
}

struct ContactEntry {
    contact: Contact,
    connection: TakConnection,
}

struct BookInner {
    factory: Arc<dyn ContactConnectionFactory>,
    contacts: DashMap<String, ContactEntry>,
    in_flight: Mutex<HashMap<String, PendingConnection>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

/// Registry of live contact connections keyed by callsign.
#[derive(Clone)]
pub struct ContactBook {
    inner: Arc<BookInner>,
}

impl ContactBook {
    pub fn new(factory: Arc<dyn ContactConnectionFactory>) -> Self {
        Self {
            inner: Arc::new(BookInner {
                factory,
                contacts: DashMap::new(),
                in_flight: Mutex::new(HashMap::new()),
                sweeper: Mutex::new(None),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Starts the periodic stale-contact sweep.
    pub fn start(&self, sweep_interval: Duration) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        let book = self.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + sweep_interval;
            let mut ticker = tokio::time::interval_at(start, sweep_interval);
            loop {
                ticker.tick().await;
                book.cleanup();
            }
        });

        if let Some(previous) = self.inner.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Creates the contact's connection if needed, records the contact and
    /// announces it with a heartbeat.
    ///
    /// Concurrent calls for the same new callsign share one connection.
    pub async fn add_or_refresh(&self, contact: Contact) -> Result<(), ConnectionError> {
        if contact.callsign.is_empty() {
            error!("Contact callsign is required, not adding contact");
            return Ok(());
        }
        loop {
            if self.inner.stopped.load(Ordering::SeqCst) {
                return Err(ConnectionError::Stopped);
            }
            let connection = match self.live_connection(&contact.callsign) {
                Some(connection) => connection,
                None => self.create_connection(&contact).await?,
            };

            let heartbeat = contact.heartbeat();
            let displaced = match self.inner.contacts.entry(contact.callsign.clone()) {
                Entry::Occupied(mut occupied) => {
                    let registered = occupied.get().connection.ptr_eq(&connection);
                    if connection.is_stopped() {
                        if registered {
                            occupied.remove();
                        }
                        continue;
                    }
                    if registered {
                        occupied.get_mut().contact = contact.clone();
                        None
                    } else {
                        let previous = occupied.insert(ContactEntry {
                            contact: contact.clone(),
                            connection: connection.clone(),
                        });
                        Some(previous.connection)
                    }
                }
                Entry::Vacant(vacant) => {
                    // The sweep stops a connection while holding its entry, so
                    // a stopped handle here lost a race with it.
                    if connection.is_stopped() {
                        continue;
                    }
                    vacant.insert(ContactEntry {
                        contact: contact.clone(),
                        connection: connection.clone(),
                    });
                    None
                }
            };
            if let Some(displaced) = displaced {
                warn!(callsign = %contact.callsign, "Replacing contact connection");
                displaced.stop();
            }

            if self.inner.stopped.load(Ordering::SeqCst) {
                self.inner
                    .contacts
                    .remove_if(&contact.callsign, |_, entry| entry.connection.ptr_eq(&connection));
                connection.stop();
                return Err(ConnectionError::Stopped);
            }

            debug!(callsign = %contact.callsign, stale = %contact.stale, "Refreshed contact");
            connection.write([heartbeat]);
            return Ok(());
        }
    }

    /// Connection registered for the callsign, unless it has been stopped.
    fn live_connection(&self, callsign: &str) -> Option<TakConnection> {
        self.inner
            .contacts
            .get(callsign)
            .map(|entry| entry.connection.clone())
            .filter(|connection| !connection.is_stopped())
    }

    async fn create_connection(&self, contact: &Contact) -> Result<TakConnection, ConnectionError> {
        let callsign = contact.callsign.as_str();
        let pending = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.get(callsign) {
                Some(pending) => pending.clone(),
                None => {
                    // A creation may have finished since the caller looked.
                    if let Some(connection) = self.live_connection(callsign) {
                        return Ok(connection);
                    }
                    let factory = self.inner.factory.clone();
                    let owned = callsign.to_string();
                    info!(callsign = %callsign, "Creating contact connection");
                    let pending = async move { factory.create(&owned).await }.boxed().shared();
                    in_flight.insert(callsign.to_string(), pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        // Registered before the in-flight entry goes away so a later caller
        // finds the connection instead of starting another.
        if let Ok(connection) = &result {
            self.inner
                .contacts
                .entry(callsign.to_string())
                .and_modify(|entry| {
                    if entry.connection.is_stopped() {
                        entry.connection = connection.clone();
                    }
                })
                .or_insert_with(|| ContactEntry {
                    contact: contact.clone(),
                    connection: connection.clone(),
                });
        }
        {
            let mut in_flight = self.inner.in_flight.lock();
            if in_flight
                .get(callsign)
                .is_some_and(|current| current.ptr_eq(&pending))
            {
                in_flight.remove(callsign);
            }
        }

        result.inspect_err(|e| {
            error!(callsign = %callsign, error = %e, "Failed to create contact connection");
        })
    }

    /// Writes an event on the contact's connection. Returns false, and logs,
    /// when the callsign has no live connection.
    pub fn publish_as_contact(&self, callsign: &str, event: Event) -> bool {
        let connection = self
            .inner
            .contacts
            .get(callsign)
            .map(|entry| entry.connection.clone());

        match connection {
            Some(connection) => {
                connection.write([event]);
                true
            }
            None => {
                error!(callsign = %callsign, uid = %event.uid, "No contact found for callsign");
                false
            }
        }
    }

    /// Stops and forgets every contact whose stale deadline has passed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let stale: Vec<String> = self
            .inner
            .contacts
            .iter()
            .filter(|entry| entry.contact.is_stale_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for callsign in stale {
            // Stopped under the entry lock so a concurrent refresh either keeps
            // the contact fresh or sees the connection already stopped.
            let retired = self.inner.contacts.remove_if(&callsign, |_, entry| {
                let stale = entry.contact.is_stale_at(now);
                if stale {
                    entry.connection.stop();
                }
                stale
            });
            if retired.is_some() {
                removed += 1;
                info!(callsign = %callsign, "Removed stale contact");
            }
        }
        removed
    }

    /// Stops every contact connection and the sweep. Terminal and idempotent.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.abort();
        }

        let callsigns: Vec<String> = self.inner.contacts.iter().map(|e| e.key().clone()).collect();
        for callsign in callsigns {
            if let Some((_, entry)) = self.inner.contacts.remove(&callsign) {
                entry.connection.stop();
            }
        }
        self.inner.in_flight.lock().clear();

        if !self.inner.contacts.is_empty() {
            warn!(remaining = self.inner.contacts.len(), "Contacts added during stop");
        }
        info!("Contact book stopped");
    }

    pub fn contact_count(&self) -> usize {
        self.inner.contacts.len()
    }

    pub fn contact(&self, callsign: &str) -> Option<Contact> {
        self.inner.contacts.get(callsign).map(|e| e.contact.clone())
    }

    pub fn connection(&self, callsign: &str) -> Option<TakConnection> {
        self.inner.contacts.get(callsign).map(|e| e.connection.clone())
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}
