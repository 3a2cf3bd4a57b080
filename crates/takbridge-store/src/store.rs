//! CoT store
//!
//! Inbound events keyed by uid in `cot_events`, last write wins. A record is
//! visible until its stale time plus a grace period has passed; records that
//! carry a file-share descriptor are kept until deleted explicitly.

use crate::schema::COT_SCHEMA;
use crate::transfer::{artifact_name, FileFetcher};
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use takbridge_core::config::ProducerConfig;
use takbridge_core::{FileTransferError, StoreError};
use takbridge_cot::Event;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Time a record stays visible after its stale time
pub const DEFAULT_STALE_GRACE: Duration = Duration::from_secs(60);

/// How often expired records are purged
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

const DB_FILE: &str = "cot.sqlite3";

/// Where and how a [`CotStore`] keeps its data.
#[derive(Clone)]
pub struct StoreOptions {
    /// Directory holding `cot.sqlite3`; `None` keeps the database in memory
    pub db_dir: Option<PathBuf>,
    pub download_dir: PathBuf,
    pub stale_grace: Duration,
    pub fetcher: Option<Arc<dyn FileFetcher>>,
}

impl StoreOptions {
    pub fn new(db_dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_dir: Some(db_dir.into()),
            download_dir: download_dir.into(),
            stale_grace: DEFAULT_STALE_GRACE,
            fetcher: None,
        }
    }

    pub fn in_memory(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_dir: None,
            ..Self::new(PathBuf::new(), download_dir)
        }
    }

    pub fn from_producer(producer: &ProducerConfig) -> Self {
        Self::new(producer.local_db_path.clone(), producer.local_download_path.clone())
            .with_stale_grace(producer.stale_grace())
    }

    pub fn with_stale_grace(mut self, grace: Duration) -> Self {
        self.stale_grace = grace;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn FileFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }
}

impl std::fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreOptions")
            .field("db_dir", &self.db_dir)
            .field("download_dir", &self.download_dir)
            .field("stale_grace", &self.stale_grace)
            .field("fetcher", &self.fetcher.is_some())
            .finish()
    }
}

/// Base64 content of a stored file-share artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub uid: String,
    /// `{uid}_{filename}`
    pub filename: String,
    pub content: String,
}

struct StoreInner {
    conn: Arc<Mutex<Connection>>,
    download_dir: PathBuf,
    grace_ms: i64,
    fetcher: Option<Arc<dyn FileFetcher>>,
    transfers: Mutex<Vec<JoinHandle<()>>>,
    eviction: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Some(handle) = self.eviction.get_mut().take() {
            handle.abort();
        }
    }
}

/// SQLite-backed CoT store; cheap to clone.
#[derive(Clone)]
pub struct CotStore {
    inner: Arc<StoreInner>,
}

impl CotStore {
    /// Opens (or creates) the store and its download directory.
    pub fn open(options: StoreOptions) -> Result<Self, StoreError> {
        let conn = match &options.db_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(DB_FILE);
                Connection::open(&path).map_err(|e| StoreError::Open {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            None => Connection::open_in_memory().map_err(StoreError::database)?,
        };
        conn.execute_batch(COT_SCHEMA).map_err(StoreError::database)?;
        std::fs::create_dir_all(&options.download_dir)?;

        info!(
            db_dir = ?options.db_dir,
            download_dir = %options.download_dir.display(),
            grace_secs = options.stale_grace.as_secs(),
            "CoT store opened"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Arc::new(Mutex::new(conn)),
                download_dir: options.download_dir,
                grace_ms: options.stale_grace.as_millis() as i64,
                fetcher: options.fetcher,
                transfers: Mutex::new(Vec::new()),
                eviction: Mutex::new(None),
            }),
        })
    }

    /// Stores the event under its uid, replacing any previous record.
    ///
    /// A file-share descriptor starts a background download of the artifact;
    /// its failure is logged and does not affect the stored record.
    pub async fn put(&self, event: &Event) -> Result<(), StoreError> {
        let uid = event.uid.clone();
        let stale_ms = event.stale.timestamp_millis();
        let fileshare = event.fileshare().is_some();
        let json = serde_json::to_string(event).map_err(StoreError::serialization)?;

        let key = uid.clone();
        crate::blocking(&self.inner.conn, move |conn| {
            conn.execute(
                "INSERT INTO cot_events (uid, stale_ms, fileshare, event)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(uid) DO UPDATE SET
                     stale_ms = excluded.stale_ms,
                     fileshare = excluded.fileshare,
                     event = excluded.event",
                params![key, stale_ms, fileshare, json],
            )
            .map_err(StoreError::database)?;
            Ok(())
        })
        .await?;
        debug!(uid = %uid, "CoT stored");

        if let Some(share) = event.fileshare() {
            self.spawn_transfer(&uid, &share.filename, &share.sender_url);
        }
        Ok(())
    }

    pub async fn get(&self, uid: &str) -> Result<Option<Event>, StoreError> {
        let uid = uid.to_string();
        let json: Option<String> = crate::blocking(&self.inner.conn, move |conn| {
            conn.query_row(
                "SELECT event FROM cot_events WHERE uid = ?1",
                params![uid],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::database)
        })
        .await?;

        json.map(|j| decode(&j)).transpose()
    }

    /// Every record still within its grace period, plus file-share records.
    pub async fn get_all(&self) -> Result<Vec<Event>, StoreError> {
        self.get_all_at(Utc::now()).await
    }

    pub async fn get_all_at(&self, now: DateTime<Utc>) -> Result<Vec<Event>, StoreError> {
        let cutoff = now.timestamp_millis() - self.inner.grace_ms;
        let rows: Vec<String> = crate::blocking(&self.inner.conn, move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT event FROM cot_events
                     WHERE fileshare = 1 OR stale_ms >= ?1
                     ORDER BY uid",
                )
                .map_err(StoreError::database)?;
            let rows = stmt
                .query_map(params![cutoff], |row| row.get(0))
                .map_err(StoreError::database)?
                .collect::<Result<Vec<String>, _>>()
                .map_err(StoreError::database)?;
            Ok(rows)
        })
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for json in rows {
            match decode(&json) {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "Skipping undecodable stored CoT"),
            }
        }
        Ok(events)
    }

    /// Removes the record and its artifact. Returns whether a record existed.
    pub async fn delete(&self, uid: &str) -> Result<bool, StoreError> {
        let key = uid.to_string();
        let removed: Option<String> = crate::blocking(&self.inner.conn, move |conn| {
            let tx = conn.transaction().map_err(StoreError::database)?;
            let json: Option<String> = tx
                .query_row(
                    "SELECT event FROM cot_events WHERE uid = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::database)?;
            if json.is_some() {
                tx.execute("DELETE FROM cot_events WHERE uid = ?1", params![key])
                    .map_err(StoreError::database)?;
            }
            tx.commit().map_err(StoreError::database)?;
            Ok(json)
        })
        .await?;

        let Some(json) = removed else {
            debug!(uid = %uid, "CoT not found for delete");
            return Ok(false);
        };

        let removed_event = decode(&json).ok();
        if let Some(share) = removed_event.as_ref().and_then(Event::fileshare) {
            let path = self.artifact_path(uid, &share.filename);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed file-share artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file-share artifact"),
            }
        }
        info!(uid = %uid, "CoT deleted");
        Ok(true)
    }

    /// Purges expired records, except file-share records. Returns the count.
    pub async fn evict_expired(&self) -> Result<usize, StoreError> {
        self.evict_expired_at(Utc::now()).await
    }

    pub async fn evict_expired_at(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = now.timestamp_millis() - self.inner.grace_ms;
        crate::blocking(&self.inner.conn, move |conn| {
            conn.execute(
                "DELETE FROM cot_events WHERE fileshare = 0 AND stale_ms < ?1",
                params![cutoff],
            )
            .map_err(StoreError::database)
        })
        .await
    }

    /// Starts purging expired records every `interval`.
    pub fn start_eviction(&self, interval: Duration) {
        let store = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(eviction_loop(store, interval));
        if let Some(previous) = self.inner.eviction.lock().replace(handle) {
            previous.abort();
        }
        info!(interval_secs = interval.as_secs(), "Stale CoT eviction started");
    }

    pub fn stop_eviction(&self) {
        if let Some(handle) = self.inner.eviction.lock().take() {
            handle.abort();
            info!("Stale CoT eviction stopped");
        }
    }

    /// Base64 content of the artifact attached to `uid`.
    pub async fn get_file(&self, uid: &str) -> Result<FileContent, StoreError> {
        let event = self.get(uid).await?.ok_or_else(|| StoreError::NotFound {
            uid: uid.to_string(),
        })?;
        let share = event.fileshare().ok_or_else(|| StoreError::NotFileShare {
            uid: uid.to_string(),
        })?;

        let filename = artifact_name(uid, &share.filename);
        let bytes = tokio::fs::read(self.inner.download_dir.join(&filename)).await?;

        Ok(FileContent {
            uid: uid.to_string(),
            filename,
            content: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }

    /// Waits for every artifact download started so far.
    pub async fn flush_transfers(&self) {
        let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.transfers.lock());
        for handle in pending {
            if let Err(e) = handle.await {
                error!(error = %e, "File transfer task failed");
            }
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.inner.download_dir
    }

    fn artifact_path(&self, uid: &str, filename: &str) -> PathBuf {
        self.inner.download_dir.join(artifact_name(uid, filename))
    }

    fn spawn_transfer(&self, uid: &str, filename: &str, url: &str) {
        let Some(fetcher) = self.inner.fetcher.clone() else {
            warn!(uid = %uid, "No file fetcher configured, skipping file-share download");
            return;
        };

        let path = self.artifact_path(uid, filename);
        if path.exists() {
            debug!(uid = %uid, path = %path.display(), "File-share artifact already stored");
            return;
        }
        let uid = uid.to_string();
        let url = url.to_string();
        let handle = tokio::spawn(async move {
            match download(fetcher.as_ref(), &url, &path).await {
                Ok(bytes) => info!(uid = %uid, path = %path.display(), bytes, "File-share artifact saved"),
                Err(e) => error!(uid = %uid, url = %url, error = %e, "File-share download failed"),
            }
        });

        let mut transfers = self.inner.transfers.lock();
        transfers.retain(|h| !h.is_finished());
        transfers.push(handle);
    }
}

async fn download(fetcher: &dyn FileFetcher, url: &str, path: &Path) -> Result<usize, FileTransferError> {
    let body = fetcher.fetch(url).await?;
    let write_err = |e: std::io::Error| FileTransferError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    // Renamed into place so a partial write is never taken as stored
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);
    tokio::fs::write(&partial, &body).await.map_err(write_err)?;
    tokio::fs::rename(&partial, path).await.map_err(write_err)?;
    Ok(body.len())
}

async fn eviction_loop(store: Weak<StoreInner>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        let Some(inner) = store.upgrade() else {
            break;
        };
        let live = CotStore { inner };
        match live.evict_expired().await {
            Ok(0) => debug!("No stale CoT to evict"),
            Ok(removed) => info!(removed, "Evicted stale CoT"),
            Err(e) => error!(error = %e, "Stale CoT eviction failed"),
        }
    }
}

fn decode(json: &str) -> Result<Event, StoreError> {
    serde_json::from_str(json).map_err(StoreError::serialization)
}
