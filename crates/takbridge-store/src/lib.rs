//! Embedded persistence for the takbridge CoT/GraphQL bridge.
//!
//! - [`CotStore`]: inbound CoT events keyed by uid, with stale-based expiry
//!   and a side area for file-share artifacts
//! - [`DedupLedger`]: last message text sent per chat message id
//! - [`FileFetcher`]: retrieval of file-share artifacts from the sending
//!   TAK client
//!
//! Both databases are SQLite files opened through `rusqlite`; every query runs
//! on tokio's blocking pool.

pub mod ledger;
pub mod schema;
pub mod store;
pub mod transfer;

pub use ledger::DedupLedger;
pub use store::{CotStore, FileContent, StoreOptions, DEFAULT_EVICTION_INTERVAL, DEFAULT_STALE_GRACE};
pub use transfer::{artifact_name, sanitize_filename, FileFetcher, HttpFileFetcher};

use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;
use takbridge_core::StoreError;

/// Runs `f` against the connection on the blocking pool.
pub(crate) async fn blocking<T, F>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let conn = conn.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = conn.lock();
        f(&mut conn)
    })
    .await
    .map_err(|e| StoreError::Task {
        reason: e.to_string(),
    })?
}
