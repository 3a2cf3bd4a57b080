//! Dedup ledger: last message text sent per chat message id.

use crate::schema::LEDGER_SCHEMA;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use takbridge_core::StoreError;
use tracing::debug;

const DB_FILE: &str = "ledger.sqlite3";

#[derive(Clone)]
pub struct DedupLedger {
    conn: Arc<Mutex<Connection>>,
}

impl DedupLedger {
    /// Opens (or creates) `ledger.sqlite3` under `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(DB_FILE);
        let conn = Connection::open(&path).map_err(|e| StoreError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(StoreError::database)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(LEDGER_SCHEMA).map_err(StoreError::database)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn last_sent(&self, message_id: &str) -> Result<Option<String>, StoreError> {
        let message_id = message_id.to_string();
        crate::blocking(&self.conn, move |conn| {
            conn.query_row(
                "SELECT message FROM sent_messages WHERE message_id = ?1",
                params![message_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::database)
        })
        .await
    }

    /// Records `message` for `message_id` unless it is what was last sent.
    ///
    /// Returns true when the message changed and should be sent.
    pub async fn record_if_changed(&self, message_id: &str, message: &str) -> Result<bool, StoreError> {
        let id = message_id.to_string();
        let text = message.to_string();
        let changed = crate::blocking(&self.conn, move |conn| {
            let tx = conn.transaction().map_err(StoreError::database)?;
            let previous: Option<String> = tx
                .query_row(
                    "SELECT message FROM sent_messages WHERE message_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::database)?;

            if previous.as_deref() == Some(text.as_str()) {
                return Ok(false);
            }

            tx.execute(
                "INSERT INTO sent_messages (message_id, message, sent_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(message_id) DO UPDATE SET
                     message = excluded.message,
                     sent_at = excluded.sent_at",
                params![id, text, Utc::now().to_rfc3339()],
            )
            .map_err(StoreError::database)?;
            tx.commit().map_err(StoreError::database)?;
            Ok(true)
        })
        .await?;

        if !changed {
            debug!(message_id = %message_id, "Message already sent and has not changed");
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_if_changed() {
        let ledger = DedupLedger::open_in_memory().unwrap();

        assert!(ledger.record_if_changed("msg-1", "hello").await.unwrap());
        assert!(!ledger.record_if_changed("msg-1", "hello").await.unwrap());
        assert!(ledger.record_if_changed("msg-1", "hello again").await.unwrap());
        assert!(ledger.record_if_changed("msg-2", "hello").await.unwrap());

        assert_eq!(
            ledger.last_sent("msg-1").await.unwrap().as_deref(),
            Some("hello again")
        );
        assert!(ledger.last_sent("msg-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ledger_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = DedupLedger::open(dir.path()).unwrap();
            ledger.record_if_changed("msg-1", "hello").await.unwrap();
        }

        let ledger = DedupLedger::open(dir.path()).unwrap();
        assert!(!ledger.record_if_changed("msg-1", "hello").await.unwrap());
    }
}
