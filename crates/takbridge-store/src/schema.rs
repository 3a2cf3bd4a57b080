//! SQL schema for the CoT store and the dedup ledger.
//!
//! Both are idempotent and run every time a database is opened.

pub const COT_SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS cot_events (
    uid        TEXT PRIMARY KEY,
    stale_ms   INTEGER NOT NULL,   -- event stale time, unix millis
    fileshare  INTEGER NOT NULL DEFAULT 0,
    event      TEXT NOT NULL       -- JSON-encoded event
);

CREATE INDEX IF NOT EXISTS cot_events_stale_idx ON cot_events(stale_ms);

PRAGMA user_version = 1;
";

pub const LEDGER_SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS sent_messages (
    message_id  TEXT PRIMARY KEY,
    message     TEXT NOT NULL,
    sent_at     TEXT NOT NULL      -- ISO 8601 UTC
);

PRAGMA user_version = 1;
";
