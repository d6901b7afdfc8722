//! SQL schema for the acctrail SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- Append-only. Rows are only ever removed by retention pruning.
-- The primary key doubles as the newest-first lookup index.
CREATE TABLE IF NOT EXISTS account_history (
    program_id    TEXT    NOT NULL,
    pubkey        TEXT    NOT NULL,
    created_at    TEXT    NOT NULL,   -- RFC 3339 UTC, microseconds; server-assigned
    slot          INTEGER NOT NULL,
    discriminator TEXT,               -- hex of the first 8 payload bytes
    change_type   TEXT    NOT NULL,
    data          BLOB    NOT NULL,
    data_hash     TEXT    NOT NULL,   -- hex SHA-256 of data
    PRIMARY KEY (program_id, pubkey, created_at),
    CHECK (change_type IN ('create', 'update', 'delete'))
);

PRAGMA user_version = 1;
";
