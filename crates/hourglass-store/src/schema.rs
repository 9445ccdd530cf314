//! Database schema management.

use std::time::Duration;

use rusqlite::Connection;
use tokio_rusqlite::Error;

/// How long a writer waits for a competing transaction before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r#"
-- One row per live key, recording which table holds its value
CREATE TABLE IF NOT EXISTS keyspace (
    key TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    expires_at INTEGER
);

-- Scalar values
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS hashes (
    key TEXT NOT NULL,
    field TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (key, field)
);

CREATE TABLE IF NOT EXISTS sets (
    key TEXT NOT NULL,
    member TEXT NOT NULL,
    PRIMARY KEY (key, member)
);

CREATE TABLE IF NOT EXISTS zsets (
    key TEXT NOT NULL,
    member TEXT NOT NULL,
    score INTEGER NOT NULL,
    PRIMARY KEY (key, member)
);

-- Lower seq is closer to the head
CREATE TABLE IF NOT EXISTS lists (
    key TEXT NOT NULL,
    seq INTEGER NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (key, seq)
);

-- Published messages, polled by subscribers in every process sharing the file
CREATE TABLE IF NOT EXISTS pubsub (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    channel TEXT NOT NULL,
    payload TEXT NOT NULL,
    published_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pubsub_channel ON pubsub(channel, seq);
CREATE INDEX IF NOT EXISTS idx_pubsub_published ON pubsub(published_at);
CREATE INDEX IF NOT EXISTS idx_keyspace_expires ON keyspace(expires_at);
CREATE INDEX IF NOT EXISTS idx_zsets_score ON zsets(key, score, member);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creation() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        for table in ["keyspace", "kv", "hashes", "sets", "zsets", "lists", "pubsub"] {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")
                .unwrap();
            assert!(stmt.exists([table]).unwrap(), "missing table {}", table);
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }
}
