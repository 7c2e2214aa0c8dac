//! v001 -- Initial schema creation.
//!
//! A single-row `device_session` table holding the linked-device
//! credentials.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS device_session (
    slot       INTEGER PRIMARY KEY NOT NULL CHECK (slot = 1),
    device_id  TEXT NOT NULL,
    push_name  TEXT,
    token      TEXT NOT NULL,               -- opaque bridge credential
    paired_at  TEXT NOT NULL,               -- RFC-3339
    updated_at TEXT NOT NULL                -- RFC-3339
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
