//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `groups`, `members`, `sender_keys`, and
//! `receiver_states`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name         TEXT NOT NULL,
    creator      TEXT NOT NULL,               -- hex-encoded 32-byte identity
    invite_token TEXT,                        -- outstanding signed invite, if any
    is_active    INTEGER NOT NULL DEFAULT 1,  -- boolean 0/1, cleared on local leave
    created_at   TEXT NOT NULL,               -- ISO-8601 / RFC-3339
    updated_at   TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Members
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS members (
    group_id     TEXT NOT NULL,               -- FK -> groups(id)
    member       TEXT NOT NULL,               -- hex-encoded 32-byte identity
    display_name TEXT,
    is_admin     INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    joined_at    TEXT NOT NULL,

    PRIMARY KEY (group_id, member),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_members_group_id ON members(group_id);

-- ----------------------------------------------------------------
-- Sender keys (our own broadcast key per group, sealed blob)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sender_keys (
    group_id   TEXT PRIMARY KEY NOT NULL,     -- FK -> groups(id)
    blob       BLOB NOT NULL,                 -- sealed private export
    updated_at TEXT NOT NULL,

    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Receiver states (one per remote sender per group, sealed blob)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS receiver_states (
    group_id   TEXT NOT NULL,                 -- FK -> groups(id)
    sender     TEXT NOT NULL,                 -- hex-encoded 32-byte identity
    blob       BLOB NOT NULL,                 -- sealed receiver export
    updated_at TEXT NOT NULL,

    PRIMARY KEY (group_id, sender),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
