//! Database schema and migrations for chatterbox.
//!
//! Migrations are applied in order when the database is opened. The
//! `schema_version` table records which ones have run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: accounts
    r#"
CREATE TABLE users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    username    TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password    TEXT NOT NULL,           -- Argon2 hash
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    last_login  TEXT
);
"#,
    // v2: bans, keyed by username
    r#"
CREATE TABLE banned_users (
    username    TEXT PRIMARY KEY COLLATE NOCASE,
    banned_at   TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
    // v3: message log
    r#"
CREATE TABLE messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    username    TEXT NOT NULL,
    channel     TEXT NOT NULL,
    content     TEXT NOT NULL,
    created_at  TEXT NOT NULL           -- RFC 3339, UTC
);

CREATE INDEX idx_messages_created_at ON messages(created_at, id);
"#,
];
