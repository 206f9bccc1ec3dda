use rusqlite::Connection;

use crate::error::Result;

/// Initialise the bookdrip schema in `conn` (idempotent).
///
/// Schedules and progress are keyed by (user, book) with UNIQUE constraints,
/// and both cascade away when the user or book is deleted. An index on
/// `next_delivery_at` keeps the due-schedule poll efficient.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY,
            chat_id     INTEGER NOT NULL UNIQUE,
            timezone    TEXT    NOT NULL DEFAULT 'UTC',
            created_at  TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS books (
            id              INTEGER PRIMARY KEY,
            title           TEXT    NOT NULL,
            author          TEXT,
            total_snippets  INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS snippets (
            id        INTEGER PRIMARY KEY,
            book_id   INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
            position  INTEGER NOT NULL,
            content   TEXT    NOT NULL,
            UNIQUE (book_id, position)
        ) STRICT;

        CREATE TABLE IF NOT EXISTS schedules (
            id                 INTEGER PRIMARY KEY,
            user_id            INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            book_id            INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
            delivery_time      TEXT    NOT NULL,   -- HH:MM, 24h
            frequency          TEXT    NOT NULL,   -- daily | twice_daily | weekly
            paused             INTEGER NOT NULL DEFAULT 0,
            last_delivered_at  TEXT,               -- ISO-8601 or NULL
            next_delivery_at   TEXT,               -- ISO-8601 or NULL
            created_at         TEXT    NOT NULL,
            updated_at         TEXT    NOT NULL,
            UNIQUE (user_id, book_id)
        ) STRICT;

        -- Efficient polling: SELECT … WHERE next_delivery_at <= ? ORDER BY next_delivery_at
        CREATE INDEX IF NOT EXISTS idx_schedules_next_delivery
            ON schedules (next_delivery_at);

        CREATE TABLE IF NOT EXISTS progress (
            id                INTEGER PRIMARY KEY,
            user_id           INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            book_id           INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
            current_position  INTEGER NOT NULL DEFAULT 0,
            completed         INTEGER NOT NULL DEFAULT 0,
            completed_at      TEXT,                -- ISO-8601 or NULL
            updated_at        TEXT    NOT NULL,
            UNIQUE (user_id, book_id)
        ) STRICT;
        ",
    )?;
    Ok(())
}
