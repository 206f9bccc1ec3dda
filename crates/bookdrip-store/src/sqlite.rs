use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use bookdrip_core::{Book, DeliverySchedule, DeliveryTime, Frequency, ReadingProgress, Snippet, User};

use crate::{
    db::init_db,
    error::{Result, StoreError},
    repo::Repository,
};

/// SQLite-backed [`Repository`].
///
/// One `Connection` behind a mutex — every method takes the lock for the
/// duration of a single statement. Open additional repositories on the same
/// file if a subsystem needs its own connection.
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Wrap an existing connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::new(conn)
    }

    /// Fresh in-memory database — used by tests and tooling.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::new(conn)
    }

    pub fn create_user(&self, chat_id: i64, timezone: &str) -> Result<User> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (chat_id, timezone, created_at) VALUES (?1, ?2, ?3)",
            params![chat_id, timezone, ts(&Utc::now())],
        )?;
        Ok(User {
            id: conn.last_insert_rowid(),
            chat_id,
            timezone: timezone.to_string(),
        })
    }

    pub fn create_book(
        &self,
        title: &str,
        author: Option<&str>,
        total_snippets: u32,
    ) -> Result<Book> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO books (title, author, total_snippets, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![title, author, total_snippets, ts(&Utc::now())],
        )?;
        Ok(Book {
            id: conn.last_insert_rowid(),
            title: title.to_string(),
            author: author.map(String::from),
            total_snippets,
        })
    }

    pub fn create_snippet(&self, snippet: &Snippet) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO snippets (book_id, position, content) VALUES (?1, ?2, ?3)",
            params![snippet.book_id, snippet.position, snippet.content],
        )?;
        Ok(())
    }
}

impl Repository for SqliteRepository {
    fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT id, chat_id, timezone FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        chat_id: row.get(1)?,
                        timezone: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE users SET chat_id = ?2, timezone = ?3 WHERE id = ?1",
            params![user.id, user.chat_id, user.timezone],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }

    fn get_book(&self, id: i64) -> Result<Option<Book>> {
        let conn = self.conn.lock().unwrap();
        let book = conn
            .query_row(
                "SELECT id, title, author, total_snippets FROM books WHERE id = ?1",
                [id],
                |row| {
                    Ok(Book {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        author: row.get(2)?,
                        total_snippets: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(book)
    }

    fn get_snippet(&self, book_id: i64, position: u32) -> Result<Option<Snippet>> {
        let conn = self.conn.lock().unwrap();
        let snippet = conn
            .query_row(
                "SELECT book_id, position, content FROM snippets
                 WHERE book_id = ?1 AND position = ?2",
                params![book_id, position],
                |row| {
                    Ok(Snippet {
                        book_id: row.get(0)?,
                        position: row.get(1)?,
                        content: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(snippet)
    }

    fn count_snippets(&self, book_id: i64) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM snippets WHERE book_id = ?1",
            [book_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn get_schedule(&self, user_id: i64, book_id: i64) -> Result<Option<DeliverySchedule>> {
        let conn = self.conn.lock().unwrap();
        let schedule = conn
            .query_row(
                &format!("{SCHEDULE_SELECT} WHERE user_id = ?1 AND book_id = ?2"),
                params![user_id, book_id],
                schedule_from_row,
            )
            .optional()?;
        Ok(schedule)
    }

    fn list_user_schedules(&self, user_id: i64) -> Result<Vec<DeliverySchedule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{SCHEDULE_SELECT} WHERE user_id = ?1 ORDER BY id"))?;
        let schedules = stmt
            .query_map([user_id], schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(schedules)
    }

    fn list_due_schedules(&self, before: DateTime<Utc>) -> Result<Vec<DeliverySchedule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "{SCHEDULE_SELECT}
             WHERE paused = 0 AND next_delivery_at IS NOT NULL AND next_delivery_at <= ?1
             ORDER BY next_delivery_at, id"
        ))?;
        let schedules = stmt
            .query_map([ts(&before)], schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(schedules)
    }

    fn create_schedule(&self, schedule: &DeliverySchedule) -> Result<DeliverySchedule> {
        let conn = self.conn.lock().unwrap();
        let now_str = ts(&Utc::now());
        conn.execute(
            "INSERT INTO schedules
             (user_id, book_id, delivery_time, frequency, paused,
              last_delivered_at, next_delivery_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                schedule.user_id,
                schedule.book_id,
                schedule.delivery_time.to_string(),
                schedule.frequency.to_string(),
                schedule.paused,
                schedule.last_delivered_at.as_ref().map(ts),
                schedule.next_delivery_at.as_ref().map(ts),
                now_str,
            ],
        )?;
        let mut created = schedule.clone();
        created.id = conn.last_insert_rowid();
        Ok(created)
    }

    fn update_schedule(&self, schedule: &DeliverySchedule) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE schedules
             SET delivery_time = ?2, frequency = ?3, paused = ?4,
                 last_delivered_at = ?5, next_delivery_at = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                schedule.id,
                schedule.delivery_time.to_string(),
                schedule.frequency.to_string(),
                schedule.paused,
                schedule.last_delivered_at.as_ref().map(ts),
                schedule.next_delivery_at.as_ref().map(ts),
                ts(&Utc::now()),
            ],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("schedule {}", schedule.id)));
        }
        Ok(())
    }

    fn delete_schedule(&self, user_id: i64, book_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM schedules WHERE user_id = ?1 AND book_id = ?2",
            params![user_id, book_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!(
                "schedule for user {user_id}, book {book_id}"
            )));
        }
        Ok(())
    }

    fn get_progress(&self, user_id: i64, book_id: i64) -> Result<Option<ReadingProgress>> {
        let conn = self.conn.lock().unwrap();
        let progress = conn
            .query_row(
                "SELECT user_id, book_id, current_position, completed, completed_at
                 FROM progress WHERE user_id = ?1 AND book_id = ?2",
                params![user_id, book_id],
                |row| {
                    Ok(ReadingProgress {
                        user_id: row.get(0)?,
                        book_id: row.get(1)?,
                        current_position: row.get(2)?,
                        completed: row.get(3)?,
                        completed_at: parse_ts_opt(row.get(4)?, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(progress)
    }

    fn create_progress(&self, progress: &ReadingProgress) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO progress
             (user_id, book_id, current_position, completed, completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                progress.user_id,
                progress.book_id,
                progress.current_position,
                progress.completed,
                progress.completed_at.as_ref().map(ts),
                ts(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn update_progress(&self, progress: &ReadingProgress) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE progress
             SET current_position = ?3, completed = ?4, completed_at = ?5, updated_at = ?6
             WHERE user_id = ?1 AND book_id = ?2",
            params![
                progress.user_id,
                progress.book_id,
                progress.current_position,
                progress.completed,
                progress.completed_at.as_ref().map(ts),
                ts(&Utc::now()),
            ],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!(
                "progress for user {}, book {}",
                progress.user_id, progress.book_id
            )));
        }
        Ok(())
    }
}

const SCHEDULE_SELECT: &str = "SELECT id, user_id, book_id, delivery_time, frequency, paused,
        last_delivered_at, next_delivery_at
 FROM schedules";

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<DeliverySchedule> {
    let time_str: String = row.get(3)?;
    let freq_str: String = row.get(4)?;
    Ok(DeliverySchedule {
        id: row.get(0)?,
        user_id: row.get(1)?,
        book_id: row.get(2)?,
        delivery_time: time_str
            .parse::<DeliveryTime>()
            .map_err(|e| decode_err(3, e))?,
        frequency: freq_str
            .parse::<Frequency>()
            .map_err(|e| decode_err(4, e))?,
        paused: row.get(5)?,
        last_delivered_at: parse_ts_opt(row.get(6)?, 6)?,
        next_delivery_at: parse_ts_opt(row.get(7)?, 7)?,
    })
}

fn decode_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts_opt(value: Option<String>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| decode_err(idx, e))
        })
        .transpose()
}
