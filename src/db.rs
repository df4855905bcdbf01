//! Durable thread checkpoints
//!
//! One row per thread holding the JSON snapshot of its state, plus the stage
//! and phase as separate columns for listing and startup recovery.

mod schema;

pub use schema::*;

use crate::state_machine::{ConvState, Stage, ThreadState};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite itself consistent
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Thread Operations ====================

    /// Insert or replace a thread checkpoint
    pub fn save_thread(&self, thread: &ThreadState) -> DbResult<()> {
        let snapshot = serde_json::to_string(thread)?;
        let state = serde_json::to_string(&thread.phase)?;
        let message_count = i64::try_from(thread.messages.len()).unwrap_or(i64::MAX);
        let now = Utc::now().to_rfc3339();

        self.conn().execute(
            "INSERT INTO threads (id, stage, state, snapshot, message_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET
                stage = excluded.stage,
                state = excluded.state,
                snapshot = excluded.snapshot,
                message_count = excluded.message_count,
                updated_at = excluded.updated_at",
            params![
                thread.thread_id,
                thread.stage.as_str(),
                state,
                snapshot,
                message_count,
                now
            ],
        )?;
        Ok(())
    }

    /// Get a thread by ID
    pub fn get_thread(&self, id: &str) -> DbResult<ThreadState> {
        let snapshot: Option<String> = self
            .conn()
            .query_row(
                "SELECT snapshot FROM threads WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let snapshot = snapshot.ok_or_else(|| DbError::ThreadNotFound(id.to_string()))?;
        Ok(serde_json::from_str(&snapshot)?)
    }

    /// List all threads, most recently updated first
    pub fn list_threads(&self) -> DbResult<Vec<ThreadSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, snapshot, message_count, created_at, updated_at
             FROM threads
             ORDER BY updated_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            let snapshot: String = row.get(1)?;
            Ok((
                row.get::<_, String>(0)?,
                snapshot,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut threads = Vec::new();
        for row in rows {
            let (id, snapshot, message_count, created_at, updated_at) = row?;
            // Stage and phase come from the snapshot so the two never disagree
            let (stage, state) = match serde_json::from_str::<ThreadState>(&snapshot) {
                Ok(thread) => (thread.stage, thread.phase),
                Err(e) => {
                    tracing::warn!(thread_id = %id, error = %e, "Unreadable thread snapshot");
                    (Stage::default(), ConvState::default())
                }
            };
            threads.push(ThreadSummary {
                id,
                stage,
                state,
                message_count,
                created_at: parse_datetime(&created_at),
                updated_at: parse_datetime(&updated_at),
            });
        }
        Ok(threads)
    }

    /// Reset threads left mid-turn by a previous process to idle.
    /// Returns the number of threads reset.
    pub fn reset_all_to_idle(&self) -> DbResult<usize> {
        let now = Utc::now().to_rfc3339();
        let reset = self.conn().execute(RESET_IN_FLIGHT, params![now])?;
        Ok(reset)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
