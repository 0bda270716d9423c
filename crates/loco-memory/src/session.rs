//! Session trace recording and the SQLite session artifact.
//!
//! # Storage layout
//!
//! Two tables are created (if they do not already exist):
//!
//! `sessions`
//!
//! | column          | type    | description                              |
//! |-----------------|---------|------------------------------------------|
//! | id              | TEXT    | UUID v4 primary key                      |
//! | started_at      | TEXT    | RFC-3339 start time (UTC)                |
//! | observation_len | INTEGER | length of every observation vector       |
//! | stop_reason     | TEXT    | why the loop stopped (nullable)          |
//!
//! `session_records`
//!
//! | column      | type    | description                                   |
//! |-------------|---------|-----------------------------------------------|
//! | session_id  | TEXT    | owning session                                |
//! | iteration   | INTEGER | 0-based loop iteration                        |
//! | timestamp   | TEXT    | RFC-3339 time the observation was assembled   |
//! | observation | BLOB    | little-endian f32 vector                      |
//! | action      | BLOB    | native-order joint targets sent (nullable)    |
//!
//! Several sessions may share one file; records are always read back ordered
//! by iteration.
//!
//! # Example
//!
//! ```rust
//! use loco_memory::session::{SessionRecorder, SessionStore};
//!
//! let mut recorder = SessionRecorder::new(3);
//! recorder.record_observation(&[0.0, 0.0, -1.0]).unwrap();
//! recorder.record_action(&[0.5; 15]);
//!
//! let mut store = SessionStore::open_in_memory().unwrap();
//! store.write_session(recorder.session()).unwrap();
//!
//! let replay = store.latest_session().unwrap().unwrap();
//! assert_eq!(replay.records.len(), 1);
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise while recording or persisting a session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Observation {iteration} has length {actual}, session expects {expected}")]
    DimensionMismatch {
        iteration: u64,
        expected: usize,
        actual: usize,
    },
    #[error("Stored session is corrupt: {0}")]
    Corrupt(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// One loop iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub iteration: u64,
    pub timestamp: DateTime<Utc>,
    pub observation: Vec<f32>,
    /// Joint targets actually sent, native order.  `None` when the iteration
    /// stopped before actuation.
    pub action: Option<Vec<f32>>,
}

/// A complete session trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub observation_len: usize,
    pub stop_reason: Option<String>,
    pub records: Vec<SessionRecord>,
}

/// Session metadata without its records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub observation_len: usize,
    pub stop_reason: Option<String>,
    pub record_count: u64,
}

fn floats_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_floats(bytes: &[u8]) -> Result<Vec<f32>, SessionError> {
    if bytes.len() % 4 != 0 {
        return Err(SessionError::Corrupt(format!(
            "float blob of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionRecorder
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory trace of the running session.
///
/// Owned by the control loop thread; nothing here touches the disk.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    session: Session,
}

impl SessionRecorder {
    /// Start a new session whose observations are all `observation_len` long.
    pub fn new(observation_len: usize) -> Self {
        Self {
            session: Session {
                id: Uuid::new_v4(),
                started_at: Utc::now(),
                observation_len,
                stop_reason: None,
                records: Vec::new(),
            },
        }
    }

    /// Append an observation as the next iteration and return its index.
    pub fn record_observation(&mut self, observation: &[f32]) -> Result<u64, SessionError> {
        let iteration = self.session.records.len() as u64;
        if observation.len() != self.session.observation_len {
            return Err(SessionError::DimensionMismatch {
                iteration,
                expected: self.session.observation_len,
                actual: observation.len(),
            });
        }
        self.session.records.push(SessionRecord {
            iteration,
            timestamp: Utc::now(),
            observation: observation.to_vec(),
            action: None,
        });
        Ok(iteration)
    }

    /// Attach the actuated joint targets to the latest iteration.
    /// No-op before the first observation.
    pub fn record_action(&mut self, action: &[f32]) {
        if let Some(last) = self.session.records.last_mut() {
            last.action = Some(action.to_vec());
        }
    }

    pub fn set_stop_reason(&mut self, reason: impl Into<String>) {
        self.session.stop_reason = Some(reason.into());
    }

    pub fn len(&self) -> usize {
        self.session.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.session.records.is_empty()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed session artifact.
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    /// Open (or create) the artifact file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, SessionError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), SessionError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id              TEXT NOT NULL PRIMARY KEY,
                started_at      TEXT NOT NULL,
                observation_len INTEGER NOT NULL,
                stop_reason     TEXT
            );
            CREATE TABLE IF NOT EXISTS session_records (
                session_id  TEXT NOT NULL REFERENCES sessions(id),
                iteration   INTEGER NOT NULL,
                timestamp   TEXT NOT NULL,
                observation BLOB NOT NULL,
                action      BLOB,
                PRIMARY KEY (session_id, iteration)
            );",
        )?;
        Ok(())
    }

    /// Persist `session` and all of its records in one transaction.
    /// Writing the same session again replaces it.
    pub fn write_session(&mut self, session: &Session) -> Result<(), SessionError> {
        let tx = self.conn.transaction()?;
        let id = session.id.to_string();
        tx.execute("DELETE FROM session_records WHERE session_id = ?1", params![id])?;
        tx.execute(
            "INSERT OR REPLACE INTO sessions (id, started_at, observation_len, stop_reason)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                session.started_at.to_rfc3339(),
                session.observation_len as i64,
                session.stop_reason,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO session_records
                     (session_id, iteration, timestamp, observation, action)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in &session.records {
                stmt.execute(params![
                    id,
                    record.iteration as i64,
                    record.timestamp.to_rfc3339(),
                    floats_to_bytes(&record.observation),
                    record.action.as_deref().map(floats_to_bytes),
                ])?;
            }
        }
        tx.commit()?;
        info!(session = %session.id, records = session.records.len(), "session written");
        Ok(())
    }

    /// Metadata for every stored session, oldest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.started_at, s.observation_len, s.stop_reason,
                    (SELECT COUNT(*) FROM session_records r WHERE r.session_id = s.id)
             FROM sessions s
             ORDER BY s.started_at ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, started_at, observation_len, stop_reason, count) = row?;
            summaries.push(SessionSummary {
                id: parse_id(&id)?,
                started_at: parse_time(&started_at)?,
                observation_len: observation_len as usize,
                stop_reason,
                record_count: count as u64,
            });
        }
        Ok(summaries)
    }

    /// Load a session and its records, ordered by iteration.
    pub fn load_session(&self, id: Uuid) -> Result<Option<Session>, SessionError> {
        let header = self
            .conn
            .query_row(
                "SELECT started_at, observation_len, stop_reason FROM sessions WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((started_at, observation_len, stop_reason)) = header else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT iteration, timestamp, observation, action
             FROM session_records
             WHERE session_id = ?1
             ORDER BY iteration ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, Option<Vec<u8>>>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (iteration, timestamp, observation, action) = row?;
            let observation = bytes_to_floats(&observation)?;
            if observation.len() as i64 != observation_len {
                return Err(SessionError::Corrupt(format!(
                    "record {iteration} has {} observation values, session declares {observation_len}",
                    observation.len()
                )));
            }
            records.push(SessionRecord {
                iteration: iteration as u64,
                timestamp: parse_time(&timestamp)?,
                observation,
                action: action.as_deref().map(bytes_to_floats).transpose()?,
            });
        }

        Ok(Some(Session {
            id,
            started_at: parse_time(&started_at)?,
            observation_len: observation_len as usize,
            stop_reason,
            records,
        }))
    }

    /// The most recently started session, if any.
    pub fn latest_session(&self) -> Result<Option<Session>, SessionError> {
        match self.list_sessions()?.last() {
            Some(summary) => self.load_session(summary.id),
            None => Ok(None),
        }
    }
}

fn parse_id(s: &str) -> Result<Uuid, SessionError> {
    Uuid::parse_str(s).map_err(|e| SessionError::Corrupt(format!("bad session id '{s}': {e}")))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, SessionError> {
    s.parse::<DateTime<Utc>>()
        .map_err(|e| SessionError::Corrupt(format!("bad timestamp '{s}': {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
