//! Durable session memory on SQLite.
//!
//! Five append-only tables, all keyed by session:
//! - `messages` : the conversation transcript
//! - `entities` : extracted mentions such as ticker symbols
//! - `facts`    : scored key/value assertions (`intent`, `pinned`, ...)
//! - `events`   : the persisted event log (JSON payloads)
//! - `artifacts`: captured auxiliary output (stdout, figures)
//!
//! Rows are never updated. The only mutations besides inserts are bulk
//! session deletes and the transactional transcript rewrite used by
//! history compaction.

use chrono::{DateTime, Utc};
use cofinance_core::error::MemoryError;
use cofinance_core::event::{Event, EventType};
use cofinance_core::message::{Message, Role, SessionId};
use cofinance_core::LogOnError;
use cofinance_core::text::truncate_chars;
use cofinance_config::MemoryConfig;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// An extracted mention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub session_id: SessionId,
    pub entity_type: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

/// A scored assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: i64,
    pub session_id: SessionId,
    pub key: String,
    pub value: String,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

/// Captured output from auxiliary execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: i64,
    pub session_id: SessionId,
    pub kind: String,
    pub path: Option<String>,
    pub content: Option<String>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Fact key for insights the user pinned; retrieval weights these up.
pub const PINNED_FACT: &str = "pinned";

const PIN_SNIPPET_CHARS: usize = 400;

const TABLES: [&str; 5] = ["messages", "entities", "facts", "events", "artifacts"];

/// SQLite-backed session memory.
#[derive(Clone)]
pub struct MemoryStore {
    pool: SqlitePool,
}

impl MemoryStore {
    /// Open (or create) the store at `url` with the default pool size.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database.
    pub async fn new(url: &str) -> Result<Self, MemoryError> {
        Self::connect(url, 4).await
    }

    /// Open (or create) the store with an explicit pool size.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite url: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to an in-memory database would otherwise see its own
        // copy, and recycling the only connection would drop the database.
        let in_memory = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new();
        if in_memory {
            pool_options = pool_options.min_connections(1).idle_timeout(None).max_lifetime(None);
        }
        let max_connections = if in_memory { 1 } else { max_connections.max(1) };

        let pool = pool_options
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(url, max_connections, "Memory store initialized");
        Ok(store)
    }

    /// Open the store described by the `[memory]` config section.
    pub async fn from_config(config: &MemoryConfig) -> Result<Self, MemoryError> {
        Self::connect(&config.database_url, config.max_connections).await
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Close the pool. Later operations fail with a storage error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        let statements = [
            (
                "messages table",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id  TEXT NOT NULL,
                    role        TEXT NOT NULL,
                    content     TEXT NOT NULL,
                    created_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "entities table",
                r#"
                CREATE TABLE IF NOT EXISTS entities (
                    id           INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id   TEXT NOT NULL,
                    entity_type  TEXT NOT NULL,
                    value        TEXT NOT NULL,
                    created_at   TEXT NOT NULL
                )
                "#,
            ),
            (
                "facts table",
                r#"
                CREATE TABLE IF NOT EXISTS facts (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id  TEXT NOT NULL,
                    key         TEXT NOT NULL,
                    value       TEXT NOT NULL,
                    score       REAL NOT NULL DEFAULT 1.0,
                    created_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "events table",
                r#"
                CREATE TABLE IF NOT EXISTS events (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id  TEXT NOT NULL,
                    event_type  TEXT NOT NULL,
                    payload     TEXT NOT NULL,
                    created_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "artifacts table",
                r#"
                CREATE TABLE IF NOT EXISTS artifacts (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id  TEXT NOT NULL,
                    kind        TEXT NOT NULL,
                    path        TEXT,
                    content     TEXT,
                    meta        TEXT NOT NULL DEFAULT '{}',
                    created_at  TEXT NOT NULL
                )
                "#,
            ),
        ];

        for (label, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| MemoryError::MigrationFailed(format!("{label}: {e}")))?;
        }

        for table in TABLES {
            let sql = format!("CREATE INDEX IF NOT EXISTS idx_{table}_session ON {table}(session_id, id)");
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| MemoryError::MigrationFailed(format!("{table} session index: {e}")))?;
        }

        debug!("Memory store migrations complete");
        Ok(())
    }

    // ── Messages ──

    /// Append a message and log an `AGENT_MESSAGE` event for it.
    ///
    /// The event write is best-effort; only the message insert can fail the call.
    pub async fn save_message(&self, session: &SessionId, role: Role, content: &str) -> Result<i64, MemoryError> {
        let id = sqlx::query(
            "INSERT INTO messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(session.as_str())
        .bind(role.as_str())
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Failed to save message: {e}")))?
        .last_insert_rowid();

        let _ = self
            .log_event(session, EventType::AgentMessage, &serde_json::json!({ "role": role.as_str() }))
            .await
            .log_on_error("save_message event");

        debug!(session_id = %session, role = %role, id, "Message saved");
        Ok(id)
    }

    /// Messages in insertion order. With a limit, the most recent `limit`
    /// messages are returned, still oldest first.
    pub async fn get_messages(&self, session: &SessionId, limit: Option<usize>) -> Result<Vec<Message>, MemoryError> {
        let rows = match limit {
            Some(n) => sqlx::query(
                "SELECT * FROM (SELECT * FROM messages WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2) ORDER BY id ASC",
            )
            .bind(session.as_str())
            .bind(n as i64)
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query("SELECT * FROM messages WHERE session_id = ?1 ORDER BY id ASC")
                .bind(session.as_str())
                .fetch_all(&self.pool)
                .await,
        }
        .map_err(|e| MemoryError::QueryFailed(format!("get_messages: {e}")))?;

        rows.iter().map(row_to_message).collect()
    }

    pub async fn count_messages(&self, session: &SessionId) -> Result<usize, MemoryError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM messages WHERE session_id = ?1")
            .bind(session.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("count_messages: {e}")))?;
        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| MemoryError::QueryFailed(format!("cnt column: {e}")))?;
        Ok(count as usize)
    }

    /// Atomically replace a session's transcript.
    ///
    /// Used by history compaction only. Either every message is rewritten or
    /// the previous transcript stays in place.
    pub async fn replace_messages(&self, session: &SessionId, messages: &[Message]) -> Result<(), MemoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to begin transaction: {e}")))?;

        sqlx::query("DELETE FROM messages WHERE session_id = ?1")
            .bind(session.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to clear transcript: {e}")))?;

        for message in messages {
            sqlx::query(
                "INSERT INTO messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(session.as_str())
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(message.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to rewrite transcript: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to commit transcript: {e}")))?;
        debug!(session_id = %session, count = messages.len(), "Transcript replaced");
        Ok(())
    }

    // ── Entities ──

    pub async fn add_entity(&self, session: &SessionId, entity_type: &str, value: &str) -> Result<i64, MemoryError> {
        let result = sqlx::query(
            "INSERT INTO entities (session_id, entity_type, value, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(session.as_str())
        .bind(entity_type)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Failed to add entity: {e}")))?;
        Ok(result.last_insert_rowid())
    }

    /// Entities, newest first.
    pub async fn get_entities(&self, session: &SessionId) -> Result<Vec<Entity>, MemoryError> {
        let rows = sqlx::query("SELECT * FROM entities WHERE session_id = ?1 ORDER BY id DESC")
            .bind(session.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("get_entities: {e}")))?;

        rows.iter()
            .map(|row| {
                Ok(Entity {
                    id: column(row, "id")?,
                    session_id: SessionId(column(row, "session_id")?),
                    entity_type: column(row, "entity_type")?,
                    value: column(row, "value")?,
                    created_at: timestamp(row)?,
                })
            })
            .collect()
    }

    // ── Facts ──

    pub async fn add_fact(&self, session: &SessionId, key: &str, value: &str, score: f64) -> Result<i64, MemoryError> {
        let result = sqlx::query(
            "INSERT INTO facts (session_id, key, value, score, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(session.as_str())
        .bind(key)
        .bind(value)
        .bind(score)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Failed to add fact: {e}")))?;
        Ok(result.last_insert_rowid())
    }

    /// Up to `limit` facts, newest first.
    pub async fn get_facts(&self, session: &SessionId, limit: usize) -> Result<Vec<Fact>, MemoryError> {
        let rows = sqlx::query("SELECT * FROM facts WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2")
            .bind(session.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("get_facts: {e}")))?;

        rows.iter()
            .map(|row| {
                Ok(Fact {
                    id: column(row, "id")?,
                    session_id: SessionId(column(row, "session_id")?),
                    key: column(row, "key")?,
                    value: column(row, "value")?,
                    score: column(row, "score")?,
                    created_at: timestamp(row)?,
                })
            })
            .collect()
    }

    /// Pin an insight: its first 400 characters become a `pinned` fact with
    /// full score, and a `PIN_FACT` event records the snippet length.
    pub async fn pin_insight(&self, session: &SessionId, text: &str) -> Result<i64, MemoryError> {
        let snippet = truncate_chars(text.trim(), PIN_SNIPPET_CHARS);
        if snippet.is_empty() {
            return Err(MemoryError::Storage("Nothing to pin".into()));
        }
        let id = self.add_fact(session, PINNED_FACT, snippet, 1.0).await?;
        let _ = self
            .log_event(
                session,
                EventType::PinFact,
                &serde_json::json!({ "length": snippet.chars().count() }),
            )
            .await
            .log_on_error("log pin event");
        debug!(session_id = %session, fact_id = id, "Insight pinned");
        Ok(id)
    }

    // ── Events ──

    pub async fn log_event(
        &self,
        session: &SessionId,
        event_type: EventType,
        payload: &serde_json::Value,
    ) -> Result<i64, MemoryError> {
        let result = sqlx::query(
            "INSERT INTO events (session_id, event_type, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(session.as_str())
        .bind(event_type.as_str())
        .bind(payload.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Failed to log event: {e}")))?;
        Ok(result.last_insert_rowid())
    }

    /// Persist an already-built event, keeping its timestamp.
    pub async fn record_event(&self, event: &Event) -> Result<i64, MemoryError> {
        let result = sqlx::query(
            "INSERT INTO events (session_id, event_type, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(event.session_id.as_str())
        .bind(event.event_type.as_str())
        .bind(event.payload.to_string())
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Failed to record event: {e}")))?;
        Ok(result.last_insert_rowid())
    }

    /// Up to `limit` events, newest first, optionally restricted to `types`.
    ///
    /// A payload that is not valid JSON comes back as `{"raw": <text>}`.
    pub async fn get_events(
        &self,
        session: &SessionId,
        limit: usize,
        types: &[EventType],
    ) -> Result<Vec<Event>, MemoryError> {
        let mut sql = String::from("SELECT * FROM events WHERE session_id = ?");
        if !types.is_empty() {
            let placeholders = vec!["?"; types.len()].join(", ");
            sql.push_str(&format!(" AND event_type IN ({placeholders})"));
        }
        sql.push_str(" ORDER BY id DESC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(session.as_str());
        for t in types {
            query = query.bind(t.as_str());
        }
        let rows = query
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("get_events: {e}")))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let type_str: String = column(row, "event_type")?;
            let Ok(event_type) = type_str.parse::<EventType>() else {
                warn!(event_type = %type_str, "Skipping event with unknown type");
                continue;
            };
            let raw: String = column(row, "payload")?;
            let payload = serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({ "raw": raw }));
            events.push(Event {
                session_id: SessionId(column(row, "session_id")?),
                event_type,
                payload,
                timestamp: timestamp(row)?,
            });
        }
        Ok(events)
    }

    // ── Artifacts ──

    pub async fn save_artifact(
        &self,
        session: &SessionId,
        kind: &str,
        path: Option<&str>,
        content: Option<&str>,
        meta: &serde_json::Value,
    ) -> Result<i64, MemoryError> {
        let result = sqlx::query(
            "INSERT INTO artifacts (session_id, kind, path, content, meta, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(session.as_str())
        .bind(kind)
        .bind(path)
        .bind(content)
        .bind(meta.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Failed to save artifact: {e}")))?;
        Ok(result.last_insert_rowid())
    }

    /// Artifacts in insertion order, optionally only those of `kind`.
    pub async fn get_artifacts(&self, session: &SessionId, kind: Option<&str>) -> Result<Vec<Artifact>, MemoryError> {
        let rows = match kind {
            Some(kind) => sqlx::query("SELECT * FROM artifacts WHERE session_id = ?1 AND kind = ?2 ORDER BY id ASC")
                .bind(session.as_str())
                .bind(kind)
                .fetch_all(&self.pool)
                .await,
            None => sqlx::query("SELECT * FROM artifacts WHERE session_id = ?1 ORDER BY id ASC")
                .bind(session.as_str())
                .fetch_all(&self.pool)
                .await,
        }
        .map_err(|e| MemoryError::QueryFailed(format!("get_artifacts: {e}")))?;

        rows.iter()
            .map(|row| {
                let meta: String = column(row, "meta")?;
                Ok(Artifact {
                    id: column(row, "id")?,
                    session_id: SessionId(column(row, "session_id")?),
                    kind: column(row, "kind")?,
                    path: column(row, "path")?,
                    content: column(row, "content")?,
                    meta: serde_json::from_str(&meta).unwrap_or_else(|_| serde_json::json!({ "raw": meta })),
                    created_at: timestamp(row)?,
                })
            })
            .collect()
    }

    // ── Sessions ──

    /// Sessions that have messages, most recently active first.
    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionId>, MemoryError> {
        let rows = sqlx::query(
            "SELECT session_id, MAX(id) AS last_id FROM messages GROUP BY session_id ORDER BY last_id DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("list_sessions: {e}")))?;

        rows.iter()
            .map(|row| Ok(SessionId(column(row, "session_id")?)))
            .collect()
    }

    /// Remove every row of a session from all tables. Returns rows deleted.
    pub async fn delete_session(&self, session: &SessionId) -> Result<u64, MemoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to begin transaction: {e}")))?;

        let mut deleted = 0;
        for table in TABLES {
            let sql = format!("DELETE FROM {table} WHERE session_id = ?1");
            deleted += sqlx::query(&sql)
                .bind(session.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| MemoryError::Storage(format!("Failed to delete from {table}: {e}")))?
                .rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to commit delete: {e}")))?;
        info!(session_id = %session, deleted, "Session deleted");
        Ok(deleted)
    }

    /// Remove every row of every session.
    pub async fn delete_all(&self) -> Result<u64, MemoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to begin transaction: {e}")))?;

        let mut deleted = 0;
        for table in TABLES {
            deleted += sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(|e| MemoryError::Storage(format!("Failed to clear {table}: {e}")))?
                .rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to commit delete: {e}")))?;
        Ok(deleted)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("pool_size", &self.pool.size()).finish()
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, MemoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| MemoryError::QueryFailed(format!("{name} column: {e}")))
}

fn timestamp(row: &SqliteRow) -> Result<DateTime<Utc>, MemoryError> {
    let raw: String = column(row, "created_at")?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::QueryFailed(format!("bad created_at '{raw}': {e}")))
}

fn row_to_message(row: &SqliteRow) -> Result<Message, MemoryError> {
    let id: i64 = column(row, "id")?;
    let role: String = column(row, "role")?;
    let role = role.parse::<Role>().map_err(MemoryError::QueryFailed)?;
    Ok(Message {
        id: id.to_string(),
        role,
        content: column(row, "content")?,
        tool_calls: Vec::new(),
        tool_call_id: None,
        timestamp: timestamp(row)?,
    })
}
