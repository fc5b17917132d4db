//! libSQL backend for the Memory Store and the allow-list.
//!
//! Supports local file and in-memory databases. Metadata filters are pushed
//! down to SQLite's `json_extract`; timestamps are written as fixed-width
//! RFC 3339 so text ordering equals time ordering.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::channels::Channel;
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    AllowlistBackend, AllowlistEntry, MemoryEntry, MemoryQuery, MemoryStore, OrderBy,
    OrderDirection, Role, Session,
};

/// libSQL-backed store.
///
/// Holds a single connection reused for all operations.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_channel(s: &str) -> Result<Channel, DatabaseError> {
    s.parse().map_err(DatabaseError::Serialization)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// JSON path for a top-level metadata key.
fn json_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', "\\\""))
}

/// Append a metadata equality clause for one key, binding its parameters.
fn push_metadata_filter(clauses: &mut Vec<String>, values: &mut Vec<libsql::Value>, key: &str, value: &Value) {
    let path_idx = values.len() + 1;
    values.push(libsql::Value::Text(json_path(key)));
    let value_idx = values.len() + 1;
    match value {
        Value::String(s) => {
            clauses.push(format!("json_extract(session_metadata, ?{path_idx}) = ?{value_idx}"));
            values.push(libsql::Value::Text(s.clone()));
        }
        Value::Bool(b) => {
            clauses.push(format!("json_extract(session_metadata, ?{path_idx}) = ?{value_idx}"));
            values.push(libsql::Value::Integer(i64::from(*b)));
        }
        Value::Number(n) => {
            clauses.push(format!("json_extract(session_metadata, ?{path_idx}) = ?{value_idx}"));
            values.push(match n.as_i64() {
                Some(i) => libsql::Value::Integer(i),
                None => libsql::Value::Real(n.as_f64().unwrap_or_default()),
            });
        }
        Value::Null => {
            clauses.push(format!("json_type(session_metadata, ?{path_idx}) = 'null'"));
        }
        Value::Array(_) | Value::Object(_) => {
            clauses.push(format!(
                "json_extract(session_metadata, ?{path_idx}) = json(?{value_idx})"
            ));
            values.push(libsql::Value::Text(value.to_string()));
        }
    }
}

fn row_to_entry(row: &libsql::Row) -> Result<MemoryEntry, DatabaseError> {
    let get_text = |i: i32| -> Result<String, DatabaseError> {
        row.get::<String>(i)
            .map_err(|e| DatabaseError::Query(format!("memory_entries column {i}: {e}")))
    };

    let id = get_text(0)?;
    let metadata = get_text(5)?;
    let session_metadata: Map<String, Value> = serde_json::from_str(&metadata)
        .map_err(|e| DatabaseError::Serialization(format!("session_metadata: {e}")))?;

    Ok(MemoryEntry {
        id: Uuid::parse_str(&id).map_err(|e| DatabaseError::Serialization(format!("entry id: {e}")))?,
        conversation_id: get_text(1)?,
        channel: parse_channel(&get_text(2)?)?,
        role: Role::from_db(&get_text(3)?),
        content: get_text(4)?,
        session_metadata,
        created_at: parse_datetime(&get_text(6)?),
    })
}

fn row_to_session(row: &libsql::Row) -> Result<Session, DatabaseError> {
    let channel: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("sessions.channel: {e}")))?;
    let started: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("sessions.started_at: {e}")))?;
    let ended: Option<String> = row.get(4).ok();

    Ok(Session {
        conversation_id: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("sessions.conversation_id: {e}")))?,
        channel: parse_channel(&channel)?,
        participant: row
            .get(2)
            .map_err(|e| DatabaseError::Query(format!("sessions.participant: {e}")))?,
        started_at: parse_datetime(&started),
        ended_at: ended.as_deref().map(parse_datetime),
        summary: row.get(5).ok(),
    })
}

const ENTRY_COLUMNS: &str =
    "id, conversation_id, channel, role, content, session_metadata, created_at";

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl MemoryStore for LibSqlStore {
    async fn store(&self, entry: &MemoryEntry) -> Result<(), DatabaseError> {
        let metadata = serde_json::to_string(&entry.session_metadata)
            .map_err(|e| DatabaseError::Serialization(format!("session_metadata: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO memory_entries (id, conversation_id, channel, role, content, session_metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.id.to_string(),
                    entry.conversation_id.as_str(),
                    entry.channel.as_str(),
                    entry.role.as_str(),
                    entry.content.as_str(),
                    metadata,
                    format_datetime(&entry.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("store entry: {e}")))?;

        debug!(conversation_id = %entry.conversation_id, role = entry.role.as_str(), "Stored memory entry");
        Ok(())
    }

    async fn search(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>, DatabaseError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();

        if let Some(channel) = query.channel {
            values.push(libsql::Value::Text(channel.as_str().to_string()));
            clauses.push(format!("channel = ?{}", values.len()));
        }
        for (key, value) in &query.session_metadata {
            push_metadata_filter(&mut clauses, &mut values, key, value);
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let order_col = match query.order_by {
            OrderBy::CreatedAt => "created_at",
        };
        let dir = match query.direction {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        };
        values.push(libsql::Value::Integer(
            i64::try_from(query.limit).unwrap_or(i64::MAX),
        ));
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM memory_entries {where_sql}
             ORDER BY {order_col} {dir}, seq {dir} LIMIT ?{}",
            values.len()
        );

        let mut rows = self
            .conn()
            .query(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("search: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("search row: {e}")))?
        {
            entries.push(row_to_entry(&row)?);
        }
        Ok(entries)
    }

    async fn conversation_history(&self, conversation_id: &str) -> Result<Vec<MemoryEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM memory_entries
                     WHERE conversation_id = ?1 ORDER BY created_at ASC, seq ASC"
                ),
                params![conversation_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("conversation_history: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("conversation_history row: {e}")))?
        {
            entries.push(row_to_entry(&row)?);
        }
        Ok(entries)
    }

    async fn start_session(
        &self,
        conversation_id: &str,
        channel: Channel,
        participant: &str,
    ) -> Result<Session, DatabaseError> {
        let session = Session {
            conversation_id: conversation_id.to_string(),
            channel,
            participant: participant.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            summary: None,
        };
        self.conn()
            .execute(
                "INSERT INTO sessions (conversation_id, channel, participant, started_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(conversation_id) DO NOTHING",
                params![
                    conversation_id,
                    channel.as_str(),
                    participant,
                    format_datetime(&session.started_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("start_session: {e}")))?;
        Ok(session)
    }

    async fn end_session(&self, conversation_id: &str, summary: Option<&str>) -> Result<Session, DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE sessions SET ended_at = ?2, summary = ?3 WHERE conversation_id = ?1",
                params![conversation_id, format_datetime(&Utc::now()), opt_text(summary)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("end_session: {e}")))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "session".into(),
                id: conversation_id.to_string(),
            });
        }

        self.get_session(conversation_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "session".into(),
                id: conversation_id.to_string(),
            })
    }

    async fn get_session(&self, conversation_id: &str) -> Result<Option<Session>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT conversation_id, channel, participant, started_at, ended_at, summary
                 FROM sessions WHERE conversation_id = ?1",
                params![conversation_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session row: {e}")))?
        {
            Some(row) => Ok(Some(row_to_session(&row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AllowlistBackend for LibSqlStore {
    async fn load_all(&self) -> Result<Vec<AllowlistEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT channel, identifier, added_by, added_at FROM allowlist",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load allowlist: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("allowlist row: {e}")))?
        {
            let channel: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("allowlist.channel: {e}")))?;
            let added_at: String = row
                .get(3)
                .map_err(|e| DatabaseError::Query(format!("allowlist.added_at: {e}")))?;
            entries.push(AllowlistEntry {
                channel: parse_channel(&channel)?,
                identifier: row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("allowlist.identifier: {e}")))?,
                added_by: row.get(2).unwrap_or_default(),
                added_at: parse_datetime(&added_at),
            });
        }
        Ok(entries)
    }

    async fn upsert(&self, entry: &AllowlistEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO allowlist (channel, identifier, added_by, added_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(channel, identifier) DO UPDATE SET
                    added_by = excluded.added_by,
                    added_at = excluded.added_at",
                params![
                    entry.channel.as_str(),
                    entry.identifier.as_str(),
                    entry.added_by.as_str(),
                    format_datetime(&entry.added_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert allowlist: {e}")))?;
        Ok(())
    }

    async fn remove(&self, channel: Channel, identifier: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM allowlist WHERE channel = ?1 AND identifier = ?2",
                params![channel.as_str(), identifier],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("remove allowlist: {e}")))?;
        Ok(())
    }
}
