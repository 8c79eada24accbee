use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::backend::StorageBackend;
use super::rows::*;
use crate::error::{GroosHubError, Result};
use crate::model::{ChatMessage, MessageRole, UpdateType};

/// SQLite-backed storage for chats, summaries and memories.
///
/// Uses a single `Connection` behind `Arc<Mutex<>>` so it can be shared
/// across async tasks. All blocking SQLite calls go through
/// [`with_conn`](Self::with_conn) which runs them on the Tokio blocking
/// thread-pool.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStorage {
    /// Open (or create) a file-backed database at `path`, creating parent
    /// directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                GroosHubError::Storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(&path)
            .map_err(|e| GroosHubError::Storage(format!("failed to open SQLite database: {e}")))?;

        Self::configure_and_init(conn, path)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            GroosHubError::Storage(format!("failed to open in-memory SQLite database: {e}"))
        })?;

        Self::configure_and_init(conn, PathBuf::from(":memory:"))
    }

    /// Return the path this database was opened with (`:memory:` for in-memory).
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── helpers ────────────────────────────────────────────────────────

    fn configure_and_init(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|e| GroosHubError::Storage(format!("failed to set WAL mode: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| GroosHubError::Storage(format!("failed to enable foreign keys: {e}")))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };

        storage.create_tables()?;
        Ok(storage)
    }

    /// Create all tables, indexes and triggers (idempotent).
    fn create_tables(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| GroosHubError::Storage(format!("failed to acquire database lock: {e}")))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(chat_id, position)
            );

            CREATE TABLE IF NOT EXISTS chat_summaries (
                id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                org_id TEXT NOT NULL,
                start_index INTEGER NOT NULL,
                end_index INTEGER NOT NULL,
                summary TEXT NOT NULL,
                is_encrypted INTEGER NOT NULL DEFAULT 0,
                original_tokens INTEGER NOT NULL DEFAULT 0,
                summary_tokens INTEGER NOT NULL DEFAULT 0,
                compression_ratio REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE(chat_id, start_index),
                CHECK (end_index >= start_index)
            );

            CREATE TABLE IF NOT EXISTS user_memories (
                user_id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                is_encrypted INTEGER NOT NULL DEFAULT 0,
                token_count INTEGER NOT NULL DEFAULT 0,
                last_analysis_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS memory_updates (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                org_id TEXT NOT NULL,
                update_type TEXT NOT NULL,
                change_summary TEXT NOT NULL,
                delta TEXT NOT NULL,
                is_encrypted INTEGER NOT NULL DEFAULT 0,
                source_chat_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS project_memories (
                project_id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                is_encrypted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_analysis_marks (
                user_id TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                last_index INTEGER NOT NULL,
                analyzed_at TEXT NOT NULL,
                PRIMARY KEY (user_id, chat_id)
            );

            CREATE INDEX IF NOT EXISTS idx_chat_messages_chat ON chat_messages(chat_id, position);
            CREATE INDEX IF NOT EXISTS idx_chat_summaries_chat ON chat_summaries(chat_id, start_index);
            CREATE INDEX IF NOT EXISTS idx_memory_updates_user ON memory_updates(user_id, created_at DESC);

            CREATE TRIGGER IF NOT EXISTS memory_updates_no_update
            BEFORE UPDATE ON memory_updates
            BEGIN
                SELECT RAISE(ABORT, 'memory_updates is append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS memory_updates_no_delete
            BEFORE DELETE ON memory_updates
            BEGIN
                SELECT RAISE(ABORT, 'memory_updates is append-only');
            END;
            ",
        )
        .map_err(|e| GroosHubError::Storage(format!("failed to create tables: {e}")))?;

        Ok(())
    }

    /// Run a blocking closure against the connection on the Tokio blocking
    /// thread-pool.
    pub(crate) async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| {
                GroosHubError::Storage(format!("failed to acquire database lock: {e}"))
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| GroosHubError::Storage(format!("task join error: {e}")))?
    }
}

// ── row conversion ─────────────────────────────────────────────────────

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(GroosHubError::Storage(msg)))
}

fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, format!("invalid uuid {raw}: {e}")))
}

fn get_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Uuid::parse_str(&s).map_err(|e| conversion_error(idx, format!("invalid uuid {s}: {e}")))
    })
    .transpose()
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("invalid timestamp {raw}: {e}")))
}

/// Fixed-width timestamps so that text ordering matches time ordering.
fn timestamp_text(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn get_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

fn get_opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_timestamp(idx, &s)).transpose()
}

fn get_count(row: &Row<'_>, idx: usize) -> rusqlite::Result<usize> {
    let raw: i64 = row.get(idx)?;
    usize::try_from(raw).map_err(|e| conversion_error(idx, format!("invalid count {raw}: {e}")))
}

fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).map_err(|_| GroosHubError::InvalidInput(format!("{value} is out of range")))
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role: String = row.get(3)?;
    Ok(ChatMessage {
        id: get_uuid(row, 0)?,
        chat_id: get_uuid(row, 1)?,
        index: get_count(row, 2)?,
        role: role.parse::<MessageRole>().map_err(|e| conversion_error(3, e))?,
        content: row.get(4)?,
        created_at: get_timestamp(row, 5)?,
    })
}

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<SummaryRow> {
    let ratio: f64 = row.get(9)?;
    Ok(SummaryRow {
        id: get_uuid(row, 0)?,
        chat_id: get_uuid(row, 1)?,
        org_id: row.get(2)?,
        start_index: get_count(row, 3)?,
        end_index: get_count(row, 4)?,
        summary: row.get(5)?,
        is_encrypted: row.get(6)?,
        original_tokens: get_count(row, 7)?,
        summary_tokens: get_count(row, 8)?,
        compression_ratio: ratio as f32,
        created_at: get_timestamp(row, 10)?,
    })
}

fn row_to_user_memory(row: &Row<'_>) -> rusqlite::Result<UserMemoryRow> {
    Ok(UserMemoryRow {
        user_id: row.get(0)?,
        org_id: row.get(1)?,
        payload: row.get(2)?,
        is_encrypted: row.get(3)?,
        token_count: get_count(row, 4)?,
        last_analysis_at: get_opt_timestamp(row, 5)?,
        created_at: get_timestamp(row, 6)?,
        updated_at: get_timestamp(row, 7)?,
    })
}

fn row_to_memory_update(row: &Row<'_>) -> rusqlite::Result<MemoryUpdateRow> {
    let update_type: String = row.get(3)?;
    Ok(MemoryUpdateRow {
        id: get_uuid(row, 0)?,
        user_id: row.get(1)?,
        org_id: row.get(2)?,
        update_type: update_type
            .parse::<UpdateType>()
            .map_err(|e| conversion_error(3, e))?,
        change_summary: row.get(4)?,
        delta: row.get(5)?,
        is_encrypted: row.get(6)?,
        source_chat_id: get_opt_uuid(row, 7)?,
        created_at: get_timestamp(row, 8)?,
    })
}

fn row_to_project_memory(row: &Row<'_>) -> rusqlite::Result<ProjectMemoryRow> {
    Ok(ProjectMemoryRow {
        project_id: row.get(0)?,
        org_id: row.get(1)?,
        payload: row.get(2)?,
        is_encrypted: row.get(3)?,
        created_at: get_timestamp(row, 4)?,
        updated_at: get_timestamp(row, 5)?,
    })
}

const SUMMARY_COLUMNS: &str = "id, chat_id, org_id, start_index, end_index, summary, is_encrypted, \
     original_tokens, summary_tokens, compression_ratio, created_at";

// ── StorageBackend ─────────────────────────────────────────────────────

impl StorageBackend for SqliteStorage {
    async fn append_messages(&self, messages: &[ChatMessage]) -> Result<()> {
        let messages = messages.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO chat_messages (id, chat_id, position, role, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for m in &messages {
                    stmt.execute(params![
                        m.id.to_string(),
                        m.chat_id.to_string(),
                        to_i64(m.index)?,
                        m.role.to_string(),
                        m.content,
                        timestamp_text(&m.created_at),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_messages(&self, chat_id: Uuid, from_index: usize) -> Result<Vec<ChatMessage>> {
        let from = to_i64(from_index)?;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, position, role, content, created_at
                 FROM chat_messages WHERE chat_id = ?1 AND position >= ?2
                 ORDER BY position ASC",
            )?;
            let rows = stmt
                .query_map(params![chat_id.to_string(), from], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn count_messages(&self, chat_id: Uuid) -> Result<usize> {
        self.with_conn(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE chat_id = ?1",
                params![chat_id.to_string()],
                |row| get_count(row, 0),
            )?;
            Ok(count)
        })
        .await
    }

    async fn save_summary(&self, row: &SummaryRow) -> Result<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chat_summaries (id, chat_id, org_id, start_index, end_index, summary,
                     is_encrypted, original_tokens, summary_tokens, compression_ratio, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    row.id.to_string(),
                    row.chat_id.to_string(),
                    row.org_id,
                    to_i64(row.start_index)?,
                    to_i64(row.end_index)?,
                    row.summary,
                    row.is_encrypted,
                    to_i64(row.original_tokens)?,
                    to_i64(row.summary_tokens)?,
                    f64::from(row.compression_ratio),
                    timestamp_text(&row.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_summaries(&self, chat_id: Uuid) -> Result<Vec<SummaryRow>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SUMMARY_COLUMNS} FROM chat_summaries
                 WHERE chat_id = ?1 ORDER BY start_index ASC"
            ))?;
            let rows = stmt
                .query_map(params![chat_id.to_string()], row_to_summary)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn delete_summaries(&self, chat_id: Uuid) -> Result<usize> {
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM chat_summaries WHERE chat_id = ?1",
                params![chat_id.to_string()],
            )?;
            Ok(n)
        })
        .await
    }

    async fn get_user_memory(&self, user_id: &str) -> Result<Option<UserMemoryRow>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, org_id, payload, is_encrypted, token_count,
                            last_analysis_at, created_at, updated_at
                     FROM user_memories WHERE user_id = ?1",
                    params![user_id],
                    row_to_user_memory,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    async fn save_user_memory(&self, row: &UserMemoryRow) -> Result<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO user_memories (user_id, org_id, payload, is_encrypted, token_count,
                     last_analysis_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(user_id) DO UPDATE SET
                     org_id = excluded.org_id,
                     payload = excluded.payload,
                     is_encrypted = excluded.is_encrypted,
                     token_count = excluded.token_count,
                     last_analysis_at = excluded.last_analysis_at,
                     updated_at = excluded.updated_at",
                params![
                    row.user_id,
                    row.org_id,
                    row.payload,
                    row.is_encrypted,
                    to_i64(row.token_count)?,
                    row.last_analysis_at.as_ref().map(timestamp_text),
                    timestamp_text(&row.created_at),
                    timestamp_text(&row.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_user_memory(&self, user_id: &str) -> Result<bool> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM user_memories WHERE user_id = ?1",
                params![user_id],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn append_memory_update(&self, row: &MemoryUpdateRow) -> Result<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO memory_updates (id, user_id, org_id, update_type, change_summary,
                     delta, is_encrypted, source_chat_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.id.to_string(),
                    row.user_id,
                    row.org_id,
                    row.update_type.to_string(),
                    row.change_summary,
                    row.delta,
                    row.is_encrypted,
                    row.source_chat_id.map(|id| id.to_string()),
                    timestamp_text(&row.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_memory_updates(&self, user_id: &str, limit: usize) -> Result<Vec<MemoryUpdateRow>> {
        let user_id = user_id.to_string();
        let limit = to_i64(limit)?;
        self.with_conn(move |conn| {
            // v7 ids sort by creation time, which breaks ties within one timestamp.
            let mut stmt = conn.prepare(
                "SELECT id, user_id, org_id, update_type, change_summary, delta,
                        is_encrypted, source_chat_id, created_at
                 FROM memory_updates WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![user_id, limit], row_to_memory_update)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_project_memory(&self, project_id: &str) -> Result<Option<ProjectMemoryRow>> {
        let project_id = project_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT project_id, org_id, payload, is_encrypted, created_at, updated_at
                     FROM project_memories WHERE project_id = ?1",
                    params![project_id],
                    row_to_project_memory,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    async fn save_project_memory(&self, row: &ProjectMemoryRow) -> Result<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO project_memories (project_id, org_id, payload, is_encrypted,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(project_id) DO UPDATE SET
                     org_id = excluded.org_id,
                     payload = excluded.payload,
                     is_encrypted = excluded.is_encrypted,
                     updated_at = excluded.updated_at",
                params![
                    row.project_id,
                    row.org_id,
                    row.payload,
                    row.is_encrypted,
                    timestamp_text(&row.created_at),
                    timestamp_text(&row.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_analysis_mark(&self, user_id: &str, chat_id: Uuid) -> Result<Option<usize>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mark = conn
                .query_row(
                    "SELECT last_index FROM chat_analysis_marks
                     WHERE user_id = ?1 AND chat_id = ?2",
                    params![user_id, chat_id.to_string()],
                    |row| get_count(row, 0),
                )
                .optional()?;
            Ok(mark)
        })
        .await
    }

    async fn save_analysis_mark(&self, user_id: &str, chat_id: Uuid, last_index: usize) -> Result<()> {
        let user_id = user_id.to_string();
        let last_index = to_i64(last_index)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chat_analysis_marks (user_id, chat_id, last_index, analyzed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, chat_id) DO UPDATE SET
                     last_index = max(chat_analysis_marks.last_index, excluded.last_index),
                     analyzed_at = excluded.analyzed_at",
                params![
                    user_id,
                    chat_id.to_string(),
                    last_index,
                    timestamp_text(&Utc::now()),
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(chat_id: Uuid, index: usize, content: &str) -> ChatMessage {
        ChatMessage::new(chat_id, index, MessageRole::User, content.to_string())
    }

    fn summary_row(chat_id: Uuid, start: usize, end: usize) -> SummaryRow {
        SummaryRow {
            id: Uuid::now_v7(),
            chat_id,
            org_id: "org-1".into(),
            start_index: start,
            end_index: end,
            summary: format!("summary {start}-{end}"),
            is_encrypted: false,
            original_tokens: 400,
            summary_tokens: 50,
            compression_ratio: 8.0,
            created_at: Utc::now(),
        }
    }

    fn update_row(user_id: &str, change: &str) -> MemoryUpdateRow {
        MemoryUpdateRow {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            org_id: "org-1".into(),
            update_type: UpdateType::Analysis,
            change_summary: change.into(),
            delta: "{}".into(),
            is_encrypted: false,
            source_chat_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn open_in_memory_creates_tables() {
        let storage = SqliteStorage::open_in_memory().expect("should open in-memory DB");
        assert_eq!(storage.path().to_str().unwrap(), ":memory:");

        let conn = storage.conn.lock().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "chat_analysis_marks",
            "chat_messages",
            "chat_summaries",
            "memory_updates",
            "project_memories",
            "user_memories",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn create_tables_is_idempotent() {
        let storage = SqliteStorage::open_in_memory().expect("should open in-memory DB");
        storage.create_tables().expect("idempotent create_tables");
    }

    #[test]
    fn open_file_based_db_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("grooshub-test-{}", Uuid::now_v7()));
        let db_path = dir.join("nested").join("memory.db");

        let storage = SqliteStorage::open(&db_path).expect("should open file DB");
        assert_eq!(storage.path(), db_path);
        assert!(db_path.exists());

        drop(storage);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn messages_round_trip_in_order() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let chat = Uuid::now_v7();
        let other = Uuid::now_v7();
        storage
            .append_messages(&[message(chat, 0, "hello"), message(chat, 1, "world")])
            .await
            .unwrap();
        storage.append_messages(&[message(other, 0, "elsewhere")]).await.unwrap();

        assert_eq!(storage.count_messages(chat).await.unwrap(), 2);
        let all = storage.get_messages(chat, 0).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "hello");
        assert_eq!(all[1].index, 1);

        let tail = storage.get_messages(chat, 1).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].content, "world");
    }

    #[tokio::test]
    async fn duplicate_message_position_rolls_back_batch() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let chat = Uuid::now_v7();
        storage.append_messages(&[message(chat, 0, "first")]).await.unwrap();

        let result = storage
            .append_messages(&[message(chat, 1, "second"), message(chat, 0, "clash")])
            .await;
        assert!(result.is_err());
        assert_eq!(storage.count_messages(chat).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn summaries_list_ordered_and_delete() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let chat = Uuid::now_v7();
        storage.save_summary(&summary_row(chat, 10, 19)).await.unwrap();
        storage.save_summary(&summary_row(chat, 0, 9)).await.unwrap();

        let rows = storage.list_summaries(chat).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].start_index, 0);
        assert_eq!(rows[1].end_index, 19);
        assert!((rows[0].compression_ratio - 8.0).abs() < f32::EPSILON);

        assert_eq!(storage.delete_summaries(chat).await.unwrap(), 2);
        assert!(storage.list_summaries(chat).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn summary_with_same_start_is_rejected() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let chat = Uuid::now_v7();
        storage.save_summary(&summary_row(chat, 0, 9)).await.unwrap();
        assert!(storage.save_summary(&summary_row(chat, 0, 4)).await.is_err());
    }

    #[tokio::test]
    async fn user_memory_upsert_keeps_created_at() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let created = Utc::now() - chrono::Duration::days(3);
        let mut row = UserMemoryRow {
            user_id: "u1".into(),
            org_id: "org-1".into(),
            payload: "{\"content\":\"a\"}".into(),
            is_encrypted: false,
            token_count: 3,
            last_analysis_at: None,
            created_at: created,
            updated_at: created,
        };
        storage.save_user_memory(&row).await.unwrap();

        row.payload = "{\"content\":\"b\"}".into();
        row.created_at = Utc::now();
        row.updated_at = Utc::now();
        row.last_analysis_at = Some(Utc::now());
        storage.save_user_memory(&row).await.unwrap();

        let loaded = storage.get_user_memory("u1").await.unwrap().unwrap();
        assert_eq!(loaded.payload, "{\"content\":\"b\"}");
        assert!(loaded.last_analysis_at.is_some());
        assert_eq!(loaded.created_at.timestamp(), created.timestamp());

        assert!(storage.delete_user_memory("u1").await.unwrap());
        assert!(!storage.delete_user_memory("u1").await.unwrap());
        assert!(storage.get_user_memory("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_updates_newest_first_with_limit() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        for change in ["one", "two", "three"] {
            storage.append_memory_update(&update_row("u1", change)).await.unwrap();
        }
        storage.append_memory_update(&update_row("u2", "other")).await.unwrap();

        let rows = storage.list_memory_updates("u1", 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].change_summary, "three");
        assert_eq!(rows[1].change_summary, "two");
    }

    #[tokio::test]
    async fn memory_updates_are_append_only() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.append_memory_update(&update_row("u1", "one")).await.unwrap();

        let result = storage
            .with_conn(|conn| {
                conn.execute("DELETE FROM memory_updates", [])?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(storage.list_memory_updates("u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn project_memory_round_trip() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        assert!(storage.get_project_memory("p1").await.unwrap().is_none());

        let now = Utc::now();
        let row = ProjectMemoryRow {
            project_id: "p1".into(),
            org_id: "org-1".into(),
            payload: "ciphertext".into(),
            is_encrypted: true,
            created_at: now,
            updated_at: now,
        };
        storage.save_project_memory(&row).await.unwrap();

        let loaded = storage.get_project_memory("p1").await.unwrap().unwrap();
        assert!(loaded.is_encrypted);
        assert_eq!(loaded.payload, "ciphertext");
    }

    #[tokio::test]
    async fn analysis_marks_are_per_user_and_chat_and_never_regress() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let chat_a = Uuid::now_v7();
        let chat_b = Uuid::now_v7();
        assert_eq!(storage.get_analysis_mark("u1", chat_a).await.unwrap(), None);

        storage.save_analysis_mark("u1", chat_a, 9).await.unwrap();
        assert_eq!(storage.get_analysis_mark("u1", chat_a).await.unwrap(), Some(9));
        assert_eq!(storage.get_analysis_mark("u1", chat_b).await.unwrap(), None);
        assert_eq!(storage.get_analysis_mark("u2", chat_a).await.unwrap(), None);

        storage.save_analysis_mark("u1", chat_a, 4).await.unwrap();
        assert_eq!(storage.get_analysis_mark("u1", chat_a).await.unwrap(), Some(9));
        storage.save_analysis_mark("u1", chat_a, 15).await.unwrap();
        assert_eq!(storage.get_analysis_mark("u1", chat_a).await.unwrap(), Some(15));
    }
}
