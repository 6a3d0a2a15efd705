use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chat_provider::Role;
use field_codec::FieldCodec;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::SessionStoreError;
use crate::records::{
    CreatedSession, MessageRecord, NewMessage, NewSession, SessionRecord, SessionSummary,
    SessionWithMessages,
};

const DB_POOL_MAX_CONNECTIONS: u32 = 4;
const DB_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Legacy sessions without an owner are visible to every caller, and an
/// unscoped caller sees every session.
const OWNER_VISIBLE: &str = "(owner IS NULL OR ? IS NULL OR owner = ?)";

const SESSION_COLUMNS: &str =
    "id, model, title, project_root, system_prompt, preset_id, owner, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, role, content, thinking, model, preset_id, tool_calls, \
                               tool_name, created_at, deleted_at";

type SessionLocks = Arc<Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>>;

/// Handle to the session database. Cloning shares the pool, the codec and
/// the per-session lock table.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
    codec: Arc<FieldCodec>,
    locks: SessionLocks,
}

/// Advisory lock over one session id, released on drop.
///
/// It only serializes holders sharing the same [`SessionStore`] handle (or
/// clones of it) inside one process. The lock table entry is dropped with
/// the last holder or waiter.
pub struct SessionLock {
    session_id: i64,
    locks: SessionLocks,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl SessionLock {
    #[must_use]
    pub fn session_id(&self) -> i64 {
        self.session_id
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = lock_unpoisoned(&self.locks);
        // Waiters hold their own clone of the mutex, so a count of one means
        // only the table still refers to it.
        if locks
            .get(&self.session_id)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.session_id);
        }
    }
}

struct SealedMessage {
    role: &'static str,
    content: String,
    thinking: Option<String>,
    tool_calls: Option<String>,
}

impl SessionStore {
    /// Opens the on-disk database, creating it if missing, and runs embedded
    /// migrations.
    pub async fn open(db_path: &Path, codec: FieldCodec) -> Result<Self, SessionStoreError> {
        if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| {
                SessionStoreError::io("creating database directory", parent, source)
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(DB_BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(DB_POOL_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(SessionStoreError::database("connecting to database"))?;

        tracing::debug!(path = %db_path.display(), "session database opened");
        Self::migrate(pool, codec).await
    }

    /// Opens a private in-memory database. A single connection keeps every
    /// query on the same database.
    pub async fn open_in_memory(codec: FieldCodec) -> Result<Self, SessionStoreError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(SessionStoreError::database("connecting to in-memory database"))?;

        Self::migrate(pool, codec).await
    }

    async fn migrate(pool: SqlitePool, codec: FieldCodec) -> Result<Self, SessionStoreError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(SessionStoreError::Migration)?;

        if let Err(error) = codec.check_key() {
            tracing::warn!(%error, "field codec unusable; sealed reads and writes will fail");
        }

        Ok(Self {
            pool,
            codec: Arc::new(codec),
            locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Waits for exclusive use of `session_id` among holders of this store.
    pub async fn lock_session(&self, session_id: i64) -> SessionLock {
        let mutex = {
            let mut locks = lock_unpoisoned(&self.locks);
            Arc::clone(locks.entry(session_id).or_default())
        };
        let guard = mutex.lock_owned().await;
        SessionLock {
            session_id,
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Inserts a session and its initial messages in one transaction.
    pub async fn create_session(
        &self,
        session: &NewSession,
        messages: &[NewMessage],
    ) -> Result<CreatedSession, SessionStoreError> {
        let system_prompt = self
            .codec
            .seal_optional(session.system_prompt.as_deref())?;
        let sealed = self.seal_messages(messages)?;
        let now = now_rfc3339()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(SessionStoreError::database("beginning session insert"))?;

        let session_id = sqlx::query(
            r"
INSERT INTO session (model, title, project_root, system_prompt, preset_id, owner, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
",
        )
        .bind(&session.model)
        .bind(session.title.as_deref())
        .bind(session.project_root.as_deref())
        .bind(system_prompt.as_deref())
        .bind(session.preset_id.as_deref())
        .bind(session.owner.as_deref())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(SessionStoreError::database("inserting session"))?
        .last_insert_rowid();

        let message_ids = insert_messages(&mut tx, session_id, messages, &sealed, &now).await?;

        tx.commit()
            .await
            .map_err(SessionStoreError::database("committing session insert"))?;

        tracing::info!(
            session_id,
            messages = message_ids.len(),
            "session created"
        );
        Ok(CreatedSession {
            session_id,
            message_ids,
        })
    }

    /// Appends messages after the existing ones and returns their ids.
    pub async fn append_messages(
        &self,
        session_id: i64,
        owner: Option<&str>,
        messages: &[NewMessage],
    ) -> Result<Vec<i64>, SessionStoreError> {
        let sealed = self.seal_messages(messages)?;
        let now = now_rfc3339()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(SessionStoreError::database("beginning message append"))?;
        ensure_visible(&mut tx, session_id, owner).await?;

        let ids = insert_messages(&mut tx, session_id, messages, &sealed, &now).await?;
        touch_session(&mut tx, session_id, &now).await?;

        tx.commit()
            .await
            .map_err(SessionStoreError::database("committing message append"))?;

        tracing::debug!(session_id, appended = ids.len(), "messages appended");
        Ok(ids)
    }

    /// Reads a session and its live messages, decrypting every sealed field.
    pub async fn fetch_session(
        &self,
        session_id: i64,
        owner: Option<&str>,
    ) -> Result<SessionWithMessages, SessionStoreError> {
        let mut conn = self.acquire().await?;
        let session = self.load_session(&mut conn, session_id, owner).await?;

        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message \
             WHERE session_id = ? AND deleted_at IS NULL ORDER BY id"
        ))
        .bind(session_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(SessionStoreError::database("loading messages"))?;

        let messages = rows
            .iter()
            .map(|row| self.decode_message(row))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SessionWithMessages { session, messages })
    }

    /// Every message row, soft-deleted ones included, in insertion order.
    pub async fn audit_messages(
        &self,
        session_id: i64,
        owner: Option<&str>,
    ) -> Result<Vec<MessageRecord>, SessionStoreError> {
        let mut conn = self.acquire().await?;
        ensure_visible(&mut conn, session_id, owner).await?;

        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message WHERE session_id = ? ORDER BY id"
        ))
        .bind(session_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(SessionStoreError::database("loading message audit trail"))?;

        rows.iter().map(|row| self.decode_message(row)).collect()
    }

    /// Soft-deletes every live message after turn `turn` (1-based; `0`
    /// clears the whole conversation). Returns the number of rows marked.
    ///
    /// A turn beyond the stored count marks nothing.
    pub async fn soft_delete_after_turn(
        &self,
        session_id: i64,
        owner: Option<&str>,
        turn: usize,
    ) -> Result<u64, SessionStoreError> {
        let now = now_rfc3339()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(SessionStoreError::database("beginning rewind"))?;
        ensure_visible(&mut tx, session_id, owner).await?;

        // The first user message of turn `turn + 1` is the cut point.
        let cut: Option<i64> = sqlx::query_scalar(
            r"
SELECT id FROM message
WHERE session_id = ? AND deleted_at IS NULL AND role = 'user'
ORDER BY id
LIMIT 1 OFFSET ?
",
        )
        .bind(session_id)
        .bind(i64::try_from(turn).unwrap_or(i64::MAX))
        .fetch_optional(&mut *tx)
        .await
        .map_err(SessionStoreError::database("locating rewind point"))?;

        let Some(cut) = cut else {
            tx.commit()
                .await
                .map_err(SessionStoreError::database("committing rewind"))?;
            return Ok(0);
        };

        let marked = sqlx::query(
            r"
UPDATE message
SET deleted_at = ?
WHERE session_id = ? AND deleted_at IS NULL AND id >= ?
",
        )
        .bind(&now)
        .bind(session_id)
        .bind(cut)
        .execute(&mut *tx)
        .await
        .map_err(SessionStoreError::database("soft-deleting messages"))?
        .rows_affected();
        touch_session(&mut tx, session_id, &now).await?;

        tx.commit()
            .await
            .map_err(SessionStoreError::database("committing rewind"))?;

        tracing::info!(session_id, turn, marked, "session rewound");
        Ok(marked)
    }

    /// Soft-deletes specific live messages of one session.
    pub async fn soft_delete_messages(
        &self,
        session_id: i64,
        owner: Option<&str>,
        message_ids: &[i64],
    ) -> Result<u64, SessionStoreError> {
        let now = now_rfc3339()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(SessionStoreError::database("beginning message delete"))?;
        ensure_visible(&mut tx, session_id, owner).await?;

        let mut marked = 0;
        for message_id in message_ids {
            marked += sqlx::query(
                r"
UPDATE message
SET deleted_at = ?
WHERE session_id = ? AND id = ? AND deleted_at IS NULL
",
            )
            .bind(&now)
            .bind(session_id)
            .bind(*message_id)
            .execute(&mut *tx)
            .await
            .map_err(SessionStoreError::database("soft-deleting message"))?
            .rows_affected();
        }
        touch_session(&mut tx, session_id, &now).await?;

        tx.commit()
            .await
            .map_err(SessionStoreError::database("committing message delete"))?;
        Ok(marked)
    }

    pub async fn update_model(
        &self,
        session_id: i64,
        owner: Option<&str>,
        model: &str,
    ) -> Result<(), SessionStoreError> {
        self.update_session_column(session_id, owner, "model", Some(model))
            .await
    }

    pub async fn update_preset(
        &self,
        session_id: i64,
        owner: Option<&str>,
        preset_id: Option<&str>,
    ) -> Result<(), SessionStoreError> {
        self.update_session_column(session_id, owner, "preset_id", preset_id)
            .await
    }

    pub async fn update_title(
        &self,
        session_id: i64,
        owner: Option<&str>,
        title: Option<&str>,
    ) -> Result<(), SessionStoreError> {
        self.update_session_column(session_id, owner, "title", title)
            .await
    }

    /// Removes a session and, by cascade, all of its messages.
    pub async fn delete_session(
        &self,
        session_id: i64,
        owner: Option<&str>,
    ) -> Result<(), SessionStoreError> {
        let deleted = sqlx::query(&format!(
            "DELETE FROM session WHERE id = ? AND {OWNER_VISIBLE}"
        ))
        .bind(session_id)
        .bind(owner)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(SessionStoreError::database("deleting session"))?
        .rows_affected();

        if deleted == 0 {
            return Err(SessionStoreError::NotFound { session_id });
        }
        tracing::info!(session_id, "session deleted");
        Ok(())
    }

    /// Sessions visible to `owner`, most recently updated first.
    pub async fn list_sessions(
        &self,
        owner: Option<&str>,
    ) -> Result<Vec<SessionSummary>, SessionStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT id, title, model, created_at, updated_at FROM session \
             WHERE {OWNER_VISIBLE} ORDER BY updated_at DESC, id DESC"
        ))
        .bind(owner)
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(SessionStoreError::database("listing sessions"))?;

        rows.iter()
            .map(|row| {
                Ok(SessionSummary {
                    id: column(row, "id")?,
                    title: column(row, "title")?,
                    model: column(row, "model")?,
                    created_at: parse_timestamp("created_at", &column::<String>(row, "created_at")?)?,
                    updated_at: parse_timestamp("updated_at", &column::<String>(row, "updated_at")?)?,
                })
            })
            .collect()
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<Sqlite>, SessionStoreError> {
        self.pool
            .acquire()
            .await
            .map_err(SessionStoreError::database("acquiring connection"))
    }

    async fn update_session_column(
        &self,
        session_id: i64,
        owner: Option<&str>,
        column_name: &'static str,
        value: Option<&str>,
    ) -> Result<(), SessionStoreError> {
        let now = now_rfc3339()?;
        let updated = sqlx::query(&format!(
            "UPDATE session SET {column_name} = ?, updated_at = ? WHERE id = ? AND {OWNER_VISIBLE}"
        ))
        .bind(value)
        .bind(&now)
        .bind(session_id)
        .bind(owner)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(SessionStoreError::database("updating session"))?
        .rows_affected();

        if updated == 0 {
            return Err(SessionStoreError::NotFound { session_id });
        }
        tracing::debug!(session_id, column = column_name, "session updated");
        Ok(())
    }

    async fn load_session(
        &self,
        conn: &mut SqliteConnection,
        session_id: i64,
        owner: Option<&str>,
    ) -> Result<SessionRecord, SessionStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM session WHERE id = ? AND {OWNER_VISIBLE}"
        ))
        .bind(session_id)
        .bind(owner)
        .bind(owner)
        .fetch_optional(&mut *conn)
        .await
        .map_err(SessionStoreError::database("loading session"))?
        .ok_or(SessionStoreError::NotFound { session_id })?;

        let system_prompt: Option<String> = column(&row, "system_prompt")?;
        Ok(SessionRecord {
            id: column(&row, "id")?,
            model: column(&row, "model")?,
            title: column(&row, "title")?,
            project_root: column(&row, "project_root")?,
            system_prompt: self.codec.open_optional(system_prompt.as_deref())?,
            preset_id: column(&row, "preset_id")?,
            owner: column(&row, "owner")?,
            created_at: parse_timestamp("created_at", &column::<String>(&row, "created_at")?)?,
            updated_at: parse_timestamp("updated_at", &column::<String>(&row, "updated_at")?)?,
        })
    }

    fn seal_messages(&self, messages: &[NewMessage]) -> Result<Vec<SealedMessage>, SessionStoreError> {
        messages
            .iter()
            .map(|message| {
                let tool_calls = if message.tool_calls.is_empty() {
                    None
                } else {
                    let json = serde_json::to_string(&message.tool_calls)
                        .map_err(SessionStoreError::ToolCallsSerialize)?;
                    Some(self.codec.seal(&json)?)
                };
                Ok(SealedMessage {
                    role: message.role.as_str(),
                    content: self.codec.seal(&message.content)?,
                    thinking: self.codec.seal_optional(message.thinking.as_deref())?,
                    tool_calls,
                })
            })
            .collect()
    }

    fn decode_message(&self, row: &SqliteRow) -> Result<MessageRecord, SessionStoreError> {
        let id: i64 = column(row, "id")?;
        let role: String = column(row, "role")?;
        let role = Role::parse(&role).ok_or(SessionStoreError::InvalidRole {
            message_id: id,
            role,
        })?;

        let content: String = column(row, "content")?;
        let thinking: Option<String> = column(row, "thinking")?;
        let tool_calls: Option<String> = column(row, "tool_calls")?;
        let tool_calls = match self.codec.open_optional(tool_calls.as_deref())? {
            Some(json) => serde_json::from_str(&json).map_err(|source| {
                SessionStoreError::ToolCallsParse {
                    message_id: id,
                    source,
                }
            })?,
            None => Vec::new(),
        };
        let deleted_at: Option<String> = column(row, "deleted_at")?;

        Ok(MessageRecord {
            id,
            role,
            content: self.codec.open(&content)?,
            thinking: self.codec.open_optional(thinking.as_deref())?,
            model: column(row, "model")?,
            preset_id: column(row, "preset_id")?,
            tool_calls,
            tool_name: column(row, "tool_name")?,
            created_at: parse_timestamp("created_at", &column::<String>(row, "created_at")?)?,
            deleted_at: deleted_at
                .map(|value| parse_timestamp("deleted_at", &value))
                .transpose()?,
        })
    }
}

async fn insert_messages(
    conn: &mut SqliteConnection,
    session_id: i64,
    messages: &[NewMessage],
    sealed: &[SealedMessage],
    now: &str,
) -> Result<Vec<i64>, SessionStoreError> {
    let mut ids = Vec::with_capacity(messages.len());
    for (message, sealed) in messages.iter().zip(sealed) {
        let id = sqlx::query(
            r"
INSERT INTO message (session_id, role, content, thinking, model, preset_id, tool_calls, tool_name, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
",
        )
        .bind(session_id)
        .bind(sealed.role)
        .bind(&sealed.content)
        .bind(sealed.thinking.as_deref())
        .bind(message.model.as_deref())
        .bind(message.preset_id.as_deref())
        .bind(sealed.tool_calls.as_deref())
        .bind(message.tool_name.as_deref())
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(SessionStoreError::database("inserting message"))?
        .last_insert_rowid();
        ids.push(id);
    }
    Ok(ids)
}

async fn ensure_visible(
    conn: &mut SqliteConnection,
    session_id: i64,
    owner: Option<&str>,
) -> Result<(), SessionStoreError> {
    let found: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT id FROM session WHERE id = ? AND {OWNER_VISIBLE}"
    ))
    .bind(session_id)
    .bind(owner)
    .bind(owner)
    .fetch_optional(&mut *conn)
    .await
    .map_err(SessionStoreError::database("checking session visibility"))?;

    match found {
        Some(_) => Ok(()),
        None => Err(SessionStoreError::NotFound { session_id }),
    }
}

async fn touch_session(
    conn: &mut SqliteConnection,
    session_id: i64,
    now: &str,
) -> Result<(), SessionStoreError> {
    sqlx::query("UPDATE session SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(session_id)
        .execute(&mut *conn)
        .await
        .map_err(SessionStoreError::database("touching session"))?;
    Ok(())
}

fn column<'r, T>(row: &'r SqliteRow, name: &'static str) -> Result<T, SessionStoreError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(SessionStoreError::database("decoding row"))
}

fn now_rfc3339() -> Result<String, SessionStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(SessionStoreError::ClockFormat)
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<OffsetDateTime, SessionStoreError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|_| SessionStoreError::InvalidTimestamp {
        field,
        value: value.to_string(),
    })
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SessionStore {
        let key = [3_u8; field_codec::KEY_LEN];
        SessionStore::open_in_memory(FieldCodec::from_key(&key))
            .await
            .expect("in-memory store should open")
    }

    fn tracked(store: &SessionStore) -> usize {
        lock_unpoisoned(&store.locks).len()
    }

    #[tokio::test]
    async fn lock_table_entry_is_dropped_with_last_holder() {
        let store = store().await;
        for session_id in 0..50 {
            let lock = store.lock_session(session_id).await;
            assert_eq!(tracked(&store), 1);
            drop(lock);
        }
        assert_eq!(tracked(&store), 0);
    }

    #[tokio::test]
    async fn lock_table_entry_survives_while_someone_waits() {
        let store = store().await;
        let first = store.lock_session(9).await;

        let contender = store.clone();
        let waiter = tokio::spawn(async move {
            let lock = contender.lock_session(9).await;
            let id = lock.session_id();
            drop(lock);
            id
        });
        while Arc::strong_count(lock_unpoisoned(&store.locks).get(&9).expect("entry")) < 3 {
            tokio::task::yield_now().await;
        }

        drop(first);
        assert_eq!(tracked(&store), 1, "waiter still refers to the entry");
        assert_eq!(waiter.await.expect("waiter"), 9);
        assert_eq!(tracked(&store), 0);
    }
}
