//! SQLite-backed store implementation with durable persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::{
    CreateThreadOutcome, StoreResult, ThreadHandles, ThreadRecord, ThreadUpdate, UserRecord,
};

const DEFAULT_PROMPT_CONTEXT_TTL_MS: u64 = 15 * 60 * 1_000;

/// Persistent SQLite store for threads, users, and prompt contexts.
#[derive(Debug)]
pub struct SparrowStore {
    db_path: PathBuf,
    prompt_context_ttl_ms: u64,
}

impl SparrowStore {
    /// Opens a store at `path`, creating the schema if needed.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_prompt_ttl(path, DEFAULT_PROMPT_CONTEXT_TTL_MS)
    }

    pub fn open_with_prompt_ttl(
        path: impl AsRef<Path>,
        prompt_context_ttl_ms: u64,
    ) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            db_path,
            prompt_context_ttl_ms: prompt_context_ttl_ms.max(1),
        };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                thread_id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id TEXT NOT NULL,
                thread_ts TEXT NOT NULL,
                conversation_handle TEXT NULL,
                index_handle TEXT NULL,
                file_count INTEGER NOT NULL DEFAULT 0,
                created_unix_ms INTEGER NOT NULL,
                UNIQUE(channel_id, thread_ts)
            );

            CREATE TABLE IF NOT EXISTS users (
                slack_user_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                metadata_json TEXT NULL,
                updated_unix_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS prompt_contexts (
                ephemeral_ts TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                origin_ts TEXT NOT NULL,
                expires_unix_ms INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Idempotent thread creation: the UNIQUE(channel_id, thread_ts)
    /// constraint resolves duplicate webhook deliveries at the storage
    /// layer instead of check-then-act in the handler.
    pub fn create_thread(
        &self,
        channel_id: &str,
        thread_ts: &str,
        handles: ThreadHandles,
        now_unix_ms: u64,
    ) -> StoreResult<CreateThreadOutcome> {
        let connection = self.open_connection()?;
        let inserted = connection.execute(
            r#"
            INSERT INTO threads
                (channel_id, thread_ts, conversation_handle, index_handle, file_count, created_unix_ms)
            VALUES (?1, ?2, ?3, ?4, 0, ?5)
            ON CONFLICT(channel_id, thread_ts) DO NOTHING
            "#,
            params![
                channel_id,
                thread_ts,
                handles.conversation_handle,
                handles.index_handle,
                now_unix_ms,
            ],
        )?;

        let record = query_thread(&connection, channel_id, thread_ts)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        if inserted == 1 {
            Ok(CreateThreadOutcome::Created(record))
        } else {
            if !handles.is_empty() {
                tracing::warn!(
                    channel_id,
                    thread_ts,
                    ?handles,
                    "thread already existed; allocated handles are orphaned"
                );
            }
            Ok(CreateThreadOutcome::Existing {
                record,
                orphaned: handles,
            })
        }
    }

    pub fn find_thread(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> StoreResult<Option<ThreadRecord>> {
        let connection = self.open_connection()?;
        query_thread(&connection, channel_id, thread_ts)
    }

    pub fn find_thread_by_id(&self, thread_id: i64) -> StoreResult<Option<ThreadRecord>> {
        let connection = self.open_connection()?;
        connection
            .query_row(
                "SELECT thread_id, channel_id, thread_ts, conversation_handle, index_handle, \
                 file_count, created_unix_ms FROM threads WHERE thread_id = ?1",
                params![thread_id],
                row_to_thread,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Merges the provided fields; absent fields keep their stored values.
    pub fn update_thread(&self, thread_id: i64, update: ThreadUpdate) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            UPDATE threads SET
                conversation_handle = COALESCE(?2, conversation_handle),
                index_handle = COALESCE(?3, index_handle)
            WHERE thread_id = ?1
            "#,
            params![thread_id, update.conversation_handle, update.index_handle],
        )?;
        Ok(())
    }

    /// Bumps the monotonic attachment counter, returning the new value.
    pub fn increment_thread_files(&self, thread_id: i64) -> StoreResult<i64> {
        let connection = self.open_connection()?;
        connection.execute(
            "UPDATE threads SET file_count = file_count + 1 WHERE thread_id = ?1",
            params![thread_id],
        )?;
        connection
            .query_row(
                "SELECT file_count FROM threads WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    pub fn upsert_user(&self, user: &UserRecord, now_unix_ms: u64) -> StoreResult<()> {
        let metadata_json = user
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO users (slack_user_id, name, email, metadata_json, updated_unix_ms)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(slack_user_id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                metadata_json = excluded.metadata_json,
                updated_unix_ms = excluded.updated_unix_ms
            "#,
            params![
                user.slack_user_id,
                user.name,
                user.email,
                metadata_json,
                now_unix_ms,
            ],
        )?;
        Ok(())
    }

    pub fn find_user(&self, slack_user_id: &str) -> StoreResult<Option<UserRecord>> {
        let connection = self.open_connection()?;
        connection
            .query_row(
                "SELECT slack_user_id, name, email, metadata_json FROM users \
                 WHERE slack_user_id = ?1",
                params![slack_user_id],
                |row| {
                    let metadata_json: Option<String> = row.get(3)?;
                    Ok((
                        UserRecord {
                            slack_user_id: row.get(0)?,
                            name: row.get(1)?,
                            email: row.get(2)?,
                            metadata: None,
                        },
                        metadata_json,
                    ))
                },
            )
            .optional()?
            .map(|(mut user, metadata_json)| {
                user.metadata = metadata_json
                    .as_deref()
                    .map(serde_json::from_str::<Value>)
                    .transpose()?;
                Ok(user)
            })
            .transpose()
    }

    /// Records the ephemeral-prompt-to-origin-message correlation with a TTL.
    pub fn put_prompt_context(
        &self,
        ephemeral_ts: &str,
        channel_id: &str,
        origin_ts: &str,
        now_unix_ms: u64,
    ) -> StoreResult<()> {
        let expires_unix_ms = now_unix_ms.saturating_add(self.prompt_context_ttl_ms);
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO prompt_contexts (ephemeral_ts, channel_id, origin_ts, expires_unix_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(ephemeral_ts) DO UPDATE SET
                channel_id = excluded.channel_id,
                origin_ts = excluded.origin_ts,
                expires_unix_ms = excluded.expires_unix_ms
            "#,
            params![ephemeral_ts, channel_id, origin_ts, expires_unix_ms as i64],
        )?;
        Ok(())
    }

    /// Consumes the correlation for `ephemeral_ts`, purging expired rows on
    /// the way through. Expired or unknown ids return `None`.
    pub fn take_prompt_context(
        &self,
        ephemeral_ts: &str,
        now_unix_ms: u64,
    ) -> StoreResult<Option<String>> {
        let connection = self.open_connection()?;
        connection.execute(
            "DELETE FROM prompt_contexts WHERE expires_unix_ms <= ?1",
            params![now_unix_ms as i64],
        )?;
        let origin: Option<String> = connection
            .query_row(
                "SELECT origin_ts FROM prompt_contexts WHERE ephemeral_ts = ?1",
                params![ephemeral_ts],
                |row| row.get(0),
            )
            .optional()?;
        if origin.is_some() {
            connection.execute(
                "DELETE FROM prompt_contexts WHERE ephemeral_ts = ?1",
                params![ephemeral_ts],
            )?;
        }
        Ok(origin)
    }
}

fn query_thread(
    connection: &Connection,
    channel_id: &str,
    thread_ts: &str,
) -> StoreResult<Option<ThreadRecord>> {
    connection
        .query_row(
            "SELECT thread_id, channel_id, thread_ts, conversation_handle, index_handle, \
             file_count, created_unix_ms FROM threads \
             WHERE channel_id = ?1 AND thread_ts = ?2",
            params![channel_id, thread_ts],
            row_to_thread,
        )
        .optional()
        .map_err(Into::into)
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRecord> {
    let created_unix_ms: i64 = row.get(6)?;
    Ok(ThreadRecord {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        thread_ts: row.get(2)?,
        conversation_handle: row.get(3)?,
        index_handle: row.get(4)?,
        file_count: row.get(5)?,
        created_unix_ms: created_unix_ms.max(0) as u64,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::SparrowStore;
    use crate::{CreateThreadOutcome, ThreadHandles, ThreadUpdate, UserRecord};

    fn test_store() -> (tempfile::TempDir, SparrowStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SparrowStore::open(dir.path().join("sparrow.db")).expect("store");
        (dir, store)
    }

    fn handles(conversation: &str) -> ThreadHandles {
        ThreadHandles {
            conversation_handle: Some(conversation.to_string()),
            index_handle: None,
        }
    }

    #[test]
    fn functional_create_then_find_returns_the_created_record() {
        let (_dir, store) = test_store();
        let outcome = store
            .create_thread("C1", "10.0", handles("conv-a"), 1_000)
            .expect("create");
        assert!(matches!(outcome, CreateThreadOutcome::Created(_)));

        let found = store
            .find_thread("C1", "10.0")
            .expect("find")
            .expect("record");
        assert_eq!(found.conversation_handle.as_deref(), Some("conv-a"));
        assert_eq!(found.file_count, 0);
        assert_eq!(store.find_thread_by_id(found.id).expect("by id"), Some(found));
    }

    #[test]
    fn regression_duplicate_create_reports_orphaned_handles() {
        let (_dir, store) = test_store();
        store
            .create_thread("C1", "10.0", handles("conv-a"), 1_000)
            .expect("first create");
        let second = store
            .create_thread("C1", "10.0", handles("conv-b"), 1_001)
            .expect("second create");

        match second {
            CreateThreadOutcome::Existing { record, orphaned } => {
                assert_eq!(record.conversation_handle.as_deref(), Some("conv-a"));
                assert_eq!(orphaned.conversation_handle.as_deref(), Some("conv-b"));
            }
            CreateThreadOutcome::Created(_) => panic!("second create must not win"),
        }

        let rows = store.find_thread("C1", "10.0").expect("find");
        assert!(rows.is_some());
    }

    #[test]
    fn functional_update_merges_only_provided_fields() {
        let (_dir, store) = test_store();
        let record = match store
            .create_thread("C1", "10.0", handles("conv-a"), 1_000)
            .expect("create")
        {
            CreateThreadOutcome::Created(record) => record,
            CreateThreadOutcome::Existing { .. } => panic!("fresh store"),
        };

        store
            .update_thread(
                record.id,
                ThreadUpdate {
                    conversation_handle: None,
                    index_handle: Some("vs_9".to_string()),
                },
            )
            .expect("update");

        let updated = store
            .find_thread_by_id(record.id)
            .expect("find")
            .expect("record");
        assert_eq!(updated.conversation_handle.as_deref(), Some("conv-a"));
        assert_eq!(updated.index_handle.as_deref(), Some("vs_9"));
    }

    #[test]
    fn unit_file_counter_is_monotonic() {
        let (_dir, store) = test_store();
        let record = store
            .create_thread("C1", "10.0", ThreadHandles::default(), 1_000)
            .expect("create")
            .record()
            .clone();

        assert_eq!(store.increment_thread_files(record.id).expect("inc"), 1);
        assert_eq!(store.increment_thread_files(record.id).expect("inc"), 2);
        assert_eq!(store.increment_thread_files(record.id).expect("inc"), 3);
    }

    #[test]
    fn functional_user_upsert_round_trips_metadata() {
        let (_dir, store) = test_store();
        let user = UserRecord {
            slack_user_id: "U1".to_string(),
            name: "Robin".to_string(),
            email: "robin@example.com".to_string(),
            metadata: Some(json!({ "company": "Example Co" })),
        };
        store.upsert_user(&user, 1_000).expect("upsert");

        let found = store.find_user("U1").expect("find").expect("user");
        assert_eq!(found, user);

        let renamed = UserRecord {
            name: "Robin H.".to_string(),
            ..user
        };
        store.upsert_user(&renamed, 2_000).expect("re-upsert");
        let found = store.find_user("U1").expect("find").expect("user");
        assert_eq!(found.name, "Robin H.");
    }

    #[test]
    fn functional_prompt_context_is_consumed_once() {
        let (_dir, store) = test_store();
        store
            .put_prompt_context("eph-1", "C1", "10.0", 1_000)
            .expect("put");

        assert_eq!(
            store.take_prompt_context("eph-1", 2_000).expect("take"),
            Some("10.0".to_string())
        );
        assert_eq!(store.take_prompt_context("eph-1", 2_000).expect("take"), None);
    }

    #[test]
    fn regression_prompt_context_expires_after_ttl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store =
            SparrowStore::open_with_prompt_ttl(dir.path().join("sparrow.db"), 500).expect("store");
        store
            .put_prompt_context("eph-1", "C1", "10.0", 1_000)
            .expect("put");

        assert_eq!(store.take_prompt_context("eph-1", 1_501).expect("take"), None);
    }
}
