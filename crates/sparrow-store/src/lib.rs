//! Embedded document store for Sparrow conversation state.
//!
//! Holds thread records keyed by (channel, thread timestamp), user records,
//! and short-TTL prompt-context records that correlate ephemeral UI prompts
//! back to their originating message.

mod sqlite;

pub use sqlite::SparrowStore;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `StoreError` values.
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Per-thread conversation state record.
pub struct ThreadRecord {
    pub id: i64,
    pub channel_id: String,
    pub thread_ts: String,
    /// Opaque provider-side conversation handle.
    pub conversation_handle: Option<String>,
    /// Opaque document-index handle; set once the first document lands.
    pub index_handle: Option<String>,
    /// Monotonic count of indexed attachments.
    pub file_count: i64,
    pub created_unix_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// External handles attached to a thread at creation time.
pub struct ThreadHandles {
    pub conversation_handle: Option<String>,
    pub index_handle: Option<String>,
}

impl ThreadHandles {
    pub fn is_empty(&self) -> bool {
        self.conversation_handle.is_none() && self.index_handle.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Outcome of an idempotent thread-create call.
///
/// A losing racer gets `Existing` along with the handles it allocated but
/// failed to persist, so they can be reported for out-of-band cleanup.
pub enum CreateThreadOutcome {
    Created(ThreadRecord),
    Existing {
        record: ThreadRecord,
        orphaned: ThreadHandles,
    },
}

impl CreateThreadOutcome {
    pub fn record(&self) -> &ThreadRecord {
        match self {
            CreateThreadOutcome::Created(record) => record,
            CreateThreadOutcome::Existing { record, .. } => record,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Partial-field thread update; `None` fields are left untouched.
pub struct ThreadUpdate {
    pub conversation_handle: Option<String>,
    pub index_handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `UserRecord` used across Sparrow components.
pub struct UserRecord {
    pub slack_user_id: String,
    pub name: String,
    pub email: String,
    pub metadata: Option<Value>,
}
