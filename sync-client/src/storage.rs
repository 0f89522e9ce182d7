//! Transactional storage for sync state, on SQLite.
//!
//! Six named stores, one table each. Values are stored as JSON next to
//! their key columns:
//!
//! | store                | key                               | value             |
//! |----------------------|-----------------------------------|-------------------|
//! | `session`            | name                              | string            |
//! | `room_summaries`     | room                              | [`RoomSummary`]   |
//! | `room_state`         | (room, type, state key)           | [`RoomEvent`]     |
//! | `timeline_entries`   | (room, fragment key, event key)   | [`TimelineEntry`] |
//! | `timeline_fragments` | (room, fragment id)               | [`Fragment`]      |
//! | `pending_events`     | (room, queue index)               | [`PendingEvent`]  |
//!
//! Read-write transactions are serialized by an async mutex held for the
//! transaction's lifetime. [`Transaction::complete`] commits; dropping or
//! [`Transaction::abort`]ing rolls back.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqliteConnection};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_core::{Fragment, PendingEvent, RoomSummary, SortKey, TimelineEntry};
use sync_types::{RoomEvent, RoomId};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Key of a room state event: room, event type, state key.
pub type StateKey = (RoomId, String, String);

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database rejected an operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be encoded or decoded.
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `add` found an existing record.
    #[error("key already exists in {store}: {key}")]
    KeyExists {
        /// Store name.
        store: &'static str,
        /// Debug rendering of the key.
        key: String,
    },

    /// The commit was rejected.
    #[error("commit failed: {0}")]
    CommitFailed(String),
}

/// A value bound to a key or index column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// `TEXT` column.
    Text(String),
    /// `INTEGER` column.
    Integer(i64),
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

impl SqlValue {
    fn bind(self, query: SqliteQuery<'_>) -> SqliteQuery<'_> {
        match self {
            Self::Text(value) => query.bind(value),
            Self::Integer(value) => query.bind(value),
        }
    }
}

/// Layout of one named store.
pub trait StoreKind {
    /// Table name.
    const NAME: &'static str;
    /// Primary key columns, in key order.
    const KEY_COLUMNS: &'static [&'static str];
    /// Columns derived from the value, kept for queries.
    const INDEX_COLUMNS: &'static [&'static str] = &[];

    /// Key of a record.
    type Key: Debug + Send + Sync;
    /// Record stored under a key.
    type Value: Serialize + DeserializeOwned + Send + Sync;

    /// Values of the key columns.
    fn key_values(key: &Self::Key) -> Vec<SqlValue>;

    /// Values of the index columns.
    fn index_values(_value: &Self::Value) -> Vec<SqlValue> {
        Vec::new()
    }
}

/// Stores whose key starts with the room id.
pub trait RoomScoped: StoreKind {}

fn room_value(room_id: &RoomId) -> SqlValue {
    SqlValue::Text(room_id.as_str().to_string())
}

/// The `session` store.
#[derive(Debug)]
pub enum SessionStore {}

impl StoreKind for SessionStore {
    const NAME: &'static str = "session";
    const KEY_COLUMNS: &'static [&'static str] = &["name"];
    type Key = String;
    type Value = String;

    fn key_values(key: &String) -> Vec<SqlValue> {
        vec![SqlValue::Text(key.clone())]
    }
}

/// The `room_summaries` store.
#[derive(Debug)]
pub enum RoomSummaries {}

impl StoreKind for RoomSummaries {
    const NAME: &'static str = "room_summaries";
    const KEY_COLUMNS: &'static [&'static str] = &["room_id"];
    type Key = RoomId;
    type Value = RoomSummary;

    fn key_values(key: &RoomId) -> Vec<SqlValue> {
        vec![room_value(key)]
    }
}

impl RoomScoped for RoomSummaries {}

/// The `room_state` store.
#[derive(Debug)]
pub enum RoomStateStore {}

impl StoreKind for RoomStateStore {
    const NAME: &'static str = "room_state";
    const KEY_COLUMNS: &'static [&'static str] = &["room_id", "event_type", "state_key"];
    type Key = StateKey;
    type Value = RoomEvent;

    fn key_values((room_id, event_type, state_key): &StateKey) -> Vec<SqlValue> {
        vec![
            room_value(room_id),
            SqlValue::Text(event_type.clone()),
            SqlValue::Text(state_key.clone()),
        ]
    }
}

impl RoomScoped for RoomStateStore {}

/// The `timeline_entries` store.
#[derive(Debug)]
pub enum TimelineEntries {}

impl StoreKind for TimelineEntries {
    const NAME: &'static str = "timeline_entries";
    const KEY_COLUMNS: &'static [&'static str] = &["room_id", "fragment_key", "event_key"];
    const INDEX_COLUMNS: &'static [&'static str] = &["is_gap"];
    type Key = (RoomId, SortKey);
    type Value = TimelineEntry;

    fn key_values((room_id, key): &(RoomId, SortKey)) -> Vec<SqlValue> {
        vec![
            room_value(room_id),
            SqlValue::Integer(i64::from(key.fragment_key())),
            SqlValue::Integer(i64::from(key.event_key())),
        ]
    }

    fn index_values(entry: &TimelineEntry) -> Vec<SqlValue> {
        vec![SqlValue::Integer(i64::from(entry.as_gap().is_some()))]
    }
}

impl RoomScoped for TimelineEntries {}

/// The `timeline_fragments` store.
#[derive(Debug)]
pub enum TimelineFragments {}

impl StoreKind for TimelineFragments {
    const NAME: &'static str = "timeline_fragments";
    const KEY_COLUMNS: &'static [&'static str] = &["room_id", "fragment_id"];
    type Key = (RoomId, u32);
    type Value = Fragment;

    fn key_values((room_id, id): &(RoomId, u32)) -> Vec<SqlValue> {
        vec![room_value(room_id), SqlValue::Integer(i64::from(*id))]
    }
}

impl RoomScoped for TimelineFragments {}

/// The `pending_events` store.
#[derive(Debug)]
pub enum PendingEvents {}

impl StoreKind for PendingEvents {
    const NAME: &'static str = "pending_events";
    const KEY_COLUMNS: &'static [&'static str] = &["room_id", "queue_index"];
    type Key = (RoomId, u64);
    type Value = PendingEvent;

    fn key_values((room_id, index): &(RoomId, u64)) -> Vec<SqlValue> {
        // Queue indexes are allocated from zero upwards.
        vec![room_value(room_id), SqlValue::Integer(*index as i64)]
    }
}

impl RoomScoped for PendingEvents {}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS session (
        name TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS room_summaries (
        room_id TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS room_state (
        room_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        state_key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (room_id, event_type, state_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS timeline_entries (
        room_id TEXT NOT NULL,
        fragment_key INTEGER NOT NULL,
        event_key INTEGER NOT NULL,
        is_gap INTEGER NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (room_id, fragment_key, event_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS timeline_fragments (
        room_id TEXT NOT NULL,
        fragment_id INTEGER NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (room_id, fragment_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pending_events (
        room_id TEXT NOT NULL,
        queue_index INTEGER NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (room_id, queue_index)
    )
    "#,
];

/// Handle to the store. Clones share the same database.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
    path: Option<PathBuf>,
    writer: Arc<Mutex<()>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.path).finish()
    }
}

impl Storage {
    /// Open the database at `path`, creating it if it doesn't exist.
    ///
    /// Uses WAL mode so other processes can read while we write.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let storage = Self::with_pool(pool, Some(path.to_path_buf()));
        storage.run_migrations().await?;
        debug!(path = %path.display(), "opened store");
        Ok(storage)
    }

    /// Create a database that lives only as long as this handle's clones.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?;

        // The database is dropped with its last connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self::with_pool(pool, None);
        storage.run_migrations().await?;
        Ok(storage)
    }

    fn with_pool(pool: SqlitePool, path: Option<PathBuf>) -> Self {
        Self {
            pool,
            path,
            writer: Arc::new(Mutex::new(())),
            fail_next_commit: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Begin a read-write transaction. Waits for any open transaction to end.
    pub async fn read_write_txn(&self) -> Result<Transaction, StorageError> {
        let writer = Arc::clone(&self.writer).lock_owned().await;
        let inner = self.pool.begin().await?;
        Ok(Transaction {
            inner,
            fail_next_commit: Arc::clone(&self.fail_next_commit),
            _writer: writer,
        })
    }

    /// Make the next [`Transaction::complete`] fail.
    #[cfg(test)]
    pub(crate) fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

/// A read-write transaction over all stores.
///
/// Dropping a transaction without completing it rolls it back.
pub struct Transaction {
    // Declared before the writer guard: rolled back before the lock is released.
    inner: sqlx::Transaction<'static, Sqlite>,
    fail_next_commit: Arc<AtomicBool>,
    _writer: OwnedMutexGuard<()>,
}

impl Transaction {
    /// The `session` store.
    pub fn session(&mut self) -> Store<'_, SessionStore> {
        Store::new(&mut *self.inner)
    }

    /// The `room_summaries` store.
    pub fn room_summaries(&mut self) -> Store<'_, RoomSummaries> {
        Store::new(&mut *self.inner)
    }

    /// The `room_state` store.
    pub fn room_state(&mut self) -> Store<'_, RoomStateStore> {
        Store::new(&mut *self.inner)
    }

    /// The `timeline_entries` store.
    pub fn timeline_entries(&mut self) -> Store<'_, TimelineEntries> {
        Store::new(&mut *self.inner)
    }

    /// The `timeline_fragments` store.
    pub fn timeline_fragments(&mut self) -> Store<'_, TimelineFragments> {
        Store::new(&mut *self.inner)
    }

    /// The `pending_events` store.
    pub fn pending_events(&mut self) -> Store<'_, PendingEvents> {
        Store::new(&mut *self.inner)
    }

    /// Commit all changes.
    pub async fn complete(self) -> Result<(), StorageError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            self.inner.rollback().await?;
            return Err(StorageError::CommitFailed("injected failure".into()));
        }
        self.inner.commit().await?;
        Ok(())
    }

    /// Discard all changes.
    pub async fn abort(self) {
        if let Err(error) = self.inner.rollback().await {
            warn!(%error, "rollback failed");
        }
    }
}

/// One named store inside a transaction.
pub struct Store<'t, S> {
    conn: &'t mut SqliteConnection,
    kind: PhantomData<fn() -> S>,
}

fn key_filter(columns: &[&str]) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ?{}", column, i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn decode<V: DeserializeOwned>(row: &sqlx::sqlite::SqliteRow) -> Result<V, StorageError> {
    let value: String = row.try_get("value")?;
    Ok(serde_json::from_str(&value)?)
}

impl<'t, S: StoreKind> Store<'t, S> {
    fn new(conn: &'t mut SqliteConnection) -> Self {
        Self {
            conn,
            kind: PhantomData,
        }
    }

    fn bind_all<'q>(mut query: SqliteQuery<'q>, values: Vec<SqlValue>) -> SqliteQuery<'q> {
        for value in values {
            query = value.bind(query);
        }
        query
    }

    /// Read a record.
    pub async fn get(&mut self, key: &S::Key) -> Result<Option<S::Value>, StorageError> {
        let sql = format!(
            "SELECT value FROM {} WHERE {}",
            S::NAME,
            key_filter(S::KEY_COLUMNS)
        );
        let row = Self::bind_all(sqlx::query(&sql), S::key_values(key))
            .fetch_optional(&mut *self.conn)
            .await?;
        row.as_ref().map(decode::<S::Value>).transpose()
    }

    fn insert_sql(upsert: bool) -> String {
        let columns: Vec<&str> = S::KEY_COLUMNS
            .iter()
            .chain(S::INDEX_COLUMNS)
            .chain(&["value"])
            .copied()
            .collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            S::NAME,
            columns.join(", "),
            placeholders.join(", ")
        );
        if upsert {
            let updates: Vec<String> = S::INDEX_COLUMNS
                .iter()
                .chain(&["value"])
                .map(|c| format!("{c} = excluded.{c}"))
                .collect();
            sql.push_str(&format!(
                " ON CONFLICT({}) DO UPDATE SET {}",
                S::KEY_COLUMNS.join(", "),
                updates.join(", ")
            ));
        }
        sql
    }

    fn row_values(key: &S::Key, value: &S::Value) -> Result<Vec<SqlValue>, StorageError> {
        let mut values = S::key_values(key);
        values.extend(S::index_values(value));
        values.push(SqlValue::Text(serde_json::to_string(value)?));
        Ok(values)
    }

    /// Insert or replace a record.
    pub async fn set(&mut self, key: &S::Key, value: &S::Value) -> Result<(), StorageError> {
        let sql = Self::insert_sql(true);
        Self::bind_all(sqlx::query(&sql), Self::row_values(key, value)?)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    /// Insert a record that must not exist yet.
    pub async fn add(&mut self, key: &S::Key, value: &S::Value) -> Result<(), StorageError> {
        let sql = Self::insert_sql(false);
        let result = Self::bind_all(sqlx::query(&sql), Self::row_values(key, value)?)
            .execute(&mut *self.conn)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(StorageError::KeyExists {
                    store: S::NAME,
                    key: format!("{:?}", key),
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Delete a record, returning it.
    pub async fn remove(&mut self, key: &S::Key) -> Result<Option<S::Value>, StorageError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} RETURNING value",
            S::NAME,
            key_filter(S::KEY_COLUMNS)
        );
        let rows = Self::bind_all(sqlx::query(&sql), S::key_values(key))
            .fetch_all(&mut *self.conn)
            .await?;
        rows.first().map(decode::<S::Value>).transpose()
    }

    /// All records, in key order.
    pub async fn all(&mut self) -> Result<Vec<S::Value>, StorageError> {
        let sql = format!(
            "SELECT value FROM {} ORDER BY {}",
            S::NAME,
            S::KEY_COLUMNS.join(", ")
        );
        let rows = sqlx::query(&sql).fetch_all(&mut *self.conn).await?;
        rows.iter().map(decode::<S::Value>).collect()
    }
}

impl<S: RoomScoped> Store<'_, S> {
    /// Records of one room, in key order.
    pub async fn in_room(&mut self, room_id: &RoomId) -> Result<Vec<S::Value>, StorageError> {
        let sql = format!(
            "SELECT value FROM {} WHERE room_id = ?1 ORDER BY {}",
            S::NAME,
            S::KEY_COLUMNS.join(", ")
        );
        let rows = sqlx::query(&sql)
            .bind(room_id.as_str())
            .fetch_all(&mut *self.conn)
            .await?;
        rows.iter().map(decode::<S::Value>).collect()
    }
}

impl Store<'_, TimelineEntries> {
    /// Entries of one fragment, walking away from event key `from`
    /// (exclusive) up to and including the first event.
    ///
    /// Without `from` the walk starts at the fragment's end (`backward`) or
    /// start. Entries come nearest first.
    pub async fn toward_event(
        &mut self,
        room_id: &RoomId,
        fragment: u32,
        from: Option<u32>,
        backward: bool,
    ) -> Result<Vec<TimelineEntry>, StorageError> {
        let sql = if backward {
            r#"
            SELECT value FROM timeline_entries
            WHERE room_id = ?1 AND fragment_key = ?2 AND event_key < ?3
              AND event_key >= COALESCE(
                  (SELECT MAX(event_key) FROM timeline_entries
                   WHERE room_id = ?1 AND fragment_key = ?2 AND event_key < ?3 AND is_gap = 0),
                  0)
            ORDER BY event_key DESC
            "#
        } else {
            r#"
            SELECT value FROM timeline_entries
            WHERE room_id = ?1 AND fragment_key = ?2 AND event_key > ?3
              AND event_key <= COALESCE(
                  (SELECT MIN(event_key) FROM timeline_entries
                   WHERE room_id = ?1 AND fragment_key = ?2 AND event_key > ?3 AND is_gap = 0),
                  ?4)
            ORDER BY event_key ASC
            "#
        };
        let from = match (from, backward) {
            (Some(key), _) => i64::from(key),
            (None, true) => i64::from(u32::MAX) + 1,
            (None, false) => -1,
        };
        let mut query = sqlx::query(sql)
            .bind(room_id.as_str())
            .bind(i64::from(fragment))
            .bind(from);
        if !backward {
            query = query.bind(i64::from(u32::MAX));
        }
        let rows = query.fetch_all(&mut *self.conn).await?;
        rows.iter().map(decode::<TimelineEntry>).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::event;
    use sync_core::{Gap, Membership};

    fn room() -> RoomId {
        RoomId::new("!r:example.org")
    }

    fn token_key() -> String {
        "sync_token".to_string()
    }

    #[tokio::test]
    async fn completed_changes_are_visible() {
        let storage = Storage::in_memory().await.unwrap();

        let mut txn = storage.read_write_txn().await.unwrap();
        txn.session().set(&token_key(), &"s1".into()).await.unwrap();
        txn.complete().await.unwrap();

        let mut txn = storage.read_write_txn().await.unwrap();
        assert_eq!(
            txn.session().get(&token_key()).await.unwrap().as_deref(),
            Some("s1")
        );
        txn.abort().await;
    }

    #[tokio::test]
    async fn aborted_changes_are_discarded() {
        let storage = Storage::in_memory().await.unwrap();

        let mut txn = storage.read_write_txn().await.unwrap();
        txn.session().set(&token_key(), &"s1".into()).await.unwrap();
        txn.abort().await;

        let mut txn = storage.read_write_txn().await.unwrap();
        assert!(txn.session().get(&token_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let storage = Storage::in_memory().await.unwrap();

        {
            let mut txn = storage.read_write_txn().await.unwrap();
            txn.session().set(&token_key(), &"s1".into()).await.unwrap();
        }

        let mut txn = storage.read_write_txn().await.unwrap();
        assert!(txn.session().get(&token_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_commit_leaves_store_untouched() {
        let storage = Storage::in_memory().await.unwrap();
        storage.fail_next_commit();

        let mut txn = storage.read_write_txn().await.unwrap();
        txn.session().set(&token_key(), &"s1".into()).await.unwrap();
        assert!(matches!(
            txn.complete().await,
            Err(StorageError::CommitFailed(_))
        ));

        let mut txn = storage.read_write_txn().await.unwrap();
        assert!(txn.session().get(&token_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_replaces_and_remove_returns_record() {
        let storage = Storage::in_memory().await.unwrap();
        let mut txn = storage.read_write_txn().await.unwrap();
        let mut summary = RoomSummary::new(room(), Membership::Join);

        txn.room_summaries().set(&room(), &summary).await.unwrap();
        summary.name = Some("Lobby".into());
        txn.room_summaries().set(&room(), &summary).await.unwrap();

        let removed = txn.room_summaries().remove(&room()).await.unwrap();
        assert_eq!(removed.and_then(|s| s.name).as_deref(), Some("Lobby"));
        assert!(txn.room_summaries().remove(&room()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_rejects_existing_key() {
        let storage = Storage::in_memory().await.unwrap();
        let mut txn = storage.read_write_txn().await.unwrap();
        let summary = RoomSummary::new(room(), Membership::Join);

        txn.room_summaries().add(&room(), &summary).await.unwrap();
        let again = txn.room_summaries().add(&room(), &summary).await;
        assert!(matches!(
            again,
            Err(StorageError::KeyExists {
                store: "room_summaries",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn in_room_is_scoped_and_ordered() {
        let storage = Storage::in_memory().await.unwrap();
        let mut txn = storage.read_write_txn().await.unwrap();
        let other = RoomId::new("!other:example.org");

        for (room_id, id) in [(room(), 2), (other.clone(), 1), (room(), 1), (room(), 10)] {
            txn.timeline_fragments()
                .set(&(room_id.clone(), id), &Fragment::new(room_id, id))
                .await
                .unwrap();
        }

        let ids: Vec<u32> = txn
            .timeline_fragments()
            .in_room(&room())
            .await
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 10]);
        assert_eq!(txn.timeline_fragments().all().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn toward_event_stops_at_first_event() {
        let storage = Storage::in_memory().await.unwrap();
        let mut txn = storage.read_write_txn().await.unwrap();
        let gap = |key: u32, token: &str| {
            TimelineEntry::gap(
                room(),
                SortKey::new(1, key),
                Gap::Forward {
                    next_batch: token.into(),
                },
            )
        };
        let entries = [
            TimelineEntry::event(room(), SortKey::new(1, 10), event("$1")),
            TimelineEntry::event(room(), SortKey::new(1, 11), event("$2")),
            gap(12, "a"),
            gap(13, "b"),
            TimelineEntry::event(room(), SortKey::new(1, 14), event("$3")),
        ];
        for entry in &entries {
            txn.timeline_entries()
                .add(&(room(), entry.sort_key), entry)
                .await
                .unwrap();
        }

        let keys = |found: Vec<TimelineEntry>| -> Vec<u32> {
            found.iter().map(|e| e.sort_key.event_key()).collect()
        };
        let mut store = txn.timeline_entries();
        assert_eq!(
            keys(store.toward_event(&room(), 1, None, true).await.unwrap()),
            vec![14]
        );
        assert_eq!(
            keys(store.toward_event(&room(), 1, Some(14), true).await.unwrap()),
            vec![13, 12, 11]
        );
        assert_eq!(
            keys(store.toward_event(&room(), 1, Some(11), false).await.unwrap()),
            vec![12, 13, 14]
        );
        assert_eq!(
            keys(store.toward_event(&room(), 1, Some(14), false).await.unwrap()),
            Vec::<u32>::new()
        );
        assert_eq!(
            keys(store.toward_event(&room(), 1, None, false).await.unwrap()),
            vec![10]
        );
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        let storage = Storage::open(&path).await.unwrap();
        let mut txn = storage.read_write_txn().await.unwrap();
        txn.session().set(&token_key(), &"s9".into()).await.unwrap();
        txn.timeline_fragments()
            .set(&(room(), 1), &Fragment::new(room(), 1))
            .await
            .unwrap();
        txn.complete().await.unwrap();
        storage.pool.close().await;

        let reopened = Storage::open(&path).await.unwrap();
        let mut txn = reopened.read_write_txn().await.unwrap();
        assert_eq!(
            txn.session().get(&token_key()).await.unwrap().as_deref(),
            Some("s9")
        );
        assert!(txn
            .timeline_fragments()
            .get(&(room(), 1))
            .await
            .unwrap()
            .is_some());
    }
}
