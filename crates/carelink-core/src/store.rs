//! Durable key/value cache store.
//!
//! Holds the last known-good snapshot of every cached collection, the sync
//! queue envelope, the global `lastSync` marker and the offline-mode flag.
//! Each write replaces one row, so writes are atomic per key; there are no
//! cross-key transactions. Reads never fail: a storage or decoding problem is
//! logged and reported as a cache miss.
//!
//! Collection rows are written two ways. [`CacheStore::put_collection`] stores
//! a fresh server snapshot and stamps it as synced. [`CacheStore::update_collection`]
//! applies a local edit and keeps the row's sync time. Both take the same
//! lock, so a local edit never lands on top of a newer snapshot.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::Database;
use crate::error::Result;
use crate::models::{CacheEntry, Collection};

/// Key of the global last-sync marker (ISO-8601 text)
pub const LAST_SYNC_KEY: &str = "lastSync";
/// Key of the persisted offline-mode flag
pub const OFFLINE_MODE_KEY: &str = "offlineModeEnabled";

/// Thread-safe handle to the local cache database
#[derive(Clone)]
pub struct CacheStore {
    db: Arc<Mutex<Database>>,
    // Held across every collection write, including read-modify-write edits.
    collection_lock: Arc<Mutex<()>>,
}

impl CacheStore {
    /// Open (or create) the cache database at the given path
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path).await?;
        Ok(Self::from_database(db))
    }

    /// Open an in-memory cache (primarily for tests)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::from_database(db))
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            collection_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Read the raw stored text for a key
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        self.read_row(key).await.map(|(value, _)| value)
    }

    /// Store raw text under a key, replacing any previous value
    pub async fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        let updated_at = timestamp(Utc::now());
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT OR REPLACE INTO cache_entries (key, value, updated_at) VALUES (?, ?, ?)",
                [key, value, updated_at.as_str()],
            )
            .await?;
        Ok(())
    }

    /// Remove a key; removing a missing key is not an error
    pub async fn remove(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM cache_entries WHERE key = ?", [key])
            .await?;
        Ok(())
    }

    /// Read and decode a JSON value
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        decode(key, &raw)
    }

    /// Encode and store a JSON value
    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.put_raw(key, &raw).await
    }

    /// Read a cached collection snapshot together with its sync time
    pub async fn get_collection<T: DeserializeOwned>(
        &self,
        collection: Collection,
    ) -> Option<CacheEntry<T>> {
        let (raw, updated_at) = self.read_row(collection.key()).await?;
        let data = decode(collection.key(), &raw)?;
        let last_sync = parse_timestamp(&updated_at).unwrap_or_default();
        Some(CacheEntry { data, last_sync })
    }

    /// Overwrite a cached collection and advance the global `lastSync` marker
    pub async fn put_collection<T: Serialize + ?Sized>(
        &self,
        collection: Collection,
        data: &T,
    ) -> Result<DateTime<Utc>> {
        let raw = serde_json::to_string(data)?;
        let now = Utc::now();
        let stamp = timestamp(now);

        let _guard = self.collection_lock.lock().await;
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (key, value, updated_at) VALUES (?, ?, ?)",
            [collection.key(), raw.as_str(), stamp.as_str()],
        )
        .await?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (key, value, updated_at) VALUES (?, ?, ?)",
            [LAST_SYNC_KEY, stamp.as_str(), stamp.as_str()],
        )
        .await?;

        tracing::debug!("Cached {} at {}", collection, stamp);
        Ok(now)
    }

    /// Apply a local edit to a cached collection.
    ///
    /// A missing or unreadable entry starts from `T::default()`. The row keeps
    /// the sync time of the snapshot it was derived from; a collection that was
    /// never synced reports the Unix epoch.
    pub async fn update_collection<T, F, O>(&self, collection: Collection, edit: F) -> Result<O>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> O,
    {
        let _guard = self.collection_lock.lock().await;
        let mut data: T = self
            .get_collection(collection)
            .await
            .map(|entry| entry.data)
            .unwrap_or_default();
        let output = edit(&mut data);

        let raw = serde_json::to_string(&data)?;
        let never_synced = timestamp(DateTime::<Utc>::default());
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO cache_entries (key, value, updated_at) VALUES (?, ?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [collection.key(), raw.as_str(), never_synced.as_str()],
            )
            .await?;
        Ok(output)
    }

    /// Time of the most recent collection write, if any
    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        let raw = self.get_raw(LAST_SYNC_KEY).await?;
        parse_timestamp(&raw)
    }

    /// Whether the client last observed itself offline
    pub async fn offline_mode(&self) -> bool {
        self.get_raw(OFFLINE_MODE_KEY)
            .await
            .is_some_and(|value| value == "true")
    }

    pub async fn set_offline_mode(&self, enabled: bool) -> Result<()> {
        self.put_raw(OFFLINE_MODE_KEY, if enabled { "true" } else { "false" })
            .await
    }

    /// Drop every cached collection snapshot (queue and flags are kept)
    pub async fn clear_collections(&self) -> Result<()> {
        let _guard = self.collection_lock.lock().await;
        for collection in Collection::ALL {
            self.remove(collection.key()).await?;
        }
        self.remove(LAST_SYNC_KEY).await
    }

    /// Run raw SQL against the cache database
    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute_batch(sql).await?;
        Ok(())
    }

    async fn read_row(&self, key: &str) -> Option<(String, String)> {
        match self.try_read_row(key).await {
            Ok(row) => row,
            Err(error) => {
                tracing::warn!("Failed to read cache key {}: {}", key, error);
                None
            }
        }
    }

    async fn try_read_row(&self, key: &str) -> Result<Option<(String, String)>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT value, updated_at FROM cache_entries WHERE key = ?",
                [key],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            let updated_at: String = row.get(1)?;
            Ok(Some((value, updated_at)))
        } else {
            Ok(None)
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!("Discarding unreadable cache entry {}: {}", key, error);
            None
        }
    }
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|value| value.with_timezone(&Utc))
}
