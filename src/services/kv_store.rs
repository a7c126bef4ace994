//! Named JSON slots persisted in SQLite.
//!
//! The local item store, local accounts and the persisted session all live
//! here as one serialized document per slot.

use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::sync::Arc;
use thiserror::Error;

/// Schema applied at startup and by `--migrate`.
pub const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum KvError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("slot `{slot}` holds malformed data: {source}")]
    Decode {
        slot: String,
        source: serde_json::Error,
    },
    #[error("could not encode slot `{slot}`: {source}")]
    Encode {
        slot: String,
        source: serde_json::Error,
    },
}

pub type KvResult<T> = Result<T, KvError>;

#[derive(Clone)]
pub struct KeyValueStore {
    pub db: Arc<SqlitePool>,
}

impl KeyValueStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Create the slot table if it does not exist yet.
    pub async fn migrate(&self) -> KvResult<()> {
        for stmt in INIT_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, slot: &str) -> KvResult<Option<T>> {
        let raw = sqlx::query_scalar::<_, String>("SELECT value FROM kv_slots WHERE slot = ?")
            .bind(slot)
            .fetch_optional(&*self.db)
            .await?;
        raw.map(|value| decode(slot, &value)).transpose()
    }

    pub async fn set<T: Serialize>(&self, slot: &str, value: &T) -> KvResult<()> {
        let mut tx = self.begin_write().await?;
        write_slot(&mut tx, slot, value).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn remove(&self, slot: &str) -> KvResult<()> {
        sqlx::query("DELETE FROM kv_slots WHERE slot = ?")
            .bind(slot)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Take the write lock up front; concurrent writers wait on the busy timeout.
    async fn begin_write(&self) -> KvResult<Transaction<'static, Sqlite>> {
        Ok(self.db.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Read-modify-write a slot inside one transaction. `edit` sees the
    /// current value (or `T::default()`) and the slot is only rewritten when
    /// it returns `Ok`.
    pub async fn update<T, R, E, F>(&self, slot: &str, edit: F) -> Result<R, E>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<R, E>,
        E: From<KvError>,
    {
        let mut tx = self.begin_write().await?;
        let raw = sqlx::query_scalar::<_, String>("SELECT value FROM kv_slots WHERE slot = ?")
            .bind(slot)
            .fetch_optional(&mut *tx)
            .await
            .map_err(KvError::from)?;
        let mut current = match raw {
            Some(value) => decode(slot, &value)?,
            None => T::default(),
        };

        let out = edit(&mut current)?;
        write_slot(&mut tx, slot, &current).await?;
        tx.commit().await.map_err(KvError::from)?;
        Ok(out)
    }
}

fn decode<T: DeserializeOwned>(slot: &str, value: &str) -> KvResult<T> {
    serde_json::from_str(value).map_err(|source| KvError::Decode {
        slot: slot.to_string(),
        source,
    })
}

async fn write_slot<T: Serialize>(
    tx: &mut Transaction<'_, Sqlite>,
    slot: &str,
    value: &T,
) -> KvResult<()> {
    let encoded = serde_json::to_string(value).map_err(|source| KvError::Encode {
        slot: slot.to_string(),
        source,
    })?;
    sqlx::query(
        "INSERT INTO kv_slots (slot, value, updated_at) VALUES (?, ?, ?)
         ON CONFLICT(slot) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(slot)
    .bind(encoded)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// In-memory database for tests. A single connection keeps the database alive.
#[cfg(test)]
pub(crate) async fn memory_store() -> KeyValueStore {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = KeyValueStore::new(Arc::new(pool));
    store.migrate().await.unwrap();
    store
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_slot_reads_as_none() {
        let kv = memory_store().await;
        let value: Option<Vec<String>> = kv.get("nothing").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn set_get_remove() {
        let kv = memory_store().await;
        kv.set("names", &vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let value: Option<Vec<String>> = kv.get("names").await.unwrap();
        assert_eq!(value, Some(vec!["a".to_string(), "b".to_string()]));

        kv.remove("names").await.unwrap();
        let value: Option<Vec<String>> = kv.get("names").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn failed_update_leaves_slot_untouched() {
        let kv = memory_store().await;
        kv.set("counter", &1u32).await.unwrap();

        let res: Result<(), KvTestError> = kv
            .update("counter", |n: &mut u32| {
                *n += 1;
                Err(KvTestError::Rejected)
            })
            .await;
        assert!(res.is_err());
        assert_eq!(kv.get::<u32>("counter").await.unwrap(), Some(1));

        let res: Result<u32, KvTestError> = kv
            .update("counter", |n: &mut u32| {
                *n += 1;
                Ok(*n)
            })
            .await;
        assert_eq!(res.unwrap(), 2);
        assert_eq!(kv.get::<u32>("counter").await.unwrap(), Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_on_a_file_pool_all_land() {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

        let dir = std::env::temp_dir()
            .join("luxury-catalog-tests")
            .join(format!("kv-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(dir.join("catalog.db"))
                    .create_if_missing(true),
            )
            .await
            .unwrap();
        let kv = KeyValueStore::new(Arc::new(pool));
        kv.migrate().await.unwrap();

        let writers: Vec<_> = (0..20u32)
            .map(|i| {
                let kv = kv.clone();
                tokio::spawn(async move {
                    kv.update("numbers", |numbers: &mut Vec<u32>| {
                        numbers.push(i);
                        Ok::<_, KvError>(())
                    })
                    .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let mut numbers = kv.get::<Vec<u32>>("numbers").await.unwrap().unwrap();
        numbers.sort_unstable();
        assert_eq!(numbers, (0..20).collect::<Vec<_>>());

        kv.db.close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn malformed_slot_is_a_decode_error() {
        let kv = memory_store().await;
        kv.set("items", &"not a list").await.unwrap();
        let res = kv.get::<Vec<u32>>("items").await;
        assert!(matches!(res, Err(KvError::Decode { .. })));
    }

    #[derive(Debug)]
    enum KvTestError {
        Rejected,
        #[allow(dead_code)]
        Kv(KvError),
    }

    impl From<KvError> for KvTestError {
        fn from(err: KvError) -> Self {
            KvTestError::Kv(err)
        }
    }
}
