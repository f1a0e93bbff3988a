//! SQLite-backed record store.
//!
//! `weather_records.content_item_id` is UNIQUE, so redelivered events can
//! never attach a second record to the same post. Every call runs on the
//! blocking pool so a busy database never stalls the async workers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params, types::Type};
use std::{fmt, path::Path, sync::Arc};
use uuid::Uuid;

use crate::{
    error::StoreError,
    model::{ContentItem, NewContentItem, WeatherReading, WeatherRecord},
};

use super::RecordStore;

/// id, content_item_id, summary, reading_json, created_at
type RecordRow = (String, String, String, String, String);

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS content_items (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT,
                author_id TEXT,
                city TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS weather_records (
                id TEXT PRIMARY KEY,
                content_item_id TEXT NOT NULL UNIQUE REFERENCES content_items(id),
                summary TEXT NOT NULL,
                reading_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_weather_records_created ON weather_records(created_at);
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<ContentItem> {
        let created_at: String = row.get(5)?;
        let created_at = parse_timestamp(&created_at)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
        Ok(ContentItem {
            id: row.get(0)?,
            title: row.get(1)?,
            body: row.get(2)?,
            author_id: row.get(3)?,
            city: row.get(4)?,
            created_at,
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<RecordRow> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    fn decode_record(
        (id, content_item_id, summary, reading_json, created_at): RecordRow,
    ) -> Result<WeatherRecord, StoreError> {
        let id = Uuid::parse_str(&id)
            .map_err(|e| StoreError::Backend(format!("invalid record id '{id}': {e}")))?;
        let reading: WeatherReading = serde_json::from_str(&reading_json)?;
        let created_at = parse_timestamp(&created_at).map_err(|e| {
            StoreError::Backend(format!("invalid created_at '{created_at}' on record {id}: {e}"))
        })?;

        Ok(WeatherRecord {
            id,
            content_item_id,
            summary,
            reading,
            created_at,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn create_content_item(&self, item: NewContentItem) -> Result<ContentItem, StoreError> {
        let item = ContentItem {
            id: Uuid::new_v4().to_string(),
            title: item.title,
            body: item.body,
            author_id: item.author_id,
            city: item.city,
            created_at: Utc::now(),
        };

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO content_items (id, title, body, author_id, city, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    item.id,
                    item.title,
                    item.body,
                    item.author_id,
                    item.city,
                    item.created_at.to_rfc3339()
                ],
            )?;
            Ok(item)
        })
        .await
    }

    async fn content_item(&self, id: &str) -> Result<Option<ContentItem>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let item = conn
                .query_row(
                    "SELECT id, title, body, author_id, city, created_at
                     FROM content_items WHERE id = ?1",
                    params![id],
                    Self::row_to_item,
                )
                .optional()?;
            Ok(item)
        })
        .await
    }

    async fn create_record(
        &self,
        content_item_id: &str,
        reading: WeatherReading,
    ) -> Result<WeatherRecord, StoreError> {
        let content_item_id = content_item_id.to_string();
        self.with_conn(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM content_items WHERE id = ?1)",
                params![content_item_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StoreError::NotFound(content_item_id));
            }

            let record = WeatherRecord::new(content_item_id.as_str(), reading);
            let reading_json = serde_json::to_string(&record.reading)?;

            conn.execute(
                "INSERT INTO weather_records (id, content_item_id, summary, reading_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id.to_string(),
                    record.content_item_id,
                    record.summary,
                    reading_json,
                    record.created_at.to_rfc3339()
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(content_item_id.clone())
                } else {
                    StoreError::from(e)
                }
            })?;

            Ok(record)
        })
        .await
    }

    async fn record_for(&self, content_item_id: &str) -> Result<Option<WeatherRecord>, StoreError> {
        let content_item_id = content_item_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, content_item_id, summary, reading_json, created_at
                     FROM weather_records WHERE content_item_id = ?1",
                    params![content_item_id],
                    Self::row_to_record,
                )
                .optional()?;

            row.map(Self::decode_record).transpose()
        })
        .await
    }

    async fn list_records(&self) -> Result<Vec<WeatherRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content_item_id, summary, reading_json, created_at
                 FROM weather_records ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([], Self::row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(Self::decode_record).collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sample_reading;

    async fn post(store: &SqliteStore) -> ContentItem {
        store
            .create_content_item(NewContentItem {
                title: "Hello".into(),
                author_id: Some("user-1".into()),
                city: Some("Murcia".into()),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn content_items_round_trip_through_sqlite() {
        let store = SqliteStore::in_memory().unwrap();
        let item = post(&store).await;

        let loaded = store.content_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Hello");
        assert_eq!(loaded.city.as_deref(), Some("Murcia"));
        assert!(store.content_item("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stores_summary_and_structured_reading() {
        let store = SqliteStore::in_memory().unwrap();
        let item = post(&store).await;

        let created = store.create_record(&item.id, sample_reading()).await.unwrap();
        let loaded = store.record_for(&item.id).await.unwrap().unwrap();

        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.summary, "Clear, 18.5°C");
        assert_eq!(loaded.reading, sample_reading());
    }

    #[tokio::test]
    async fn rejects_unknown_item_and_duplicates() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store.create_record("missing", sample_reading()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let item = post(&store).await;
        store.create_record(&item.id, sample_reading()).await.unwrap();
        let err = store.create_record(&item.id, sample_reading()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert_eq!(store.list_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("enrich.db");

        let item_id = {
            let store = SqliteStore::open(&path).unwrap();
            let item = post(&store).await;
            store.create_record(&item.id, sample_reading()).await.unwrap();
            item.id
        };

        let reopened = SqliteStore::open(&path).unwrap();
        let record = reopened.record_for(&item_id).await.unwrap();
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn corrupt_timestamps_are_reported_not_replaced() {
        let store = SqliteStore::in_memory().unwrap();
        let item = post(&store).await;
        store.create_record(&item.id, sample_reading()).await.unwrap();

        store
            .conn
            .lock()
            .execute_batch(
                "UPDATE weather_records SET created_at = 'yesterday';
                 UPDATE content_items SET created_at = 'not a date';",
            )
            .unwrap();

        let err = store.record_for(&item.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(ref msg) if msg.contains("yesterday")));
        assert!(matches!(store.list_records().await, Err(StoreError::Backend(_))));
        assert!(matches!(store.content_item(&item.id).await, Err(StoreError::Backend(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_writes_from_many_tasks_all_land() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let mut items = Vec::new();
        for _ in 0..8 {
            items.push(post(&store).await);
        }

        let writes: Vec<_> = items
            .into_iter()
            .map(|item| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.create_record(&item.id, sample_reading()).await })
            })
            .collect();

        for write in writes {
            write.await.unwrap().unwrap();
        }
        assert_eq!(store.list_records().await.unwrap().len(), 8);
    }
}
