use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    error::StoreError,
    model::{ContentItem, NewContentItem, WeatherReading, WeatherRecord},
};

use super::RecordStore;

#[derive(Debug, Default)]
struct Tables {
    items: HashMap<String, ContentItem>,
    records: HashMap<String, WeatherRecord>,
}

/// In-process store for tests and embedders that do not need persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing content item, keeping its id.
    pub fn insert_content_item(&self, item: ContentItem) {
        self.tables.write().items.insert(item.id.clone(), item);
    }

    pub fn record_count(&self) -> usize {
        self.tables.read().records.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_content_item(&self, item: NewContentItem) -> Result<ContentItem, StoreError> {
        let item = ContentItem {
            id: Uuid::new_v4().to_string(),
            title: item.title,
            body: item.body,
            author_id: item.author_id,
            city: item.city,
            created_at: Utc::now(),
        };
        self.insert_content_item(item.clone());
        Ok(item)
    }

    async fn content_item(&self, id: &str) -> Result<Option<ContentItem>, StoreError> {
        Ok(self.tables.read().items.get(id).cloned())
    }

    async fn create_record(
        &self,
        content_item_id: &str,
        reading: WeatherReading,
    ) -> Result<WeatherRecord, StoreError> {
        let mut tables = self.tables.write();

        if !tables.items.contains_key(content_item_id) {
            return Err(StoreError::NotFound(content_item_id.to_string()));
        }
        if tables.records.contains_key(content_item_id) {
            return Err(StoreError::Conflict(content_item_id.to_string()));
        }

        let record = WeatherRecord::new(content_item_id, reading);
        tables
            .records
            .insert(content_item_id.to_string(), record.clone());
        Ok(record)
    }

    async fn record_for(&self, content_item_id: &str) -> Result<Option<WeatherRecord>, StoreError> {
        Ok(self.tables.read().records.get(content_item_id).cloned())
    }

    async fn list_records(&self) -> Result<Vec<WeatherRecord>, StoreError> {
        let mut records: Vec<_> = self.tables.read().records.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sample_reading;

    async fn store_with_post() -> (MemoryStore, ContentItem) {
        let store = MemoryStore::new();
        let item = store
            .create_content_item(NewContentItem {
                title: "Hello".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        (store, item)
    }

    #[tokio::test]
    async fn creates_record_with_summary_and_reading() {
        let (store, item) = store_with_post().await;

        let record = store.create_record(&item.id, sample_reading()).await.unwrap();

        assert_eq!(record.summary, "Clear, 18.5°C");
        assert_eq!(record.reading, sample_reading());
        assert_eq!(store.record_for(&item.id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn unknown_content_item_is_not_found() {
        let store = MemoryStore::new();
        let err = store.create_record("missing", sample_reading()).await.unwrap_err();

        assert!(matches!(err, StoreError::NotFound(id) if id == "missing"));
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn second_record_for_same_item_conflicts() {
        let (store, item) = store_with_post().await;
        store.create_record(&item.id, sample_reading()).await.unwrap();

        let err = store.create_record(&item.id, sample_reading()).await.unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.record_count(), 1);
    }
}
