use async_trait::async_trait;
use std::fmt::Debug;

use crate::{
    error::StoreError,
    model::{ContentItem, NewContentItem, WeatherReading, WeatherRecord},
};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Persistence for content items and their weather records.
///
/// Records are append-only: there is no update or delete, and each content
/// item owns at most one record.
#[async_trait]
pub trait RecordStore: Send + Sync + Debug {
    async fn create_content_item(&self, item: NewContentItem) -> Result<ContentItem, StoreError>;

    async fn content_item(&self, id: &str) -> Result<Option<ContentItem>, StoreError>;

    /// Persist `reading` for `content_item_id`.
    ///
    /// Fails with `NotFound` for an unknown content item and `Conflict` when
    /// the item already has a record.
    async fn create_record(
        &self,
        content_item_id: &str,
        reading: WeatherReading,
    ) -> Result<WeatherRecord, StoreError>;

    async fn record_for(&self, content_item_id: &str) -> Result<Option<WeatherRecord>, StoreError>;

    /// All records, newest first.
    async fn list_records(&self) -> Result<Vec<WeatherRecord>, StoreError>;
}
