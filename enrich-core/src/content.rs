use std::sync::Arc;

use crate::{
    bus::{EventPublisher, publish_event, topics},
    error::StoreError,
    model::{ContentCreated, ContentItem, NewContentItem, WeatherRequested},
    store::RecordStore,
};

/// Creates posts and announces them to the enrichment pipeline.
#[derive(Debug, Clone)]
pub struct ContentService {
    store: Arc<dyn RecordStore>,
    bus: Arc<dyn EventPublisher>,
}

impl ContentService {
    pub fn new(store: Arc<dyn RecordStore>, bus: Arc<dyn EventPublisher>) -> Self {
        Self { store, bus }
    }

    /// Persist a new content item, then publish `content.created`.
    ///
    /// The two steps fail independently: once the item is written, a
    /// publish failure is only logged.
    pub async fn create(&self, item: NewContentItem) -> Result<ContentItem, StoreError> {
        tracing::debug!(title = %item.title, "creating content item");

        let created = self.store.create_content_item(item).await.inspect_err(|err| {
            tracing::error!(error = %err, "failed to create content item");
        })?;

        tracing::info!(content_item_id = %created.id, title = %created.title, "content item created");

        let event = ContentCreated::from(&created);
        if !publish_event(self.bus.as_ref(), topics::CONTENT_CREATED, &event).await {
            tracing::warn!(
                content_item_id = %created.id,
                "content item created but content.created was not delivered"
            );
        }

        Ok(created)
    }

    /// Ask for (re-)enrichment of an existing item.
    pub async fn request_enrichment(&self, content_item_id: &str, city: Option<String>) -> bool {
        let event = WeatherRequested {
            content_item_id: content_item_id.to_string(),
            city,
        };
        publish_event(self.bus.as_ref(), topics::ENRICHMENT_REQUESTED, &event).await
    }
}
