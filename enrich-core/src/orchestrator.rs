//! Enrichment consumer: cache → provider → store → outcome event.
//!
//! Each request walks the stages below once and always ends by publishing a
//! single [`EnrichmentOutcome`]. Only the provider call is retried; a failed
//! enrichment needs a fresh request event.
//!
//! ```text
//! Received → CacheCheck ─┬─ CacheHit ─────────────┬→ Persisting ─┬→ Completed
//!                        └─ Fetching ─┬───────────┘              └→ Failed
//!                                     └→ Failed
//! ```

use async_trait::async_trait;
use std::{fmt, sync::Arc};
use tokio::task::JoinHandle;

use crate::{
    Config,
    bus::{Envelope, EventBus, EventHandler, EventPublisher, publish_event, topics},
    cache::ReadingCache,
    model::{ContentCreated, EnrichmentOutcome, EnrichmentRequest, WeatherRequested},
    provider::{RetryPolicy, WeatherProvider, fetch_with_retry},
    store::RecordStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    CacheCheck,
    CacheHit,
    Fetching,
    Persisting,
    Completed,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::CacheCheck => "cache_check",
            Stage::CacheHit => "cache_hit",
            Stage::Fetching => "fetching",
            Stage::Persisting => "persisting",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn enter(stage: Stage, request: &EnrichmentRequest) {
    tracing::debug!(
        content_item_id = %request.content_item_id,
        location = %request.location,
        %stage,
        "enrichment stage"
    );
}

/// Consumes enrichment requests and publishes their outcomes.
#[derive(Clone)]
pub struct Enricher {
    provider: Arc<dyn WeatherProvider>,
    cache: Arc<ReadingCache>,
    store: Arc<dyn RecordStore>,
    bus: Arc<dyn EventPublisher>,
    retry: RetryPolicy,
    default_city: String,
}

impl fmt::Debug for Enricher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enricher")
            .field("provider", &self.provider)
            .field("retry", &self.retry)
            .field("default_city", &self.default_city)
            .finish_non_exhaustive()
    }
}

impl Enricher {
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        cache: Arc<ReadingCache>,
        store: Arc<dyn RecordStore>,
        bus: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            provider,
            cache,
            store,
            bus,
            retry: RetryPolicy::default(),
            default_city: crate::config::DEFAULT_CITY.to_string(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_city(mut self, city: impl Into<String>) -> Self {
        self.default_city = city.into();
        self
    }

    pub fn configured(mut self, config: &Config) -> Self {
        self.retry = RetryPolicy::from_config(config);
        self.default_city = config.default_city.clone();
        self
    }

    pub fn default_city(&self) -> &str {
        &self.default_city
    }

    /// Run one request through the pipeline and publish its outcome.
    pub async fn enrich(&self, request: EnrichmentRequest) -> EnrichmentOutcome {
        let outcome = self.run(&request).await;

        if outcome.is_success() {
            tracing::info!(
                content_item_id = %outcome.content_item_id,
                location = %request.location,
                from_cache = outcome.from_cache,
                "weather enrichment completed"
            );
        } else {
            tracing::warn!(
                content_item_id = %outcome.content_item_id,
                location = %request.location,
                error = outcome.error.as_deref().unwrap_or_default(),
                "weather enrichment failed"
            );
        }

        publish_event(self.bus.as_ref(), topics::ENRICHMENT_COMPLETED, &outcome).await;
        outcome
    }

    async fn run(&self, request: &EnrichmentRequest) -> EnrichmentOutcome {
        enter(Stage::Received, request);
        enter(Stage::CacheCheck, request);

        // Decided before anything is written to the cache.
        let cached = self.cache.get(&request.location);
        let from_cache = cached.is_some();

        let reading = match cached {
            Some(reading) => {
                enter(Stage::CacheHit, request);
                reading
            }
            None => {
                enter(Stage::Fetching, request);
                match fetch_with_retry(self.provider.as_ref(), &request.location, self.retry).await {
                    Ok(reading) => {
                        self.cache.set(&request.location, reading.clone());
                        reading
                    }
                    Err(err) => {
                        enter(Stage::Failed, request);
                        return EnrichmentOutcome::failed(
                            &request.content_item_id,
                            None,
                            err.to_string(),
                            false,
                        );
                    }
                }
            }
        };

        enter(Stage::Persisting, request);
        match self
            .store
            .create_record(&request.content_item_id, reading.clone())
            .await
        {
            Ok(record) => {
                enter(Stage::Completed, request);
                EnrichmentOutcome::completed(&record, from_cache)
            }
            Err(err) => {
                enter(Stage::Failed, request);
                EnrichmentOutcome::failed(
                    &request.content_item_id,
                    Some(reading),
                    err.to_string(),
                    from_cache,
                )
            }
        }
    }

    /// Translate a bus envelope into a request. `None` for topics this
    /// consumer does not handle or undecodable payloads.
    pub fn request_from(&self, envelope: &Envelope) -> Option<EnrichmentRequest> {
        let decoded = match envelope.topic.as_str() {
            topics::CONTENT_CREATED => serde_json::from_value::<ContentCreated>(envelope.payload.clone())
                .map(|event| EnrichmentRequest::new(event.id, event.city.as_deref(), &self.default_city)),
            topics::ENRICHMENT_REQUESTED => {
                serde_json::from_value::<WeatherRequested>(envelope.payload.clone()).map(|event| {
                    EnrichmentRequest::new(event.content_item_id, event.city.as_deref(), &self.default_city)
                })
            }
            other => {
                tracing::debug!(topic = other, "ignoring event on unrelated topic");
                return None;
            }
        };

        match decoded {
            Ok(request) => Some(request),
            Err(err) => {
                tracing::error!(
                    topic = %envelope.topic,
                    envelope_id = %envelope.id,
                    error = %err,
                    "dropping undecodable enrichment event"
                );
                None
            }
        }
    }

    /// Subscribe to both inbound topics on `bus`.
    pub fn attach(self: &Arc<Self>, bus: &dyn EventBus) -> Vec<JoinHandle<()>> {
        [topics::CONTENT_CREATED, topics::ENRICHMENT_REQUESTED]
            .into_iter()
            .map(|topic| {
                tracing::info!(topic, "enrichment consumer subscribed");
                bus.subscribe(topic, Arc::clone(self) as Arc<dyn EventHandler>)
            })
            .collect()
    }
}

#[async_trait]
impl EventHandler for Enricher {
    async fn handle(&self, envelope: Envelope) {
        if let Some(request) = self.request_from(&envelope) {
            self.enrich(request).await;
        }
    }
}
