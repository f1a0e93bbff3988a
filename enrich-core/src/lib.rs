//! Core library for the weather enrichment service.
//!
//! This crate defines:
//! - Configuration (TOML file plus environment overrides)
//! - The OpenWeather client with timeout and retry
//! - A TTL cache of readings and the weather record store
//! - The event bus, its TCP broker bridge, and the content service
//! - The enrichment orchestrator that ties them together
//!
//! It is used by `enrich-cli`, but every component takes its collaborators
//! as constructor arguments, so other binaries can wire it differently.

pub mod broker;
pub mod bus;
pub mod cache;
pub mod config;
pub mod content;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod store;

pub use bus::{Envelope, EventBus, EventHandler, EventPublisher, LocalBus, topics};
pub use cache::ReadingCache;
pub use config::Config;
pub use content::ContentService;
pub use error::{BusError, ConfigError, ProviderError, ProviderErrorKind, StoreError};
pub use model::{
    ContentCreated, ContentItem, EnrichmentOutcome, EnrichmentRequest, NewContentItem,
    WeatherReading, WeatherRecord, WeatherRequested,
};
pub use orchestrator::Enricher;
pub use provider::{RetryPolicy, WeatherProvider, fetch_with_retry, provider_from_config};
pub use store::{MemoryStore, RecordStore, SqliteStore};
