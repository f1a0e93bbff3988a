use anyhow::{Context, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use enrich_core::{
    Config, ContentService, Enricher, EnrichmentOutcome, Envelope, EventBus, EventHandler,
    LocalBus, NewContentItem, ReadingCache, RecordStore, RetryPolicy, SqliteStore,
    broker::{BrokerClient, BrokerServer},
    fetch_with_retry, provider_from_config, topics,
};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::watch;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "enrich", version, about = "Weather enrichment for new posts")]
pub struct Cli {
    /// Override the SQLite database path.
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store the OpenWeather API key and default city.
    Configure,

    /// Run the enrichment consumer and the broker listener until Ctrl-C.
    Serve,

    /// Create a post and announce it to the broker.
    Post {
        title: String,

        #[arg(long)]
        body: Option<String>,

        #[arg(long)]
        author: Option<String>,

        /// City to look up; the configured default is used otherwise.
        #[arg(long)]
        city: Option<String>,
    },

    /// Ask the running service to enrich an existing post.
    Enrich {
        content_id: String,

        #[arg(long)]
        city: Option<String>,
    },

    /// Fetch and print the current weather for a city.
    Fetch { city: Option<String> },

    /// List stored weather records, newest first.
    Records,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let database = self.database;
        let load = move || -> anyhow::Result<Config> {
            let mut config = Config::load()?;
            if let Some(path) = database {
                config.database = Some(path);
            }
            Ok(config)
        };

        match self.command {
            Command::Configure => configure(),
            Command::Serve => serve(&load()?).await,
            Command::Post {
                title,
                body,
                author,
                city,
            } => {
                let item = NewContentItem {
                    title,
                    body,
                    author_id: author,
                    city,
                };
                post(&load()?, item).await
            }
            Command::Enrich { content_id, city } => enrich(&load()?, &content_id, city).await,
            Command::Fetch { city } => fetch(&load()?, city).await,
            Command::Records => records(&load()?).await,
        }
    }
}

fn configure() -> anyhow::Result<()> {
    let mut config = Config::load_file()?;

    let api_key = inquire::Password::new("OpenWeather API key:")
        .without_confirmation()
        .with_help_message("Leave empty to keep the current key")
        .prompt()
        .context("Failed to read API key")?;
    if !api_key.trim().is_empty() {
        config.provider.api_key = Some(api_key.trim().to_string());
    }

    let city = inquire::Text::new("Default city:")
        .with_default(&config.default_city)
        .prompt()
        .context("Failed to read default city")?;
    config.default_city = city.trim().to_string();

    config.save()?;
    println!(
        "Configuration saved to {}",
        Config::config_file_path()?.display()
    );
    Ok(())
}

fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let path = config.database_path()?;
    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Logs every outcome the consumer publishes.
struct OutcomeLog;

#[async_trait]
impl EventHandler for OutcomeLog {
    async fn handle(&self, envelope: Envelope) {
        match serde_json::from_value::<EnrichmentOutcome>(envelope.payload) {
            Ok(outcome) if outcome.is_success() => tracing::info!(
                content_item_id = %outcome.content_item_id,
                summary = %outcome.reading.as_ref().map(|r| r.summary()).unwrap_or_default(),
                from_cache = outcome.from_cache,
                "outcome: completed"
            ),
            Ok(outcome) => tracing::warn!(
                content_item_id = %outcome.content_item_id,
                error = outcome.error.as_deref().unwrap_or_default(),
                "outcome: failed"
            ),
            Err(err) => tracing::error!(error = %err, "unreadable outcome event"),
        }
    }
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let cache = Arc::new(ReadingCache::new(config.cache.ttl()));
    let provider = provider_from_config(config)?;
    let bus = LocalBus::default();

    let enricher = Arc::new(
        Enricher::new(provider, cache.clone(), store, Arc::new(bus.clone())).configured(config),
    );
    enricher.attach(&bus);
    bus.subscribe(topics::ENRICHMENT_COMPLETED, Arc::new(OutcomeLog));

    let server = BrokerServer::bind(&config.broker.address(), bus.clone())
        .await
        .with_context(|| format!("Failed to bind broker on {}", config.broker.address()))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let broker = server.spawn(shutdown_rx);

    if !cache.ttl().is_zero() {
        let cache = cache.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.ttl());
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "expired weather readings purged");
                }
            }
        });
    }

    tracing::info!(
        default_city = %enricher.default_city(),
        broker = %config.broker.address(),
        "enrichment service running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("shutting down; in-flight enrichments are abandoned");
    let _ = shutdown_tx.send(true);
    broker.await.context("Broker task panicked")?;
    Ok(())
}

async fn post(config: &Config, item: NewContentItem) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let broker = BrokerClient::new(config.broker.address());
    let service = ContentService::new(store, Arc::new(broker));

    let created = service.create(item).await?;
    println!("Created post {} ({})", created.id, created.title);
    Ok(())
}

async fn enrich(config: &Config, content_id: &str, city: Option<String>) -> anyhow::Result<()> {
    let store = open_store(config)?;
    if store.content_item(content_id).await?.is_none() {
        bail!("No post with id '{content_id}'");
    }

    let broker = BrokerClient::new(config.broker.address());
    let service = ContentService::new(store, Arc::new(broker));
    if !service.request_enrichment(content_id, city).await {
        bail!(
            "Could not reach the broker at {}.\nHint: start it with `enrich serve`.",
            config.broker.address()
        );
    }

    println!("Enrichment requested for post {content_id}");
    Ok(())
}

async fn fetch(config: &Config, city: Option<String>) -> anyhow::Result<()> {
    let city = city.unwrap_or_else(|| config.default_city.clone());
    let provider = provider_from_config(config)?;

    let policy = RetryPolicy::from_config(config);
    let reading = fetch_with_retry(provider.as_ref(), &city, policy).await?;

    println!("{}", reading.summary());
    if let Some(description) = &reading.description {
        println!("  {description}");
    }
    if let (Some(name), Some(country)) = (&reading.city, &reading.country_code) {
        println!("  location:   {name}, {country}");
    }
    if let Some(feels_like) = reading.feels_like_celsius {
        println!("  feels like: {feels_like:.1}°C");
    }
    if let Some(humidity) = reading.humidity_percent {
        println!("  humidity:   {humidity}%");
    }
    if let Some(wind) = reading.wind_speed_mps {
        println!("  wind:       {wind:.1} m/s");
    }
    if let Some(pressure) = reading.pressure_hpa {
        println!("  pressure:   {pressure} hPa");
    }
    Ok(())
}

async fn records(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let records = store.list_records().await?;

    if records.is_empty() {
        println!("No weather records yet.");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  post={}  {}  {}",
            record.id,
            record.content_item_id,
            record.summary,
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!("    {}", serde_json::to_string(&record.reading)?);
    }
    Ok(())
}
