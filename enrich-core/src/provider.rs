use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc, time::Duration};

use crate::{
    Config,
    error::{ProviderError, ProviderErrorKind},
    model::WeatherReading,
    provider::openweather::OpenWeatherProvider,
};

pub mod openweather;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn fetch(&self, location: &str) -> Result<WeatherReading, ProviderError>;
}

/// How many times to call a provider and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait after attempt `n` is `n * backoff_unit`.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.provider.max_attempts.max(1),
            backoff_unit: config.provider.backoff_unit(),
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(attempt)
    }
}

/// Call `provider` until it succeeds, fails terminally, or runs out of attempts.
pub async fn fetch_with_retry(
    provider: &dyn WeatherProvider,
    location: &str,
    policy: RetryPolicy,
) -> Result<WeatherReading, ProviderError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match provider.fetch(location).await {
            Ok(reading) => {
                if attempt > 1 {
                    tracing::info!(location, attempt, "weather fetch succeeded after retry");
                }
                return Ok(reading);
            }
            Err(err) if !err.is_retryable() => {
                tracing::error!(location, attempt, error = %err, "non-retryable weather fetch failure");
                return Err(err);
            }
            Err(err) if attempt >= max_attempts => {
                tracing::error!(
                    location,
                    attempts = max_attempts,
                    error = %err,
                    "all weather fetch attempts failed"
                );
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    location,
                    attempt,
                    max_attempts,
                    ?delay,
                    error = %err,
                    "weather fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Provider used for cache misses when no API key is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledProvider;

#[async_trait]
impl WeatherProvider for DisabledProvider {
    async fn fetch(&self, _location: &str) -> Result<WeatherReading, ProviderError> {
        Err(ProviderError::new(
            ProviderErrorKind::Unauthorized,
            "weather provider disabled: OPENWEATHER_API_KEY is not configured",
        ))
    }
}

/// Construct the provider described by `config`.
///
/// A missing API key does not abort startup: a warning is logged and the
/// returned provider fails every call as `Unauthorized`.
pub fn provider_from_config(config: &Config) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    match config.provider.api_key() {
        Some(key) => {
            let provider = OpenWeatherProvider::from_config(key.to_owned(), &config.provider)?;
            Ok(Arc::new(provider))
        }
        None => {
            tracing::warn!(
                "OPENWEATHER_API_KEY is not configured; weather lookups will fail until it is set.\n\
                 Hint: run `enrich configure` or export OPENWEATHER_API_KEY."
            );
            Ok(Arc::new(DisabledProvider))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider returning scripted results, then repeating the last one.
    #[derive(Debug)]
    pub struct ScriptedProvider {
        script: Mutex<VecDeque<Result<WeatherReading, ProviderError>>>,
        last: Mutex<Option<Result<WeatherReading, ProviderError>>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        pub fn new(script: Vec<Result<WeatherReading, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                calls: AtomicU32::new(0),
            }
        }

        pub fn always(result: Result<WeatherReading, ProviderError>) -> Self {
            Self::new(vec![result])
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WeatherProvider for ScriptedProvider {
        async fn fetch(&self, _location: &str) -> Result<WeatherReading, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            match next {
                Some(result) => {
                    *self.last.lock() = Some(result.clone());
                    result
                }
                None => self.last.lock().clone().unwrap_or_else(|| {
                    Err(ProviderError::new(ProviderErrorKind::Unknown, "empty script"))
                }),
            }
        }
    }
}
