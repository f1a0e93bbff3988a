use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::{
    config::{DEFAULT_BASE_URL, ProviderConfig},
    error::{ProviderError, ProviderErrorKind},
    model::WeatherReading,
};

use super::WeatherProvider;

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    lang: String,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn from_config(api_key: String, config: &ProviderConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build OpenWeather HTTP client")?;

        let base_url = if config.base_url.trim().is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            config.base_url.clone()
        };

        Ok(Self {
            api_key,
            base_url,
            lang: config.lang.clone(),
            http,
        })
    }

    async fn fetch_current(&self, city: &str) -> Result<WeatherReading, ProviderError> {
        tracing::debug!(city, "requesting current weather from OpenWeather");

        let res = self
            .http
            .get(&self.base_url)
            .query(&[
                ("q", city),
                ("units", "metric"),
                ("lang", self.lang.as_str()),
                ("appid", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = res.status();
        let body = res.text().await.map_err(|e| transport_error(&e))?;

        if !status.is_success() {
            return Err(status_error(status, city, &body));
        }

        let parsed: OwCurrentResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Unknown,
                format!("Failed to parse OpenWeather JSON: {e}"),
            )
        })?;

        let reading = parsed.into_reading()?;
        tracing::info!(
            city,
            condition = %reading.condition,
            temperature = reading.temperature_celsius,
            "OpenWeather reading received"
        );
        Ok(reading)
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    async fn fetch(&self, location: &str) -> Result<WeatherReading, ProviderError> {
        self.fetch_current(location).await
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: Option<f64>,
    humidity: Option<u8>,
    pressure: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    main: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwSys {
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: Option<String>,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: Option<OwWind>,
    sys: Option<OwSys>,
}

impl OwCurrentResponse {
    fn into_reading(self) -> Result<WeatherReading, ProviderError> {
        let weather = self.weather.into_iter().next().ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Unknown,
                "OpenWeather response contained no weather conditions",
            )
        })?;

        Ok(WeatherReading {
            condition: weather.main,
            temperature_celsius: round1(self.main.temp),
            description: weather.description,
            humidity_percent: self.main.humidity,
            wind_speed_mps: self.wind.and_then(|w| w.speed).map(round1),
            feels_like_celsius: self.main.feels_like.map(round1),
            pressure_hpa: self.main.pressure,
            city: self.name.filter(|n| !n.is_empty()),
            country_code: self.sys.and_then(|s| s.country),
        })
    }
}

fn round1(value: f64) -> f64 {
    let rounded = (value * 10.0).round() / 10.0;
    // -0.04 rounds to -0.0, which would print as "-0.0".
    if rounded == 0.0 { 0.0 } else { rounded }
}

fn transport_error(err: &reqwest::Error) -> ProviderError {
    let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderErrorKind::Network
    } else if let Some(status) = err.status() {
        classify_status(status)
    } else {
        ProviderErrorKind::Unknown
    };

    let message = if err.is_timeout() {
        "OpenWeather request timed out".to_string()
    } else {
        format!("Failed to reach OpenWeather: {err}")
    };

    ProviderError::new(kind, message)
}

fn classify_status(status: StatusCode) -> ProviderErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorKind::Unauthorized,
        StatusCode::NOT_FOUND => ProviderErrorKind::NotFound,
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimited,
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => ProviderErrorKind::Network,
        _ => ProviderErrorKind::Unknown,
    }
}

fn status_error(status: StatusCode, city: &str, body: &str) -> ProviderError {
    let kind = classify_status(status);
    let message = match kind {
        ProviderErrorKind::Unauthorized => "OpenWeather rejected the API key".to_string(),
        ProviderErrorKind::NotFound => format!("City not found: {city}"),
        _ => format!(
            "OpenWeather request failed with status {}: {}",
            status,
            truncate_body(body)
        ),
    };
    ProviderError::new(kind, message)
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
