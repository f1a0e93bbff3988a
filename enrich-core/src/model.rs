use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalized weather measurement as produced by a provider.
///
/// The serialized field names match the JSON stored alongside each record,
/// which downstream readers already consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    #[serde(rename = "main")]
    pub condition: String,
    #[serde(rename = "temp")]
    pub temperature_celsius: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "humidity", default, skip_serializing_if = "Option::is_none")]
    pub humidity_percent: Option<u8>,
    #[serde(rename = "windSpeed", default, skip_serializing_if = "Option::is_none")]
    pub wind_speed_mps: Option<f64>,
    #[serde(rename = "feelsLike", default, skip_serializing_if = "Option::is_none")]
    pub feels_like_celsius: Option<f64>,
    #[serde(rename = "pressure", default, skip_serializing_if = "Option::is_none")]
    pub pressure_hpa: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(rename = "country", default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
}

impl WeatherReading {
    /// Display form kept for legacy readers, e.g. `"Clear, 18.5°C"`.
    pub fn summary(&self) -> String {
        format!("{}, {:.1}°C", self.condition, self.temperature_celsius)
    }
}

/// Persisted result of one successful enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherRecord {
    pub id: Uuid,
    pub content_item_id: String,
    pub summary: String,
    pub reading: WeatherReading,
    pub created_at: DateTime<Utc>,
}

impl WeatherRecord {
    pub fn new(content_item_id: impl Into<String>, reading: WeatherReading) -> Self {
        Self {
            id: Uuid::new_v4(),
            content_item_id: content_item_id.into(),
            summary: reading.summary(),
            reading,
            created_at: Utc::now(),
        }
    }
}

/// Content item (a post) that triggers enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub body: Option<String>,
    pub author_id: Option<String>,
    pub city: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a content item.
#[derive(Debug, Clone, Default)]
pub struct NewContentItem {
    pub title: String,
    pub body: Option<String>,
    pub author_id: Option<String>,
    pub city: Option<String>,
}

/// Payload of `content.created`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentCreated {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl From<&ContentItem> for ContentCreated {
    fn from(item: &ContentItem) -> Self {
        Self {
            id: item.id.clone(),
            title: item.title.clone(),
            author_id: item.author_id.clone(),
            created_at: item.created_at,
            city: item.city.clone(),
        }
    }
}

/// Payload of `weather.enrichment.requested`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherRequested {
    pub content_item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// A single unit of enrichment work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentRequest {
    pub content_item_id: String,
    pub location: String,
}

impl EnrichmentRequest {
    /// Build a request, falling back to `default_location` when `location`
    /// is missing or blank.
    pub fn new(
        content_item_id: impl Into<String>,
        location: Option<&str>,
        default_location: &str,
    ) -> Self {
        let location = location
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(default_location);

        Self {
            content_item_id: content_item_id.into(),
            location: location.to_string(),
        }
    }
}

/// Terminal result of an enrichment, published on
/// `weather.enrichment.completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentOutcome {
    pub content_item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather_record_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading: Option<WeatherReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub from_cache: bool,
    pub timestamp: DateTime<Utc>,
}

impl EnrichmentOutcome {
    pub fn completed(record: &WeatherRecord, from_cache: bool) -> Self {
        Self {
            content_item_id: record.content_item_id.clone(),
            weather_record_id: Some(record.id),
            reading: Some(record.reading.clone()),
            error: None,
            from_cache,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        content_item_id: impl Into<String>,
        reading: Option<WeatherReading>,
        error: impl Into<String>,
        from_cache: bool,
    ) -> Self {
        Self {
            content_item_id: content_item_id.into(),
            weather_record_id: None,
            reading,
            error: Some(error.into()),
            from_cache,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.weather_record_id.is_some() && self.error.is_none()
    }
}

#[cfg(test)]
pub(crate) fn sample_reading() -> WeatherReading {
    WeatherReading {
        condition: "Clear".into(),
        temperature_celsius: 18.5,
        description: Some("cielo claro".into()),
        humidity_percent: Some(60),
        wind_speed_mps: Some(3.2),
        feels_like_celsius: Some(17.9),
        pressure_hpa: Some(1012),
        city: Some("Murcia".into()),
        country_code: Some("ES".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_uses_condition_and_one_decimal() {
        let reading = sample_reading();
        assert_eq!(reading.summary(), "Clear, 18.5°C");
        assert_eq!(reading.summary(), reading.clone().summary());

        let cold = WeatherReading {
            temperature_celsius: -2.0,
            ..sample_reading()
        };
        assert_eq!(cold.summary(), "Clear, -2.0°C");
    }

    #[test]
    fn reading_serializes_with_stored_field_names() {
        let json = serde_json::to_value(sample_reading()).unwrap();

        assert_eq!(json["main"], "Clear");
        assert_eq!(json["temp"], 18.5);
        assert_eq!(json["windSpeed"], 3.2);
        assert_eq!(json["feelsLike"], 17.9);
        assert_eq!(json["country"], "ES");
    }

    #[test]
    fn request_falls_back_to_default_location() {
        let req = EnrichmentRequest::new("post-1", None, "Murcia");
        assert_eq!(req.location, "Murcia");

        let blank = EnrichmentRequest::new("post-1", Some("   "), "Murcia");
        assert_eq!(blank.location, "Murcia");

        let explicit = EnrichmentRequest::new("post-1", Some(" Madrid "), "Murcia");
        assert_eq!(explicit.location, "Madrid");
    }

    #[test]
    fn record_summary_is_derived_from_reading() {
        let record = WeatherRecord::new("post-1", sample_reading());
        assert_eq!(record.summary, "Clear, 18.5°C");
        assert_eq!(record.content_item_id, "post-1");
    }

    #[test]
    fn outcome_sets_exactly_one_of_record_or_error() {
        let record = WeatherRecord::new("post-1", sample_reading());
        let ok = EnrichmentOutcome::completed(&record, true);
        assert!(ok.is_success());
        assert!(ok.error.is_none());
        assert!(ok.from_cache);

        let failed = EnrichmentOutcome::failed("post-1", None, "timeout", false);
        assert!(!failed.is_success());
        assert!(failed.weather_record_id.is_none());

        let json = serde_json::to_value(&failed).unwrap();
        assert!(json.get("weatherRecordId").is_none());
        assert_eq!(json["contentItemId"], "post-1");
    }

    #[test]
    fn content_created_accepts_missing_optional_fields() {
        let raw = serde_json::json!({
            "id": "p1",
            "title": "Hello",
            "createdAt": "2025-01-01T00:00:00Z"
        });
        let event: ContentCreated = serde_json::from_value(raw).unwrap();
        assert_eq!(event.id, "p1");
        assert!(event.author_id.is_none());
        assert!(event.city.is_none());
    }
}
