//! Short-lived, location-keyed cache of provider readings.

use parking_lot::RwLock;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::model::WeatherReading;

pub const DEFAULT_TTL: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    reading: WeatherReading,
    expires_at: Instant,
}

/// Thread-safe TTL cache keyed by lowercased location.
///
/// Only successful readings are stored. A zero TTL turns the cache into a
/// no-op, which the pipeline must tolerate.
#[derive(Debug)]
pub struct ReadingCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl Default for ReadingCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ReadingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(location: &str) -> String {
        location.trim().to_lowercase()
    }

    pub fn get(&self, location: &str) -> Option<WeatherReading> {
        let key = Self::key(location);
        let now = Instant::now();

        {
            let entries = self.entries.read();
            match entries.get(&key) {
                Some(entry) if entry.expires_at > now => {
                    tracing::debug!(location = %key, "weather cache hit");
                    return Some(entry.reading.clone());
                }
                Some(_) => {}
                None => {
                    tracing::debug!(location = %key, "weather cache miss");
                    return None;
                }
            }
        }

        // Expired: evict unless a concurrent writer refreshed it meanwhile.
        let mut entries = self.entries.write();
        if entries.get(&key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(&key);
        }
        tracing::debug!(location = %key, "weather cache entry expired");
        None
    }

    pub fn set(&self, location: &str, reading: WeatherReading) {
        self.set_with_ttl(location, reading, self.ttl);
    }

    pub fn set_with_ttl(&self, location: &str, reading: WeatherReading, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        let key = Self::key(location);
        let entry = CacheEntry {
            reading,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key.clone(), entry);
        tracing::debug!(location = %key, ?ttl, "weather reading cached");
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sample_reading;
    use std::sync::Arc;

    #[test]
    fn lookup_is_case_insensitive() {
        let cache = ReadingCache::default();
        cache.set("murcia", sample_reading());

        assert_eq!(cache.get("Murcia"), Some(sample_reading()));
        assert_eq!(cache.get(" MURCIA "), Some(sample_reading()));
        assert!(cache.get("Madrid").is_none());
    }

    #[test]
    fn expired_entries_are_absent_and_evicted() {
        let cache = ReadingCache::default();
        cache.set_with_ttl("Murcia", sample_reading(), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));

        assert!(cache.get("murcia").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_removes_only_expired() {
        let cache = ReadingCache::default();
        cache.set_with_ttl("a", sample_reading(), Duration::from_millis(5));
        cache.set("b", sample_reading());
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("B").is_some());
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = ReadingCache::disabled();
        cache.set("Murcia", sample_reading());

        assert!(cache.get("Murcia").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_writers_on_same_key() {
        let cache = Arc::new(ReadingCache::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let mut reading = sample_reading();
                    reading.temperature_celsius = f64::from(i);
                    for _ in 0..100 {
                        cache.set("Murcia", reading.clone());
                        assert!(cache.get("murcia").is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 1);
    }
}
