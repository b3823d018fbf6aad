//! Structured cache decision events.
//!
//! When enabled, the cache service emits one JSON event per decision (hit,
//! miss, store, bypass, tag registration) and the client emits one per
//! invalidation. Events are
//! written through `tracing` under the `tagged_http_cache::events` target so
//! they can be routed separately from diagnostic logs.

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, SystemTime};

use crate::request_id::RequestId;

/// Configuration for structured cache events.
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    pub enabled: bool,

    /// Sample rate (1.0 = every event, 0.1 = roughly one in ten)
    pub sample_rate: f64,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: 1.0,
        }
    }
}

impl EventLogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the sample rate, clamped to `0.0..=1.0`.
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Checks if an event should be emitted under the sampling rate.
    pub fn should_sample(&self) -> bool {
        if !self.enabled {
            return false;
        }
        if self.sample_rate >= 1.0 {
            return true;
        }
        use std::collections::hash_map::RandomState;
        use std::hash::BuildHasher;

        let random = (RandomState::new().hash_one(SystemTime::now()) as f64) / (u64::MAX as f64);
        random < self.sample_rate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventType {
    Hit,
    StaleHit,
    Miss,
    Store,
    Bypass,
    Invalidate,
    TagInvalidate,
    TagRegister,
}

impl CacheEventType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::StaleHit => "stale_hit",
            Self::Miss => "miss",
            Self::Store => "store",
            Self::Bypass => "bypass",
            Self::Invalidate => "invalidate",
            Self::TagInvalidate => "tag_invalidate",
            Self::TagRegister => "tag_register",
        }
    }
}

/// A single cache decision.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub timestamp: SystemTime,
    pub event_type: CacheEventType,
    pub instance: Option<String>,
    pub request_id: Option<RequestId>,
    pub key: Option<String>,
    pub tag: Option<String>,
    pub method: Option<Method>,
    pub url: Option<String>,
    pub status: Option<StatusCode>,
    pub latency_us: Option<u64>,
    pub size_bytes: Option<usize>,
    pub ttl_seconds: Option<u64>,
}

impl CacheEvent {
    pub fn new(event_type: CacheEventType) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            instance: None,
            request_id: None,
            key: None,
            tag: None,
            method: None,
            url: None,
            status: None,
            latency_us: None,
            size_bytes: None,
            ttl_seconds: None,
        }
    }

    pub fn with_instance(mut self, name: impl Into<String>) -> Self {
        self.instance = Some(name.into());
        self
    }

    pub fn with_request_id(mut self, id: Option<RequestId>) -> Self {
        self.request_id = id;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_tag(mut self, tag: Option<String>) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_us = Some(latency.as_micros() as u64);
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size_bytes = Some(size);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_seconds = Some(ttl.as_secs());
        self
    }

    /// Renders the event as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let timestamp_ms = self
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        json!({
            "timestamp_ms": timestamp_ms,
            "event": self.event_type.as_str(),
            "instance": self.instance,
            "request_id": self.request_id.as_ref().map(RequestId::as_str),
            "key": self.key,
            "tag": self.tag,
            "method": self.method.as_ref().map(Method::as_str),
            "url": self.url,
            "status": self.status.map(|s| s.as_u16()),
            "latency_us": self.latency_us,
            "size_bytes": self.size_bytes,
            "ttl_seconds": self.ttl_seconds,
        })
    }

    /// Emits the event if `config` enables it and the sample admits it.
    pub fn log(&self, config: &EventLogConfig) {
        if !config.should_sample() {
            return;
        }

        let data = self.to_json();

        #[cfg(feature = "tracing")]
        {
            tracing::info!(target: "tagged_http_cache::events", event = %data);
        }

        #[cfg(not(feature = "tracing"))]
        {
            let _ = data;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_disabled() {
        let config = EventLogConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.sample_rate, 1.0);
        assert!(!config.should_sample());
    }

    #[test]
    fn sample_rate_is_clamped() {
        assert_eq!(EventLogConfig::new().with_sample_rate(1.5).sample_rate, 1.0);
        assert_eq!(EventLogConfig::new().with_sample_rate(-0.5).sample_rate, 0.0);
    }

    #[test]
    fn zero_rate_never_samples() {
        let config = EventLogConfig::new()
            .with_enabled(true)
            .with_sample_rate(0.0);
        assert!(!config.should_sample());
    }

    #[test]
    fn full_rate_always_samples() {
        let config = EventLogConfig::new().with_enabled(true);
        assert!(config.should_sample());
    }

    #[test]
    fn event_json_carries_fields() {
        let event = CacheEvent::new(CacheEventType::StaleHit)
            .with_instance("default")
            .with_request_id(Some(RequestId::from("corr-1")))
            .with_key("abc")
            .with_tag(Some("list".into()))
            .with_method(Method::GET)
            .with_url("/users")
            .with_status(StatusCode::OK)
            .with_latency(Duration::from_micros(150))
            .with_size(12)
            .with_ttl(Duration::from_secs(60));

        let json = event.to_json();
        assert_eq!(json["event"], "stale_hit");
        assert_eq!(json["instance"], "default");
        assert_eq!(json["request_id"], "corr-1");
        assert_eq!(json["key"], "abc");
        assert_eq!(json["tag"], "list");
        assert_eq!(json["method"], "GET");
        assert_eq!(json["status"], 200);
        assert_eq!(json["latency_us"], 150);
        assert_eq!(json["size_bytes"], 12);
        assert_eq!(json["ttl_seconds"], 60);
    }

    #[test]
    fn log_is_quiet_when_disabled() {
        CacheEvent::new(CacheEventType::Miss).log(&EventLogConfig::default());
    }
}
