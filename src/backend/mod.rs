//! Storage backends for cached responses.
//!
//! Every client instance talks to its store through the [`CacheBackend`]
//! trait. This module ships with [`memory::InMemoryBackend`], a process-local
//! cache backed by [`moka`]. Other stores (shared caches, test doubles) only
//! need to implement the three trait methods.
//!
//! Backends own expiry. The tag registry never inspects a backend's contents;
//! it only asks the backend to drop keys.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderName, HeaderValue, Response, StatusCode, Version};
use std::time::{Duration, SystemTime};

use crate::error::CacheError;

/// Cached response payload captured by the cache service.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub version: Version,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
}

impl CacheEntry {
    /// Creates a new cached response entry.
    pub fn new(
        status: StatusCode,
        version: Version,
        headers: Vec<(String, Vec<u8>)>,
        body: Bytes,
    ) -> Self {
        Self {
            status,
            version,
            headers,
            body,
        }
    }

    /// Converts the entry back into an `http::Response`.
    ///
    /// Headers that no longer parse are skipped.
    pub fn into_response(self) -> Response<http_body_util::Full<Bytes>> {
        let mut response = Response::new(http_body_util::Full::from(self.body));
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(&value),
            ) {
                headers.append(name, value);
            }
        }

        response
    }
}

/// A cache lookup result together with its timing metadata.
#[derive(Debug, Clone)]
pub struct CacheRead {
    pub entry: CacheEntry,
    pub expires_at: Option<SystemTime>,
    pub stale_until: Option<SystemTime>,
}

#[async_trait]
pub trait CacheBackend: Send + Sync + Clone + 'static {
    /// Fetches a cached entry by key.
    ///
    /// Returns `Ok(None)` when the backend does not have a value or the
    /// entry has expired.
    async fn get(&self, key: &str) -> Result<Option<CacheRead>, CacheError>;

    /// Stores an entry with a time-to-live and additional stale window.
    async fn set(
        &self,
        key: String,
        entry: CacheEntry,
        ttl: Duration,
        stale_for: Duration,
    ) -> Result<(), CacheError>;

    /// Removes the entry for `key`, if present.
    ///
    /// Removing an absent key succeeds. An `Err` means the store could not
    /// confirm the removal.
    async fn invalidate(&self, key: &str) -> Result<(), CacheError>;
}
