use http::{HeaderMap, Method, StatusCode};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::logging::EventLogConfig;

type MethodPredicateFn = Arc<dyn Fn(&Method) -> bool + Send + Sync>;

/// How long responses stay cached and which ones qualify.
///
/// Policies are cheap to clone and immutable; the `with_*` helpers return
/// new copies with the requested change.
#[derive(Clone)]
pub struct CachePolicy {
    ttl: Duration,
    negative_ttl: Duration,
    stale_while_revalidate: Duration,
    max_body_size: Option<usize>,
    cache_statuses: HashSet<u16>,
    respect_cache_control: bool,
    method_predicate: Option<MethodPredicateFn>,
    header_allowlist: Option<HashSet<String>>,
    event_log: EventLogConfig,
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("ttl", &self.ttl)
            .field("negative_ttl", &self.negative_ttl)
            .field("stale_while_revalidate", &self.stale_while_revalidate)
            .field("max_body_size", &self.max_body_size)
            .field("cache_statuses", &self.cache_statuses)
            .field("respect_cache_control", &self.respect_cache_control)
            .field("custom_method_predicate", &self.method_predicate.is_some())
            .field("header_allowlist", &self.header_allowlist)
            .field("event_log", &self.event_log)
            .finish()
    }
}

impl CachePolicy {
    /// Builds a new policy with explicit TTL settings and cacheable statuses.
    pub fn new(
        ttl: Duration,
        negative_ttl: Duration,
        statuses: impl IntoIterator<Item = u16>,
    ) -> Self {
        Self {
            ttl,
            negative_ttl,
            cache_statuses: statuses.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Returns the TTL for the given HTTP status code if it should be cached.
    pub fn ttl_for(&self, status: StatusCode) -> Option<Duration> {
        if self.cache_statuses.contains(&status.as_u16()) {
            Some(self.ttl)
        } else if status.is_client_error() && !self.negative_ttl.is_zero() {
            Some(self.negative_ttl)
        } else {
            None
        }
    }

    /// Determines whether requests with `method` are cached at all.
    ///
    /// Defaults to `GET` and `HEAD`.
    pub fn should_cache_method(&self, method: &Method) -> bool {
        match &self.method_predicate {
            Some(predicate) => predicate(method),
            None => matches!(method, &Method::GET | &Method::HEAD),
        }
    }

    /// Returns whether `Cache-Control`/`Pragma` headers are honored.
    pub fn respect_cache_control(&self) -> bool {
        self.respect_cache_control
    }

    pub fn max_body_size(&self) -> Option<usize> {
        self.max_body_size
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn negative_ttl(&self) -> Duration {
        self.negative_ttl
    }

    pub fn stale_while_revalidate(&self) -> Duration {
        self.stale_while_revalidate
    }

    pub fn event_log(&self) -> &EventLogConfig {
        &self.event_log
    }

    /// Returns the response headers to persist, honoring the allowlist.
    pub fn headers_to_cache(&self, headers: &HeaderMap) -> Vec<(String, Vec<u8>)> {
        headers
            .iter()
            .filter(|(name, _)| {
                self.header_allowlist
                    .as_ref()
                    .map_or(true, |allow| allow.contains(name.as_str()))
            })
            .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()))
            .collect()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.cache_statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_stale_while_revalidate(mut self, duration: Duration) -> Self {
        self.stale_while_revalidate = duration;
        self
    }

    pub fn with_max_body_size(mut self, size: Option<usize>) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_respect_cache_control(mut self, enabled: bool) -> Self {
        self.respect_cache_control = enabled;
        self
    }

    pub fn with_method_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Method) -> bool + Send + Sync + 'static,
    {
        self.method_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_header_allowlist<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header_allowlist = Some(
            headers
                .into_iter()
                .map(|h| h.into().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    pub fn with_event_log(mut self, config: EventLogConfig) -> Self {
        self.event_log = config;
        self
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            negative_ttl: Duration::ZERO,
            stale_while_revalidate: Duration::ZERO,
            max_body_size: None,
            cache_statuses: HashSet::from([200, 203, 300, 301, 302, 404, 405, 410, 414, 501]),
            respect_cache_control: true,
            method_predicate: None,
            header_allowlist: None,
            event_log: EventLogConfig::default(),
        }
    }
}
