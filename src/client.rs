//! Named, cache-enabled HTTP client instances.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::Response;
use http_body_util::Full;
use tower::{Layer, Service, ServiceExt};
use url::Url;

use crate::backend::CacheBackend;
use crate::config::ClientConfig;
use crate::error::CacheError;
use crate::layer::{BoxError, CacheLayer, CacheService};
use crate::logging::{CacheEvent, CacheEventType};
use crate::params::UrlParamsInterceptor;
use crate::request::RequestConfig;
use crate::tags::TagRegistry;

/// A long-lived client bound to one base URL, one cache store and one tag
/// registry.
///
/// Requests go through a [`CacheService`] wrapping the transport `S`.
/// Invalidation goes through the registry, which drives removals from the
/// store.
pub struct ClientInstance<S, B> {
    name: String,
    base_url: Url,
    layer: CacheLayer<B>,
    service: CacheService<S, B>,
}

impl<S, B> ClientInstance<S, B>
where
    B: CacheBackend,
{
    /// Wires a client: URL parameter substitution as the request-build hook,
    /// the config's key generator, and `registry` for tag registrations.
    pub fn new(
        name: impl Into<String>,
        base_url: Url,
        config: &ClientConfig,
        backend: B,
        registry: Arc<TagRegistry>,
        transport: S,
    ) -> Self {
        let name = name.into();
        let layer = CacheLayer::builder(backend)
            .name(name.clone())
            .policy(config.policy.clone())
            .key_generator(config.key_generator.clone())
            .registry(registry)
            .interceptor(UrlParamsInterceptor)
            .base_url(base_url.clone())
            .default_headers(config.default_headers.clone())
            .build();
        let service = layer.layer(transport);

        Self {
            name,
            base_url,
            layer,
            service,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn backend(&self) -> &B {
        self.layer.backend()
    }

    pub fn registry(&self) -> &Arc<TagRegistry> {
        self.layer.registry()
    }

    /// Drops every cached response filed under `tag`.
    pub async fn invalidate_tag(&self, tag: &str) -> Result<(), CacheError> {
        self.registry().remove_tag(self.backend(), tag).await?;

        CacheEvent::new(CacheEventType::TagInvalidate)
            .with_instance(self.name.as_str())
            .with_tag(Some(tag.to_owned()))
            .log(self.layer.policy().event_log());
        Ok(())
    }

    /// Drops the cached response `key` if it is filed under `tag`.
    pub async fn invalidate_key(&self, tag: &str, key: &str) -> Result<(), CacheError> {
        self.registry()
            .remove_key_from_tag(self.backend(), tag, key)
            .await?;

        CacheEvent::new(CacheEventType::Invalidate)
            .with_instance(self.name.as_str())
            .with_tag(Some(tag.to_owned()))
            .with_key(key)
            .log(self.layer.policy().event_log());
        Ok(())
    }

    /// Drops several tags; see [`TagRegistry::remove_tags`].
    pub async fn invalidate_tags<I, T>(&self, tags: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.registry().remove_tags(self.backend(), tags).await
    }
}

impl<S, B> ClientInstance<S, B>
where
    B: CacheBackend,
    CacheService<S, B>: Service<RequestConfig, Response = Response<Full<Bytes>>, Error = BoxError>
        + Clone,
{
    /// Sends `config` through the cache.
    ///
    /// The response carries a [`CacheStatus`](crate::layer::CacheStatus)
    /// extension and, when the request was cacheable, its
    /// [`CacheKey`](crate::key::CacheKey).
    pub async fn request(&self, config: RequestConfig) -> Result<Response<Full<Bytes>>, BoxError> {
        self.service.clone().oneshot(config).await
    }

    pub async fn get(&self, url: impl Into<String>) -> Result<Response<Full<Bytes>>, BoxError> {
        self.request(RequestConfig::get(url)).await
    }
}

impl<S, B> fmt::Debug for ClientInstance<S, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientInstance")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}
