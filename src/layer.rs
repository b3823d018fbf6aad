use std::error::Error as StdError;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::{CACHE_CONTROL, PRAGMA};
use http::{HeaderMap, Method, Request, Response};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use tower::{Layer, Service, ServiceExt};
use url::Url;

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::backend::{CacheBackend, CacheEntry, CacheRead};
use crate::key::{CacheKey, GeneratedKey, KeyGenerator, TagRegistration};
use crate::logging::{CacheEvent, CacheEventType};
use crate::params::{Interceptors, RequestInterceptor};
use crate::policy::CachePolicy;
use crate::request::RequestConfig;
use crate::request_id::RequestId;
use crate::tags::TagRegistry;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// How a response was produced. Inserted into every response's extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a fresh cache entry.
    Hit,
    /// Served from an expired entry inside the stale window; a background
    /// refresh was started.
    Stale,
    /// Fetched from the inner service; stored if the policy allowed it.
    Miss,
    /// The request was not eligible for caching.
    Bypass,
}

/// Client-side caching layer.
///
/// Wraps an HTTP transport (any `Service<http::Request<Full<Bytes>>>`) and
/// turns it into a `Service<RequestConfig>`. For every request the service
/// runs the interceptors, resolves the URL against the base, derives the cache
/// key and then answers from the backend or the transport. A tag registration
/// is recorded only once its key addresses an entry in the backend.
///
/// Cloning a `CacheLayer` is cheap and shares the backend and tag registry.
#[derive(Clone)]
pub struct CacheLayer<B> {
    backend: B,
    policy: CachePolicy,
    key_generator: KeyGenerator,
    registry: Arc<TagRegistry>,
    interceptors: Interceptors,
    base_url: Option<Url>,
    default_headers: HeaderMap,
    name: Arc<str>,
}

/// Builder for configuring [`CacheLayer`] instances.
pub struct CacheLayerBuilder<B> {
    backend: B,
    policy: CachePolicy,
    key_generator: KeyGenerator,
    registry: Option<Arc<TagRegistry>>,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    base_url: Option<Url>,
    default_headers: HeaderMap,
    name: String,
}

impl<B> CacheLayerBuilder<B>
where
    B: CacheBackend,
{
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            policy: CachePolicy::default(),
            key_generator: KeyGenerator::default(),
            registry: None,
            interceptors: Vec::new(),
            base_url: None,
            default_headers: HeaderMap::new(),
            name: crate::factory::DEFAULT_INSTANCE.to_owned(),
        }
    }

    /// Replaces the cache policy with a pre-built value.
    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.policy = self.policy.with_ttl(ttl);
        self
    }

    pub fn negative_ttl(mut self, ttl: Duration) -> Self {
        self.policy = self.policy.with_negative_ttl(ttl);
        self
    }

    pub fn stale_while_revalidate(mut self, duration: Duration) -> Self {
        self.policy = self.policy.with_stale_while_revalidate(duration);
        self
    }

    pub fn max_body_size(mut self, size: Option<usize>) -> Self {
        self.policy = self.policy.with_max_body_size(size);
        self
    }

    pub fn respect_cache_control(mut self, enabled: bool) -> Self {
        self.policy = self.policy.with_respect_cache_control(enabled);
        self
    }

    pub fn statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.policy = self.policy.with_statuses(statuses);
        self
    }

    pub fn method_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Method) -> bool + Send + Sync + 'static,
    {
        self.policy = self.policy.with_method_predicate(predicate);
        self
    }

    pub fn key_generator(mut self, generator: KeyGenerator) -> Self {
        self.key_generator = generator;
        self
    }

    /// Uses `registry` for tag registrations instead of a fresh one.
    pub fn registry(mut self, registry: Arc<TagRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Appends a request interceptor. Interceptors run in insertion order.
    pub fn interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: RequestInterceptor + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Base URL that relative request URLs are resolved against.
    pub fn base_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Headers sent with every request unless the request overrides them.
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    /// Instance name attached to log events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn build(self) -> CacheLayer<B> {
        CacheLayer {
            backend: self.backend,
            policy: self.policy,
            key_generator: self.key_generator,
            registry: self.registry.unwrap_or_default(),
            interceptors: Arc::new(self.interceptors),
            base_url: self.base_url,
            default_headers: self.default_headers,
            name: self.name.into(),
        }
    }
}

impl<B> CacheLayer<B>
where
    B: CacheBackend,
{
    /// Builds a cache layer with the default [`CachePolicy`].
    pub fn new(backend: B) -> Self {
        CacheLayerBuilder::new(backend).build()
    }

    pub fn builder(backend: B) -> CacheLayerBuilder<B> {
        CacheLayerBuilder::new(backend)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// The registry that receives this layer's tag registrations.
    pub fn registry(&self) -> &Arc<TagRegistry> {
        &self.registry
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }
}

impl<S, B> Layer<S> for CacheLayer<B>
where
    B: CacheBackend,
{
    type Service = CacheService<S, B>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheService {
            inner,
            backend: self.backend.clone(),
            policy: self.policy.clone(),
            key_generator: self.key_generator.clone(),
            registry: self.registry.clone(),
            interceptors: self.interceptors.clone(),
            base_url: self.base_url.clone(),
            default_headers: self.default_headers.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CacheService<S, B> {
    inner: S,
    backend: B,
    policy: CachePolicy,
    key_generator: KeyGenerator,
    registry: Arc<TagRegistry>,
    interceptors: Interceptors,
    base_url: Option<Url>,
    default_headers: HeaderMap,
    name: Arc<str>,
}

impl<S, B> CacheService<S, B> {
    pub fn registry(&self) -> &Arc<TagRegistry> {
        &self.registry
    }

    /// Runs every interceptor over `config`.
    fn prepare(&self, config: &mut RequestConfig) {
        for interceptor in self.interceptors.iter() {
            interceptor.intercept(config);
        }
    }

    /// Derives the cache key for a cacheable request. Returns `None` when the
    /// request bypasses the cache.
    ///
    /// The tag registration is returned rather than applied; it is recorded
    /// once the key is known to address a stored entry.
    fn key_for(&self, config: &RequestConfig) -> Option<GeneratedKey> {
        let cacheable = config.cache
            && self.policy.should_cache_method(&config.method)
            && !(self.policy.respect_cache_control() && cache_control_disallows(&config.headers));
        if !cacheable {
            return None;
        }
        Some(self.key_generator.generate(config))
    }
}

impl<S, B, ResBody> Service<RequestConfig> for CacheService<S, B>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError> + Send,
    B: CacheBackend,
{
    type Response = Response<Full<Bytes>>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut config: RequestConfig) -> Self::Future {
        self.prepare(&mut config);
        let config = match config.resolved(self.base_url.as_ref(), &self.default_headers) {
            Ok(config) => config,
            Err(err) => {
                return Box::pin(async move { Err::<Response<Full<Bytes>>, BoxError>(err.into()) })
            }
        };
        let generated = self.key_for(&config);

        let inner = self.inner.clone();
        let backend = self.backend.clone();
        let policy = self.policy.clone();
        let registry = self.registry.clone();
        let name = self.name.clone();

        Box::pin(async move {
            let start = Instant::now();
            let request = config.to_http(None, &HeaderMap::new())?;
            let (key, registration) = match generated {
                Some(GeneratedKey { key, registration }) => (Some(key), registration),
                None => (None, None),
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(
                instance = %name,
                method = %config.method,
                uri = %request.uri(),
                key = ?key.as_ref().map(CacheKey::as_str),
                "cache_call"
            );

            let url = request.uri().to_string();
            let event = |event_type: CacheEventType| {
                let mut event = CacheEvent::new(event_type)
                    .with_instance(&*name)
                    .with_request_id(config.id.clone())
                    .with_tag(config.tag.clone())
                    .with_method(config.method.clone())
                    .with_url(url.clone())
                    .with_latency(start.elapsed());
                if let Some(key) = &key {
                    event = event.with_key(key.as_str());
                }
                event
            };
            let register = |registration: Option<TagRegistration>| {
                record_registration(&registry, registration, &policy, &name, config.id.clone());
            };

            let Some(key) = key.clone() else {
                #[cfg(feature = "metrics")]
                counter!("tagged_http_cache.bypass").increment(1);
                event(CacheEventType::Bypass).log(policy.event_log());

                let (response, _) = fetch(inner, request, &backend, &policy, None).await?;
                return Ok(annotate(response, CacheStatus::Bypass, None));
            };

            if let Ok(Some(hit)) = backend.get(key.as_str()).await {
                match classify_hit(hit, policy.stale_while_revalidate()) {
                    HitState::Fresh(entry) => {
                        #[cfg(feature = "metrics")]
                        counter!("tagged_http_cache.hit").increment(1);
                        event(CacheEventType::Hit)
                            .with_status(entry.status)
                            .log(policy.event_log());
                        register(registration);

                        return Ok(annotate(entry.into_response(), CacheStatus::Hit, Some(key)));
                    }
                    HitState::Stale(entry) => {
                        #[cfg(feature = "metrics")]
                        counter!("tagged_http_cache.stale_hit").increment(1);
                        event(CacheEventType::StaleHit)
                            .with_status(entry.status)
                            .log(policy.event_log());
                        register(registration.clone());

                        let refresh_key = key.clone();
                        let refresh_backend = backend.clone();
                        let refresh_policy = policy.clone();
                        let refresh_registry = registry.clone();
                        let refresh_name = name.clone();
                        let refresh_id = config.id.clone();
                        tokio::spawn(async move {
                            let outcome = fetch(
                                inner,
                                request,
                                &refresh_backend,
                                &refresh_policy,
                                Some(&refresh_key),
                            )
                            .await;

                            match outcome {
                                Ok((_, Some(_))) => record_registration(
                                    &refresh_registry,
                                    registration,
                                    &refresh_policy,
                                    &refresh_name,
                                    refresh_id,
                                ),
                                Ok((_, None)) => {}
                                Err(_err) => {
                                    #[cfg(feature = "tracing")]
                                    tracing::warn!(key = %refresh_key, error = %_err, "stale refresh failed");
                                }
                            }
                        });

                        return Ok(annotate(entry.into_response(), CacheStatus::Stale, Some(key)));
                    }
                    HitState::Expired => {}
                }
            }

            #[cfg(feature = "metrics")]
            counter!("tagged_http_cache.miss").increment(1);

            let (response, stored) = fetch(inner, request, &backend, &policy, Some(&key)).await?;

            let event_type = if stored.is_some() {
                CacheEventType::Store
            } else {
                CacheEventType::Miss
            };
            let mut miss_event = event(event_type)
                .with_status(response.status())
                .with_size(response.body().size_hint().exact().unwrap_or_default() as usize);
            if let Some(ttl) = stored {
                miss_event = miss_event.with_ttl(ttl);
                register(registration);
            }
            miss_event.log(policy.event_log());

            Ok(annotate(response, CacheStatus::Miss, Some(key)))
        })
    }
}

/// Files `registration` in `registry`, logging a tag event when the key is
/// new under its tag.
fn record_registration(
    registry: &TagRegistry,
    registration: Option<TagRegistration>,
    policy: &CachePolicy,
    instance: &str,
    request_id: Option<RequestId>,
) {
    let Some(registration) = registration else {
        return;
    };
    let tag = registration.tag.clone();
    let key = registration.key.clone();
    if registry.register(registration) {
        CacheEvent::new(CacheEventType::TagRegister)
            .with_instance(instance)
            .with_request_id(request_id)
            .with_tag(Some(tag))
            .with_key(key.as_str())
            .log(policy.event_log());
    }
}

/// Calls the transport, buffers the body and stores the response under `key`
/// when the policy allows it. Returns the response and, if it was stored, the
/// ttl it was stored with.
///
/// Storage failures are logged and otherwise ignored; the caller still gets
/// the fresh response.
async fn fetch<S, B, ResBody>(
    inner: S,
    request: Request<Full<Bytes>>,
    backend: &B,
    policy: &CachePolicy,
    key: Option<&CacheKey>,
) -> Result<(Response<Full<Bytes>>, Option<Duration>), BoxError>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes>,
    ResBody::Error: Into<BoxError>,
    B: CacheBackend,
{
    let response = inner
        .oneshot(request)
        .await
        .map_err(Into::<BoxError>::into)?;
    let (parts, body) = response.into_parts();
    let bytes = BodyExt::collect(body)
        .await
        .map_err(Into::<BoxError>::into)?
        .to_bytes();

    let mut stored = None;
    let storable = !(policy.respect_cache_control() && cache_control_disallows(&parts.headers))
        && !policy.max_body_size().is_some_and(|max| bytes.len() > max);

    if let (Some(key), true) = (key, storable) {
        if let Some(ttl) = policy.ttl_for(parts.status).filter(|ttl| !ttl.is_zero()) {
            let entry = CacheEntry::new(
                parts.status,
                parts.version,
                policy.headers_to_cache(&parts.headers),
                bytes.clone(),
            );
            match backend
                .set(key.as_str().to_owned(), entry, ttl, policy.stale_while_revalidate())
                .await
            {
                Ok(()) => {
                    stored = Some(ttl);
                    #[cfg(feature = "metrics")]
                    counter!("tagged_http_cache.store").increment(1);
                }
                Err(_err) => {
                    #[cfg(feature = "metrics")]
                    counter!("tagged_http_cache.store_error").increment(1);
                    #[cfg(feature = "tracing")]
                    tracing::error!(key = %key, error = %_err, "failed to store response");
                }
            }
        }
    }

    Ok((Response::from_parts(parts, Full::from(bytes)), stored))
}

fn annotate(
    mut response: Response<Full<Bytes>>,
    status: CacheStatus,
    key: Option<CacheKey>,
) -> Response<Full<Bytes>> {
    response.extensions_mut().insert(status);
    if let Some(key) = key {
        response.extensions_mut().insert(key);
    }
    response
}

/// Entries without an expiry are treated as fresh.
fn classify_hit(hit: CacheRead, stale_window: Duration) -> HitState {
    let now = SystemTime::now();
    let CacheRead {
        entry,
        expires_at,
        stale_until,
    } = hit;

    match expires_at {
        None => return HitState::Fresh(entry),
        Some(expires_at) if expires_at > now => return HitState::Fresh(entry),
        Some(_) => {}
    }

    if !stale_window.is_zero() && stale_until.is_some_and(|until| until > now) {
        return HitState::Stale(entry);
    }

    HitState::Expired
}

#[derive(Debug)]
enum HitState {
    Fresh(CacheEntry),
    Stale(CacheEntry),
    Expired,
}

fn cache_control_disallows(headers: &HeaderMap) -> bool {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .any(|token| matches!(token.as_str(), "no-store" | "no-cache" | "private"))
        || headers
            .get(PRAGMA)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.to_ascii_lowercase().contains("no-cache"))
}
