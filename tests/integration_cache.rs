use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::header::CACHE_CONTROL;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use serde_json::json;
use tower::{Layer, Service, ServiceExt};
use tagged_http_cache::prelude::*;

/// Upstream double: counts calls, records request URIs, and answers
/// `<uri> #<call>`. Paths ending in a status code answer with that status;
/// `/private` answers with `Cache-Control: no-store`.
#[derive(Clone, Default)]
struct Upstream {
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl Upstream {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl Service<Request<Full<Bytes>>> for Upstream {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let uri = req.uri().to_string();
        self.seen.lock().unwrap().push(uri.clone());

        let status = req
            .uri()
            .path()
            .rsplit('/')
            .next()
            .and_then(|segment| segment.parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::OK);

        let mut response = Response::builder()
            .status(status)
            .body(Full::from(format!("{uri} #{call}")))
            .unwrap();
        if req.uri().path() == "/private" {
            response
                .headers_mut()
                .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        }
        ready(Ok(response))
    }
}

fn clients(upstream: Upstream, config: ClientConfig) -> InstanceRegistry<Upstream> {
    let env = Environment::from_vars([("DEV_API_URL", "http://api.test")]).unwrap();
    InstanceRegistry::new(env, config, upstream).unwrap()
}

async fn body_string(response: Response<Full<Bytes>>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn status_of(response: &Response<Full<Bytes>>) -> CacheStatus {
    *response.extensions().get::<CacheStatus>().unwrap()
}

#[tokio::test]
async fn repeated_get_is_served_from_cache() {
    let upstream = Upstream::default();
    let api = clients(upstream.clone(), ClientConfig::default()).default_instance();

    let first = api.get("/users").await.unwrap();
    assert_eq!(status_of(&first), CacheStatus::Miss);
    let first_key = first.extensions().get::<CacheKey>().cloned().unwrap();
    assert_eq!(body_string(first).await, "http://api.test/users #1");

    let second = api.get("/users").await.unwrap();
    assert_eq!(status_of(&second), CacheStatus::Hit);
    assert_eq!(second.extensions().get::<CacheKey>(), Some(&first_key));
    assert_eq!(body_string(second).await, "http://api.test/users #1");

    assert_eq!(upstream.calls(), 1);
    assert!(api.backend().contains_key(first_key.as_str()));
}

#[tokio::test]
async fn url_placeholders_are_filled_before_keying() {
    let upstream = Upstream::default();
    let api = clients(upstream.clone(), ClientConfig::default()).default_instance();

    let user = |id: i64| {
        RequestConfig::get("/users/[id]/posts")
            .param("id", id)
            .param("page", 2)
    };

    let first = api.request(user(42)).await.unwrap();
    let other = api.request(user(43)).await.unwrap();
    let again = api.request(user(42)).await.unwrap();

    assert_eq!(
        upstream.seen(),
        vec![
            "http://api.test/users/42/posts?page=2",
            "http://api.test/users/43/posts?page=2",
        ]
    );
    assert_ne!(
        first.extensions().get::<CacheKey>(),
        other.extensions().get::<CacheKey>()
    );
    assert_eq!(status_of(&again), CacheStatus::Hit);
}

#[tokio::test]
async fn placeholder_values_are_escaped() {
    let upstream = Upstream::default();
    let api = clients(upstream.clone(), ClientConfig::default()).default_instance();

    api.request(RequestConfig::get("/search/[q]").param("q", json!("a b/c")))
        .await
        .unwrap();

    assert_eq!(upstream.seen(), vec!["http://api.test/search/a%20b%2Fc"]);
}

#[tokio::test]
async fn non_idempotent_methods_bypass_the_cache() {
    let upstream = Upstream::default();
    let api = clients(upstream.clone(), ClientConfig::default()).default_instance();

    for _ in 0..2 {
        let response = api
            .request(RequestConfig::post("/users").id("create").tag("users"))
            .await
            .unwrap();
        assert_eq!(status_of(&response), CacheStatus::Bypass);
        assert!(response.extensions().get::<CacheKey>().is_none());
    }

    assert_eq!(upstream.calls(), 2);
    assert!(!api.registry().has_tag("users"));
}

#[tokio::test]
async fn opting_out_skips_lookup_and_storage() {
    let upstream = Upstream::default();
    let api = clients(upstream.clone(), ClientConfig::default()).default_instance();

    api.get("/feed").await.unwrap();
    let fresh = api
        .request(RequestConfig::get("/feed").no_cache())
        .await
        .unwrap();
    assert_eq!(status_of(&fresh), CacheStatus::Bypass);
    assert_eq!(body_string(fresh).await, "http://api.test/feed #2");

    let header_opt_out = api
        .request(
            RequestConfig::get("/feed")
                .header(CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        )
        .await
        .unwrap();
    assert_eq!(status_of(&header_opt_out), CacheStatus::Bypass);
    assert_eq!(upstream.calls(), 3);

    let cached = api.get("/feed").await.unwrap();
    assert_eq!(body_string(cached).await, "http://api.test/feed #1");
}

#[tokio::test]
async fn no_store_responses_are_not_kept() {
    let upstream = Upstream::default();
    let api = clients(upstream.clone(), ClientConfig::default()).default_instance();

    let first = api.get("/private").await.unwrap();
    let second = api.get("/private").await.unwrap();

    assert_eq!(status_of(&first), CacheStatus::Miss);
    assert_eq!(status_of(&second), CacheStatus::Miss);
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn server_errors_are_not_cached() {
    let upstream = Upstream::default();
    let api = clients(upstream.clone(), ClientConfig::default()).default_instance();

    let first = api.get("/status/500").await.unwrap();
    assert_eq!(first.status(), StatusCode::INTERNAL_SERVER_ERROR);
    api.get("/status/500").await.unwrap();

    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn negative_ttl_caches_other_client_errors() {
    let upstream = Upstream::default();
    let policy = CachePolicy::default().with_negative_ttl(Duration::from_secs(5));
    let api = clients(upstream.clone(), ClientConfig::new().with_policy(policy)).default_instance();

    api.get("/status/418").await.unwrap();
    let second = api.get("/status/418").await.unwrap();

    assert_eq!(second.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(status_of(&second), CacheStatus::Hit);
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn correlation_id_is_sent_but_not_keyed() {
    let upstream = Upstream::default();
    let api = clients(upstream.clone(), ClientConfig::default()).default_instance();

    let first = api
        .request(RequestConfig::get("/me").id("first"))
        .await
        .unwrap();
    let second = api
        .request(RequestConfig::get("/me").id("second"))
        .await
        .unwrap();

    assert_eq!(
        first.extensions().get::<CacheKey>(),
        second.extensions().get::<CacheKey>()
    );
    assert_eq!(status_of(&second), CacheStatus::Hit);
}

#[tokio::test]
async fn instances_do_not_share_caches() {
    let upstream = Upstream::default();
    let registry = clients(upstream.clone(), ClientConfig::default());

    let a = registry.get_instance("A", false);
    let b = registry.get_instance("B", false);

    a.get("/users").await.unwrap();
    let from_b = b.get("/users").await.unwrap();

    assert_eq!(status_of(&from_b), CacheStatus::Miss);
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn layer_can_be_used_without_a_factory() {
    let upstream = Upstream::default();
    let layer = CacheLayer::builder(InMemoryBackend::new(64))
        .base_url(url::Url::parse("http://direct.test/v2/").unwrap())
        .interceptor(UrlParamsInterceptor)
        .ttl(Duration::from_secs(30))
        .build();
    let mut service = layer.layer(upstream.clone());

    let request = || RequestConfig::get("items/[id]").param("id", "x");
    let first = service.ready().await.unwrap().call(request()).await.unwrap();
    let second = service.ready().await.unwrap().call(request()).await.unwrap();

    assert_eq!(body_string(first).await, "http://direct.test/v2/items/x #1");
    assert_eq!(status_of(&second), CacheStatus::Hit);
    assert_eq!(upstream.calls(), 1);
}

fn shared_store_clients(upstream: Upstream, store: InMemoryBackend) -> InstanceRegistry<Upstream> {
    let env = Environment::from_vars([("DEV_API_URL", "http://api.test")]).unwrap();
    InstanceRegistry::with_backend(env, ClientConfig::default(), upstream, move |_: &str, _: &ClientConfig| {
        store.clone()
    })
    .unwrap()
}

#[tokio::test]
async fn instances_sharing_a_store_keep_origins_apart() {
    let upstream = Upstream::default();
    let registry = shared_store_clients(upstream.clone(), InMemoryBackend::new(64));

    let a_config = ClientConfig::new().with_base_url(url::Url::parse("http://a.test").unwrap());
    let b_config = ClientConfig::new().with_base_url(url::Url::parse("http://b.test").unwrap());
    let a = registry.get_instance_with_config("A", &a_config, false).unwrap();
    let b = registry.get_instance_with_config("B", &b_config, false).unwrap();

    let from_a = a.get("/users").await.unwrap();
    let from_b = b.get("/users").await.unwrap();

    assert_eq!(status_of(&from_b), CacheStatus::Miss);
    assert_ne!(
        from_a.extensions().get::<CacheKey>(),
        from_b.extensions().get::<CacheKey>()
    );
    assert_eq!(body_string(from_a).await, "http://a.test/users #1");
    assert_eq!(body_string(from_b).await, "http://b.test/users #2");

    let again = b.get("/users").await.unwrap();
    assert_eq!(status_of(&again), CacheStatus::Hit);
    assert_eq!(body_string(again).await, "http://b.test/users #2");
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn default_headers_take_part_in_the_key() {
    let upstream = Upstream::default();
    let registry = shared_store_clients(upstream.clone(), InMemoryBackend::new(64));

    let tenant = |name: &'static str| {
        let mut headers = http::HeaderMap::new();
        headers.insert("x-tenant", HeaderValue::from_static(name));
        ClientConfig::new().with_default_headers(headers)
    };
    let acme = registry.get_instance_with_config("acme", &tenant("acme"), false).unwrap();
    let globex = registry.get_instance_with_config("globex", &tenant("globex"), false).unwrap();

    acme.get("/reports").await.unwrap();
    let other_tenant = globex.get("/reports").await.unwrap();

    assert_eq!(status_of(&other_tenant), CacheStatus::Miss);
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn request_id_header_does_not_change_the_key() {
    let upstream = Upstream::default();
    let api = clients(upstream.clone(), ClientConfig::default()).default_instance();

    let first = api
        .request(RequestConfig::get("/me").try_header("x-request-id", "one").unwrap())
        .await
        .unwrap();
    let second = api
        .request(RequestConfig::get("/me").try_header("x-request-id", "two").unwrap())
        .await
        .unwrap();

    assert_eq!(
        first.extensions().get::<CacheKey>(),
        second.extensions().get::<CacheKey>()
    );
    assert_eq!(status_of(&second), CacheStatus::Hit);
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn unstored_responses_do_not_join_their_tag() {
    let api = clients(Upstream::default(), ClientConfig::default()).default_instance();

    api.request(RequestConfig::get("/status/500").id("err").tag("users"))
        .await
        .unwrap();
    api.request(RequestConfig::get("/private").id("priv").tag("users"))
        .await
        .unwrap();
    assert!(!api.registry().has_tag("users"));

    let stored = api
        .request(RequestConfig::get("/users").id("list").tag("users"))
        .await
        .unwrap();
    assert_eq!(
        api.registry().get_keys("users"),
        vec![stored.extensions().get::<CacheKey>().cloned().unwrap()]
    );
}
