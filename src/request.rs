//! Outgoing request descriptors.
//!
//! A [`RequestConfig`] is what callers hand to a client instance. It is
//! mutated by request interceptors (URL parameter substitution, for example),
//! hashed into a [`CacheKey`](crate::key::CacheKey), and finally turned into an
//! `http::Request` against the instance's base URL.

use std::collections::BTreeMap;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use http_body_util::Full;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::ClientError;
use crate::params::param_to_string;
use crate::request_id::{RequestId, REQUEST_ID_HEADER};

/// Normalized representation of an outgoing request.
///
/// `id` and `tag` are not HTTP concepts. The id is forwarded as
/// `x-request-id` but excluded from cache keys; the tag names the
/// invalidation group the cached response joins.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub url: String,
    pub params: BTreeMap<String, Value>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub id: Option<RequestId>,
    pub tag: Option<String>,
    /// When `false` the request skips cache lookup, storage and tagging.
    pub cache: bool,
}

impl RequestConfig {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: BTreeMap::new(),
            headers: HeaderMap::new(),
            body: None,
            id: None,
            tag: None,
            cache: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Adds a parameter used for `[placeholder]` substitution or, when no
    /// placeholder consumes it, the query string.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds a header from string parts, validating both.
    pub fn try_header(self, name: &str, value: &str) -> Result<Self, ClientError> {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ClientError::InvalidHeader(name.to_owned()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| ClientError::InvalidHeader(name.to_owned()))?;
        Ok(self.header(header_name, header_value))
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the JSON request body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, ClientError> {
        let body = serde_json::to_vec(value)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    pub fn id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    /// Returns a copy whose URL is absolute and whose headers already carry
    /// `default_headers`.
    ///
    /// This is the form cache keys are derived from, so two instances with
    /// different origins or default headers never share a key. Params are
    /// left in place. An `x-request-id` header is lifted into `id` so the
    /// correlation id stays out of the key however the caller supplied it.
    pub fn resolved(
        &self,
        base: Option<&Url>,
        default_headers: &HeaderMap,
    ) -> Result<RequestConfig, ClientError> {
        let mut resolved = self.clone();
        resolved.url = self.join_base(base)?.into();
        resolved.headers = self.merged_headers(default_headers);
        if let Some(value) = resolved.headers.remove(&REQUEST_ID_HEADER) {
            if resolved.id.is_none() {
                resolved.id = RequestId::from_header(&value);
            }
        }
        Ok(resolved)
    }

    /// Resolves the request URL against `base`, appending any remaining
    /// params as the query string.
    ///
    /// Absolute URLs ignore the base. Relative URLs are appended to the base
    /// path with exactly one `/` between them.
    pub fn resolve_url(&self, base: Option<&Url>) -> Result<Url, ClientError> {
        let mut url = self.join_base(base)?;

        if !self.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.params {
                pairs.append_pair(key, &param_to_string(value));
            }
        }

        Ok(url)
    }

    fn join_base(&self, base: Option<&Url>) -> Result<Url, ClientError> {
        let invalid = |source| ClientError::InvalidUrl {
            url: self.url.clone(),
            source,
        };

        match (Url::parse(&self.url), base) {
            (Ok(absolute), _) => Ok(absolute),
            (Err(url::ParseError::RelativeUrlWithoutBase), Some(base)) => {
                let joined = format!(
                    "{}/{}",
                    base.as_str().trim_end_matches('/'),
                    self.url.trim_start_matches('/')
                );
                Url::parse(&joined).map_err(invalid)
            }
            (Err(err), _) => Err(invalid(err)),
        }
    }

    fn merged_headers(&self, default_headers: &HeaderMap) -> HeaderMap {
        let mut headers = default_headers.clone();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    /// Builds the outgoing `http::Request`.
    ///
    /// `default_headers` are applied first; headers on the config win.
    pub fn to_http(
        &self,
        base: Option<&Url>,
        default_headers: &HeaderMap,
    ) -> Result<Request<Full<Bytes>>, ClientError> {
        let url = self.resolve_url(base)?;

        let mut headers = self.merged_headers(default_headers);
        if let Some(id) = &self.id {
            if !headers.contains_key(&REQUEST_ID_HEADER) {
                if let Some(value) = id.to_header() {
                    headers.insert(REQUEST_ID_HEADER, value);
                }
            }
        }

        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(url.as_str())
            .body(Full::from(self.body.clone().unwrap_or_default()))?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Url {
        Url::parse("https://api.example.com/v1/").unwrap()
    }

    #[test]
    fn relative_urls_join_base_with_single_slash() {
        let config = RequestConfig::get("/users");
        let url = config.resolve_url(Some(&base())).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/users");
    }

    #[test]
    fn absolute_urls_ignore_base() {
        let config = RequestConfig::get("http://other.test/ping");
        let url = config.resolve_url(Some(&base())).unwrap();
        assert_eq!(url.as_str(), "http://other.test/ping");
    }

    #[test]
    fn relative_url_without_base_is_invalid() {
        let err = RequestConfig::get("/users").resolve_url(None).unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
    }

    #[test]
    fn params_become_query_string() {
        let config = RequestConfig::get("/users")
            .param("page", 2)
            .param("q", "a b");
        let url = config.resolve_url(Some(&base())).unwrap();
        assert_eq!(url.query(), Some("page=2&q=a+b"));
    }

    #[test]
    fn to_http_merges_headers_and_forwards_id() {
        let mut defaults = HeaderMap::new();
        defaults.insert("accept", HeaderValue::from_static("text/plain"));
        defaults.insert("x-client", HeaderValue::from_static("default"));

        let config = RequestConfig::get("/users")
            .try_header("accept", "application/json")
            .unwrap()
            .id("corr-1");
        let request = config.to_http(Some(&base()), &defaults).unwrap();

        assert_eq!(request.headers()["accept"], "application/json");
        assert_eq!(request.headers()["x-client"], "default");
        assert_eq!(request.headers()["x-request-id"], "corr-1");
        assert_eq!(request.uri(), "https://api.example.com/v1/users");
    }

    #[test]
    fn json_sets_body_and_content_type() {
        let config = RequestConfig::post("/users")
            .json(&json!({"name": "ada"}))
            .unwrap();
        assert_eq!(config.headers[CONTENT_TYPE], "application/json");
        assert_eq!(config.body.as_deref(), Some(&b"{\"name\":\"ada\"}"[..]));
    }

    #[test]
    fn try_header_rejects_invalid_names() {
        let err = RequestConfig::get("/").try_header("bad header", "x").unwrap_err();
        assert!(matches!(err, ClientError::InvalidHeader(name) if name == "bad header"));
    }

    #[test]
    fn resolved_carries_origin_and_default_headers() {
        let mut defaults = HeaderMap::new();
        defaults.insert("accept", HeaderValue::from_static("text/plain"));
        defaults.insert("x-tenant", HeaderValue::from_static("acme"));

        let config = RequestConfig::get("/users")
            .param("page", 2)
            .try_header("accept", "application/json")
            .unwrap();
        let resolved = config.resolved(Some(&base()), &defaults).unwrap();

        assert_eq!(resolved.url, "https://api.example.com/v1/users");
        assert_eq!(resolved.params, config.params);
        assert_eq!(resolved.headers["accept"], "application/json");
        assert_eq!(resolved.headers["x-tenant"], "acme");

        let request = resolved.to_http(None, &HeaderMap::new()).unwrap();
        assert_eq!(request.uri(), "https://api.example.com/v1/users?page=2");
    }

    #[test]
    fn resolved_lifts_request_id_header_into_id() {
        let config = RequestConfig::get("/users")
            .try_header("x-request-id", "from-header")
            .unwrap();
        let resolved = config.resolved(Some(&base()), &HeaderMap::new()).unwrap();
        assert_eq!(resolved.id, Some(RequestId::from("from-header")));
        assert!(!resolved.headers.contains_key(REQUEST_ID_HEADER));

        let explicit = config.clone().id("explicit");
        let resolved = explicit.resolved(Some(&base()), &HeaderMap::new()).unwrap();
        assert_eq!(resolved.id, Some(RequestId::from("explicit")));

        let request = resolved.to_http(None, &HeaderMap::new()).unwrap();
        assert_eq!(request.headers()["x-request-id"], "explicit");
    }

    #[test]
    fn resolved_rejects_relative_url_without_base() {
        let err = RequestConfig::get("/users")
            .resolved(None, &HeaderMap::new())
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
    }
}
