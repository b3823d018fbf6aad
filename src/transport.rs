//! HTTP transport backed by [`reqwest`].
//!
//! [`ReqwestTransport`] adapts a `reqwest::Client` to the
//! `Service<http::Request<Full<Bytes>>>` shape the cache layer wraps. Response
//! bodies are read in full before they are handed back.

use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use tower::Service;

use crate::config::ClientConfig;
use crate::error::ClientError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Builds a client honoring `config.with_credentials`: when set, cookies
    /// returned by the server are kept and replayed on later requests.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .cookie_store(config.with_credentials)
            .build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Service<Request<Full<Bytes>>> for ReqwestTransport {
    type Response = Response<Full<Bytes>>;
    type Error = reqwest::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Full<Bytes>>) -> Self::Future {
        let client = self.client.clone();

        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(never) => match never {},
            };

            let mut builder = client
                .request(parts.method, parts.uri.to_string())
                .headers(parts.headers);
            if !body.is_empty() {
                builder = builder.body(body);
            }

            let upstream = builder.send().await?;
            let status = upstream.status();
            let version = upstream.version();
            let headers = upstream.headers().clone();
            let bytes = upstream.bytes().await?;

            let mut response = Response::new(Full::new(bytes));
            *response.status_mut() = status;
            *response.version_mut() = version;
            *response.headers_mut() = headers;
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_config() {
        assert!(ReqwestTransport::from_config(&ClientConfig::default()).is_ok());
        assert!(ReqwestTransport::from_config(&ClientConfig::new().with_credentials(false)).is_ok());
    }

    #[test]
    fn transport_is_clone() {
        fn assert_clone<T: Clone + Send + Sync>(_: &T) {}
        assert_clone(&ReqwestTransport::new(reqwest::Client::new()));
    }
}
