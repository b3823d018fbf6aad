use thiserror::Error;

/// Errors that can occur while interacting with a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors raised while turning a [`RequestConfig`](crate::request::RequestConfig)
/// into an outgoing `http::Request`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid request url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid header `{0}`")]
    InvalidHeader(String),

    #[error(transparent)]
    Http(#[from] http::Error),

    #[error("failed to serialize request body: {0}")]
    Serialize(#[from] serde_json::Error),

    #[cfg(feature = "reqwest-transport")]
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Configuration problems detected at construction time.
///
/// These are fatal: a client factory refuses to start rather than deferring
/// the failure to the first request.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be an absolute URL, got `{value}`")]
    InvalidUrl { var: &'static str, value: String },

    #[error("{var} must use http or https, got `{scheme}`")]
    UnsupportedScheme { var: &'static str, scheme: String },

    #[error("PORT must be a positive integer, got `{0}`")]
    InvalidPort(String),

    #[error("APP_ENV must be one of development, production, test; got `{0}`")]
    InvalidMode(String),

    #[error("PROD_API_URL is required when running in production mode")]
    MissingProductionUrl,

    #[error("cache capacity must be greater than zero")]
    ZeroCapacity,
}
