//! Re-exports for consumers who prefer a single import.
//!
//! ```no_run
//! use tagged_http_cache::prelude::*;
//! # use std::time::Duration;
//! # let backend = InMemoryBackend::new(128);
//! let layer = CacheLayer::builder(backend)
//!     .ttl(Duration::from_secs(30))
//!     .interceptor(UrlParamsInterceptor)
//!     .build();
//! ```

pub use crate::backend::memory::InMemoryBackend;
pub use crate::backend::{CacheBackend, CacheEntry};
pub use crate::client::ClientInstance;
pub use crate::config::{AppMode, ClientConfig, Environment};
pub use crate::error::{CacheError, ClientError, ConfigError};
pub use crate::factory::{InstanceRegistry, DEFAULT_INSTANCE};
pub use crate::key::{CacheKey, KeyGenerator};
pub use crate::layer::{BoxError, CacheLayer, CacheLayerBuilder, CacheStatus};
pub use crate::params::{substitute_url_params, RequestInterceptor, UrlParamsInterceptor};
pub use crate::policy::CachePolicy;
pub use crate::request::RequestConfig;
pub use crate::request_id::RequestId;
pub use crate::tags::TagRegistry;
#[cfg(feature = "reqwest-transport")]
pub use crate::transport::ReqwestTransport;
