//! Tagged HTTP Cache
//! ==================
//!
//! `tagged-http-cache` is a client-side response cache for Tower HTTP
//! transports. Cached responses can be filed under caller-chosen tags and
//! dropped as a group later, without knowing their individual keys.
//!
//! The pieces fit together like this:
//!
//! * [`CacheLayer`] wraps any `Service<http::Request<Full<Bytes>>>` and turns
//!   it into a `Service<RequestConfig>` that answers from a [`CacheBackend`]
//!   when it can.
//! * [`KeyGenerator`] derives a stable [`CacheKey`] from a request and, when
//!   the request carries a correlation id and a tag, a [`TagRegistration`].
//! * [`TagRegistry`] maps tags to keys and drives invalidation against the
//!   store.
//! * [`InstanceRegistry`] hands out named [`ClientInstance`]s that share
//!   nothing with each other.
//!
//! ```no_run
//! use tagged_http_cache::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let env = Environment::from_env()?;
//! let config = ClientConfig::default();
//! let transport = ReqwestTransport::from_config(&config)?;
//! let clients = InstanceRegistry::new(env, config, transport)?;
//!
//! let api = clients.default_instance();
//! let response = api
//!     .request(
//!         RequestConfig::get("/users/[id]")
//!             .param("id", 42)
//!             .id("load-user")
//!             .tag("users"),
//!     )
//!     .await?;
//! # drop(response);
//!
//! api.invalidate_tag("users").await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod key;
pub mod layer;
pub mod logging;
pub mod params;
pub mod policy;
pub mod prelude;
pub mod request;
pub mod request_id;
pub mod tags;
#[cfg(feature = "reqwest-transport")]
pub mod transport;

pub use backend::{CacheBackend, CacheEntry};
pub use client::ClientInstance;
pub use config::{AppMode, ClientConfig, Environment};
pub use error::{CacheError, ClientError, ConfigError};
pub use factory::{InstanceRegistry, DEFAULT_INSTANCE};
pub use key::{CacheKey, GeneratedKey, KeyGenerator, TagRegistration};
pub use layer::{BoxError, CacheLayer, CacheLayerBuilder, CacheService, CacheStatus};
pub use logging::{CacheEvent, CacheEventType, EventLogConfig};
pub use policy::CachePolicy;
pub use request::RequestConfig;
pub use request_id::RequestId;
pub use tags::TagRegistry;
#[cfg(feature = "reqwest-transport")]
pub use transport::ReqwestTransport;
