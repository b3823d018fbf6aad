//! Client configuration and environment resolution.
//!
//! [`Environment`] reads the handful of variables that decide which API a
//! client talks to. [`ClientConfig`] enumerates every option a client
//! instance recognizes, with defaults, and is validated once when a factory
//! is built.

use std::collections::HashMap;
use std::fmt;

use http::HeaderMap;
use url::Url;

use crate::error::ConfigError;
use crate::key::KeyGenerator;
use crate::policy::CachePolicy;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DEV_API_URL: &str = "http://localhost:8080";
const DEFAULT_DEV_CLIENT_URL: &str = "http://localhost:3000";

/// Deployment mode, read from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppMode {
    #[default]
    Development,
    Production,
    Test,
}

impl AppMode {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidMode(other.to_owned())),
        }
    }
}

/// Validated view of the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub mode: AppMode,
    pub port: u16,
    pub dev_api_url: Url,
    pub prod_api_url: Option<Url>,
    pub dev_client_url: Url,
    pub prod_client_url: Option<Url>,
}

impl Environment {
    /// Reads and validates the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Reads and validates variables from `vars`.
    ///
    /// Recognized variables: `APP_ENV`, `PORT`, `DEV_API_URL`,
    /// `PROD_API_URL`, `DEV_CLIENT_URL`, `PROD_CLIENT_URL`. Values are
    /// trimmed and an empty value counts as unset.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into().trim().to_owned()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        let var = |name: &str| vars.get(name).map(String::as_str);

        let mode = var("APP_ENV").map_or(Ok(AppMode::Development), AppMode::parse)?;

        let port = match var("PORT") {
            None => DEFAULT_PORT,
            Some(raw) => raw
                .parse::<u16>()
                .ok()
                .filter(|port| *port > 0)
                .ok_or_else(|| ConfigError::InvalidPort(raw.to_owned()))?,
        };

        Ok(Self {
            mode,
            port,
            dev_api_url: parse_url("DEV_API_URL", var("DEV_API_URL").unwrap_or(DEFAULT_DEV_API_URL))?,
            prod_api_url: var("PROD_API_URL")
                .map(|raw| parse_url("PROD_API_URL", raw))
                .transpose()?,
            dev_client_url: parse_url(
                "DEV_CLIENT_URL",
                var("DEV_CLIENT_URL").unwrap_or(DEFAULT_DEV_CLIENT_URL),
            )?,
            prod_client_url: var("PROD_CLIENT_URL")
                .map(|raw| parse_url("PROD_CLIENT_URL", raw))
                .transpose()?,
        })
    }

    pub fn is_prod(&self) -> bool {
        self.mode == AppMode::Production
    }

    pub fn is_dev(&self) -> bool {
        self.mode == AppMode::Development
    }

    pub fn is_test(&self) -> bool {
        self.mode == AppMode::Test
    }

    /// The API base URL for the current mode.
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        if self.is_prod() {
            self.prod_api_url
                .clone()
                .ok_or(ConfigError::MissingProductionUrl)
        } else {
            Ok(self.dev_api_url.clone())
        }
    }

    /// The front-end URL for the current mode, if one is configured.
    pub fn client_url(&self) -> Option<Url> {
        if self.is_prod() {
            self.prod_client_url.clone()
        } else {
            Some(self.dev_client_url.clone())
        }
    }
}

fn parse_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|_| ConfigError::InvalidUrl {
        var,
        value: raw.to_owned(),
    })?;
    check_scheme(var, &url)?;
    Ok(url)
}

fn check_scheme(var: &'static str, url: &Url) -> Result<(), ConfigError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::UnsupportedScheme {
            var,
            scheme: other.to_owned(),
        }),
    }
}

/// Every option a client instance recognizes.
#[derive(Clone)]
pub struct ClientConfig {
    /// Overrides the environment's API URL when set.
    pub base_url: Option<Url>,
    pub policy: CachePolicy,
    /// Entry capacity of the default in-memory store.
    pub max_capacity: u64,
    pub default_headers: HeaderMap,
    pub key_generator: KeyGenerator,
    /// Keep cookies between requests (applied by the reqwest transport).
    pub with_credentials: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            policy: CachePolicy::default(),
            max_capacity: 10_000,
            default_headers: HeaderMap::new(),
            key_generator: KeyGenerator::default(),
            with_credentials: true,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("policy", &self.policy)
            .field("max_capacity", &self.max_capacity)
            .field("default_headers", &self.default_headers)
            .field("with_credentials", &self.with_credentials)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }

    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn with_key_generator(mut self, generator: KeyGenerator) -> Self {
        self.key_generator = generator;
        self
    }

    pub fn with_credentials(mut self, enabled: bool) -> Self {
        self.with_credentials = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if let Some(url) = &self.base_url {
            check_scheme("base_url", url)?;
        }
        Ok(())
    }

    /// The base URL a client built from this config should use.
    pub fn resolve_base_url(&self, env: &Environment) -> Result<Url, ConfigError> {
        match &self.base_url {
            Some(url) => Ok(url.clone()),
            None => env.api_url(),
        }
    }
}
