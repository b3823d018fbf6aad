//! Named client instances with an explicit lifecycle.
//!
//! An [`InstanceRegistry`] is built once at startup from a validated
//! [`Environment`] and [`ClientConfig`], then shared by reference. It hands
//! out one [`ClientInstance`] per name, creating it on first use, and keeps
//! the tag registry for each name in a separate table so a registry can be
//! replaced without rebuilding its client.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use url::Url;

use crate::backend::memory::InMemoryBackend;
use crate::backend::CacheBackend;
use crate::client::ClientInstance;
use crate::config::{ClientConfig, Environment};
use crate::error::ConfigError;
use crate::tags::TagRegistry;

/// Name used when a caller does not pick one.
pub const DEFAULT_INSTANCE: &str = "default";

type BackendFactory<B> = Arc<dyn Fn(&str, &ClientConfig) -> B + Send + Sync>;

pub struct InstanceRegistry<S, B = InMemoryBackend> {
    env: Environment,
    config: ClientConfig,
    base_url: Url,
    transport: S,
    make_backend: BackendFactory<B>,
    instances: DashMap<String, Arc<ClientInstance<S, B>>>,
    registries: DashMap<String, Arc<TagRegistry>>,
}

impl<S> InstanceRegistry<S, InMemoryBackend>
where
    S: Clone,
{
    /// Builds a registry whose instances each get their own
    /// [`InMemoryBackend`] sized by `config.max_capacity`.
    pub fn new(env: Environment, config: ClientConfig, transport: S) -> Result<Self, ConfigError> {
        Self::with_backend(env, config, transport, |_, config| {
            InMemoryBackend::new(config.max_capacity)
        })
    }
}

impl<S, B> InstanceRegistry<S, B>
where
    S: Clone,
    B: CacheBackend,
{
    /// Builds a registry that calls `make_backend` for every new instance.
    ///
    /// Fails if the config is invalid or no base URL can be resolved.
    pub fn with_backend<F>(
        env: Environment,
        config: ClientConfig,
        transport: S,
        make_backend: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str, &ClientConfig) -> B + Send + Sync + 'static,
    {
        config.validate()?;
        let base_url = config.resolve_base_url(&env)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(base_url = %base_url, mode = ?env.mode, "instance registry ready");

        Ok(Self {
            env,
            config,
            base_url,
            transport,
            make_backend: Arc::new(make_backend),
            instances: DashMap::new(),
            registries: DashMap::new(),
        })
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the instance for `name`, creating it if needed.
    ///
    /// With `create_new`, a fresh instance (with a fresh tag registry)
    /// replaces any existing one.
    pub fn get_instance(&self, name: &str, create_new: bool) -> Arc<ClientInstance<S, B>> {
        self.instance_with(name, create_new, &self.config, &self.base_url)
    }

    /// Shorthand for `get_instance(DEFAULT_INSTANCE, false)`.
    pub fn default_instance(&self) -> Arc<ClientInstance<S, B>> {
        self.get_instance(DEFAULT_INSTANCE, false)
    }

    /// Like [`get_instance`](Self::get_instance), but a newly created
    /// instance uses `config` instead of the registry-wide one.
    ///
    /// `config` is ignored when an existing instance is returned.
    pub fn get_instance_with_config(
        &self,
        name: &str,
        config: &ClientConfig,
        create_new: bool,
    ) -> Result<Arc<ClientInstance<S, B>>, ConfigError> {
        if !create_new {
            if let Some(existing) = self.instances.get(name) {
                return Ok(existing.value().clone());
            }
        }

        config.validate()?;
        let base_url = config.resolve_base_url(&self.env)?;
        Ok(self.instance_with(name, create_new, config, &base_url))
    }

    /// Returns the tag registry for `name`, creating it if needed.
    ///
    /// With `create_new`, a fresh registry replaces the stored one. Instances
    /// already holding the old registry keep using it.
    pub fn get_registry(&self, name: &str, create_new: bool) -> Arc<TagRegistry> {
        if create_new {
            let registry = Arc::new(TagRegistry::new());
            self.registries.insert(name.to_owned(), registry.clone());
            return registry;
        }

        self.registries
            .entry(name.to_owned())
            .or_default()
            .value()
            .clone()
    }

    /// Names of all instances created so far.
    pub fn instance_names(&self) -> Vec<String> {
        self.instances
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn instance_with(
        &self,
        name: &str,
        create_new: bool,
        config: &ClientConfig,
        base_url: &Url,
    ) -> Arc<ClientInstance<S, B>> {
        let entry = self.instances.entry(name.to_owned());
        if let Entry::Occupied(existing) = &entry {
            if !create_new {
                return existing.get().clone();
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(instance = %name, replace = create_new, "creating client instance");

        let instance = Arc::new(ClientInstance::new(
            name,
            base_url.clone(),
            config,
            (self.make_backend)(name, config),
            self.get_registry(name, true),
            self.transport.clone(),
        ));
        entry.insert(instance.clone());
        instance
    }
}

impl<S, B> fmt::Debug for InstanceRegistry<S, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("env", &self.env)
            .field("base_url", &self.base_url.as_str())
            .field("instances", &self.instances.len())
            .field("registries", &self.registries.len())
            .finish_non_exhaustive()
    }
}
