//! Cache key generation.
//!
//! The default generator hashes a canonical JSON rendering of the request
//! (method, URL, params, headers, body digest) with SHA-256. Client services
//! hand it the resolved request, so the URL is absolute and the headers
//! include the instance defaults. The correlation
//! id and the tag are not part of the material, so the same logical request
//! maps to the same key across retries and processes.
//!
//! Generation never touches the tag registry. When a request carries both a
//! correlation id and a tag, [`KeyGenerator::generate`] returns a
//! [`TagRegistration`] that the caller applies.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::request::RequestConfig;

/// Opaque identifier used by the cache store to address a stored response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Request to file `key` under `tag` in a tag registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRegistration {
    pub tag: String,
    pub key: CacheKey,
}

/// Output of [`KeyGenerator::generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKey {
    pub key: CacheKey,
    pub registration: Option<TagRegistration>,
}

type KeyFn = Arc<dyn Fn(&RequestConfig) -> CacheKey + Send + Sync>;

/// Strategy used to turn request descriptors into cache keys.
#[derive(Clone)]
pub struct KeyGenerator {
    inner: KeyFn,
}

impl KeyGenerator {
    /// SHA-256 over the canonical request material. See [`hash_request`].
    pub fn hashed() -> Self {
        Self {
            inner: Arc::new(hash_request),
        }
    }

    /// Uses `func` to derive keys.
    ///
    /// `func` should ignore `config.id`; tag registration still follows the
    /// id/tag rule regardless of how the key is derived.
    pub fn custom<F>(func: F) -> Self
    where
        F: Fn(&RequestConfig) -> CacheKey + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(func),
        }
    }

    pub fn key_for(&self, config: &RequestConfig) -> CacheKey {
        (self.inner)(config)
    }

    /// Derives the key and, when the request has both an id and a non-empty
    /// tag, the registration to record for it.
    pub fn generate(&self, config: &RequestConfig) -> GeneratedKey {
        let key = self.key_for(config);
        let registration = match (&config.id, config.tag.as_deref()) {
            (Some(_), Some(tag)) if !tag.is_empty() => Some(TagRegistration {
                tag: tag.to_owned(),
                key: key.clone(),
            }),
            _ => None,
        };
        GeneratedKey { key, registration }
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::hashed()
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGenerator").finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct KeyMaterial<'a> {
    method: &'a str,
    url: &'a str,
    params: &'a BTreeMap<String, Value>,
    headers: BTreeMap<&'a str, Vec<String>>,
    body: Option<String>,
}

/// Default key derivation.
pub fn hash_request(config: &RequestConfig) -> CacheKey {
    let mut headers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in &config.headers {
        headers
            .entry(name.as_str())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    let material = KeyMaterial {
        method: config.method.as_str(),
        url: &config.url,
        params: &config.params,
        headers,
        body: config
            .body
            .as_ref()
            .map(|body| hex::encode(Sha256::digest(body))),
    };

    CacheKey(hex::encode(Sha256::digest(canonical_bytes(&material))))
}

/// JSON rendering of `material`, or its `Debug` rendering if serialization
/// fails, so distinct material never collapses onto one digest.
fn canonical_bytes<T: Serialize + fmt::Debug>(material: &T) -> Vec<u8> {
    match serde_json::to_vec(material) {
        Ok(bytes) => bytes,
        Err(_err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_err, "key material is not serializable, hashing debug form");
            format!("{material:?}").into_bytes()
        }
    }
}
