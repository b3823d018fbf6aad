//! Tag registry for group invalidation.
//!
//! A [`TagRegistry`] maps caller-chosen tag names to the cache keys filed
//! under them, so that a whole group of cached responses (`"user-list"`,
//! `"tenant:acme"`) can be dropped from the store at once.
//!
//! The registry is advisory: a listed key may already have expired from the
//! store. Removals always go through the store first and only then update the
//! registry, so the registry never forgets a key whose entry the store still
//! serves. Tags whose key list becomes empty are pruned before any removal
//! returns.
//!
//! Every registration stamps its entry with a fresh generation. A removal
//! only forgets the generation it observed before contacting the store; a key
//! registered again while the removal was in flight stays listed.

use dashmap::DashMap;
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::key::{CacheKey, TagRegistration};

#[derive(Debug, Clone)]
struct TaggedKey {
    key: CacheKey,
    generation: u64,
}

/// Maps tags to the ordered list of cache keys registered under them.
///
/// A key may appear under any number of tags but at most once per tag.
#[derive(Debug, Default)]
pub struct TagRegistry {
    tags: DashMap<String, Vec<TaggedKey>>,
    next_generation: AtomicU64,
}

impl TagRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `tag` has at least one registered key.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.get(tag).is_some_and(|keys| !keys.is_empty())
    }

    /// Returns the keys registered under `tag`, in registration order.
    ///
    /// Unknown tags yield an empty list; asking never creates an entry.
    pub fn get_keys(&self, tag: &str) -> Vec<CacheKey> {
        self.tags
            .get(tag)
            .map(|entries| entries.iter().map(|e| e.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns whether `key` is registered under `tag`.
    pub fn contains(&self, tag: &str, key: &str) -> bool {
        self.generation_of(tag, key).is_some()
    }

    fn generation_of(&self, tag: &str, key: &str) -> Option<u64> {
        self.tags.get(tag).and_then(|entries| {
            entries
                .iter()
                .find(|e| e.key.as_str() == key)
                .map(|e| e.generation)
        })
    }

    /// Files `key` under `tag`.
    ///
    /// Returns `false` when the pair was already registered. The existing
    /// entry keeps its position but is re-stamped, so a removal already in
    /// flight for it will leave it listed.
    pub fn add_key(&self, tag: impl Into<String>, key: CacheKey) -> bool {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.tags.entry(tag.into()).or_default();
        if let Some(existing) = entries.iter_mut().find(|e| e.key == key) {
            existing.generation = generation;
            return false;
        }
        entries.push(TaggedKey { key, generation });

        #[cfg(feature = "metrics")]
        counter!("tagged_http_cache.tag_register").increment(1);

        true
    }

    /// Applies a registration produced by the key generator.
    pub fn register(&self, registration: TagRegistration) -> bool {
        let added = self.add_key(registration.tag.as_str(), registration.key.clone());

        #[cfg(feature = "tracing")]
        {
            if added {
                tracing::debug!(tag = %registration.tag, key = %registration.key, "tag_registered");
            }
        }

        added
    }

    /// Removes `key` from the store and then from `tag`.
    ///
    /// A key that is not registered under `tag` is a no-op and the store is
    /// not contacted. If the store fails, the error is returned and the
    /// registry keeps the key so the removal can be retried.
    pub async fn remove_key_from_tag<B>(
        &self,
        store: &B,
        tag: &str,
        key: &str,
    ) -> Result<(), CacheError>
    where
        B: CacheBackend,
    {
        let Some(generation) = self.generation_of(tag, key) else {
            return Ok(());
        };

        if let Err(err) = store.invalidate(key).await {
            #[cfg(feature = "tracing")]
            tracing::warn!(tag = %tag, key = %key, error = %err, "store removal failed");
            return Err(err);
        }

        if let Some(mut entries) = self.tags.get_mut(tag) {
            entries.retain(|e| !(e.key.as_str() == key && e.generation == generation));
        }
        self.prune_empty_tags();

        #[cfg(feature = "tracing")]
        tracing::debug!(tag = %tag, key = %key, "key_invalidated");

        Ok(())
    }

    /// Removes every key under `tag` from the store, then drops the tag.
    ///
    /// Store removals are issued concurrently. Keys whose removal failed stay
    /// registered and the first failure is returned. Keys registered under
    /// the tag while the removals were in flight are kept.
    pub async fn remove_tag<B>(&self, store: &B, tag: &str) -> Result<(), CacheError>
    where
        B: CacheBackend,
    {
        let snapshot: Vec<TaggedKey> = self
            .tags
            .get(tag)
            .map(|entries| entries.clone())
            .unwrap_or_default();
        if snapshot.is_empty() {
            return Ok(());
        }

        let results = join_all(snapshot.iter().map(|entry| async move {
            let result = store.invalidate(entry.key.as_str()).await;
            (entry, result)
        }))
        .await;

        let mut removed: HashMap<&CacheKey, u64> = HashMap::with_capacity(results.len());
        let mut first_error = None;
        for (entry, result) in results {
            match result {
                Ok(()) => {
                    removed.insert(&entry.key, entry.generation);
                }
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(tag = %tag, key = %entry.key, error = %err, "store removal failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(mut current) = self.tags.get_mut(tag) {
            current.retain(|e| removed.get(&e.key) != Some(&e.generation));
        }
        self.prune_empty_tags();

        #[cfg(feature = "metrics")]
        counter!("tagged_http_cache.tag_invalidate").increment(1);

        #[cfg(feature = "tracing")]
        tracing::debug!(tag = %tag, removed = removed.len(), "tag_invalidated");

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Removes several tags, continuing past failures.
    ///
    /// Returns the first store failure, if any.
    pub async fn remove_tags<B, I, S>(&self, store: &B, tags: I) -> Result<(), CacheError>
    where
        B: CacheBackend,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut first_error = None;
        for tag in tags {
            if let Err(err) = self.remove_tag(store, tag.as_ref()).await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Deletes every tag whose key list is empty.
    ///
    /// Returns the number of tags removed.
    pub fn prune_empty_tags(&self) -> usize {
        let mut pruned = 0;
        self.tags.retain(|_, keys| {
            let keep = !keys.is_empty();
            if !keep {
                pruned += 1;
            }
            keep
        });

        #[cfg(feature = "tracing")]
        {
            if pruned > 0 {
                tracing::debug!(pruned, "empty_tags_pruned");
            }
        }

        pruned
    }

    /// Returns all tags that currently have keys.
    pub fn list_tags(&self) -> Vec<String> {
        self.tags
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of tags that currently have keys.
    pub fn tag_count(&self) -> usize {
        self.tags
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .count()
    }

    /// Number of distinct keys across all tags.
    pub fn key_count(&self) -> usize {
        let mut keys = HashSet::new();
        for entry in self.tags.iter() {
            keys.extend(entry.value().iter().map(|e| e.key.clone()));
        }
        keys.len()
    }

    /// Forgets every tag without touching the store.
    pub fn clear(&self) {
        self.tags.clear();
    }
}
