//! Keyed storage layer for the registry
//!
//! This module provides the storage contract the registry runs against:
//! - Ordered key-value store with prefix iteration
//! - Typed value encoding with bincode
//! - Composite keys and keyspace prefixes
//! - Generic time-ordered queues with secondary indices
//! - Structured operation logging

pub mod keys;
pub mod logging;
pub mod queue;

pub use keys::KeyBuilder;
pub use logging::{OperationStatus, OperationType, RegistryLogEntry, RegistryLogger};
pub use queue::{QueueEntry, QueueKind, QueueState, TimeQueue};

use crate::error::Result;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Ordered key-value store
///
/// Iteration yields entries in ascending key byte order. Every call to
/// [`KvStore::iterate_prefix`] starts a fresh iterator.
pub trait KvStore {
    /// Read a value
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Write a value
    fn set(&mut self, key: &[u8], value: Vec<u8>);

    /// Remove a value, no-op when absent
    fn delete(&mut self, key: &[u8]);

    /// Iterate all entries whose key starts with `prefix`
    fn iterate_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;

    /// Entry with the greatest key under `prefix` that is not above `bound`
    fn last_at_or_before(&self, prefix: &[u8], bound: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        self.iterate_prefix(prefix)
            .take_while(|(key, _)| key.as_slice() <= bound)
            .last()
    }
}

/// Typed access on top of any [`KvStore`]
pub trait TypedStore: KvStore {
    /// Read and decode a value
    fn get_value<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key) {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encode and write a value
    fn set_value<T: Serialize>(&mut self, key: &[u8], value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.set(key, bytes);
        Ok(())
    }

    /// Decode every value under a prefix, in key order
    fn values_with_prefix<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        self.iterate_prefix(prefix)
            .map(|(_, bytes)| bincode::deserialize(&bytes).map_err(Into::into))
            .collect()
    }

    /// Collect every key under a prefix, in key order
    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.iterate_prefix(prefix).map(|(key, _)| key).collect()
    }
}

impl<S: KvStore + ?Sized> TypedStore for S {}

/// In-memory store
///
/// Clones share the same underlying map, so a handle kept outside the keeper
/// observes every write.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.data.write().insert(key.to_vec(), value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.data.write().remove(key);
    }

    fn iterate_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a> {
        // Snapshot under the read lock so callers may write while iterating
        let entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .data
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Box::new(entries.into_iter())
    }

    fn last_at_or_before(&self, prefix: &[u8], bound: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        if bound < prefix {
            return None;
        }
        self.data
            .read()
            .range(prefix.to_vec()..=bound.to_vec())
            .next_back()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
    }
}
