//! Write batches
//!
//! A [`WriteBatch`] collects every mutation of one crank. It is handed to
//! the host store exactly once, which applies it atomically. Later writes
//! to the same key replace earlier ones, so a batch holds at most one
//! mutation per key and applies in key order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single staged mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Set a key
    Put(Vec<u8>),
    /// Remove a key
    Delete,
}

/// Ordered set of staged mutations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    mutations: BTreeMap<String, Mutation>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a put
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.mutations.insert(key.into(), Mutation::Put(value));
    }

    /// Stage a delete
    pub fn delete(&mut self, key: impl Into<String>) {
        self.mutations.insert(key.into(), Mutation::Delete);
    }

    /// Staged mutation for a key, if any
    pub fn get(&self, key: &str) -> Option<&Mutation> {
        self.mutations.get(key)
    }

    /// Staged mutations whose key starts with `prefix`, in key order
    pub fn prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Mutation)> + 'a {
        self.mutations
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
    }

    /// Fold another batch into this one; `other` wins on conflicts
    pub fn merge(&mut self, other: WriteBatch) {
        self.mutations.extend(other.mutations);
    }

    /// Number of staged mutations
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Iterate mutations in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Mutation)> {
        self.mutations.iter()
    }

    /// Consume into a key-ordered list
    pub fn into_mutations(self) -> Vec<(String, Mutation)> {
        self.mutations.into_iter().collect()
    }

    /// Rebuild from a key-ordered list
    pub fn from_mutations(mutations: Vec<(String, Mutation)>) -> Self {
        WriteBatch {
            mutations: mutations.into_iter().collect(),
        }
    }
}
