//! Read access to committed state
//!
//! [`KvRead`] is the read half of the host interface. It is implemented by
//! [`ReadView`], an immutable view of committed state, and by
//! `HostTransaction`, which overlays staged writes on such a view.
//!
//! A `ReadView` shares the store's map through an `Arc`. Commits replace
//! the map copy-on-write, so a view keeps observing exactly the state of
//! the commit it was taken at. Exports rely on this to read a consistent
//! state while new cranks commit.

use std::collections::BTreeMap;
use std::sync::Arc;
use vatstore_core::Result;

/// Ordered key-value read access
pub trait KvRead {
    /// Value of a key
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Whether a key is present
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Committed key-value data shared between a store and its views
pub type SharedMap = Arc<BTreeMap<String, Vec<u8>>>;

/// Immutable view of the state as of one commit
#[derive(Debug, Clone)]
pub struct ReadView {
    data: SharedMap,
    version: u64,
}

impl ReadView {
    /// Wrap a shared map at a version
    pub fn new(data: SharedMap, version: u64) -> Self {
        ReadView { data, version }
    }

    /// View of an empty store
    pub fn empty() -> Self {
        ReadView {
            data: Arc::new(BTreeMap::new()),
            version: 0,
        }
    }

    /// Commit version this view observes
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of keys in the view
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the view holds no keys
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn range_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Vec<u8>)> + 'a {
        self.data
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
    }
}

impl KvRead for ReadView {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .range_prefix(prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.data.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_of(pairs: &[(&str, &str)]) -> ReadView {
        let map: BTreeMap<String, Vec<u8>> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect();
        ReadView::new(Arc::new(map), 1)
    }

    #[test]
    fn test_get_and_contains() {
        let view = view_of(&[("a", "1")]);
        assert_eq!(view.get("a").unwrap(), Some(b"1".to_vec()));
        assert!(view.contains("a").unwrap());
        assert_eq!(view.get("b").unwrap(), None);
    }

    #[test]
    fn test_scan_prefix_excludes_neighbours() {
        let view = view_of(&[
            ("snapshot.meta.v1.01", "x"),
            ("snapshot.meta.v1.02", "y"),
            ("snapshot.meta.v10.01", "z"),
            ("snapshot.data.v1.01", "w"),
        ]);
        let keys: Vec<String> = view
            .scan_prefix("snapshot.meta.v1.")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["snapshot.meta.v1.01", "snapshot.meta.v1.02"]);
    }

    #[test]
    fn test_empty_view() {
        let view = ReadView::empty();
        assert!(view.is_empty());
        assert_eq!(view.version(), 0);
        assert!(view.scan_prefix("").unwrap().is_empty());
    }
}
