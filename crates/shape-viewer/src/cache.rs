//! Memoized derived geometry keyed by (viewport label, layer, domain index).

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryKey {
    pub viewport: String,
    pub layer: String,
    pub domain: usize,
}

impl GeometryKey {
    pub fn new(viewport: impl Into<String>, layer: impl Into<String>, domain: usize) -> Self {
        Self {
            viewport: viewport.into(),
            layer: layer.into(),
            domain,
        }
    }
}

impl fmt::Display for GeometryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.viewport, self.layer, self.domain)
    }
}

/// Entries live until explicitly invalidated; there is no eviction.
#[derive(Debug)]
pub struct GeometryCache<V> {
    entries: HashMap<GeometryKey, V>,
}

impl<V> Default for GeometryCache<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V: Clone> GeometryCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &GeometryKey) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: GeometryKey, value: V) {
        self.entries.insert(key, value);
    }

    /// Returns the cached value, computing and storing it on a miss. A failed
    /// computation is returned as-is and leaves the cache unchanged.
    pub fn get_or_try_insert_with<E, F>(&mut self, key: GeometryKey, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(v) = self.entries.get(&key) {
            return Ok(v.clone());
        }
        let value = compute()?;
        log::debug!("Cached derived geometry {}", key);
        self.entries.insert(key, value.clone());
        Ok(value)
    }

    /// Drops every entry whose key matches; returns how many were dropped.
    pub fn invalidate<P>(&mut self, mut predicate: P) -> usize
    where
        P: FnMut(&GeometryKey) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|k, _| !predicate(k));
        before - self.entries.len()
    }

    pub fn invalidate_layer(&mut self, layer: &str) -> usize {
        self.invalidate(|k| k.layer == layer)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
