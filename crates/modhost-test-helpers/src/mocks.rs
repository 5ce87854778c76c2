//! Mock implementations for testing

use modhost_core::{Resource, ResourceLookup, Result};
use rustc_hash::FxHashMap;
use std::sync::Mutex;

/// Wraps a lookup and counts how often each name was asked for
#[derive(Debug, Default)]
pub struct CountingLookup<L> {
    inner: L,
    counts: Mutex<FxHashMap<String, usize>>,
}

impl<L: ResourceLookup> CountingLookup<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            counts: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn count(&self, name: &str) -> usize {
        self.counts.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().unwrap().values().sum()
    }
}

impl<L: ResourceLookup> ResourceLookup for CountingLookup<L> {
    fn lookup(&self, name: &str) -> Result<Option<Resource>> {
        *self.counts.lock().unwrap().entry(name.to_string()).or_default() += 1;
        self.inner.lookup(name)
    }
}
