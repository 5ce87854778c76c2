//! Per-deployment module cache: normalized name -> export value.

use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::errors::{ModuleError, Result};

/// Completes bare module names with the default extension
#[derive(Debug, Clone)]
pub struct ModuleNames {
    default_extension: String,
    recognized: Vec<String>,
}

impl ModuleNames {
    /// `extra` lists extensions accepted besides the default one
    pub fn new<I>(default_extension: impl Into<String>, extra: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let default_extension = default_extension.into();
        let mut recognized = vec![default_extension.clone()];
        recognized.extend(extra.into_iter().map(Into::into));
        Self {
            default_extension,
            recognized,
        }
    }

    pub fn default_extension(&self) -> &str {
        &self.default_extension
    }

    pub fn is_recognized(&self, name: &str) -> bool {
        extension_of(name).is_some_and(|ext| self.recognized.iter().any(|r| r == ext))
    }

    /// `lib/util` -> `lib/util.lua`; names with a recognized extension are
    /// returned unchanged.
    pub fn normalize(&self, name: &str) -> String {
        if self.is_recognized(name) {
            name.to_string()
        } else {
            format!("{}.{}", name, self.default_extension)
        }
    }
}

impl Default for ModuleNames {
    fn default() -> Self {
        Self::new("lua", std::iter::empty::<String>())
    }
}

pub fn extension_of(name: &str) -> Option<&str> {
    Path::new(name).extension().and_then(|ext| ext.to_str())
}

struct CacheState<V> {
    entries: FxHashMap<String, V>,
    in_progress: FxHashSet<String>,
}

/// Export values keyed by normalized module name.
///
/// Each name is computed at most once; the lock is never held while a value
/// is being computed, so computations may re-enter the cache.
pub struct ModuleCache<V> {
    names: ModuleNames,
    state: Mutex<CacheState<V>>,
}

impl<V: Clone> ModuleCache<V> {
    pub fn new(names: ModuleNames) -> Self {
        Self {
            names,
            state: Mutex::new(CacheState {
                entries: FxHashMap::default(),
                in_progress: FxHashSet::default(),
            }),
        }
    }

    pub fn names(&self) -> &ModuleNames {
        &self.names
    }

    fn state(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached value for `name`, or compute and store it.
    ///
    /// `compute` receives the normalized name. Its failure is returned as is
    /// and leaves no entry behind. Asking for a name whose computation is
    /// still running fails with `CircularRequire`.
    pub fn get_or_compute<F>(&self, name: &str, compute: F) -> Result<V>
    where
        F: FnOnce(&str) -> Result<V>,
    {
        let name = self.names.normalize(name);
        {
            let mut state = self.state();
            if let Some(value) = state.entries.get(&name) {
                debug!(module = %name, "module cache hit");
                return Ok(value.clone());
            }
            if !state.in_progress.insert(name.clone()) {
                return Err(ModuleError::CircularRequire { name });
            }
        }
        debug!(module = %name, "module cache miss");

        let pending = InProgress { cache: self, name: &name };
        let value = compute(&name)?;
        drop(pending);

        self.state().entries.insert(name, value.clone());
        Ok(value)
    }

    pub fn get(&self, name: &str) -> Option<V> {
        let name = self.names.normalize(name);
        self.state().entries.get(&name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = self.names.normalize(name);
        self.state().entries.contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalized names of all cached modules, sorted
    pub fn cached_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.in_progress.clear();
    }
}

/// Unmarks a name as in progress when its computation ends, panics included
struct InProgress<'a, V> {
    cache: &'a ModuleCache<V>,
    name: &'a str,
}

impl<V> Drop for InProgress<'_, V> {
    fn drop(&mut self) {
        self.cache
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_progress
            .remove(self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn cache() -> ModuleCache<i32> {
        ModuleCache::new(ModuleNames::new("lua", ["tl"]))
    }

    #[test]
    fn test_normalize() {
        let names = ModuleNames::new("lua", ["tl"]);
        assert_eq!(names.normalize("util"), "util.lua");
        assert_eq!(names.normalize("lib/util.lua"), "lib/util.lua");
        assert_eq!(names.normalize("types.tl"), "types.tl");
        assert_eq!(names.normalize("data.json"), "data.json.lua");
        assert_eq!(names.normalize("v1.2/x"), "v1.2/x.lua");
    }

    #[test]
    fn test_compute_once() {
        let cache = cache();
        let calls = Cell::new(0);
        let compute = |_: &str| {
            calls.set(calls.get() + 1);
            Ok(7)
        };
        assert_eq!(cache.get_or_compute("a", compute).unwrap(), 7);
        assert_eq!(cache.get_or_compute("a.lua", compute).unwrap(), 7);
        assert_eq!(calls.get(), 1);
        assert!(cache.contains("a"));
        assert_eq!(cache.cached_names(), vec!["a.lua"]);
    }

    #[test]
    fn test_compute_receives_normalized_name() {
        let cache = cache();
        cache
            .get_or_compute("lib/x", |name| {
                assert_eq!(name, "lib/x.lua");
                Ok(1)
            })
            .unwrap();
    }

    #[test]
    fn test_failure_not_cached() {
        let cache = cache();
        let err = cache
            .get_or_compute("bad", |name| {
                Err(ModuleError::ResourceNotFound {
                    name: name.to_string(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, ModuleError::ResourceNotFound { .. }));
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_compute("bad", |_| Ok(3)).unwrap(), 3);
    }

    #[test]
    fn test_reentrant_compute() {
        let cache = cache();
        let value = cache
            .get_or_compute("outer", |_| Ok(cache.get_or_compute("inner", |_| Ok(2))? + 1))
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_circular_compute() {
        let cache = cache();
        let err = cache
            .get_or_compute("a", |_| {
                cache.get_or_compute("b", |_| cache.get_or_compute("a", |_| Ok(1)))
            })
            .unwrap_err();
        match err {
            ModuleError::CircularRequire { name } => assert_eq!(name, "a.lua"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(cache.is_empty());
        // nothing stays marked after the failure
        assert_eq!(cache.get_or_compute("a", |_| Ok(5)).unwrap(), 5);
    }

    #[test]
    fn test_clear() {
        let cache = cache();
        cache.get_or_compute("a", |_| Ok(1)).unwrap();
        cache.clear();
        assert!(cache.get("a").is_none());
    }
}
