//! Keyed single-flight cache for compiled kernels.
//!
//! Compiling a device kernel is expensive and deterministic for a given
//! build signature, so the runtime compiles each signature exactly once
//! per process and hands out shared references afterwards. The cache is an
//! explicit object owned by its runtime rather than hidden static state,
//! so tests can observe build counts on a fresh instance instead of
//! resetting process-wide globals.
//!
//! First-time population of a key is a critical section: the map lock is
//! held across the build closure, which serializes concurrent first builds
//! of the same key (and, as a consequence, of different keys; acceptable
//! because compilation happens a bounded number of times during warm-up).
//! Hits on an already-populated key only clone an `Arc` under the lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A process-lifetime map from build signature to compiled artifact.
#[derive(Debug)]
pub struct KernelCache<K, V> {
    entries: Mutex<HashMap<K, Arc<V>>>,
    builds: AtomicUsize,
}

impl<K: Eq + Hash + Clone, V> KernelCache<K, V> {
    /// An empty cache.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    /// Returns the artifact for `key`, invoking `build` only if this is
    /// the first request for it. Identical keys always yield the same
    /// `Arc`; a failed build caches nothing, so the next request retries.
    pub fn get_or_try_insert<E>(
        &self,
        key: &K,
        build: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        let mut entries = self.entries.lock().expect("kernel cache poisoned");
        if let Some(found) = entries.get(key) {
            return Ok(Arc::clone(found));
        }
        let built = Arc::new(build()?);
        self.builds.fetch_add(1, Ordering::Relaxed);
        entries.insert(key.clone(), Arc::clone(&built));
        Ok(built)
    }

    /// How many times a build closure has actually run. A second request
    /// with an identical key must not move this counter.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// Number of cached signatures.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("kernel cache poisoned").len()
    }

    /// Whether nothing has been compiled yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone, V> Default for KernelCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_keys_build_once() {
        let cache: KernelCache<String, u32> = KernelCache::new();
        let a = cache
            .get_or_try_insert(&"k".to_string(), || Ok::<_, ()>(7))
            .unwrap();
        let b = cache
            .get_or_try_insert(&"k".to_string(), || -> Result<u32, ()> {
                panic!("second build must not run")
            })
            .unwrap();
        assert_eq!(*a, 7);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.build_count(), 1);
    }

    #[test]
    fn distinct_keys_build_distinct_artifacts() {
        let cache: KernelCache<(u32, bool), u32> = KernelCache::new();
        cache.get_or_try_insert(&(1, true), || Ok::<_, ()>(1)).unwrap();
        cache.get_or_try_insert(&(1, false), || Ok::<_, ()>(2)).unwrap();
        assert_eq!(cache.build_count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failed_build_caches_nothing() {
        let cache: KernelCache<u8, u8> = KernelCache::new();
        let first: Result<_, &str> = cache.get_or_try_insert(&0, || Err("no compiler"));
        assert!(first.is_err());
        assert_eq!(cache.build_count(), 0);
        let second = cache.get_or_try_insert(&0, || Ok::<_, &str>(9)).unwrap();
        assert_eq!(*second, 9);
    }
}
