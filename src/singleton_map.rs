//! A concurrent memoized factory keyed by string (or any hashable key).
//!
//! `SingletonMap::get(key, new_instance)` constructs the value via
//! `new_instance` exactly once per key, no matter how many threads call it
//! concurrently for that key: the first caller wins the race to insert a
//! [`once_cell::sync::OnceCell`] for the key and runs `new_instance`; every
//! other caller — whether already waiting or arriving later — blocks on
//! that same cell and receives the identical result. A construction
//! failure is cached too, so a key that failed once keeps re-throwing the
//! same failure for the rest of the scan rather than retrying.
//!
//! This is what gives the Classpath Element the "exactly one element per
//! canonical identity" invariant: every `open()` call goes through
//! `SingletonMap::get` keyed by canonical path, so two raw paths that
//! canonicalize to the same string always resolve to the same element.
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::errors::{ErrorKind, Result};

pub struct SingletonMap<K, V> {
    entries: Mutex<HashMap<K, Arc<OnceCell<std::result::Result<V, String>>>>>,
}

impl<K, V> Default for SingletonMap<K, V> {
    fn default() -> Self {
        SingletonMap {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingletonMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`, computing it with `new_instance` the
    /// first time `key` is seen. `new_instance` runs at most once per key
    /// for the lifetime of this map, even under concurrent calls.
    pub fn get<F>(&self, key: K, new_instance: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let cell = {
            let mut entries = self.entries.lock().expect("singleton map mutex poisoned");
            entries
                .entry(key)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_init(|| new_instance().map_err(|err| err.to_string()))
            .clone()
            .map_err(|detail| ErrorKind::WorkerPanic(detail).into())
    }

    /// The number of keys already seen (computed or in flight), not
    /// including keys never looked up. Used for scan-summary logging.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("singleton map mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn constructs_once_per_key() {
        let map: SingletonMap<String, i32> = SingletonMap::new();
        let calls = AtomicUsize::new(0);

        let a = map
            .get("k".to_string(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .unwrap();
        let b = map
            .get("k".to_string(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .unwrap();

        assert_eq!(a, 1);
        assert_eq!(b, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn caches_failure() {
        let map: SingletonMap<String, i32> = SingletonMap::new();
        let calls = AtomicUsize::new(0);

        let make = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ErrorKind::WorkerPanic("boom".into()).into())
        };

        assert!(map.get("k".to_string(), make).is_err());
        assert!(map.get("k".to_string(), make).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_callers_see_one_construction() {
        use std::sync::Barrier;

        let map: Arc<SingletonMap<String, i32>> = Arc::new(SingletonMap::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let results: Vec<_> = (0..8)
            .map(|_| {
                let map = map.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    map.get("shared".to_string(), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(10));
                        Ok(42)
                    })
                    .unwrap()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        assert!(results.iter().all(|&v| v == 42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
