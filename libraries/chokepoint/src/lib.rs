//! Single-threaded request deduplication.
//!
//! Concurrent requests for the same key share one pending future; finished
//! values are kept so later requests resolve immediately. Failures are not
//! kept, so the next request for that key computes again.

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::rc::Rc;

pub struct ChokePoint<K, V, E> {
    cache: Rc<RefCell<HashMap<K, CacheEntry<V, E>>>>,
    // Bumped by `clear`, so computations started before a clear can't write
    // their results into the fresh cache.
    epoch: Rc<Cell<u64>>,
}

enum CacheEntry<V, E> {
    // Store the shared future for in-flight requests
    Computing(Shared<LocalBoxFuture<'static, Result<V, E>>>),
    // Store completed values directly for fast path
    Completed(V),
}

impl<K, V, E> Default for ChokePoint<K, V, E> {
    fn default() -> Self {
        Self {
            cache: Rc::new(RefCell::new(HashMap::new())),
            epoch: Rc::new(Cell::new(0)),
        }
    }
}

impl<K, V, E> Clone for ChokePoint<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            cache: Rc::clone(&self.cache),
            epoch: Rc::clone(&self.epoch),
        }
    }
}

impl<K, V, E> ChokePoint<K, V, E>
where
    K: Clone + Eq + Hash + 'static,
    V: Clone + 'static,
    E: Clone + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get<Fut>(&self, key: K, compute: Fut) -> Result<V, E>
    where
        Fut: Future<Output = Result<V, E>> + 'static,
    {
        // the borrow must end before we await anything
        let existing = match self.cache.borrow().get(&key) {
            Some(CacheEntry::Completed(v)) => return Ok(v.clone()),
            Some(CacheEntry::Computing(future)) => Some(future.clone()),
            None => None,
        };
        if let Some(future) = existing {
            return future.await;
        }

        let cache = Rc::clone(&self.cache);
        let epoch = Rc::clone(&self.epoch);
        let started_in = epoch.get();
        let key_clone = key.clone();
        let wrapped = async move {
            let result = compute.await;

            if epoch.get() == started_in {
                match &result {
                    Ok(value) => {
                        // Replace future with completed value
                        cache
                            .borrow_mut()
                            .insert(key_clone, CacheEntry::Completed(value.clone()));
                    }
                    Err(_) => {
                        // Remove failed computation
                        cache.borrow_mut().remove(&key_clone);
                    }
                }
            }

            result
        }
        .boxed_local()
        .shared();

        self.cache
            .borrow_mut()
            .insert(key, CacheEntry::Computing(wrapped.clone()));

        wrapped.await
    }

    /// The finished value for `key`, if there is one.
    pub fn completed(&self, key: &K) -> Option<V> {
        match self.cache.borrow().get(key) {
            Some(CacheEntry::Completed(v)) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        matches!(self.cache.borrow().get(key), Some(CacheEntry::Computing(_)))
    }

    /// Forget everything, including requests still in flight.
    pub fn clear(&self) {
        self.epoch.set(self.epoch.get() + 1);
        self.cache.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use futures::executor::block_on;
    use futures::future::join;

    #[test]
    fn test_concurrent_requests_share_one_computation() {
        let chokepoint: ChokePoint<&str, u32, ()> = ChokePoint::new();
        let calls = Rc::new(Cell::new(0));
        let (tx, rx) = oneshot::channel::<u32>();

        let first = {
            let calls = Rc::clone(&calls);
            chokepoint.get("cat.mp3", async move {
                calls.set(calls.get() + 1);
                rx.await.map_err(|_| ())
            })
        };
        let second = {
            let calls = Rc::clone(&calls);
            chokepoint.get("cat.mp3", async move {
                calls.set(calls.get() + 1);
                Ok(99)
            })
        };

        let _ = tx.send(7);
        let (a, b) = block_on(join(first, second));
        assert_eq!(a, Ok(7));
        assert_eq!(b, Ok(7));
        assert_eq!(calls.get(), 1);
        assert_eq!(chokepoint.completed(&"cat.mp3"), Some(7));
    }

    #[test]
    fn test_failures_are_not_cached() {
        let chokepoint: ChokePoint<u32, u32, String> = ChokePoint::new();
        let first = block_on(chokepoint.get(1, async { Err("offline".to_string()) }));
        assert!(first.is_err());
        assert!(chokepoint.is_empty());

        let second = block_on(chokepoint.get(1, async { Ok(5) }));
        assert_eq!(second, Ok(5));
    }

    #[test]
    fn test_clear_discards_late_results() {
        let chokepoint: ChokePoint<u32, u32, ()> = ChokePoint::new();
        let (tx, rx) = oneshot::channel::<u32>();
        let mut pending = chokepoint
            .get(1, async move { rx.await.map_err(|_| ()) })
            .boxed_local();
        assert!((&mut pending).now_or_never().is_none());
        assert!(chokepoint.is_pending(&1));

        chokepoint.clear();
        let _ = tx.send(3);
        assert_eq!(block_on(pending), Ok(3));
        assert_eq!(chokepoint.completed(&1), None);
    }
}
