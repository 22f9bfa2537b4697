//! Per-connection proxy cache.
//!
//! Repeated unpacks of the same object id should hand back the same proxy
//! instance while one is still alive, so proxy identity survives round
//! trips. The cache holds weak references only: a proxy's lifetime is
//! driven by user code, and its `Drop` impl is what sends the final DECREF.
//! Expired entries are purged lazily on lookup.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

type AnyWeak = Weak<dyn Any + Send + Sync>;

/// Weak map from object id to live proxy instance.
#[derive(Default)]
pub struct ProxyCache {
    map: Mutex<HashMap<i64, AnyWeak>>,
}

impl ProxyCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The live proxy for `oid`, if one exists and is of type `T`.
    pub fn get<T: Any + Send + Sync>(&self, oid: i64) -> Option<Arc<T>> {
        let mut map = self.lock();
        match map.get(&oid).map(Weak::upgrade) {
            Some(Some(proxy)) => proxy.downcast::<T>().ok(),
            Some(None) => {
                // The proxy died since it was cached.
                map.remove(&oid);
                None
            }
            None => None,
        }
    }

    /// Remember `proxy` as the instance representing `oid`.
    pub fn insert<T: Any + Send + Sync>(&self, oid: i64, proxy: &Arc<T>) {
        let weak: AnyWeak = Arc::<T>::downgrade(proxy);
        self.lock().insert(oid, weak);
    }

    /// Drop the entry for `oid`, if any.
    pub fn remove(&self, oid: i64) {
        self.lock().remove(&oid);
    }

    /// Drop every expired entry.
    pub fn purge(&self) {
        self.lock().retain(|_, weak| weak.strong_count() > 0);
    }

    /// Number of cached entries, including not-yet-purged expired ones.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache has no entries at all.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, AnyWeak>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProxy {
        oid: i64,
    }

    #[test]
    fn live_proxies_are_shared_by_id() {
        let cache = ProxyCache::new();
        let proxy = Arc::new(FakeProxy { oid: 0x1234 });
        cache.insert(proxy.oid, &proxy);

        let again = cache.get::<FakeProxy>(0x1234).unwrap();
        assert!(Arc::ptr_eq(&proxy, &again));
        assert!(cache.get::<String>(0x1234).is_none());
    }

    #[test]
    fn dead_proxies_are_purged_lazily() {
        let cache = ProxyCache::new();
        let proxy = Arc::new(FakeProxy { oid: 7 });
        cache.insert(proxy.oid, &proxy);
        drop(proxy);

        assert_eq!(cache.len(), 1);
        assert!(cache.get::<FakeProxy>(7).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_sweeps_expired_entries() {
        let cache = ProxyCache::new();
        let keep = Arc::new(FakeProxy { oid: 1 });
        cache.insert(1, &keep);
        {
            let gone = Arc::new(FakeProxy { oid: 2 });
            cache.insert(2, &gone);
        }

        cache.purge();
        assert_eq!(cache.len(), 1);
        assert!(cache.get::<FakeProxy>(1).is_some());
    }
}
