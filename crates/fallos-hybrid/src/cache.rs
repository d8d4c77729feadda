//! Bounded LRU cache of question embeddings.
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

type Slot = Arc<Mutex<Option<Arc<Vec<f32>>>>>;

/// Keyed by the exact question string. Each key has its own slot so concurrent
/// misses on the same question compute the vector once; other keys never wait.
pub struct QueryVectorCache {
    entries: Option<Mutex<LruCache<String, Slot>>>,
}

impl QueryVectorCache {
    /// `enabled == false` or `capacity == 0` disables caching.
    pub fn new(enabled: bool, capacity: usize) -> Self {
        let entries = NonZeroUsize::new(capacity).filter(|_| enabled).map(|cap| Mutex::new(LruCache::new(cap)));
        Self { entries }
    }

    pub fn is_enabled(&self) -> bool { self.entries.is_some() }

    pub fn len(&self) -> usize { self.entries.as_ref().map_or(0, |e| e.lock().len()) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn get_or_try_insert<E>(&self, key: &str, compute: impl FnOnce() -> Result<Vec<f32>, E>) -> Result<Arc<Vec<f32>>, E> {
        let Some(entries) = &self.entries else { return compute().map(Arc::new) };
        let slot = {
            let mut lru = entries.lock();
            match lru.get(key) {
                Some(slot) => slot.clone(),
                None => {
                    let slot = Slot::default();
                    lru.put(key.to_string(), slot.clone());
                    slot
                }
            }
        };
        let mut value = slot.lock();
        if let Some(v) = value.as_ref() {
            return Ok(v.clone());
        }
        // a failed computation leaves the slot empty for the next caller
        let v = Arc::new(compute()?);
        *value = Some(v.clone());
        Ok(v)
    }
}
