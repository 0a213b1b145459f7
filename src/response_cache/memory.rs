//! 进程内 LRU 响应缓存

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use super::{CacheStats, CachedResponse, ResponseCache};
use crate::image_handler::ImageError;

const DEFAULT_CAPACITY: usize = 24;

pub struct MemoryResponseCache {
    entries: Mutex<LruCache<String, CachedResponse>>,
}

impl MemoryResponseCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, CachedResponse>>, ImageError> {
        self.entries
            .lock()
            .map_err(|_| ImageError::LockPoisoned("内存缓存"))
    }
}

impl Default for MemoryResponseCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

impl ResponseCache for MemoryResponseCache {
    fn get(&self, url: &str) -> Result<Option<CachedResponse>, ImageError> {
        Ok(self.lock()?.get(url).cloned())
    }

    fn put(&self, url: &str, response: &CachedResponse) -> Result<(), ImageError> {
        if response.body.is_empty() {
            return Ok(());
        }
        self.lock()?.put(url.to_string(), response.clone());
        Ok(())
    }

    fn remove(&self, url: &str) -> Result<(), ImageError> {
        self.lock()?.pop(url);
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, ImageError> {
        let cache = self.lock()?;
        Ok(CacheStats {
            entries: cache.len() as u64,
            total_bytes: cache.iter().map(|(_, item)| item.body.len() as u64).sum(),
        })
    }
}
