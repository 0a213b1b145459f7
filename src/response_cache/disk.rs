//! 磁盘响应缓存子模块
//!
//! ## 职责
//! - 正文以 `sha256(url).bin` 命名落盘，先写临时文件再原子重命名
//! - SQLite 索引记录元数据，驱动过期判断与 LRU 淘汰
//! - 正文缺失或长度不符时自愈：删除索引行并视为未命中
//!
//! ## 并发
//! - 索引连接包在 `Mutex` 内，正文读写与索引更新在同一把锁内完成

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use super::index::{CacheIndex, IndexEntry};
use super::{CacheStats, CachedResponse, ResponseCache};
use crate::image_handler::ImageError;

const INDEX_FILE: &str = "index.db";
const BODY_EXT: &str = "bin";

/// 磁盘缓存配置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskCacheConfig {
    /// 正文总字节上限，`0` 表示不淘汰。
    pub max_bytes: u64,
    /// 条目最长存活时间，`None` 表示永不过期。
    pub max_age: Option<Duration>,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024 * 1024,
            max_age: Some(Duration::from_secs(7 * 24 * 60 * 60)),
        }
    }
}

pub struct DiskResponseCache {
    dir: PathBuf,
    config: DiskCacheConfig,
    index: Mutex<CacheIndex>,
}

impl DiskResponseCache {
    /// 在 `dir` 上打开（必要时创建）缓存。
    pub fn open(dir: impl Into<PathBuf>, config: DiskCacheConfig) -> Result<Self, ImageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| ImageError::Cache(format!("创建缓存目录失败: {}", e)))?;

        let index = CacheIndex::open(&dir.join(INDEX_FILE))?;
        log::info!("🗂️ 磁盘缓存已打开: {}", dir.display());

        Ok(Self {
            dir,
            config,
            index: Mutex::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> DiskCacheConfig {
        self.config
    }

    /// 删除全部条目及其正文文件。
    pub fn clear(&self) -> Result<(), ImageError> {
        let index = self.lock()?;
        let keys = index.clear()?;
        for key in &keys {
            remove_body(&self.body_path(key));
        }
        log::info!("🧹 磁盘缓存已清空，移除 {} 个条目", keys.len());
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheIndex>, ImageError> {
        self.index
            .lock()
            .map_err(|_| ImageError::LockPoisoned("磁盘缓存索引"))
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{BODY_EXT}"))
    }

    fn is_expired(&self, entry: &IndexEntry, now: i64) -> bool {
        let Some(max_age) = self.config.max_age else {
            return false;
        };
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        now.saturating_sub(entry.stored_at) > max_age_ms
    }

    fn discard(&self, index: &CacheIndex, url: &str, key: &str) -> Result<(), ImageError> {
        index.delete(url)?;
        remove_body(&self.body_path(key));
        Ok(())
    }

    pub(crate) fn get_at(&self, url: &str, now: i64) -> Result<Option<CachedResponse>, ImageError> {
        let index = self.lock()?;
        let Some(entry) = index.lookup(url)? else {
            return Ok(None);
        };

        if self.is_expired(&entry, now) {
            log::debug!("⌛ 缓存条目已过期: {}", entry.key);
            self.discard(&index, &entry.url, &entry.key)?;
            return Ok(None);
        }

        let body = match fs::read(self.body_path(&entry.key)) {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("⚠️ 缓存正文丢失，已移除索引: {}", entry.key);
                index.delete(&entry.url)?;
                return Ok(None);
            }
            Err(e) => return Err(ImageError::Cache(format!("读取缓存正文失败: {}", e))),
        };

        if body.len() as u64 != entry.size {
            log::warn!(
                "⚠️ 缓存正文长度不符（{} != {}），已移除: {}",
                body.len(),
                entry.size,
                entry.key
            );
            self.discard(&index, &entry.url, &entry.key)?;
            return Ok(None);
        }

        index.touch(&entry.url, now)?;
        Ok(Some(CachedResponse {
            body: Bytes::from(body),
            content_type: entry.content_type,
        }))
    }

    pub(crate) fn put_at(&self, url: &str, response: &CachedResponse, now: i64) -> Result<(), ImageError> {
        let size = response.body.len() as u64;
        if size == 0 {
            return Ok(());
        }
        if self.config.max_bytes > 0 && size > self.config.max_bytes {
            log::debug!(
                "缓存跳过超限正文: {} 字节 > 上限 {} 字节",
                size,
                self.config.max_bytes
            );
            return Ok(());
        }

        let key = cache_key(url);
        let path = self.body_path(&key);
        let tmp = path.with_extension(format!("{BODY_EXT}.tmp"));

        let index = self.lock()?;
        if let Err(e) = fs::write(&tmp, &response.body) {
            remove_body(&tmp);
            return Err(ImageError::Cache(format!("写入缓存临时文件失败: {}", e)));
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            remove_body(&tmp);
            return Err(ImageError::Cache(format!("缓存文件重命名失败: {}", e)));
        }

        index.upsert(&IndexEntry {
            url: url.to_string(),
            key,
            size,
            content_type: response.content_type.clone(),
            stored_at: now,
            last_accessed: now,
        })?;

        self.evict_to_fit(&index, url)
    }

    fn evict_to_fit(&self, index: &CacheIndex, keep_url: &str) -> Result<(), ImageError> {
        if self.config.max_bytes == 0 {
            return Ok(());
        }

        loop {
            let (_, total) = index.totals()?;
            if total <= self.config.max_bytes {
                return Ok(());
            }
            let Some((url, key, size)) = index.least_recently_used(keep_url)? else {
                return Ok(());
            };
            log::debug!("♻️ 淘汰缓存条目: {} ({} 字节)", key, size);
            self.discard(index, &url, &key)?;
        }
    }
}

impl ResponseCache for DiskResponseCache {
    fn get(&self, url: &str) -> Result<Option<CachedResponse>, ImageError> {
        self.get_at(url, chrono::Utc::now().timestamp_millis())
    }

    fn put(&self, url: &str, response: &CachedResponse) -> Result<(), ImageError> {
        self.put_at(url, response, chrono::Utc::now().timestamp_millis())
    }

    fn remove(&self, url: &str) -> Result<(), ImageError> {
        let index = self.lock()?;
        if let Some(entry) = index.lookup(url)? {
            self.discard(&index, &entry.url, &entry.key)?;
        }
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, ImageError> {
        let (entries, total_bytes) = self.lock()?.totals()?;
        Ok(CacheStats {
            entries,
            total_bytes,
        })
    }
}

/// URL 的 SHA-256 十六进制串。
fn cache_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(64);
    for &b in digest.iter() {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

fn remove_body(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            log::warn!("⚠️ 删除缓存文件失败 {}: {}", path.display(), e);
        }
    }
}
