//! 响应缓存模块
//!
//! # 设计思路
//!
//! 以 URL 为键缓存原始响应字节，使同一 URL 的重复请求无需再次下载。
//! 缓存作为显式依赖注入 `StreamFetcher`，不做进程级全局拦截。
//!
//! # 实现思路
//!
//! - `ResponseCache` trait 定义最小读写接口，要求 `Send + Sync`，
//!   可被多个并发请求同时读写。
//! - `MemoryResponseCache`：进程内 LRU，适合测试与短生命周期场景。
//! - `DiskResponseCache`：磁盘持久化，正文按 URL 的 SHA-256 命名，
//!   元数据由 SQLite 索引维护，支持过期与容量淘汰。

use bytes::Bytes;

use crate::image_handler::ImageError;

mod disk;
mod index;
mod memory;

pub use disk::{DiskCacheConfig, DiskResponseCache};
pub use memory::MemoryResponseCache;

/// 缓存中的一条响应。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub body: Bytes,
    pub content_type: Option<String>,
}

impl CachedResponse {
    pub fn new(body: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            body: body.into(),
            content_type,
        }
    }
}

/// 缓存占用统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub total_bytes: u64,
}

/// URL → 响应字节的缓存协作者。
pub trait ResponseCache: Send + Sync {
    /// 命中返回 `Some`，未命中返回 `None`。
    fn get(&self, url: &str) -> Result<Option<CachedResponse>, ImageError>;

    /// 写入（或覆盖）一条响应。
    fn put(&self, url: &str, response: &CachedResponse) -> Result<(), ImageError>;

    fn remove(&self, url: &str) -> Result<(), ImageError>;

    fn stats(&self) -> Result<CacheStats, ImageError>;
}
