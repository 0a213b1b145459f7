//! 缓存目录管理模块
//!
//! # 设计思路
//!
//! 统一管理响应缓存的落盘目录，支持用户自定义目录，
//! 并在目录不存在时自动创建。
//!
//! # 实现思路
//!
//! - 优先使用用户在设置中配置的自定义目录。
//! - 未设置时回退到系统临时目录下的 `remote-bitmap/http-cache`。
//! - 目录不存在时自动 `create_dir_all`，避免上层判断。
//! - 所有可能失败的操作均返回 `Result`，不使用 `expect()` / `unwrap()`。

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AppError;

const APP_DIR_NAME: &str = "remote-bitmap";
const CACHE_DIR_NAME: &str = "http-cache";

/// 存储目录信息
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub path: String,
    pub total_size: u64,
    pub file_count: u64,
}

/// 默认缓存目录（不创建）。
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join(APP_DIR_NAME).join(CACHE_DIR_NAME)
}

/// 获取响应缓存目录
///
/// # 返回
/// - `Ok(PathBuf)`：可用的缓存目录
/// - `Err(AppError::Storage)`：无法创建目录
pub fn resolve_cache_dir(custom_dir: Option<&Path>) -> Result<PathBuf, AppError> {
    // 优先使用用户自定义目录
    if let Some(dir) = custom_dir.filter(|dir| !dir.as_os_str().is_empty()) {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| {
                AppError::Storage(format!("创建自定义目录 '{}' 失败: {}", dir.display(), e))
            })?;
        }
        return Ok(dir.to_path_buf());
    }

    let cache_dir = default_cache_dir();
    if !cache_dir.exists() {
        fs::create_dir_all(&cache_dir)
            .map_err(|e| AppError::Storage(format!("创建缓存目录失败: {}", e)))?;
    }
    Ok(cache_dir)
}

/// 获取缓存目录信息（路径 + 占用大小 + 文件数）
pub fn cache_dir_info(dir: &Path) -> StorageInfo {
    let mut total_size: u64 = 0;
    let mut file_count: u64 = 0;

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Ok(metadata) = entry.metadata() {
                if metadata.is_file() {
                    total_size += metadata.len();
                    file_count += 1;
                }
            }
        }
    }

    StorageInfo {
        path: dir.to_string_lossy().to_string(),
        total_size,
        file_count,
    }
}
