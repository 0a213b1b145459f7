//! 应用设置模块
//!
//! 设置以 JSON 文件保存，所有字段可选；缺省字段取默认值。
//! 文件不存在视为全部默认，文件无法解析返回 `AppError::Settings`。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::image_handler::{ImageConfig, ImagePerformanceProfile};
use crate::response_cache::DiskCacheConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 响应缓存目录，空表示使用默认目录
    pub cache_dir: Option<PathBuf>,
    pub cache_max_bytes: Option<u64>,
    pub cache_max_age_secs: Option<u64>,
    /// `quality` / `balanced` / `speed`
    pub profile: Option<String>,
    pub allow_private_network: Option<bool>,
    pub max_decoded_bytes: Option<u64>,
    pub max_decoded_pixels: Option<u64>,
}

impl AppSettings {
    /// 读取设置文件；文件不存在时返回默认设置。
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            log::debug!("设置文件不存在，使用默认设置: {}", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        serde_json::from_str::<Self>(&content)
            .map_err(|e| AppError::Settings(format!("解析设置文件失败: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::Storage(format!("创建设置目录失败: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Settings(format!("序列化设置失败: {}", e)))?;

        fs::write(path, content)?;
        Ok(())
    }

    /// 叠加到默认 `ImageConfig` 上。
    pub fn image_config(&self) -> Result<ImageConfig, AppError> {
        let mut config = ImageConfig::default();

        if let Some(profile) = self.profile.as_deref() {
            config.apply_performance_profile(ImagePerformanceProfile::parse(profile)?);
        }
        if let Some(allow) = self.allow_private_network {
            config.allow_private_network = allow;
        }
        if let Some(bytes) = self.max_decoded_bytes {
            config.max_decoded_bytes = bytes;
        }
        if let Some(pixels) = self.max_decoded_pixels {
            config.max_decoded_pixels = pixels;
        }

        Ok(config)
    }

    pub fn disk_cache_config(&self) -> DiskCacheConfig {
        let defaults = DiskCacheConfig::default();
        DiskCacheConfig {
            max_bytes: self.cache_max_bytes.unwrap_or(defaults.max_bytes),
            max_age: match self.cache_max_age_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.max_age,
            },
        }
    }
}
