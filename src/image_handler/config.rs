//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有"可调策略"集中到 `ImageConfig`，保证运行时行为可观测、可调整、可测试。
//! 其中性能档位（quality / balanced / speed）作为高层语义，映射到重采样滤镜。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的平衡配置。
//! - `ImagePerformanceProfile` 负责档位字符串解析与反向输出。
//! - `apply_performance_profile` 将档位转换为具体滤镜。
//! - `infer_performance_profile` 用于从当前配置反推档位。

use image::imageops::FilterType;

use super::ImageError;

/// 取图配置。
///
/// 字段覆盖了下载、URL 安全、解码内存预算与重采样四个方面。
#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// 下载原始字节时允许的最大体积（字节）。
    pub max_file_size: u64,
    /// 网络下载超时时间（秒）。
    pub download_timeout: u64,
    /// 建立连接（TCP/TLS）超时时间（秒）。
    pub connect_timeout: u64,
    /// 下载首包超时时间（毫秒）。
    pub stream_first_byte_timeout_ms: u64,
    /// 下载分块读取超时时间（毫秒）。
    pub stream_chunk_timeout_ms: u64,
    /// 最大重定向次数。
    pub max_redirects: usize,
    /// 是否允许访问内网或本地地址（默认关闭，防 SSRF）。
    pub allow_private_network: bool,
    /// 是否对域名执行 DNS 解析后再做内网 IP 拦截。
    pub resolve_dns_for_url_safety: bool,
    /// 单个受预算管理的像素缓冲允许的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 解码峰值内存上限（字节），超出即视为内存不足。
    pub max_decoded_bytes: u64,
    /// 采样解码时使用的重采样滤镜。
    pub resize_filter: FilterType,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            download_timeout: 30,
            connect_timeout: 8,
            stream_first_byte_timeout_ms: 10_000,
            stream_chunk_timeout_ms: 15_000,
            max_redirects: 5,
            allow_private_network: false,
            resolve_dns_for_url_safety: true,
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 160 * 1024 * 1024,
            resize_filter: FilterType::Triangle,
        }
    }
}

/// 图片性能档位。
///
/// - `Quality`：尽量保真
/// - `Balanced`：质量与性能平衡
/// - `Speed`：优先解码速度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePerformanceProfile {
    Quality,
    Balanced,
    Speed,
}

impl ImagePerformanceProfile {
    /// 从外部字符串解析档位。
    ///
    /// # 示例
    /// ```rust
    /// use remote_bitmap::image_handler::ImagePerformanceProfile;
    ///
    /// let p = ImagePerformanceProfile::parse("balanced")?;
    /// assert_eq!(p.as_str(), "balanced");
    /// # Ok::<(), remote_bitmap::image_handler::ImageError>(())
    /// ```
    pub fn parse(profile: &str) -> Result<Self, ImageError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(ImageError::InvalidConfig(format!(
                "未知性能档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    /// 将档位输出为稳定字符串。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}

impl ImageConfig {
    /// 基于当前滤镜反推性能档位。
    pub fn infer_performance_profile(&self) -> ImagePerformanceProfile {
        match self.resize_filter {
            FilterType::Nearest => ImagePerformanceProfile::Speed,
            FilterType::CatmullRom | FilterType::Gaussian | FilterType::Lanczos3 => {
                ImagePerformanceProfile::Quality
            }
            FilterType::Triangle => ImagePerformanceProfile::Balanced,
        }
    }

    /// 应用指定性能档位到实际参数。
    pub fn apply_performance_profile(&mut self, profile: ImagePerformanceProfile) {
        self.resize_filter = match profile {
            ImagePerformanceProfile::Quality => FilterType::CatmullRom,
            ImagePerformanceProfile::Balanced => FilterType::Triangle,
            ImagePerformanceProfile::Speed => FilterType::Nearest,
        };
    }
}
