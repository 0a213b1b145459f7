//! # 核心编排模块
//!
//! ## 设计思路
//!
//! `ImageHandler` 只负责流程编排与配置管理。
//! 处理链路固定为：
//! 1. 读取配置快照
//! 2. 获取字节流（缓存优先，只取一次）
//! 3. 在流的第二个游标上做边界探测
//! 4. 计算采样因子并解码
//! 5. （可选）圆角合成
//!
//! ## 实现思路
//!
//! - 配置通过 `Arc<RwLock<ImageConfig>>` 支持运行时动态切档。
//! - 单次请求内使用"同一配置快照"，避免处理中途配置漂移。
//! - 记录 `fetch/probe/decode/total` 阶段耗时，便于性能诊断。
//! - 内存不足以 `Ok(None)` 表达，其余错误原样上抛。

use std::sync::{Arc, RwLock};
use std::time::Instant;

use super::composite::CompositeRenderer;
use super::decoder::{DecodeOptions, SampledDecoder};
use super::fetcher::StreamFetcher;
use super::source::{ByteStream, DecodeRequest, RasterImage};
use super::{ImageConfig, ImageError, ImagePerformanceProfile, PixelBudget};
use crate::response_cache::ResponseCache;

/// 解码内存上限的最小允许值。
const MIN_DECODED_BYTES: u64 = 1024 * 1024;

/// 图片处理器。
///
/// 封装了配置状态与取流器，并编排各子模块实现完整流程。
pub struct ImageHandler {
    config: Arc<RwLock<ImageConfig>>,
    fetcher: StreamFetcher,
}

impl ImageHandler {
    /// 根据初始配置与（可选的）响应缓存创建处理器。
    ///
    /// # 示例
    /// ```rust
    /// use std::sync::Arc;
    /// use remote_bitmap::image_handler::{ImageConfig, ImageHandler};
    /// use remote_bitmap::response_cache::{MemoryResponseCache, ResponseCache};
    ///
    /// let cache: Arc<dyn ResponseCache> = Arc::new(MemoryResponseCache::default());
    /// let handler = ImageHandler::new(ImageConfig::default(), Some(cache));
    /// assert!(handler.fetcher().cache().is_some());
    /// ```
    pub fn new(config: ImageConfig, cache: Option<Arc<dyn ResponseCache>>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            fetcher: StreamFetcher::new(cache),
        }
    }

    pub fn fetcher(&self) -> &StreamFetcher {
        &self.fetcher
    }

    /// 获取配置快照。
    ///
    /// 作用：保证单次请求链路使用一致参数。
    pub fn config_snapshot(&self) -> Result<ImageConfig, ImageError> {
        self.config
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| ImageError::LockPoisoned("配置读取锁"))
    }

    /// 设置性能档位。
    pub fn set_performance_profile(&self, profile: ImagePerformanceProfile) -> Result<(), ImageError> {
        let mut config = self
            .config
            .write()
            .map_err(|_| ImageError::LockPoisoned("配置写入锁"))?;
        config.apply_performance_profile(profile);

        log::info!(
            "⚙️ 已切换图片性能档位：{:?}（filter={:?}）",
            profile,
            config.resize_filter
        );

        Ok(())
    }

    /// 获取当前生效档位。
    pub fn get_performance_profile(&self) -> Result<ImagePerformanceProfile, ImageError> {
        let config = self
            .config
            .read()
            .map_err(|_| ImageError::LockPoisoned("配置读取锁"))?;
        Ok(config.infer_performance_profile())
    }

    /// 设置解码内存预算。
    pub fn set_decode_limits(&self, max_decoded_bytes: u64, max_decoded_pixels: u64) -> Result<(), ImageError> {
        if max_decoded_bytes < MIN_DECODED_BYTES {
            return Err(ImageError::InvalidConfig("max_decoded_bytes 不能小于 1MB".to_string()));
        }
        if max_decoded_pixels == 0 {
            return Err(ImageError::InvalidConfig("max_decoded_pixels 必须大于 0".to_string()));
        }

        let mut config = self
            .config
            .write()
            .map_err(|_| ImageError::LockPoisoned("配置写入锁"))?;
        config.max_decoded_bytes = max_decoded_bytes;
        config.max_decoded_pixels = max_decoded_pixels;

        Ok(())
    }

    /// 设置网络安全策略。
    pub fn set_network_policy(
        &self,
        allow_private_network: bool,
        resolve_dns_for_url_safety: bool,
    ) -> Result<(), ImageError> {
        let mut config = self
            .config
            .write()
            .map_err(|_| ImageError::LockPoisoned("配置写入锁"))?;
        config.allow_private_network = allow_private_network;
        config.resolve_dns_for_url_safety = resolve_dns_for_url_safety;

        Ok(())
    }

    fn decoder(config: &ImageConfig) -> SampledDecoder {
        SampledDecoder::from_config(config)
    }

    fn renderer(config: &ImageConfig) -> CompositeRenderer {
        CompositeRenderer::new(PixelBudget::new(config.max_decoded_bytes, config.max_decoded_pixels))
    }

    /// 端到端入口：取流 → 边界探测 → 采样解码。
    ///
    /// 宽高传 0 表示使用原始尺寸。内存不足时返回 `Ok(None)`。
    pub async fn decode_sampled_bitmap_from_url(
        &self,
        url: &str,
        requested_width: u32,
        requested_height: u32,
    ) -> Result<Option<RasterImage>, ImageError> {
        self.decode_request(&DecodeRequest::new(url, requested_width, requested_height))
            .await
    }

    pub async fn decode_request(&self, request: &DecodeRequest) -> Result<Option<RasterImage>, ImageError> {
        let config = self.config_snapshot()?;
        let total_start = Instant::now();

        let fetch_start = Instant::now();
        let mut stream = self.fetcher.open(&request.url, &config).await?;
        let fetch_elapsed = fetch_start.elapsed();
        let origin = stream.origin();

        let decoder = Self::decoder(&config);

        let probe_start = Instant::now();
        let bounds = decoder.probe_bounds(&mut stream.reopen())?;
        let probe_elapsed = probe_start.elapsed();

        let target = request.resolve_target(bounds).ok_or_else(|| {
            ImageError::Decode(format!(
                "图片尺寸无效：{}x{}",
                bounds.native_width, bounds.native_height
            ))
        })?;

        let decode_start = Instant::now();
        let image = decoder.decode_sampled(&mut stream, bounds, target)?;
        let decode_elapsed = decode_start.elapsed();
        drop(stream);

        match &image {
            Some(image) => log::info!(
                "✅ 图片解码完成 - 来源={:?} 原始 {}x{} 输出 {}x{} fetch={}ms probe={}ms decode={}ms total={}ms",
                origin,
                bounds.native_width,
                bounds.native_height,
                image.width(),
                image.height(),
                fetch_elapsed.as_millis(),
                probe_elapsed.as_millis(),
                decode_elapsed.as_millis(),
                total_start.elapsed().as_millis()
            ),
            None => log::warn!(
                "⚠️ 内存不足，未生成图片 - URL: {}",
                StreamFetcher::redact_url_for_log(&request.url)
            ),
        }

        Ok(image)
    }

    /// 取图并加圆角。
    pub async fn decode_rounded_bitmap_from_url(
        &self,
        url: &str,
        requested_width: u32,
        requested_height: u32,
        radius: i32,
    ) -> Result<Option<RasterImage>, ImageError> {
        let Some(image) = self
            .decode_sampled_bitmap_from_url(url, requested_width, requested_height)
            .await?
        else {
            return Ok(None);
        };

        self.apply_rounded_corners(&image, radius)
    }

    /// 圆角合成；仅在锁中毒时返回错误，内存不足返回 `Ok(None)`。
    pub fn apply_rounded_corners(&self, image: &RasterImage, radius: i32) -> Result<Option<RasterImage>, ImageError> {
        let config = self.config_snapshot()?;
        Ok(Self::renderer(&config).apply_rounded_corners(image, radius))
    }

    /// 不做采样计算的单遍解码。
    pub fn decode_stream(&self, stream: &mut ByteStream) -> Result<Option<RasterImage>, ImageError> {
        let config = self.config_snapshot()?;
        Self::decoder(&config).decode_stream(stream)
    }

    pub fn decode_stream_with_options(
        &self,
        stream: &mut ByteStream,
        options: &DecodeOptions,
    ) -> Result<Option<RasterImage>, ImageError> {
        let config = self.config_snapshot()?;
        Self::decoder(&config).decode_stream_with_options(stream, options)
    }
}
