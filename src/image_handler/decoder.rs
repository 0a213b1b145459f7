//! # 采样解码模块
//!
//! ## 设计思路
//!
//! 将"字节 → 尺寸 → 像素"的过程集中管理，并在关键节点增加内存预算控制。
//! 先只读头部拿到尺寸，再直接按采样因子解码，不保留全分辨率像素。
//!
//! ## 实现思路
//!
//! 1. 猜测格式并读取 header 尺寸（边界探测）
//! 2. 计算采样因子与输出尺寸
//! 3. 按格式选择解码路径：
//!    - PNG（非隔行）：`png` 逐行解码，`BoxDownsampler` 块平均写入输出缓冲
//!    - JPEG：`jpeg-decoder` 在 DCT 阶段缩小到 1/2、1/4 或 1/8，再补一次小幅重采样
//!    - 其他格式：`image` 完整解码后重采样，按真实峰值（解码缓冲 + 格式转换 + 输出）校验预算
//! 4. 输出缓冲一律走预算检查与可失败分配，失败返回 `None`

use std::io::{Seek, SeekFrom};
use std::sync::Arc;

use fast_image_resize as fr;
use image::error::LimitErrorKind;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};

use super::allocation::{AllocationFailure, PixelAllocator, PixelBudget, SystemAllocator};
use super::downsample::{convert_into, BoxDownsampler, SourceLayout};
use super::sampling::compute_sample_factor;
use super::source::{ByteStream, ImageBounds, PixelFormat, RasterImage, SampleFactor, TargetSize};
use super::{ImageConfig, ImageError};

/// 渐进式 JPEG 需按原始尺寸保存 DCT 系数，每个采样点 2 字节。
const PROGRESSIVE_COEFFICIENT_BYTES: u64 = 2;

/// 单遍解码参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeOptions {
    /// 采样倍数，0 与 1 均表示不采样。
    pub sample_size: u32,
    /// 强制输出格式；为空时按源图是否带 alpha 决定。
    pub format: Option<PixelFormat>,
}

impl DecodeOptions {
    pub fn sampled(sample_size: u32) -> Self {
        Self {
            sample_size,
            format: None,
        }
    }
}

/// 采样解码器。
///
/// 持有单次请求的配置快照（内存预算 + 重采样滤镜）与像素分配器。
#[derive(Debug, Clone)]
pub struct SampledDecoder {
    budget: PixelBudget,
    filter: FilterType,
    allocator: Arc<dyn PixelAllocator>,
}

impl SampledDecoder {
    pub fn new(budget: PixelBudget, filter: FilterType) -> Self {
        Self {
            budget,
            filter,
            allocator: Arc::new(SystemAllocator),
        }
    }

    pub fn from_config(config: &ImageConfig) -> Self {
        Self::new(
            PixelBudget::new(config.max_decoded_bytes, config.max_decoded_pixels),
            config.resize_filter,
        )
    }

    /// 替换输出缓冲的分配器。
    pub fn with_allocator(mut self, allocator: Arc<dyn PixelAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// 只读取头部尺寸，不分配像素内存。
    pub fn probe_bounds(&self, stream: &mut ByteStream) -> Result<ImageBounds, ImageError> {
        rewind(stream)?;
        let reader = Self::guessed_reader(stream)?;
        let format = reader.format();

        let (native_width, native_height) = reader
            .into_dimensions()
            .map_err(|e| ImageError::Decode(format!("无法读取图片尺寸：{}", e)))?;

        if native_width == 0 || native_height == 0 {
            return Err(ImageError::Decode(format!(
                "图片尺寸无效：{}x{}",
                native_width, native_height
            )));
        }

        log::debug!(
            "📐 边界探测完成 - {}x{} 格式: {:?}",
            native_width,
            native_height,
            format
        );

        Ok(ImageBounds {
            native_width,
            native_height,
            format,
        })
    }

    /// 按目标尺寸计算采样因子并解码。
    pub fn decode_sampled(
        &self,
        stream: &mut ByteStream,
        bounds: ImageBounds,
        target: TargetSize,
    ) -> Result<Option<RasterImage>, ImageError> {
        let factor = compute_sample_factor(bounds, target);

        log::debug!(
            "🧮 采样因子 {} - 原始 {}x{} 目标 {}x{}",
            factor,
            bounds.native_width,
            bounds.native_height,
            target.width,
            target.height
        );

        self.decode_stream_with_options(stream, &DecodeOptions::sampled(factor.get()))
    }

    /// 原始分辨率解码。
    pub fn decode_stream(&self, stream: &mut ByteStream) -> Result<Option<RasterImage>, ImageError> {
        self.decode_stream_with_options(stream, &DecodeOptions::default())
    }

    /// 单遍解码：不计算采样因子，直接使用 `options` 中的采样倍数。
    ///
    /// 内存预算不足时记录日志并返回 `Ok(None)`；格式无法识别或数据损坏返回错误。
    pub fn decode_stream_with_options(
        &self,
        stream: &mut ByteStream,
        options: &DecodeOptions,
    ) -> Result<Option<RasterImage>, ImageError> {
        rewind(stream)?;
        let format = Self::guessed_reader(stream)?.format();
        rewind(stream)?;

        let factor = SampleFactor::new(options.sample_size);
        let image = match format {
            Some(ImageFormat::Png) => self.decode_png(stream, factor, options.format)?,
            Some(ImageFormat::Jpeg) => self.decode_jpeg(stream, factor, options.format)?,
            _ => self.decode_full(stream, factor, options.format)?,
        };

        if let Some(image) = &image {
            log::info!(
                "✅ 图片解码成功 - 格式: {:?} 采样: {} 输出尺寸: {}x{} ({:?})",
                format,
                factor,
                image.width(),
                image.height(),
                image.format()
            );
        }

        Ok(image)
    }

    /// PNG：逐行解码并块平均，内存只占输出缓冲与一行扫描线。
    fn decode_png(
        &self,
        stream: &mut ByteStream,
        factor: SampleFactor,
        format: Option<PixelFormat>,
    ) -> Result<Option<RasterImage>, ImageError> {
        let limits = png::Limits {
            bytes: usize::try_from(self.budget.max_bytes).unwrap_or(usize::MAX),
        };
        let mut decoder = png::Decoder::new_with_limits(&mut *stream, limits);
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);

        let mut reader = match decoder.read_info() {
            Ok(reader) => reader,
            Err(err) => return Self::absorb_png_error(err),
        };

        let (native_width, native_height, interlaced) = {
            let info = reader.info();
            (info.width, info.height, info.interlaced)
        };
        if interlaced {
            drop(reader);
            log::debug!("🔁 隔行 PNG 无法逐行采样，改走完整解码");
            return self.decode_full(stream, factor, format);
        }

        let layout = match reader.output_color_type() {
            (png::ColorType::Grayscale, png::BitDepth::Eight) => SourceLayout::Gray,
            (png::ColorType::GrayscaleAlpha, png::BitDepth::Eight) => SourceLayout::GrayAlpha,
            (png::ColorType::Rgb, png::BitDepth::Eight) => SourceLayout::Rgb,
            (png::ColorType::Rgba, png::BitDepth::Eight) => SourceLayout::Rgba,
            (color, depth) => {
                return Err(ImageError::UnsupportedFormat(format!(
                    "不支持的 PNG 像素格式：{:?} / {:?}",
                    color, depth
                )));
            }
        };

        let format = format.unwrap_or(layout.natural_format());
        let width = factor.apply(native_width);
        let height = factor.apply(native_height);
        let Some(pixels) = self.allocate_output(width, height, format) else {
            return Ok(None);
        };

        let mut sampler = BoxDownsampler::new(layout, format, factor.get(), native_width, native_height, pixels)?;
        loop {
            match reader.next_row() {
                Ok(Some(row)) => sampler.push_row(row.data())?,
                Ok(None) => break,
                Err(err) => return Self::absorb_png_error(err),
            }
        }

        let pixels = sampler.finish()?;
        Ok(Some(RasterImage::from_parts(width, height, format, pixels)))
    }

    /// JPEG：DCT 缩放到不小于输出尺寸的最小档位，再精确重采样。
    fn decode_jpeg(
        &self,
        stream: &mut ByteStream,
        factor: SampleFactor,
        format: Option<PixelFormat>,
    ) -> Result<Option<RasterImage>, ImageError> {
        let mut decoder = jpeg_decoder::Decoder::new(&mut *stream);
        if let Err(err) = decoder.read_info() {
            return Self::absorb_jpeg_error(err);
        }
        let info = decoder
            .info()
            .ok_or_else(|| ImageError::Decode("JPEG 头信息缺失".to_string()))?;

        let native_width = info.width as u32;
        let native_height = info.height as u32;
        let width = factor.apply(native_width);
        let height = factor.apply(native_height);

        let (scaled_width, scaled_height) = match decoder.scale(clamp_u16(width), clamp_u16(height)) {
            Ok((w, h)) => (w as u32, h as u32),
            Err(err) => {
                log::warn!("⚠️ JPEG 不支持 DCT 缩放，按原始尺寸解码：{}", err);
                (native_width, native_height)
            }
        };

        let layout = match info.pixel_format {
            jpeg_decoder::PixelFormat::L8 => SourceLayout::Gray,
            jpeg_decoder::PixelFormat::L16 => SourceLayout::Gray16,
            jpeg_decoder::PixelFormat::RGB24 => SourceLayout::Rgb,
            jpeg_decoder::PixelFormat::CMYK32 => SourceLayout::Cmyk,
        };
        let format = format.unwrap_or(layout.natural_format());
        let resample = (scaled_width, scaled_height) != (width, height);

        // 峰值：缩放后的解码结果 + （需要重采样时）格式转换后的副本 + 输出
        let peak = (|| {
            let decoded = self.budget.check(scaled_width, scaled_height, layout.bytes_per_pixel())?;
            let converted = if resample {
                self.budget.check(scaled_width, scaled_height, format.bytes_per_pixel())?
            } else {
                0
            };
            let output = self.budget.check(width, height, format.bytes_per_pixel())?;
            let coefficients = if info.coding_process == jpeg_decoder::CodingProcess::DctProgressive {
                (native_width as u64)
                    .saturating_mul(native_height as u64)
                    .saturating_mul(layout.bytes_per_pixel() as u64)
                    .saturating_mul(PROGRESSIVE_COEFFICIENT_BYTES)
            } else {
                0
            };
            let total = decoded
                .saturating_add(converted)
                .saturating_add(output)
                .saturating_add(coefficients);
            self.budget.check_bytes(total)?;
            Ok::<u64, AllocationFailure>(total)
        })();
        if let Err(failure) = peak {
            log::error!(
                "❌ JPEG 解码内存不足（原始 {}x{} 缩放 {}x{}）：{}",
                native_width,
                native_height,
                scaled_width,
                scaled_height,
                failure
            );
            return Ok(None);
        }

        let decoded = match decoder.decode() {
            Ok(decoded) => decoded,
            Err(err) => return Self::absorb_jpeg_error(err),
        };

        let pixels = if resample {
            let Some(mut scaled) = self.allocate_output(scaled_width, scaled_height, format) else {
                return Ok(None);
            };
            convert_into(&decoded, layout, format, &mut scaled)?;
            drop(decoded);

            let Some(output) = self.allocate_output(width, height, format) else {
                return Ok(None);
            };
            self.resize_into(scaled, (scaled_width, scaled_height), output, (width, height), format)?
        } else {
            let Some(mut output) = self.allocate_output(width, height, format) else {
                return Ok(None);
            };
            convert_into(&decoded, layout, format, &mut output)?;
            output
        };

        Ok(Some(RasterImage::from_parts(width, height, format, pixels)))
    }

    /// 其他格式：完整解码后重采样，按真实峰值校验预算。
    fn decode_full(
        &self,
        stream: &mut ByteStream,
        factor: SampleFactor,
        format: Option<PixelFormat>,
    ) -> Result<Option<RasterImage>, ImageError> {
        rewind(stream)?;
        let mut reader = Self::guessed_reader(stream)?;
        reader.limits(self.limits());

        let decoder = match reader.into_decoder() {
            Ok(decoder) => decoder,
            Err(err) => return Self::absorb_limit_error(err),
        };

        let (native_width, native_height) = decoder.dimensions();
        let width = factor.apply(native_width);
        let height = factor.apply(native_height);
        let format = format.unwrap_or(if decoder.color_type().has_alpha() {
            PixelFormat::Rgba8
        } else {
            PixelFormat::Rgb8
        });

        // 峰值：解码缓冲 + 转换为输出格式的全尺寸副本 + 采样输出
        let peak = (|| {
            let converted = self.budget.check(native_width, native_height, format.bytes_per_pixel())?;
            let output = if factor == SampleFactor::ONE {
                0
            } else {
                self.budget.check(width, height, format.bytes_per_pixel())?
            };
            let total = decoder
                .total_bytes()
                .saturating_add(converted)
                .saturating_add(output);
            self.budget.check_bytes(total)?;
            Ok::<u64, AllocationFailure>(total)
        })();
        if let Err(failure) = peak {
            log::error!(
                "❌ 解码内存不足（原始 {}x{}）：{}",
                native_width,
                native_height,
                failure
            );
            return Ok(None);
        }

        let decoded = match DynamicImage::from_decoder(decoder) {
            Ok(decoded) => decoded,
            Err(err) => return Self::absorb_limit_error(err),
        };

        let raw = match format {
            PixelFormat::Rgba8 => decoded.into_rgba8().into_raw(),
            PixelFormat::Rgb8 => decoded.into_rgb8().into_raw(),
        };
        if factor == SampleFactor::ONE {
            return Ok(Some(RasterImage::from_parts(width, height, format, raw)));
        }

        let Some(output) = self.allocate_output(width, height, format) else {
            return Ok(None);
        };
        let pixels = self.resize_into(raw, (native_width, native_height), output, (width, height), format)?;
        Ok(Some(RasterImage::from_parts(width, height, format, pixels)))
    }

    fn allocate_output(&self, width: u32, height: u32, format: PixelFormat) -> Option<Vec<u8>> {
        match self.budget.allocate_with(self.allocator.as_ref(), width, height, format) {
            Ok(buffer) => Some(buffer),
            Err(failure) => {
                log::error!("❌ 输出缓冲分配失败（{}x{}）：{}", width, height, failure);
                None
            }
        }
    }

    fn limits(&self) -> image::Limits {
        let mut limits = image::Limits::default();
        limits.max_alloc = Some(self.budget.max_bytes);
        limits
    }

    fn guessed_reader(stream: &mut ByteStream) -> Result<ImageReader<&mut ByteStream>, ImageError> {
        let reader = ImageReader::new(stream)
            .with_guessed_format()
            .map_err(|e| ImageError::Decode(format!("读取图片头失败：{}", e)))?;

        if reader.format().is_none() {
            let probe = reader.into_inner();
            return Err(ImageError::UnsupportedFormat(Self::describe_unknown(probe.as_slice())));
        }

        Ok(reader)
    }

    /// 用文件签名描述无法识别的内容，便于诊断（例如 HTML 错误页）。
    fn describe_unknown(bytes: &[u8]) -> String {
        if bytes.is_empty() {
            return "图片内容为空".to_string();
        }
        match infer::get(bytes) {
            Some(kind) if kind.matcher_type() == infer::MatcherType::Image => {
                format!("暂不支持的图片类型：{}", kind.mime_type())
            }
            Some(kind) => format!("内容不是图片类型：{}", kind.mime_type()),
            None => "无法识别图片类型".to_string(),
        }
    }

    /// 把 `image` 的限额错误归入"内存不足"，其余错误照常返回。
    fn absorb_limit_error(err: image::ImageError) -> Result<Option<RasterImage>, ImageError> {
        match err {
            image::ImageError::Limits(limit) => {
                match limit.kind() {
                    LimitErrorKind::InsufficientMemory | LimitErrorKind::DimensionError => {
                        log::error!("❌ 解码器超出内存限额：{}", limit);
                        Ok(None)
                    }
                    _ => Err(ImageError::Decode(format!("解码器限额错误：{}", limit))),
                }
            }
            image::ImageError::Unsupported(e) => {
                Err(ImageError::UnsupportedFormat(format!("不支持的图片格式：{}", e)))
            }
            other => Err(ImageError::Decode(format!("图片解码失败：{}", other))),
        }
    }

    fn absorb_png_error(err: png::DecodingError) -> Result<Option<RasterImage>, ImageError> {
        match err {
            png::DecodingError::LimitsExceeded => {
                log::error!("❌ PNG 解码器超出内存限额");
                Ok(None)
            }
            other => Err(ImageError::Decode(format!("PNG 解码失败：{}", other))),
        }
    }

    fn absorb_jpeg_error(err: jpeg_decoder::Error) -> Result<Option<RasterImage>, ImageError> {
        match err {
            jpeg_decoder::Error::Unsupported(feature) => Err(ImageError::UnsupportedFormat(format!(
                "不支持的 JPEG 特性：{:?}",
                feature
            ))),
            other => Err(ImageError::Decode(format!("JPEG 解码失败：{}", other))),
        }
    }

    fn resize_into(
        &self,
        src: Vec<u8>,
        (src_width, src_height): (u32, u32),
        dst: Vec<u8>,
        (width, height): (u32, u32),
        format: PixelFormat,
    ) -> Result<Vec<u8>, ImageError> {
        let pixel_type = match format {
            PixelFormat::Rgba8 => fr::PixelType::U8x4,
            PixelFormat::Rgb8 => fr::PixelType::U8x3,
        };

        let src_image = fr::images::Image::from_vec_u8(src_width, src_height, src, pixel_type)
            .map_err(|e| ImageError::Decode(format!("构建源图像缓冲失败：{}", e)))?;
        let mut dst_image = fr::images::Image::from_vec_u8(width, height, dst, pixel_type)
            .map_err(|e| ImageError::Decode(format!("构建目标图像缓冲失败：{}", e)))?;

        let mut resizer = fr::Resizer::new();
        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(Self::to_fast_filter(self.filter)));

        resizer
            .resize(&src_image, &mut dst_image, Some(&options))
            .map_err(|e| ImageError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

        Ok(dst_image.into_vec())
    }

    fn to_fast_filter(filter: FilterType) -> fr::FilterType {
        match filter {
            FilterType::Nearest => fr::FilterType::Box,
            FilterType::Triangle => fr::FilterType::Bilinear,
            FilterType::CatmullRom => fr::FilterType::CatmullRom,
            FilterType::Gaussian => fr::FilterType::Mitchell,
            FilterType::Lanczos3 => fr::FilterType::Lanczos3,
        }
    }
}

fn clamp_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

fn rewind(stream: &mut ByteStream) -> Result<(), ImageError> {
    stream
        .seek(SeekFrom::Start(0))
        .map(|_| ())
        .map_err(|e| ImageError::Decode(format!("数据流回绕失败：{}", e)))
}
