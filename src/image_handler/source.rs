//! # 数据流与中间模型
//!
//! ## 设计思路
//!
//! 将"外部请求"、"流水线中间结果"与"最终像素"解耦：
//! - `DecodeRequest` 表示一次取图请求（URL + 期望尺寸）
//! - `ByteStream` 表示已取得但未解码的字节流
//! - `ImageBounds` 表示仅读取头部得到的原始尺寸
//! - `RasterImage` 表示最终交给调用方的像素缓冲

use std::fmt;
use std::io::{self, BufRead, Cursor, Read, Seek, SeekFrom};
use std::num::NonZeroU32;

use bytes::Bytes;
use image::ImageFormat;

/// 一次取图请求。
///
/// 宽高为 0 表示"使用图片原始尺寸"，在边界探测后才会被解析。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeRequest {
    pub url: String,
    pub requested_width: u32,
    pub requested_height: u32,
}

impl DecodeRequest {
    pub fn new(url: impl Into<String>, requested_width: u32, requested_height: u32) -> Self {
        Self {
            url: url.into(),
            requested_width,
            requested_height,
        }
    }

    /// 将 0 宽 / 0 高解析为原始尺寸，得到不含 0 的目标尺寸。
    ///
    /// 返回 `None` 仅当原始尺寸本身为 0（不可能出现在合法图片中）。
    pub fn resolve_target(&self, bounds: ImageBounds) -> Option<TargetSize> {
        let width = if self.requested_width == 0 {
            bounds.native_width
        } else {
            self.requested_width
        };
        let height = if self.requested_height == 0 {
            bounds.native_height
        } else {
            self.requested_height
        };
        TargetSize::new(width, height)
    }
}

/// 已解析的目标尺寸，类型层面保证不会以 0 作除数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
    pub width: NonZeroU32,
    pub height: NonZeroU32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }
}

/// 边界探测结果：只包含头部元数据，不含任何像素。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBounds {
    pub native_width: u32,
    pub native_height: u32,
    pub format: Option<ImageFormat>,
}

impl ImageBounds {
    pub fn new(native_width: u32, native_height: u32) -> Self {
        Self {
            native_width,
            native_height,
            format: None,
        }
    }
}

/// 采样因子：每个维度缩小的整数倍数，恒 ≥ 1。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SampleFactor(NonZeroU32);

impl SampleFactor {
    pub const ONE: Self = Self(NonZeroU32::MIN);

    /// 0 与 1 都视为"不采样"。
    pub fn new(factor: u32) -> Self {
        NonZeroU32::new(factor).map(Self).unwrap_or(Self::ONE)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// 采样后某一维度的尺寸：`ceil(native / factor)`，且至少为 1。
    pub fn apply(self, native: u32) -> u32 {
        native.div_ceil(self.get()).max(1)
    }
}

impl fmt::Display for SampleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// 像素格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 每像素 4 字节（R, G, B, A），非预乘。
    Rgba8,
    /// 每像素 3 字节（R, G, B），不透明。
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgb8 => 3,
        }
    }
}

/// 解码后的像素图。
///
/// 仅由解码与合成操作构造，构造后不可变，所有权完整交给调用方。
#[derive(Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
}

impl RasterImage {
    /// 调用方需保证 `pixels.len() == width * height * bpp`。
    pub(crate) fn from_parts(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(
            pixels.len(),
            width as usize * height as usize * format.bytes_per_pixel()
        );
        Self {
            width,
            height,
            format,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// 读取单个像素的原始字节；越界返回 `None`。
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let offset = (y as usize * self.width as usize + x as usize) * bpp;
        self.pixels.get(offset..offset + bpp)
    }

    /// 以 RGBA 形式读取单个像素，RGB 格式补齐不透明 alpha。
    pub fn rgba_at(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let px = self.pixel(x, y)?;
        Some(match self.format {
            PixelFormat::Rgba8 => [px[0], px[1], px[2], px[3]],
            PixelFormat::Rgb8 => [px[0], px[1], px[2], 255],
        })
    }
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// 字节流来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    Network,
    Cache,
    /// `data:` URL 内联数据。
    Inline,
}

/// 已取得的字节流。
///
/// 实现 `Read + BufRead + Seek`，可直接交给解码器；
/// `reopen` 在同一份字节上创建新的游标，保证两次读取字节完全一致。
#[derive(Debug, Clone)]
pub struct ByteStream {
    cursor: Cursor<Bytes>,
    origin: StreamOrigin,
    content_type: Option<String>,
}

impl ByteStream {
    pub fn new(bytes: impl Into<Bytes>, origin: StreamOrigin) -> Self {
        Self {
            cursor: Cursor::new(bytes.into()),
            origin,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn origin(&self) -> StreamOrigin {
        self.origin
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }

    /// 共享底层字节，游标从头开始。
    pub fn reopen(&self) -> Self {
        Self {
            cursor: Cursor::new(self.cursor.get_ref().clone()),
            origin: self.origin,
            content_type: self.content_type.clone(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.cursor.get_ref()
    }

    pub fn into_bytes(self) -> Bytes {
        self.cursor.into_inner()
    }
}

impl Read for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl BufRead for ByteStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.cursor.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.cursor.consume(amt)
    }
}

impl Seek for ByteStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_request_resolves_to_native_dimensions() {
        let request = DecodeRequest::new("https://example.com/a.png", 0, 120);
        let target = request
            .resolve_target(ImageBounds::new(640, 480))
            .expect("native dimensions are non-zero");

        assert_eq!(target.width.get(), 640);
        assert_eq!(target.height.get(), 120);
    }

    #[test]
    fn zero_native_dimension_cannot_become_target() {
        let request = DecodeRequest::new("https://example.com/a.png", 0, 0);
        assert!(request.resolve_target(ImageBounds::new(0, 10)).is_none());
    }

    #[test]
    fn sample_factor_rounds_dimensions_up() {
        assert_eq!(SampleFactor::new(0), SampleFactor::ONE);
        assert_eq!(SampleFactor::new(5).apply(4000), 800);
        assert_eq!(SampleFactor::new(4).apply(301), 76);
        assert_eq!(SampleFactor::new(8).apply(3), 1);
    }

    #[test]
    fn reopened_stream_starts_from_beginning() {
        let mut stream = ByteStream::new(vec![1_u8, 2, 3, 4], StreamOrigin::Network);
        let mut head = [0_u8; 2];
        stream.read_exact(&mut head).expect("read");

        let mut again = stream.reopen();
        let mut all = Vec::new();
        again.read_to_end(&mut all).expect("read");

        assert_eq!(head, [1, 2]);
        assert_eq!(all, vec![1, 2, 3, 4]);
        assert_eq!(again.origin(), StreamOrigin::Network);
    }

    #[test]
    fn raster_pixel_lookup_respects_format() {
        let image = RasterImage::from_parts(2, 1, PixelFormat::Rgb8, vec![1, 2, 3, 4, 5, 6]);

        assert_eq!(image.pixel(1, 0), Some(&[4_u8, 5, 6][..]));
        assert_eq!(image.rgba_at(0, 0), Some([1, 2, 3, 255]));
        assert_eq!(image.pixel(2, 0), None);
    }
}
