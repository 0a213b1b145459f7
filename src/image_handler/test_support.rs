use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, Rgba};
use std::collections::TryReserveError;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::allocation::PixelAllocator;

/// 总是报告系统内存耗尽的分配器，并记录被调用次数。
#[derive(Debug, Default)]
pub(crate) struct FailingAllocator {
    calls: AtomicUsize,
}

impl FailingAllocator {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PixelAllocator for FailingAllocator {
    fn try_allocate(&self, _len: usize) -> Result<Vec<u8>, TryReserveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut buffer = Vec::<u8>::new();
        buffer.try_reserve_exact(usize::MAX)?;
        Ok(buffer)
    }
}

pub(crate) fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        let r = (x % 255) as u8;
        let g = (y % 255) as u8;
        let b = ((x + y) % 255) as u8;
        Rgba([r, g, b, 255])
    });

    encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
}

pub(crate) fn create_jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 255) as u8, (y % 255) as u8, 128]));

    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

pub(crate) fn create_bmp_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 255) as u8, (y % 255) as u8, 64]));

    encode(DynamicImage::ImageRgb8(img), ImageFormat::Bmp)
}

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, format)
        .expect("failed to encode test image");
    cursor.into_inner()
}

/// 带半透明像素的 PNG。
pub(crate) fn create_translucent_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 200, ((x + y) * 5 % 256) as u8])
    });

    encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
}
