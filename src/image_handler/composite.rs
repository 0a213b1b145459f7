//! # 圆角合成模块
//!
//! ## 设计思路
//!
//! 两遍绘制：
//! 1. 以抗锯齿把同尺寸的实心圆角矩形光栅化为覆盖率遮罩（`tiny_skia::Mask`）
//! 2. 按 `SourceIn` 规则把源图合成到遮罩上：颜色取源图，alpha 取 `源 alpha x 覆盖率`
//!
//! 全程使用非预乘 alpha，颜色通道原样保留，半透明像素不会因预乘往返而失真。
//! 输出缓冲走可失败分配，预算不足时与解码阶段一样返回 `None`。

use tiny_skia::{FillRule, Mask, Path, PathBuilder, Transform};

use super::allocation::PixelBudget;
use super::source::{PixelFormat, RasterImage};

/// 三次贝塞尔近似四分之一椭圆弧的控制点系数。
const KAPPA: f32 = 0.552_284_8;

/// 遮罩完全覆盖。
const FULL_COVERAGE: u8 = 255;

/// 圆角合成器。
#[derive(Debug, Clone)]
pub struct CompositeRenderer {
    budget: PixelBudget,
}

impl CompositeRenderer {
    pub fn new(budget: PixelBudget) -> Self {
        Self { budget }
    }

    /// 生成带圆角透明遮罩的新图，输出恒为 `Rgba8`。
    ///
    /// - `radius <= 0`：遮罩为完整矩形，输出与源图像素一致
    /// - 半径超过短边一半：按轴分别截断，退化为椭圆 / 圆
    ///
    /// 仅在像素缓冲分配失败时返回 `None`。
    pub fn apply_rounded_corners(&self, image: &RasterImage, radius: i32) -> Option<RasterImage> {
        let (width, height) = image.dimensions();
        let mut pixels = self.allocate(width, height, PixelFormat::Rgba8, "输出")?;
        copy_as_rgba(image, &mut pixels);

        if radius <= 0 {
            return Some(RasterImage::from_parts(width, height, PixelFormat::Rgba8, pixels));
        }

        let rx = (radius as f32).min(width as f32 / 2.0);
        let ry = (radius as f32).min(height as f32 / 2.0);
        let Some(path) = rounded_rect_path(width as f32, height as f32, rx, ry) else {
            return Some(RasterImage::from_parts(width, height, PixelFormat::Rgba8, pixels));
        };

        // 第一遍：遮罩
        if let Err(failure) = self.budget.check(width, height, 1) {
            log::error!("❌ 圆角遮罩分配失败（{}x{}）：{}", width, height, failure);
            return None;
        }
        let mut mask = Mask::new(width, height)?;
        mask.fill_path(&path, FillRule::Winding, true, Transform::identity());

        // 第二遍：SourceIn 合成
        for (px, &coverage) in pixels.chunks_exact_mut(4).zip(mask.data()) {
            match coverage {
                FULL_COVERAGE => {}
                0 => px.copy_from_slice(&[0, 0, 0, 0]),
                coverage => {
                    let alpha = (px[3] as u32 * coverage as u32 + 127) / 255;
                    if alpha == 0 {
                        px.copy_from_slice(&[0, 0, 0, 0]);
                    } else {
                        px[3] = alpha as u8;
                    }
                }
            }
        }

        log::debug!("🟢 圆角合成完成 - {}x{} 半径: {}", width, height, radius);

        Some(RasterImage::from_parts(width, height, PixelFormat::Rgba8, pixels))
    }

    fn allocate(&self, width: u32, height: u32, format: PixelFormat, label: &str) -> Option<Vec<u8>> {
        match self.budget.allocate(width, height, format) {
            Ok(buffer) => Some(buffer),
            Err(failure) => {
                log::error!("❌ 圆角合成{}分配失败（{}x{}）：{}", label, width, height, failure);
                None
            }
        }
    }
}

/// 源图按非预乘 RGBA 写入 `dst`，`Rgb8` 补全不透明 alpha。
fn copy_as_rgba(image: &RasterImage, dst: &mut [u8]) {
    match image.format() {
        PixelFormat::Rgba8 => dst.copy_from_slice(image.pixels()),
        PixelFormat::Rgb8 => {
            for (out, src) in dst.chunks_exact_mut(4).zip(image.pixels().chunks_exact(3)) {
                out.copy_from_slice(&[src[0], src[1], src[2], 255]);
            }
        }
    }
}

fn rounded_rect_path(width: f32, height: f32, rx: f32, ry: f32) -> Option<Path> {
    let (kx, ky) = (rx * KAPPA, ry * KAPPA);

    let mut pb = PathBuilder::new();
    pb.move_to(rx, 0.0);
    pb.line_to(width - rx, 0.0);
    pb.cubic_to(width - rx + kx, 0.0, width, ry - ky, width, ry);
    pb.line_to(width, height - ry);
    pb.cubic_to(width, height - ry + ky, width - rx + kx, height, width - rx, height);
    pb.line_to(rx, height);
    pb.cubic_to(rx - kx, height, 0.0, height - ry + ky, 0.0, height - ry);
    pb.line_to(0.0, ry);
    pb.cubic_to(0.0, ry - ky, rx - kx, 0.0, rx, 0.0);
    pb.close();
    pb.finish()
}
