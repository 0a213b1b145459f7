//! # 逐行下采样
//!
//! ## 设计思路
//!
//! 流式解码器每次只交出一行像素。`BoxDownsampler` 把每个
//! `factor x factor` 块累加后求平均，直接写进输出缓冲，
//! 整个过程只额外占用一行累加器，不保留全分辨率像素。
//!
//! 右边缘与下边缘的块可能不满，求平均时按实际像素数计算。

use super::source::PixelFormat;
use super::ImageError;

/// 解码器交出的源像素布局（均为 8 位通道，16 位灰度除外）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SourceLayout {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
    /// 大端 16 位灰度，取高字节。
    Gray16,
    Cmyk,
}

impl SourceLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::GrayAlpha | Self::Gray16 => 2,
            Self::Rgb => 3,
            Self::Rgba | Self::Cmyk => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, Self::GrayAlpha | Self::Rgba)
    }

    /// 未指定输出格式时的默认格式。
    pub fn natural_format(self) -> PixelFormat {
        if self.has_alpha() {
            PixelFormat::Rgba8
        } else {
            PixelFormat::Rgb8
        }
    }

    pub fn to_rgba(self, px: &[u8]) -> [u8; 4] {
        match self {
            Self::Gray | Self::Gray16 => [px[0], px[0], px[0], 255],
            Self::GrayAlpha => [px[0], px[0], px[0], px[1]],
            Self::Rgb => [px[0], px[1], px[2], 255],
            Self::Rgba => [px[0], px[1], px[2], px[3]],
            Self::Cmyk => {
                let k = 255 - px[3] as u16;
                let channel = |v: u8| ((255 - v as u16) * k / 255) as u8;
                [channel(px[0]), channel(px[1]), channel(px[2]), 255]
            }
        }
    }
}

/// 把一整块源像素按 `format` 写入 `dst`。
pub(super) fn convert_into(
    src: &[u8],
    layout: SourceLayout,
    format: PixelFormat,
    dst: &mut [u8],
) -> Result<(), ImageError> {
    let src_bpp = layout.bytes_per_pixel();
    let dst_bpp = format.bytes_per_pixel();
    if src.len() / src_bpp != dst.len() / dst_bpp {
        return Err(ImageError::Decode("解码后像素数量与输出缓冲不一致".to_string()));
    }

    for (px, out) in src.chunks_exact(src_bpp).zip(dst.chunks_exact_mut(dst_bpp)) {
        let rgba = layout.to_rgba(px);
        out.copy_from_slice(&rgba[..dst_bpp]);
    }
    Ok(())
}

/// 块平均下采样器。
pub(super) struct BoxDownsampler {
    layout: SourceLayout,
    format: PixelFormat,
    factor: u32,
    src_width: u32,
    out_width: u32,
    out_height: u32,
    sums: Vec<u64>,
    rows_in_block: u32,
    out_row: u32,
    out: Vec<u8>,
}

impl BoxDownsampler {
    /// `out` 必须恰好容纳 `ceil(src_width / factor) x ceil(src_height / factor)` 个像素。
    pub fn new(
        layout: SourceLayout,
        format: PixelFormat,
        factor: u32,
        src_width: u32,
        src_height: u32,
        out: Vec<u8>,
    ) -> Result<Self, ImageError> {
        let factor = factor.max(1);
        let out_width = src_width.div_ceil(factor);
        let out_height = src_height.div_ceil(factor);

        let expected = out_width as usize * out_height as usize * format.bytes_per_pixel();
        if out.len() != expected {
            return Err(ImageError::Decode(format!(
                "输出缓冲长度 {} 与期望 {} 不符",
                out.len(),
                expected
            )));
        }

        Ok(Self {
            layout,
            format,
            factor,
            src_width,
            out_width,
            out_height,
            sums: vec![0; out_width as usize * 4],
            rows_in_block: 0,
            out_row: 0,
            out,
        })
    }

    pub fn push_row(&mut self, row: &[u8]) -> Result<(), ImageError> {
        let bpp = self.layout.bytes_per_pixel();
        let needed = self.src_width as usize * bpp;
        let Some(row) = row.get(..needed) else {
            return Err(ImageError::Decode(format!("扫描行过短：{} < {}", row.len(), needed)));
        };

        for (x, px) in row.chunks_exact(bpp).enumerate() {
            let slot = x / self.factor as usize * 4;
            for (sum, value) in self.sums[slot..slot + 4].iter_mut().zip(self.layout.to_rgba(px)) {
                *sum += value as u64;
            }
        }

        self.rows_in_block += 1;
        if self.rows_in_block == self.factor {
            self.flush()?;
        }
        Ok(())
    }

    /// 冲掉残余的不满块并交出输出缓冲。
    pub fn finish(mut self) -> Result<Vec<u8>, ImageError> {
        if self.rows_in_block > 0 {
            self.flush()?;
        }
        if self.out_row != self.out_height {
            return Err(ImageError::Decode(format!(
                "扫描行不足：输出 {} 行，期望 {} 行",
                self.out_row, self.out_height
            )));
        }
        Ok(self.out)
    }

    fn flush(&mut self) -> Result<(), ImageError> {
        if self.out_row >= self.out_height {
            return Err(ImageError::Decode("扫描行多于图片高度".to_string()));
        }

        let dst_bpp = self.format.bytes_per_pixel();
        let row_start = self.out_row as usize * self.out_width as usize * dst_bpp;

        for ox in 0..self.out_width {
            let block_width = self.factor.min(self.src_width - ox * self.factor);
            let count = block_width as u64 * self.rows_in_block as u64;
            let slot = ox as usize * 4;
            let dst = row_start + ox as usize * dst_bpp;

            for channel in 0..dst_bpp {
                let sum = self.sums[slot + channel];
                self.out[dst + channel] = ((sum + count / 2) / count) as u8;
            }
        }

        self.sums.fill(0);
        self.rows_in_block = 0;
        self.out_row += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(layout: SourceLayout, format: PixelFormat, factor: u32, w: u32, h: u32, rows: &[Vec<u8>]) -> Vec<u8> {
        let out_len = w.div_ceil(factor) as usize * h.div_ceil(factor) as usize * format.bytes_per_pixel();
        let mut sampler = BoxDownsampler::new(layout, format, factor, w, h, vec![0; out_len]).expect("sampler");
        for row in rows {
            sampler.push_row(row).expect("push row");
        }
        sampler.finish().expect("finish")
    }

    #[test]
    fn factor_one_copies_pixels() {
        let rows = vec![vec![1, 2, 3, 4, 5, 6, 7, 8], vec![9, 10, 11, 12, 13, 14, 15, 16]];

        let out = run(SourceLayout::Rgba, PixelFormat::Rgba8, 1, 2, 2, &rows);

        assert_eq!(out, rows.concat());
    }

    #[test]
    fn full_block_is_averaged() {
        let rows = vec![vec![0, 10], vec![20, 31]];

        let out = run(SourceLayout::Gray, PixelFormat::Rgb8, 2, 2, 2, &rows);

        // (0 + 10 + 20 + 31 + 2) / 4 = 15
        assert_eq!(out, vec![15, 15, 15]);
    }

    #[test]
    fn partial_edge_blocks_use_actual_pixel_count() {
        // 3x3，因子 2：右列与底行各是不满块
        let rows = vec![vec![10, 10, 100], vec![10, 10, 100], vec![50, 50, 200]];

        let out = run(SourceLayout::Gray, PixelFormat::Rgb8, 2, 3, 3, &rows);

        assert_eq!(out.len(), 2 * 2 * 3);
        assert_eq!(&out[0..3], &[10, 10, 10]);
        assert_eq!(&out[3..6], &[100, 100, 100]);
        assert_eq!(&out[6..9], &[50, 50, 50]);
        assert_eq!(&out[9..12], &[200, 200, 200]);
    }

    #[test]
    fn missing_rows_are_reported() {
        let mut sampler =
            BoxDownsampler::new(SourceLayout::Gray, PixelFormat::Rgb8, 1, 1, 2, vec![0; 6]).expect("sampler");
        sampler.push_row(&[1]).expect("push row");

        assert!(matches!(sampler.finish(), Err(ImageError::Decode(_))));
    }

    #[test]
    fn short_row_is_rejected() {
        let mut sampler =
            BoxDownsampler::new(SourceLayout::Rgb, PixelFormat::Rgb8, 1, 2, 1, vec![0; 6]).expect("sampler");

        assert!(matches!(sampler.push_row(&[1, 2, 3]), Err(ImageError::Decode(_))));
    }

    #[test]
    fn cmyk_converts_to_rgb() {
        let mut dst = [0u8; 3];
        convert_into(&[0, 255, 255, 0], SourceLayout::Cmyk, PixelFormat::Rgb8, &mut dst).expect("convert");

        assert_eq!(dst, [255, 0, 0]);
    }
}
