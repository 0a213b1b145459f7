//! # 像素缓冲分配
//!
//! ## 设计思路
//!
//! 像素缓冲是整条链路中唯一的大块内存。这里把"内存不足"建模为显式的
//! 可失败分配：先按 `width * height * bpp` 对照预算，再用
//! `Vec::try_reserve_exact` 申请，任何一步失败都返回 `AllocationFailure`，
//! 由解码 / 合成边界记录日志并转换为 `None`。
//!
//! 真正向系统申请内存的动作抽象为 [`PixelAllocator`]，默认实现为
//! [`SystemAllocator`]，测试可注入失败的分配器。

use std::collections::TryReserveError;
use std::fmt;

use super::source::PixelFormat;

/// 像素缓冲的底层分配器。
pub trait PixelAllocator: Send + Sync + fmt::Debug {
    /// 申请 `len` 字节并清零。
    fn try_allocate(&self, len: usize) -> Result<Vec<u8>, TryReserveError>;
}

/// 基于 `Vec::try_reserve_exact` 的系统分配器。
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl PixelAllocator for SystemAllocator {
    fn try_allocate(&self, len: usize) -> Result<Vec<u8>, TryReserveError> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(len)?;
        buffer.resize(len, 0);
        Ok(buffer)
    }
}

/// 像素分配预算。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBudget {
    pub max_bytes: u64,
    pub max_pixels: u64,
}

impl PixelBudget {
    pub fn new(max_bytes: u64, max_pixels: u64) -> Self {
        Self {
            max_bytes,
            max_pixels,
        }
    }

    /// 仅校验，不分配。
    pub fn check(&self, width: u32, height: u32, bytes_per_pixel: usize) -> Result<u64, AllocationFailure> {
        let pixels = (width as u64)
            .checked_mul(height as u64)
            .ok_or(AllocationFailure::Overflow)?;
        if pixels > self.max_pixels {
            return Err(AllocationFailure::TooManyPixels {
                pixels,
                limit: self.max_pixels,
            });
        }

        let required = pixels
            .checked_mul(bytes_per_pixel as u64)
            .ok_or(AllocationFailure::Overflow)?;
        self.check_bytes(required)?;
        Ok(required)
    }

    pub fn check_bytes(&self, required: u64) -> Result<(), AllocationFailure> {
        if required > self.max_bytes {
            return Err(AllocationFailure::OverBudget {
                required,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// 申请一块已清零的像素缓冲。
    pub fn allocate(&self, width: u32, height: u32, format: PixelFormat) -> Result<Vec<u8>, AllocationFailure> {
        self.allocate_with(&SystemAllocator, width, height, format)
    }

    /// 先按预算校验，再交给 `allocator` 申请。
    pub fn allocate_with(
        &self,
        allocator: &dyn PixelAllocator,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Vec<u8>, AllocationFailure> {
        let required = self.check(width, height, format.bytes_per_pixel())?;
        let len = usize::try_from(required).map_err(|_| AllocationFailure::Overflow)?;

        allocator.try_allocate(len).map_err(AllocationFailure::Exhausted)
    }
}

/// 分配失败原因。
#[derive(Debug, thiserror::Error)]
pub enum AllocationFailure {
    #[error("像素缓冲预计 {required} 字节，超过上限 {limit} 字节")]
    OverBudget { required: u64, limit: u64 },

    #[error("像素数 {pixels} 超过上限 {limit}")]
    TooManyPixels { pixels: u64, limit: u64 },

    #[error("像素缓冲尺寸溢出")]
    Overflow,

    #[error("系统内存不足：{0}")]
    Exhausted(TryReserveError),
}
