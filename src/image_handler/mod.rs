//! # 图片处理模块（image_handler）
//!
//! ## 设计思路
//!
//! 该模块将"取流 → 边界探测 → 采样解码 → 圆角合成"按职责拆分为多个子模块，
//! 避免单文件膨胀与耦合。
//!
//! - `handler`：编排整条处理流水线
//! - `fetcher`：URL 取流、安全校验、响应缓存读写
//! - `sampling`：采样因子计算（纯函数）
//! - `decoder`：边界探测与按采样因子解码
//! - `downsample`：流式逐行块平均下采样
//! - `composite`：圆角遮罩 + `SourceIn` 合成
//! - `allocation`：像素缓冲的预算检查与可失败分配
//! - `config/error/source`：配置、错误、中间数据模型
//!
//! ## 新同事快速上手
//!
//! ```text
//! ImageHandler::decode_sampled_bitmap_from_url
//!    ↓
//! fetcher.rs（缓存优先，只取一次）
//!    ↓
//! decoder.rs（reopen 出的游标上做边界探测）
//!    ├─ sampling.rs（计算采样因子）
//!    ├─ downsample.rs（PNG 逐行采样；JPEG 走 DCT 缩放）
//!    └─ allocation.rs（预算检查，失败返回 None）
//!    ↓
//! composite.rs（可选：圆角）
//! ```

mod allocation;
mod composite;
mod config;
mod decoder;
mod downsample;
mod error;
mod fetcher;
mod handler;
mod sampling;
mod source;

#[cfg(test)]
mod test_support;

pub use allocation::{AllocationFailure, PixelAllocator, PixelBudget, SystemAllocator};
pub use composite::CompositeRenderer;
pub use config::{ImageConfig, ImagePerformanceProfile};
pub use decoder::{DecodeOptions, SampledDecoder};
pub use error::ImageError;
pub use fetcher::StreamFetcher;
pub use handler::ImageHandler;
pub use sampling::compute_sample_factor;
pub use source::{
    ByteStream, DecodeRequest, ImageBounds, PixelFormat, RasterImage, SampleFactor, StreamOrigin, TargetSize,
};
