//! # remote-bitmap：库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  main.rs (clap CLI)  /  其他调用方                        │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↓ Result<Option<RasterImage>, ImageError>
//! ┌───────┼──────────────────────────────────────────────────┐
//! │  ┌─ image_handler ───── 取流·边界探测·采样解码·圆角        │
//! │  │   ├─ fetcher          URL 安全校验 + 流式下载          │
//! │  │   ├─ decoder          image + fast_image_resize        │
//! │  │   └─ composite        tiny-skia 遮罩 + SourceIn        │
//! │  │                                                       │
//! │  ├─ response_cache ──── URL → 原始字节 (LRU / 磁盘+SQLite) │
//! │  ├─ settings            JSON 设置 → ImageConfig          │
//! │  ├─ storage             缓存目录解析与占用统计            │
//! │  └─ error               AppError (统一错误类型)           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`image_handler`] | 从 URL 取图并按请求尺寸采样解码，可选圆角合成 |
//! | [`response_cache`] | 以 URL 为键缓存原始响应，注入到取流器 |
//! | [`settings`] | 读取 / 保存 JSON 设置，转换为运行时配置 |
//! | [`storage`] | 缓存目录的获取与自动创建 |
//! | [`error`] | 应用级错误类型 `AppError` |

pub mod error;
pub mod image_handler;
pub mod response_cache;
pub mod settings;
pub mod storage;
