//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载取图链路中的所有错误来源，避免字符串拼接式错误处理。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! 注意：像素缓冲分配失败（内存预算不足）**不是**错误分支，
//! 解码 / 合成阶段以 `Ok(None)` 表达"无图可用"。

/// 图片链路统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("URL 错误：{0}")]
    InvalidUrl(String),

    #[error("网络错误：{0}")]
    Network(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    #[error("HTTP {status}：{message}")]
    HttpStatus { status: u16, message: String },

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("解码错误：{0}")]
    Decode(String),

    #[error("格式错误：{0}")]
    UnsupportedFormat(String),

    #[error("缓存错误：{0}")]
    Cache(String),

    #[error("锁已中毒：{0}")]
    LockPoisoned(&'static str),

    #[error("配置错误：{0}")]
    InvalidConfig(String),
}

impl ImageError {
    /// 稳定的错误码，供日志与上层分支使用。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "invalid_url",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::HttpStatus { .. } => "http_status",
            Self::ResourceLimit(_) => "resource_limit",
            Self::Decode(_) => "decode",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::Cache(_) => "cache",
            Self::LockPoisoned(_) => "lock_poisoned",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }

    /// 错误所属阶段：`fetch` / `decode` / `cache` / `config`。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_)
            | Self::Network(_)
            | Self::Timeout(_)
            | Self::HttpStatus { .. }
            | Self::ResourceLimit(_) => "fetch",
            Self::Decode(_) | Self::UnsupportedFormat(_) => "decode",
            Self::Cache(_) => "cache",
            Self::LockPoisoned(_) | Self::InvalidConfig(_) => "config",
        }
    }

    /// 是否属于"打开数据流"阶段的失败（对应 FetchError）。
    pub fn is_fetch_error(&self) -> bool {
        self.stage() == "fetch"
    }

    /// 是否属于"字节无法解码"的失败（对应 DecodeError）。
    pub fn is_decode_error(&self) -> bool {
        self.stage() == "decode"
    }
}
