//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义应用级 `AppError` 枚举，承载核心链路之外的错误来源
//! （设置文件、缓存目录、文件 I/O），核心链路错误经 `From` 原样包进来。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `ImageError` 与 `std::io::Error` 提供 `From` 转换，无需手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串，便于以 JSON 输出。

use serde::Serialize;

use crate::image_handler::ImageError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 图片处理链路错误（取流 / 解码 / 缓存 / 配置）
    #[error("{0}")]
    Image(#[from] ImageError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 存储目录不可用
    #[error("存储目录不可用: {0}")]
    Storage(String),

    /// 设置文件无法解析
    #[error("设置错误: {0}")]
    Settings(String),
}

impl AppError {
    /// 稳定错误码；核心链路错误沿用 `ImageError::code`。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Image(e) => e.code(),
            Self::Io(_) => "io",
            Self::Storage(_) => "storage",
            Self::Settings(_) => "settings",
        }
    }
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_error_keeps_its_message_and_code() {
        let err = AppError::from(ImageError::HttpStatus {
            status: 404,
            message: "未找到".to_string(),
        });

        assert_eq!(err.code(), "http_status");
        assert_eq!(
            serde_json::to_string(&err).expect("serialize"),
            "\"HTTP 404：未找到\""
        );
    }

    #[test]
    fn io_error_converts_with_question_mark() {
        fn read_missing() -> Result<Vec<u8>, AppError> {
            Ok(std::fs::read("/definitely/not/here.bin")?)
        }

        assert!(matches!(read_missing(), Err(AppError::Io(_))));
    }
}
