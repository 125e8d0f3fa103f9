//! 统一错误类型定义.
//!
//! 所有 liu crate 共用的错误类型. 解封装器把可恢复的同步丢失与致命错误区分开,
//! 播放器据此决定是重新同步还是结束播放.

use thiserror::Error;

/// liu 框架统一错误类型
#[derive(Debug, Error)]
pub enum LiuError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的操作或编码
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 容器格式错误 (打开失败, 结构损坏)
    #[error("格式错误: {0}")]
    Format(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 数据不足, 需要更多输入
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 码流同步丢失, 调用方可尝试重新同步
    #[error("同步丢失: {0}")]
    SyncLost(String),

    /// 未找到能处理输入的容器格式
    #[error("未找到容器格式: {0}")]
    FormatNotFound(String),

    /// 未找到指定的流
    #[error("未找到流: 索引 {0}")]
    StreamNotFound(usize),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 功能未实现
    #[error("功能未实现: {0}")]
    NotImplemented(String),

    /// 操作被取消 (播放器关闭)
    #[error("操作已取消")]
    Cancelled,

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl LiuError {
    /// 是否为流结束
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }

    /// 是否可通过重新同步恢复
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SyncLost(_) | Self::InvalidData(_))
    }
}

/// liu 框架统一 Result 类型
pub type LiuResult<T> = Result<T, LiuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_错误分类() {
        assert!(LiuError::Eof.is_eof());
        assert!(LiuError::SyncLost("x".into()).is_recoverable());
        assert!(!LiuError::Format("x".into()).is_recoverable());
    }

    #[test]
    fn test_io_错误转换() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short");
        let err: LiuError = io.into();
        assert!(matches!(err, LiuError::Io(_)));
        assert!(err.to_string().starts_with("I/O 错误"));
    }
}
