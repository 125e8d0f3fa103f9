//! 媒体类型定义.

use std::fmt;

/// 媒体流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// 视频流
    Video,
    /// 音频流
    Audio,
    /// 字幕流
    Subtitle,
    /// 复用流 (内部仍是多路复用数据, 如 AVI 中的 DV 或 PS 中的 PS)
    Multiplex,
}

impl MediaType {
    /// 编码名前缀, 如 `video/h264` 中的 `video`
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitle => "subtitle",
            Self::Multiplex => "multiplex",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Video => "视频",
            Self::Audio => "音频",
            Self::Subtitle => "字幕",
            Self::Multiplex => "复用",
        };
        write!(f, "{name}")
    }
}
