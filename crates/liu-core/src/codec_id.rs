//! 编码标识符.
//!
//! 每种编码有一个稳定的字符串名 (`video/h264`, `audio/mp3`),
//! 下游管线按名字匹配处理阶段, 与容器格式无关.

use std::fmt;

use crate::MediaType;

/// 编码标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecId {
    /// 未知编码
    None,

    // ========================
    // 视频
    // ========================
    /// H.264 / AVC
    H264,
    /// H.265 / HEVC
    H265,
    /// VP8
    Vp8,
    /// VP9
    Vp9,
    /// AV1
    Av1,
    /// MPEG-1 视频
    Mpeg1Video,
    /// MPEG-2 视频
    Mpeg2Video,
    /// MPEG-4 Part 2 (DivX/XviD)
    Mpeg4,
    /// MS MPEG-4 v3 (DIV3)
    MsMpeg4v3,
    /// Motion JPEG
    Mjpeg,
    /// Theora
    Theora,
    /// DV
    Dv,
    /// 未压缩视频
    RawVideo,

    // ========================
    // 音频
    // ========================
    /// MPEG 音频 Layer 1
    Mp1,
    /// MPEG 音频 Layer 2
    Mp2,
    /// MPEG 音频 Layer 3
    Mp3,
    /// AAC
    Aac,
    /// AC-3
    Ac3,
    /// E-AC-3
    Eac3,
    /// DTS
    Dts,
    /// Vorbis
    Vorbis,
    /// Opus
    Opus,
    /// FLAC
    Flac,
    /// PCM 有符号 16 位小端
    PcmS16le,
    /// PCM 有符号 16 位大端
    PcmS16be,
    /// PCM 无符号 8 位
    PcmU8,
    /// DVD LPCM (大端, 带私有头)
    PcmDvd,

    // ========================
    // 字幕
    // ========================
    /// DVD 子图像
    DvdSubtitle,
    /// DVB 字幕
    DvbSubtitle,
    /// 纯文本 (UTF-8)
    Text,
    /// ASS/SSA
    Ass,
}

impl CodecId {
    /// 编码所属媒体类型
    pub const fn media_type(&self) -> MediaType {
        match self {
            Self::H264
            | Self::H265
            | Self::Vp8
            | Self::Vp9
            | Self::Av1
            | Self::Mpeg1Video
            | Self::Mpeg2Video
            | Self::Mpeg4
            | Self::MsMpeg4v3
            | Self::Mjpeg
            | Self::Theora
            | Self::Dv
            | Self::RawVideo => MediaType::Video,
            Self::Mp1
            | Self::Mp2
            | Self::Mp3
            | Self::Aac
            | Self::Ac3
            | Self::Eac3
            | Self::Dts
            | Self::Vorbis
            | Self::Opus
            | Self::Flac
            | Self::PcmS16le
            | Self::PcmS16be
            | Self::PcmU8
            | Self::PcmDvd => MediaType::Audio,
            Self::DvdSubtitle | Self::DvbSubtitle | Self::Text | Self::Ass => MediaType::Subtitle,
            Self::None => MediaType::Multiplex,
        }
    }

    /// 编码短名
    pub const fn short_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::H264 => "h264",
            Self::H265 => "hevc",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::Av1 => "av1",
            Self::Mpeg1Video => "mpeg1",
            Self::Mpeg2Video => "mpeg2",
            Self::Mpeg4 => "mpeg4",
            Self::MsMpeg4v3 => "msmpeg4v3",
            Self::Mjpeg => "mjpeg",
            Self::Theora => "theora",
            Self::Dv => "dv",
            Self::RawVideo => "raw",
            Self::Mp1 => "mp1",
            Self::Mp2 => "mp2",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Ac3 => "ac3",
            Self::Eac3 => "eac3",
            Self::Dts => "dts",
            Self::Vorbis => "vorbis",
            Self::Opus => "opus",
            Self::Flac => "flac",
            Self::PcmS16le => "pcm-s16le",
            Self::PcmS16be => "pcm-s16be",
            Self::PcmU8 => "pcm-u8",
            Self::PcmDvd => "pcm-dvd",
            Self::DvdSubtitle => "dvd",
            Self::DvbSubtitle => "dvb",
            Self::Text => "text",
            Self::Ass => "ass",
        }
    }

    /// 完整编码名, 形如 `audio/mp3`
    pub fn name(&self) -> String {
        format!("{}/{}", self.media_type().prefix(), self.short_name())
    }

    /// 按完整编码名反查
    pub fn from_name(name: &str) -> Option<Self> {
        ALL.iter().copied().find(|c| c.name() == name)
    }
}

const ALL: &[CodecId] = &[
    CodecId::H264,
    CodecId::H265,
    CodecId::Vp8,
    CodecId::Vp9,
    CodecId::Av1,
    CodecId::Mpeg1Video,
    CodecId::Mpeg2Video,
    CodecId::Mpeg4,
    CodecId::MsMpeg4v3,
    CodecId::Mjpeg,
    CodecId::Theora,
    CodecId::Dv,
    CodecId::RawVideo,
    CodecId::Mp1,
    CodecId::Mp2,
    CodecId::Mp3,
    CodecId::Aac,
    CodecId::Ac3,
    CodecId::Eac3,
    CodecId::Dts,
    CodecId::Vorbis,
    CodecId::Opus,
    CodecId::Flac,
    CodecId::PcmS16le,
    CodecId::PcmS16be,
    CodecId::PcmU8,
    CodecId::PcmDvd,
    CodecId::DvdSubtitle,
    CodecId::DvbSubtitle,
    CodecId::Text,
    CodecId::Ass,
];

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_编码名() {
        assert_eq!(CodecId::Mp3.name(), "audio/mp3");
        assert_eq!(CodecId::Mpeg2Video.name(), "video/mpeg2");
        assert_eq!(CodecId::DvdSubtitle.name(), "subtitle/dvd");
    }

    #[test]
    fn test_按名反查() {
        assert_eq!(CodecId::from_name("video/h264"), Some(CodecId::H264));
        assert_eq!(CodecId::from_name("video/unknown"), None);
    }
}
