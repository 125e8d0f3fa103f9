//! 音频帧解析与音频裸流解封装.
//!
//! 每种编码一个帧头解析模块, 统一产出 [`FrameInfo`]. 裸流解封装器
//! ([`EsDemuxer`]) 与 TS/PS 的流参数补全都建立在这些解析函数之上.

pub mod ac3;
pub mod adts;
pub mod dts;
mod es;
pub mod mpa;
pub mod tags;
pub mod xing;

pub use es::{EsDemuxer, EsProbe};

use liu_core::CodecId;

use crate::format_id::FormatId;

/// 一帧的基本参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub codec_id: CodecId,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples_per_frame: u32,
    /// bit/s
    pub bit_rate: u32,
    /// 整帧字节数 (含帧头)
    pub frame_size: usize,
}

/// 帧格式族
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// MPEG 音频 Layer I/II/III
    Mpa,
    Adts,
    /// AC-3 与 E-AC-3
    Ac3,
    /// DTS 四种布局
    Dts,
}

impl FrameKind {
    pub fn from_format(format: FormatId) -> Option<Self> {
        match format {
            FormatId::MpegAudio => Some(Self::Mpa),
            FormatId::AacAdts => Some(Self::Adts),
            FormatId::Ac3 => Some(Self::Ac3),
            FormatId::Dts => Some(Self::Dts),
            _ => None,
        }
    }

    pub fn from_codec(codec: CodecId) -> Option<Self> {
        match codec {
            CodecId::Mp1 | CodecId::Mp2 | CodecId::Mp3 => Some(Self::Mpa),
            CodecId::Aac => Some(Self::Adts),
            CodecId::Ac3 | CodecId::Eac3 => Some(Self::Ac3),
            CodecId::Dts => Some(Self::Dts),
            _ => None,
        }
    }

    pub fn format_id(self) -> FormatId {
        match self {
            Self::Mpa => FormatId::MpegAudio,
            Self::Adts => FormatId::AacAdts,
            Self::Ac3 => FormatId::Ac3,
            Self::Dts => FormatId::Dts,
        }
    }

    /// 解析帧头至少需要的字节数
    pub const fn header_len(self) -> usize {
        match self {
            Self::Mpa => 4,
            Self::Adts => 7,
            Self::Ac3 => 8,
            Self::Dts => dts::HEADER_RAW_LEN,
        }
    }

    /// 解析 `data` 开头的帧头
    pub fn parse(self, data: &[u8]) -> Option<FrameInfo> {
        match self {
            Self::Mpa => mpa::parse_header(data).map(|h| h.info()),
            Self::Adts => adts::parse_header(data).map(|h| h.info()),
            Self::Ac3 => ac3::parse_header(data).map(|h| h.info()),
            Self::Dts => dts::parse_header(data).map(|h| h.info()),
        }
    }

    /// 两帧是否属于同一条流
    ///
    /// MPEG 音频要求层相同; AC-3 流里可能夹带 E-AC-3 依赖子流, 只比较采样率.
    pub fn compatible(self, a: &FrameInfo, b: &FrameInfo) -> bool {
        a.sample_rate == b.sample_rate && (self != Self::Mpa || a.codec_id == b.codec_id)
    }

    /// `data[pos..]` 处是否为可信的帧: 帧头有效, 且下一帧帧头也有效
    /// 或下一帧超出 `data` 范围
    ///
    /// `at_end` 表示 `data` 之后再无数据, 此时帧必须完整落在 `data` 内.
    pub fn check(self, data: &[u8], pos: usize, at_end: bool) -> Option<FrameInfo> {
        let info = self.parse(&data[pos..])?;
        let next = pos + info.frame_size;
        if next + self.header_len() <= data.len() {
            let following = self.parse(&data[next..])?;
            return self.compatible(&info, &following).then_some(info);
        }
        if at_end && next > data.len() {
            return None;
        }
        Some(info)
    }
}

/// 在 `data` 中查找第一个可信的帧, 返回位置与帧信息
pub fn scan(kind: FrameKind, data: &[u8], at_end: bool) -> Option<(usize, FrameInfo)> {
    let last = data.len().checked_sub(kind.header_len())?;
    (0..=last).find_map(|pos| kind.check(data, pos, at_end).map(|info| (pos, info)))
}

/// 按编码在负载中查找第一个帧 (供 TS/PS 补全流参数)
pub fn find_frame(codec: CodecId, data: &[u8]) -> Option<FrameInfo> {
    let kind = FrameKind::from_codec(codec)?;
    scan(kind, data, false).map(|(_, info)| info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_查找帧要求下一帧有效() {
        let mut data = vec![0x12, 0xFF, 0xFB]; // 伪同步
        data.extend(mpa::tests::frame(9, 0, false));
        data.extend(mpa::tests::frame(9, 0, true));
        let (pos, info) = scan(FrameKind::Mpa, &data, true).unwrap();
        assert_eq!(pos, 3);
        assert_eq!(info.codec_id, CodecId::Mp3);
        assert_eq!(info.frame_size, 417);
    }

    #[test]
    fn test_末尾截断帧() {
        let f = adts::tests::frame(50);
        assert!(scan(FrameKind::Adts, &f, true).is_some());
        assert!(scan(FrameKind::Adts, &f[..30], true).is_none());
        assert!(scan(FrameKind::Adts, &f[..30], false).is_some());
    }

    #[test]
    fn test_按编码查找() {
        let mut data = vec![0u8; 5];
        data.extend(ac3::tests::ac3_frame(15));
        let info = find_frame(CodecId::Ac3, &data).unwrap();
        assert_eq!(info.sample_rate, 48000);
        assert_eq!(info.channels, 6);
        assert!(find_frame(CodecId::H264, &data).is_none());
        assert_eq!(FrameKind::from_codec(CodecId::Eac3), Some(FrameKind::Ac3));
    }
}
