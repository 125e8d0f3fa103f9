//! RIFF 结构体与编码映射 (AVI 与 Matroska 的 VfW/ACM 兼容模式共用).
//!
//! - BITMAPINFOHEADER: 40 字节, biCompression 为视频 FourCC
//! - WAVEFORMATEX: 16~18 字节, wFormatTag 为音频格式码

use liu_core::{CodecId, LiuError, LiuResult};

/// BITMAPINFOHEADER 长度
pub const BITMAPINFOHEADER_SIZE: usize = 40;

/// WAVEFORMATEX 最短长度 (不含 cbSize)
pub const WAVEFORMATEX_MIN_SIZE: usize = 16;

/// WAVE_FORMAT_PCM
pub const WAVE_FORMAT_PCM: u16 = 0x0001;
/// WAVE_FORMAT_MPEG (Layer 1/2)
pub const WAVE_FORMAT_MPEG: u16 = 0x0050;
/// WAVE_FORMAT_MPEGLAYER3
pub const WAVE_FORMAT_MPEGLAYER3: u16 = 0x0055;
/// WAVE_FORMAT_AAC
pub const WAVE_FORMAT_AAC: u16 = 0x00FF;
/// WAVE_FORMAT_DOLBY_AC3_SPDIF / 常见 AC-3 标签
pub const WAVE_FORMAT_AC3: u16 = 0x2000;
/// WAVE_FORMAT_DTS
pub const WAVE_FORMAT_DTS: u16 = 0x2001;
/// WAVE_FORMAT_EXTENSIBLE
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// BITMAPINFOHEADER 中用到的字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitmapInfo {
    pub width: u32,
    pub height: u32,
    pub bit_count: u16,
    /// biCompression 原始字节
    pub compression: [u8; 4],
    /// 头部之后的附加数据
    pub extra: Vec<u8>,
}

impl BitmapInfo {
    /// 从字节解析, 不足 40 字节时报错
    pub fn parse(data: &[u8]) -> LiuResult<Self> {
        if data.len() < BITMAPINFOHEADER_SIZE {
            return Err(LiuError::InvalidData(format!(
                "BITMAPINFOHEADER 仅 {} 字节",
                data.len()
            )));
        }
        let height = i32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        Ok(Self {
            width: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            // 负高度表示自顶向下
            height: height.unsigned_abs(),
            bit_count: u16::from_le_bytes([data[14], data[15]]),
            compression: [data[16], data[17], data[18], data[19]],
            extra: data[BITMAPINFOHEADER_SIZE..].to_vec(),
        })
    }
}

/// WAVEFORMATEX 中用到的字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// cbSize 之后的附加数据
    pub extra: Vec<u8>,
}

impl WaveFormat {
    /// 从字节解析, 不足 16 字节时报错
    pub fn parse(data: &[u8]) -> LiuResult<Self> {
        if data.len() < WAVEFORMATEX_MIN_SIZE {
            return Err(LiuError::InvalidData(format!(
                "WAVEFORMATEX 仅 {} 字节",
                data.len()
            )));
        }
        let le16 = |o: usize| u16::from_le_bytes([data[o], data[o + 1]]);
        let le32 = |o: usize| u32::from_le_bytes([data[o], data[o + 1], data[o + 2], data[o + 3]]);
        let mut format_tag = le16(0);
        let extra = if data.len() >= 18 {
            let cb = usize::from(le16(16));
            let end = (18 + cb).min(data.len());
            data[18..end].to_vec()
        } else {
            Vec::new()
        };
        // EXTENSIBLE: SubFormat GUID 的前两字节即真实格式码
        if format_tag == WAVE_FORMAT_EXTENSIBLE && extra.len() >= 8 {
            format_tag = u16::from_le_bytes([extra[6], extra[7]]);
        }
        Ok(Self {
            format_tag,
            channels: le16(2),
            sample_rate: le32(4),
            avg_bytes_per_sec: le32(8),
            block_align: le16(12),
            bits_per_sample: le16(14),
            extra,
        })
    }
}

/// FourCC 转编码, 不区分大小写; 全零表示未压缩
pub fn fourcc_to_codec(fourcc: &[u8; 4]) -> CodecId {
    if fourcc == &[0; 4] {
        return CodecId::RawVideo;
    }
    let mut upper = *fourcc;
    upper.make_ascii_uppercase();
    match &upper {
        b"H264" | b"X264" | b"AVC1" | b"DAVC" => CodecId::H264,
        b"H265" | b"HEVC" | b"HVC1" => CodecId::H265,
        b"VP80" => CodecId::Vp8,
        b"VP90" => CodecId::Vp9,
        b"AV01" => CodecId::Av1,
        b"MP4V" | b"XVID" | b"DIVX" | b"DX50" | b"FMP4" | b"DIV5" => CodecId::Mpeg4,
        b"DIV3" | b"DIV4" | b"MP43" | b"MPG3" => CodecId::MsMpeg4v3,
        b"MPG1" | b"MPEG" | b"PIM1" => CodecId::Mpeg1Video,
        b"MPG2" | b"MX5P" | b"HDV1" => CodecId::Mpeg2Video,
        b"MJPG" | b"JPEG" | b"AVRN" => CodecId::Mjpeg,
        b"THEO" => CodecId::Theora,
        b"DVSD" | b"DV25" | b"DVHD" | b"CDVC" => CodecId::Dv,
        b"DIB " | b"RGB " | b"RAW " => CodecId::RawVideo,
        _ => CodecId::None,
    }
}

/// WAVE 格式码转编码
pub fn wave_format_to_codec(format_tag: u16, bits_per_sample: u16) -> CodecId {
    match format_tag {
        WAVE_FORMAT_PCM => match bits_per_sample {
            8 => CodecId::PcmU8,
            _ => CodecId::PcmS16le,
        },
        WAVE_FORMAT_MPEG => CodecId::Mp2,
        WAVE_FORMAT_MPEGLAYER3 => CodecId::Mp3,
        WAVE_FORMAT_AAC | 0x1600 | 0x706D => CodecId::Aac,
        WAVE_FORMAT_AC3 => CodecId::Ac3,
        WAVE_FORMAT_DTS => CodecId::Dts,
        0x566F => CodecId::Vorbis,
        0xF1AC => CodecId::Flac,
        _ => CodecId::None,
    }
}

/// FourCC 的可打印形式
pub fn fourcc_str(fourcc: &[u8; 4]) -> String {
    fourcc
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}
