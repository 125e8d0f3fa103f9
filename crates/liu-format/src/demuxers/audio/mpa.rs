//! MPEG-1/2/2.5 音频帧头 (Layer I/II/III).
//!
//! ```text
//! 同步字(11) 版本(2) 层(2) 保护位(1) 码率(4) 采样率(2) 填充(1) 私有(1)
//! 声道模式(2) 扩展(2) 版权(1) 原始(1) 加重(2)
//! ```

use liu_core::CodecId;

use super::FrameInfo;

/// MPEG 版本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    V1,
    V2,
    V25,
}

/// MPEG-1 Layer I 码率表 (kbps)
const BITRATE_V1_L1: [u32; 15] = [
    0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448,
];
/// MPEG-1 Layer II 码率表 (kbps)
const BITRATE_V1_L2: [u32; 15] = [
    0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384,
];
/// MPEG-1 Layer III 码率表 (kbps)
const BITRATE_V1_L3: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
/// MPEG-2/2.5 Layer I 码率表 (kbps)
const BITRATE_V2_L1: [u32; 15] = [
    0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256,
];
/// MPEG-2/2.5 Layer II/III 码率表 (kbps)
const BITRATE_V2_L23: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

const SAMPLE_RATE_V1: [u32; 3] = [44100, 48000, 32000];

/// 解析后的帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpaHeader {
    pub version: MpegVersion,
    /// 1~3
    pub layer: u8,
    pub protected: bool,
    /// bit/s
    pub bit_rate: u32,
    pub sample_rate: u32,
    pub padding: bool,
    /// 3 = 单声道
    pub channel_mode: u8,
    /// 整帧字节数 (含 4 字节帧头)
    pub frame_size: usize,
    pub samples_per_frame: u32,
}

impl MpaHeader {
    pub fn channels(&self) -> u16 {
        if self.channel_mode == 3 {
            1
        } else {
            2
        }
    }

    pub fn codec_id(&self) -> CodecId {
        match self.layer {
            1 => CodecId::Mp1,
            2 => CodecId::Mp2,
            _ => CodecId::Mp3,
        }
    }

    /// Layer III 边信息长度, Xing 标签紧随其后
    pub fn side_info_len(&self) -> usize {
        match (self.version, self.channel_mode == 3) {
            (MpegVersion::V1, false) => 32,
            (MpegVersion::V1, true) => 17,
            (_, false) => 17,
            (_, true) => 9,
        }
    }

    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            codec_id: self.codec_id(),
            sample_rate: self.sample_rate,
            channels: self.channels(),
            samples_per_frame: self.samples_per_frame,
            bit_rate: self.bit_rate,
            frame_size: self.frame_size,
        }
    }
}

/// 解析 4 字节帧头, 自由格式 (码率索引 0) 无法确定帧长, 视为无效
pub fn parse_header(data: &[u8]) -> Option<MpaHeader> {
    let b = data.get(..4)?;
    let h = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
    if h >> 21 != 0x7FF {
        return None;
    }
    let version = match (h >> 19) & 0x03 {
        0 => MpegVersion::V25,
        2 => MpegVersion::V2,
        3 => MpegVersion::V1,
        _ => return None,
    };
    let layer = match (h >> 17) & 0x03 {
        1 => 3u8,
        2 => 2,
        3 => 1,
        _ => return None,
    };
    let bitrate_index = ((h >> 12) & 0x0F) as usize;
    let sr_index = ((h >> 10) & 0x03) as usize;
    if bitrate_index == 0 || bitrate_index == 15 || sr_index == 3 {
        return None;
    }
    // 加重 10 为保留值
    if h & 0x03 == 2 {
        return None;
    }

    let table = match (version, layer) {
        (MpegVersion::V1, 1) => &BITRATE_V1_L1,
        (MpegVersion::V1, 2) => &BITRATE_V1_L2,
        (MpegVersion::V1, _) => &BITRATE_V1_L3,
        (_, 1) => &BITRATE_V2_L1,
        _ => &BITRATE_V2_L23,
    };
    let bit_rate = table[bitrate_index] * 1000;
    let sample_rate = match version {
        MpegVersion::V1 => SAMPLE_RATE_V1[sr_index],
        MpegVersion::V2 => SAMPLE_RATE_V1[sr_index] / 2,
        MpegVersion::V25 => SAMPLE_RATE_V1[sr_index] / 4,
    };
    let padding = (h >> 9) & 1 == 1;
    let pad = usize::from(padding);
    let (frame_size, samples_per_frame) = match (layer, version) {
        (1, _) => ((12 * bit_rate / sample_rate) as usize * 4 + pad * 4, 384),
        (2, _) => ((144 * bit_rate / sample_rate) as usize + pad, 1152),
        (_, MpegVersion::V1) => ((144 * bit_rate / sample_rate) as usize + pad, 1152),
        _ => ((72 * bit_rate / sample_rate) as usize + pad, 576),
    };
    if frame_size < 4 {
        return None;
    }

    Some(MpaHeader {
        version,
        layer,
        protected: (h >> 16) & 1 == 0,
        bit_rate,
        sample_rate,
        padding,
        channel_mode: ((h >> 6) & 0x03) as u8,
        frame_size,
        samples_per_frame,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// MPEG-1 Layer III 帧头, 立体声
    pub(crate) fn header(bitrate_index: u8, sr_index: u8, padding: bool) -> [u8; 4] {
        [
            0xFF,
            0xFB,
            (bitrate_index << 4) | (sr_index << 2) | (u8::from(padding) << 1),
            0x00,
        ]
    }

    /// 完整帧, 负载填 0
    pub(crate) fn frame(bitrate_index: u8, sr_index: u8, padding: bool) -> Vec<u8> {
        let h = header(bitrate_index, sr_index, padding);
        let size = parse_header(&h).unwrap().frame_size;
        let mut f = vec![0u8; size];
        f[..4].copy_from_slice(&h);
        f
    }

    #[test]
    fn test_mpeg1_layer3_帧长() {
        // 128kbps 44.1kHz: 144 * 128000 / 44100 = 417
        let h = parse_header(&header(9, 0, false)).unwrap();
        assert_eq!(h.version, MpegVersion::V1);
        assert_eq!(h.layer, 3);
        assert_eq!(h.bit_rate, 128_000);
        assert_eq!(h.sample_rate, 44100);
        assert_eq!(h.frame_size, 417);
        assert_eq!(h.samples_per_frame, 1152);
        assert_eq!(h.channels(), 2);
        assert_eq!(parse_header(&header(9, 0, true)).unwrap().frame_size, 418);
    }

    #[test]
    fn test_mpeg2_layer1_码率表() {
        // MPEG-2 Layer I, 码率索引 9 = 144kbps, 24kHz
        let h = parse_header(&[0xFF, 0xF7, 0x94, 0xC0]).unwrap();
        assert_eq!(h.version, MpegVersion::V2);
        assert_eq!(h.layer, 1);
        assert_eq!(h.bit_rate, 144_000);
        assert_eq!(h.sample_rate, 24000);
        assert_eq!(h.frame_size, (12 * 144_000 / 24000) * 4);
        assert_eq!(h.channels(), 1);
        assert_eq!(h.codec_id(), CodecId::Mp1);
    }

    #[test]
    fn test_mpeg25_layer3() {
        // MPEG-2.5 Layer III 8kHz 索引 2 (版本位 00)
        let h = parse_header(&[0xFF, 0xE3, 0x18, 0x00]).unwrap();
        assert_eq!(h.version, MpegVersion::V25);
        assert_eq!(h.sample_rate, 8000);
        assert_eq!(h.bit_rate, 8000);
        assert_eq!(h.samples_per_frame, 576);
        assert_eq!(h.frame_size, 72);
    }

    #[test]
    fn test_非法帧头() {
        assert!(parse_header(&[0xFF, 0xFB, 0x00, 0x00]).is_none()); // 自由格式
        assert!(parse_header(&[0xFF, 0xFB, 0xF0, 0x00]).is_none()); // 码率 15
        assert!(parse_header(&[0xFF, 0xFB, 0x9C, 0x00]).is_none()); // 采样率 3
        assert!(parse_header(&[0xFF, 0xF9, 0x90, 0x00]).is_none()); // 版本保留
        assert!(parse_header(&[0xFF, 0xF3, 0x90, 0x02]).is_none()); // 加重保留
        assert!(parse_header(&[0xFF, 0xFB, 0x90]).is_none());
    }
}
