//! PES (Packetized Elementary Stream) 包头.
//!
//! ```text
//! 00 00 01 stream_id  PES_packet_length(16)
//! MPEG-2: 10 scrambling priority alignment copyright original
//!         PTS_DTS_flags ESCR ES_rate trick CRC ext  header_data_length
//!         [PTS 5 字节] [DTS 5 字节] ...
//! MPEG-1: [0xFF 填充]* [01 STD_buffer 2 字节] (0010 PTS | 0011 PTS DTS | 0000 1111)
//! ```
//!
//! 时间戳为 33 位 90kHz, 分三段存放, 每段后跟一个标记位 (必须为 1).

use liu_core::{LiuError, LiuResult};

/// 节目流映射表
pub const STREAM_ID_PSM: u8 = 0xBC;
/// 私有流 1 (AC-3/DTS/LPCM/字幕)
pub const STREAM_ID_PRIVATE_1: u8 = 0xBD;
/// 填充流
pub const STREAM_ID_PADDING: u8 = 0xBE;
/// 私有流 2 (DVD 导航包)
pub const STREAM_ID_PRIVATE_2: u8 = 0xBF;

/// MPEG-1 最多填充字节数
const MAX_MPEG1_STUFFING: usize = 16;

/// 解析后的 PES 包头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// PES_packet_length, 0 表示不定长 (仅视频)
    pub packet_length: u16,
    /// 90kHz
    pub pts: Option<i64>,
    /// 90kHz
    pub dts: Option<i64>,
    /// 包头总长 (含 6 字节起始码与长度)
    pub header_len: usize,
    pub mpeg2: bool,
    pub data_alignment: bool,
}

impl PesHeader {
    /// 负载字节数 (不定长时为 None)
    pub fn payload_len(&self) -> Option<usize> {
        if self.packet_length == 0 {
            return None;
        }
        Some((usize::from(self.packet_length) + 6).saturating_sub(self.header_len))
    }
}

/// 该 stream_id 是否带可选包头 (PTS/DTS 等)
pub fn has_optional_header(stream_id: u8) -> bool {
    !matches!(
        stream_id,
        STREAM_ID_PSM | STREAM_ID_PADDING | STREAM_ID_PRIVATE_2 | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF
    )
}

/// 读取 5 字节时间戳, 校验前缀 (高 4 位) 与三个标记位
pub fn read_timestamp(data: &[u8], prefix: u8) -> Option<i64> {
    if data.len() < 5 {
        return None;
    }
    if data[0] >> 4 != prefix || data[0] & 1 == 0 || data[2] & 1 == 0 || data[4] & 1 == 0 {
        return None;
    }
    let b = |i: usize| i64::from(data[i]);
    Some(((b(0) >> 1) & 0x07) << 30 | b(1) << 22 | (b(2) >> 1) << 15 | b(3) << 7 | b(4) >> 1)
}

/// 编码 5 字节时间戳
pub fn write_timestamp(prefix: u8, ts: i64) -> [u8; 5] {
    let ts = ts as u64 & 0x1_FFFF_FFFF;
    [
        (prefix << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 1,
        (ts >> 22) as u8,
        (((ts >> 15) as u8 & 0x7F) << 1) | 1,
        (ts >> 7) as u8,
        ((ts as u8 & 0x7F) << 1) | 1,
    ]
}

/// 解析 PES 包头, `data` 从起始码 `00 00 01` 开始
///
/// 数据不足以容纳整个包头时返回 NeedMoreData, 结构非法时返回 InvalidData.
pub fn parse_pes_header(data: &[u8]) -> LiuResult<PesHeader> {
    if data.len() < 6 {
        return Err(LiuError::NeedMoreData);
    }
    if data[..3] != [0, 0, 1] {
        return Err(LiuError::InvalidData("PES: 起始码错误".into()));
    }
    let stream_id = data[3];
    let packet_length = u16::from_be_bytes([data[4], data[5]]);
    let mut header = PesHeader {
        stream_id,
        packet_length,
        pts: None,
        dts: None,
        header_len: 6,
        mpeg2: false,
        data_alignment: false,
    };
    if !has_optional_header(stream_id) {
        return Ok(header);
    }
    let first = *data.get(6).ok_or(LiuError::NeedMoreData)?;
    if first & 0xC0 == 0x80 {
        parse_mpeg2(data, &mut header)?;
    } else {
        parse_mpeg1(data, &mut header)?;
    }
    if packet_length != 0 && header.header_len > usize::from(packet_length) + 6 {
        return Err(LiuError::InvalidData(format!(
            "PES: 包头 {} 字节超出包长 {packet_length}",
            header.header_len
        )));
    }
    Ok(header)
}

fn parse_mpeg2(data: &[u8], header: &mut PesHeader) -> LiuResult<()> {
    if data.len() < 9 {
        return Err(LiuError::NeedMoreData);
    }
    header.mpeg2 = true;
    header.data_alignment = data[6] & 0x04 != 0;
    let flags = data[7] >> 6;
    let header_data_len = usize::from(data[8]);
    header.header_len = 9 + header_data_len;
    if data.len() < header.header_len {
        return Err(LiuError::NeedMoreData);
    }
    let opt = &data[9..header.header_len];
    match flags {
        0b10 => {
            header.pts = read_timestamp(opt, 0b0010);
            if header.pts.is_none() {
                return Err(LiuError::InvalidData("PES: PTS 标记位错误".into()));
            }
        }
        0b11 => {
            header.pts = read_timestamp(opt, 0b0011);
            header.dts = opt.get(5..).and_then(|d| read_timestamp(d, 0b0001));
            if header.pts.is_none() || header.dts.is_none() {
                return Err(LiuError::InvalidData("PES: PTS/DTS 标记位错误".into()));
            }
        }
        0b01 => return Err(LiuError::InvalidData("PES: PTS_DTS_flags 非法 (01)".into())),
        _ => {}
    }
    Ok(())
}

fn parse_mpeg1(data: &[u8], header: &mut PesHeader) -> LiuResult<()> {
    let mut pos = 6;
    let mut stuffing = 0;
    while *data.get(pos).ok_or(LiuError::NeedMoreData)? == 0xFF {
        pos += 1;
        stuffing += 1;
        if stuffing > MAX_MPEG1_STUFFING {
            return Err(LiuError::InvalidData("PES: MPEG-1 填充过长".into()));
        }
    }
    // STD 缓冲区
    if data[pos] & 0xC0 == 0x40 {
        pos += 2;
    }
    let marker = *data.get(pos).ok_or(LiuError::NeedMoreData)?;
    match marker >> 4 {
        0b0010 => {
            let ts = data.get(pos..pos + 5).ok_or(LiuError::NeedMoreData)?;
            header.pts = read_timestamp(ts, 0b0010);
            pos += 5;
        }
        0b0011 => {
            let ts = data.get(pos..pos + 10).ok_or(LiuError::NeedMoreData)?;
            header.pts = read_timestamp(ts, 0b0011);
            header.dts = read_timestamp(&ts[5..], 0b0001);
            pos += 10;
        }
        _ if marker == 0x0F => pos += 1,
        _ => {
            return Err(LiuError::InvalidData(format!(
                "PES: MPEG-1 包头标记 0x{marker:02X} 非法"
            )));
        }
    }
    if (marker >> 4 == 0b0010 || marker >> 4 == 0b0011) && header.pts.is_none() {
        return Err(LiuError::InvalidData("PES: MPEG-1 时间戳标记位错误".into()));
    }
    header.header_len = pos;
    Ok(())
}
