//! MPEG-1/2 视频基本流的少量语法元素.
//!
//! 解封装只需要序列头 (尺寸, 帧率, 宽高比) 与图像编码扩展
//! (场/帧结构, 顶场优先), 不做任何解码.

use bytes::{Bytes, BytesMut};
use liu_core::{DataPacket, PacketFlags, Rational};

/// 图像起始码
pub const PICTURE_START_CODE: u8 = 0x00;
/// 序列头起始码
pub const SEQUENCE_HEADER_CODE: u8 = 0xB3;
/// GOP 起始码
pub const GOP_START_CODE: u8 = 0xB8;
/// 扩展起始码
pub const EXTENSION_START_CODE: u8 = 0xB5;
/// 图像编码扩展标识
const PICTURE_CODING_EXTENSION_ID: u8 = 0x8;

/// 帧率表, 下标为 frame_rate_code
const FRAME_RATES: [Rational; 9] = [
    Rational::UNDEFINED,
    Rational::new(24000, 1001),
    Rational::new(24, 1),
    Rational::new(25, 1),
    Rational::new(30000, 1001),
    Rational::new(30, 1),
    Rational::new(50, 1),
    Rational::new(60000, 1001),
    Rational::new(60, 1),
];

/// 序列头
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceHeader {
    pub width: u32,
    pub height: u32,
    /// 显示宽高比
    pub aspect: Rational,
    pub frame_rate: Rational,
    /// bit/s, 0 表示未知
    pub bit_rate: u64,
}

/// 在数据中查找起始码 `00 00 01 code`, 返回起始码之后的位置
pub fn find_start_code(data: &[u8], code: u8) -> Option<usize> {
    data.windows(4)
        .position(|w| w[0] == 0 && w[1] == 0 && w[2] == 1 && w[3] == code)
        .map(|p| p + 4)
}

/// 解析序列头, `data` 中任意位置出现的第一个序列头
pub fn parse_sequence_header(data: &[u8]) -> Option<SequenceHeader> {
    let start = find_start_code(data, SEQUENCE_HEADER_CODE)?;
    let b = data.get(start..start + 8)?;
    let width = (u32::from(b[0]) << 4) | u32::from(b[1] >> 4);
    let height = (u32::from(b[1] & 0x0F) << 8) | u32::from(b[2]);
    if width == 0 || height == 0 {
        return None;
    }
    let aspect = match b[3] >> 4 {
        1 => Rational::new(i64::from(width), i64::from(height)).reduce(),
        2 => Rational::new(4, 3),
        3 => Rational::new(16, 9),
        4 => Rational::new(221, 100),
        _ => Rational::UNDEFINED,
    };
    let frame_rate = FRAME_RATES
        .get(usize::from(b[3] & 0x0F))
        .copied()
        .unwrap_or(Rational::UNDEFINED);
    // 18 位, 单位 400 bit/s; 全 1 表示可变码率
    let rate = (u32::from(b[4]) << 10) | (u32::from(b[5]) << 2) | u32::from(b[6] >> 6);
    let bit_rate = if rate == 0x3FFFF { 0 } else { u64::from(rate) * 400 };
    Some(SequenceHeader {
        width,
        height,
        aspect,
        frame_rate,
        bit_rate,
    })
}

/// 第一个图像头的 picture_coding_type (1=I 2=P 3=B)
pub fn picture_coding_type(data: &[u8]) -> Option<u8> {
    let start = find_start_code(data, PICTURE_START_CODE)?;
    let b = data.get(start..start + 2)?;
    Some((b[1] >> 3) & 0x07)
}

/// 图像结构
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureStructure {
    TopField,
    BottomField,
    Frame,
}

/// 图像编码扩展中的场信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureCoding {
    pub structure: PictureStructure,
    pub top_field_first: bool,
}

/// 查找第一个图像编码扩展
pub fn parse_picture_coding(data: &[u8]) -> Option<PictureCoding> {
    let mut from = 0;
    while let Some(off) = find_start_code(&data[from..], EXTENSION_START_CODE) {
        let start = from + off;
        let b = data.get(start..start + 4)?;
        if b[0] >> 4 == PICTURE_CODING_EXTENSION_ID {
            let structure = match b[2] & 0x03 {
                1 => PictureStructure::TopField,
                2 => PictureStructure::BottomField,
                3 => PictureStructure::Frame,
                _ => return None,
            };
            return Some(PictureCoding {
                structure,
                top_field_first: b[3] & 0x80 != 0,
            });
        }
        from = start;
    }
    None
}

/// 场图像合并器
///
/// 开启 `force_frame_pic` 时, 把成对出现的场图像包合并为一个帧包,
/// 合并后的包沿用第一场的时间戳与位置.
#[derive(Debug, Default)]
pub struct FieldMerger {
    held: Option<DataPacket>,
}

impl FieldMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 送入一个视频包, 返回可以输出的包 (0~2 个)
    pub fn push(&mut self, mut pkt: DataPacket) -> Vec<DataPacket> {
        let coding = parse_picture_coding(pkt.data());
        if coding.is_some_and(|c| c.top_field_first) {
            pkt.flags |= PacketFlags::TOP_FIELD_FIRST;
        }
        let is_field = coding.is_some_and(|c| c.structure != PictureStructure::Frame);
        match (self.held.take(), is_field) {
            (Some(first), true) => vec![merge(first, &pkt)],
            (None, true) => {
                self.held = Some(pkt);
                Vec::new()
            }
            (Some(orphan), false) => vec![orphan, pkt],
            (None, false) => vec![pkt],
        }
    }

    /// 取出未配对的场 (流结束或清空时)
    pub fn take(&mut self) -> Option<DataPacket> {
        self.held.take()
    }
}

fn merge(mut first: DataPacket, second: &DataPacket) -> DataPacket {
    let mut buf = BytesMut::with_capacity(first.size() + second.size());
    buf.extend_from_slice(first.data());
    buf.extend_from_slice(second.data());
    first.planes = vec![Bytes::from(buf)];
    first.flags |= second.flags & PacketFlags::DISCONTINUITY;
    if first.duration > 0 && second.duration > 0 {
        first.duration += second.duration;
    }
    first
}
