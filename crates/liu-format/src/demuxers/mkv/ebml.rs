//! EBML (Extensible Binary Meta Language) 基础解析.
//!
//! EBML 使用变长整数 (VINT) 编码元素 ID 和数据大小.
//!
//! # 变长整数
//! ```text
//! 首字节前导 0 的个数 k (0~7) 决定总长度 k+1:
//!   1xxxxxxx                  → 1 字节 (7 位数据)
//!   01xxxxxx xxxxxxxx         → 2 字节 (14 位数据)
//!   001xxxxx xxxxxxxx ×2      → 3 字节 (21 位数据)
//!   ...
//!   00000001 xxxxxxxx ×7      → 8 字节 (56 位数据)
//! ```
//!
//! 元素 ID 保留标记位 (0x1A45DFA3 就是写在文件里的样子), 大小去掉标记位;
//! 数据位全 1 的大小表示 "未知大小".
//!
//! # 预算
//!
//! 每个元素头都在父元素剩余字节数 (预算) 内解码. 元素头本身或声明的大小
//! 超出预算时立即报错, 不会越过父元素边界读取. 这是抵御损坏和截断文件的
//! 核心检查.

use liu_core::{LiuError, LiuResult};

use crate::io::IoContext;

/// "未知大小" 元素的标记值
pub const EBML_UNKNOWN_SIZE: u64 = u64::MAX;

/// 元素头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    /// 元素 ID (含标记位)
    pub id: u32,
    /// 数据大小 (未知大小时已被限制到父元素预算)
    pub size: u64,
    /// 头部字节数 (ID + 大小)
    pub header_len: u64,
    /// 数据区在源中的起始位置
    pub data_pos: u64,
    /// 声明为未知大小
    pub unknown_size: bool,
}

impl ElementHeader {
    /// 元素总字节数 (头部 + 数据)
    pub fn total_len(&self) -> u64 {
        self.header_len + self.size
    }

    /// 数据区结束位置
    pub fn end_pos(&self) -> u64 {
        self.data_pos + self.size
    }
}

/// 处理器对一个元素的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementAction {
    /// 已读取恰好 `size` 字节
    Consumed,
    /// 未识别, 由读取器跳过
    Unknown,
    /// 停止遍历 (当前元素的数据尚未读取)
    Stop,
}

/// 元素处理器
pub trait ElementHandler {
    /// 处理一个元素, 调用时 I/O 位于元素数据区起点
    fn element(&mut self, io: &mut IoContext, header: &ElementHeader) -> LiuResult<ElementAction>;
}

impl<F> ElementHandler for F
where
    F: FnMut(&mut IoContext, &ElementHeader) -> LiuResult<ElementAction>,
{
    fn element(&mut self, io: &mut IoContext, header: &ElementHeader) -> LiuResult<ElementAction> {
        self(io, header)
    }
}

/// `read_elements` 的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementsEnd {
    /// 预算耗尽
    Done,
    /// 处理器要求停止, I/O 位于该元素数据区起点
    Stopped(ElementHeader),
}

// ========================
// 变长整数
// ========================

/// 从切片解码 VINT 数据值, 返回 (值, 字节数); 全 1 时返回 EBML_UNKNOWN_SIZE
pub fn parse_vint(data: &[u8]) -> Option<(u64, usize)> {
    let first = *data.first()?;
    if first == 0 {
        return None;
    }
    let len = first.leading_zeros() as usize + 1;
    if data.len() < len {
        return None;
    }
    let mut value = u64::from(first & (0xFFu16 >> len) as u8);
    for &b in &data[1..len] {
        value = (value << 8) | u64::from(b);
    }
    if value == (1u64 << (7 * len)) - 1 {
        return Some((EBML_UNKNOWN_SIZE, len));
    }
    Some((value, len))
}

/// 从切片解码有符号 VINT (EBML 交织的差值编码), 返回 (值, 字节数)
pub fn parse_svint(data: &[u8]) -> Option<(i64, usize)> {
    let first = *data.first()?;
    if first == 0 {
        return None;
    }
    let len = first.leading_zeros() as usize + 1;
    if data.len() < len {
        return None;
    }
    let mut raw = u64::from(first & (0xFFu16 >> len) as u8);
    for &b in &data[1..len] {
        raw = (raw << 8) | u64::from(b);
    }
    let bias = (1i64 << (7 * len - 1)) - 1;
    Some((raw as i64 - bias, len))
}

/// 从切片解码元素 ID (最多 4 字节, 保留标记位)
pub fn parse_element_id(data: &[u8]) -> Option<(u32, usize)> {
    let first = *data.first()?;
    if first == 0 {
        return None;
    }
    let len = first.leading_zeros() as usize + 1;
    if len > 4 || data.len() < len {
        return None;
    }
    let id = data[..len]
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    Some((id, len))
}

/// 编码 VINT 数据值 (最短长度, 避开全 1 的保留值)
///
/// 取值范围为 `[0, 2^56 - 1)`.
pub fn encode_vint(value: u64) -> Vec<u8> {
    let mut len = 1usize;
    while len < 8 && value >= (1u64 << (7 * len)) - 1 {
        len += 1;
    }
    let marked = value | (1u64 << (7 * len));
    marked.to_be_bytes()[8 - len..].to_vec()
}

/// 编码元素 ID
pub fn encode_element_id(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(3);
    bytes[skip..].to_vec()
}

// ========================
// 元素头
// ========================

/// 在 `budget` 字节的预算内读取元素头
///
/// 元素头或声明的大小超出预算时返回错误, 且不消耗任何字节.
/// 未知大小只允许出现在 Segment 和 Cluster 上, 其大小被限制为剩余预算.
pub fn read_element_header(io: &mut IoContext, budget: u64) -> LiuResult<ElementHeader> {
    let start = io.position();
    let window = io.peek(12.min(budget as usize))?;
    if window.is_empty() {
        return Err(LiuError::Eof);
    }
    let (id, id_len) = parse_element_id(window).ok_or_else(|| {
        LiuError::InvalidData(format!("EBML: 偏移 {start} 处元素 ID 无效或越过父元素边界"))
    })?;
    let (size, size_len) = parse_vint(&window[id_len..]).ok_or_else(|| {
        LiuError::InvalidData(format!(
            "EBML: 元素 0x{id:X} 的大小字段无效或越过父元素边界"
        ))
    })?;
    let header_len = (id_len + size_len) as u64;
    let room = budget - header_len;
    let (size, unknown_size) = if size == EBML_UNKNOWN_SIZE {
        if id != SEGMENT && id != CLUSTER {
            return Err(LiuError::InvalidData(format!(
                "EBML: 元素 0x{id:X} 不允许未知大小"
            )));
        }
        (room, true)
    } else {
        (size, false)
    };
    if size > room {
        return Err(LiuError::InvalidData(format!(
            "EBML: 元素 0x{id:X} 声明大小 {size} 超出父元素剩余 {room} 字节"
        )));
    }
    io.skip(header_len)?;
    Ok(ElementHeader {
        id,
        size,
        header_len,
        data_pos: start + header_len,
        unknown_size,
    })
}

/// 在 `budget` 字节内循环读取子元素, 逐个交给闭包处理
///
/// - `Consumed`: 校验处理器恰好读了 `size` 字节, 否则报错
/// - `Unknown`: 跳过 `size` 字节
/// - `Stop`: 立即返回, I/O 停在该元素数据区起点
/// - 处理器返回错误: 原样向上传播
pub fn read_elements<F>(io: &mut IoContext, budget: u64, mut f: F) -> LiuResult<ElementsEnd>
where
    F: FnMut(&mut IoContext, &ElementHeader) -> LiuResult<ElementAction>,
{
    read_elements_with(io, budget, &mut f)
}

/// 同 [`read_elements`], 处理器为 trait 对象
pub fn read_elements_with(
    io: &mut IoContext,
    budget: u64,
    handler: &mut dyn ElementHandler,
) -> LiuResult<ElementsEnd> {
    let end = io.position() + budget;
    loop {
        let pos = io.position();
        if pos >= end {
            return Ok(ElementsEnd::Done);
        }
        let header = read_element_header(io, end - pos)?;
        match handler.element(io, &header)? {
            ElementAction::Consumed => {
                let after = io.position();
                if after != header.end_pos() {
                    return Err(LiuError::InvalidData(format!(
                        "EBML: 元素 0x{:X} 声明 {} 字节, 实际读取 {} 字节",
                        header.id,
                        header.size,
                        after as i128 - header.data_pos as i128
                    )));
                }
            }
            ElementAction::Unknown => {
                log::trace!("EBML: 跳过元素 0x{:X} ({} 字节)", header.id, header.size);
                io.skip(header.size)?;
            }
            ElementAction::Stop => return Ok(ElementsEnd::Stopped(header)),
        }
    }
}

// ========================
// 标量读取
// ========================

/// 读取无符号整数 (大端, 0~8 字节, 0 字节表示值 0)
pub fn read_uint(io: &mut IoContext, size: u64) -> LiuResult<u64> {
    if size > 8 {
        return Err(LiuError::InvalidData(format!("EBML: 无效的 uint 大小: {size}")));
    }
    let mut buf = [0u8; 8];
    io.read_exact(&mut buf[8 - size as usize..])?;
    Ok(u64::from_be_bytes(buf))
}

/// 读取有符号整数 (大端, 符号扩展)
pub fn read_sint(io: &mut IoContext, size: u64) -> LiuResult<i64> {
    let u = read_uint(io, size)?;
    if size == 0 {
        return Ok(0);
    }
    let shift = 64 - size * 8;
    Ok(((u << shift) as i64) >> shift)
}

/// 读取浮点数 (0/4/8/10 字节, 10 字节为 80 位扩展精度)
pub fn read_float(io: &mut IoContext, size: u64) -> LiuResult<f64> {
    match size {
        0 => Ok(0.0),
        4 => Ok(f64::from(f32::from_bits(read_uint(io, 4)? as u32))),
        8 => Ok(f64::from_bits(read_uint(io, 8)?)),
        10 => {
            let mut buf = [0u8; 10];
            io.read_exact(&mut buf)?;
            Ok(extended_to_f64(&buf))
        }
        _ => Err(LiuError::InvalidData(format!("EBML: 无效的浮点数大小: {size}"))),
    }
}

/// 80 位扩展精度 (大端) 转 f64
pub fn extended_to_f64(buf: &[u8; 10]) -> f64 {
    let sign_exp = u16::from_be_bytes([buf[0], buf[1]]);
    let mut mant = [0u8; 8];
    mant.copy_from_slice(&buf[2..]);
    let mantissa = u64::from_be_bytes(mant);
    let negative = sign_exp & 0x8000 != 0;
    let exp = i32::from(sign_exp & 0x7FFF);
    let magnitude = if exp == 0 && mantissa == 0 {
        0.0
    } else if exp == 0x7FFF {
        if mantissa << 1 == 0 { f64::INFINITY } else { f64::NAN }
    } else {
        // 显式整数位, 值 = mantissa * 2^(exp - 16383 - 63)
        mantissa as f64 * 2f64.powi(exp - 16383 - 63)
    };
    if negative { -magnitude } else { magnitude }
}

/// 读取 UTF-8 字符串 (截断到第一个 NUL)
pub fn read_string(io: &mut IoContext, size: u64) -> LiuResult<String> {
    let data = read_binary(io, size)?;
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    Ok(String::from_utf8_lossy(&data[..end]).into_owned())
}

/// 读取二进制数据
pub fn read_binary(io: &mut IoContext, size: u64) -> LiuResult<Vec<u8>> {
    let len = usize::try_from(size)
        .map_err(|_| LiuError::InvalidData(format!("EBML: 二进制元素过大: {size}")))?;
    io.read_bytes(len)
}

// ========================
// 已知的 Matroska 元素 ID
// ========================

// EBML Header
pub const EBML_HEADER: u32 = 0x1A45_DFA3;
pub const EBML_DOC_TYPE: u32 = 0x4282;
pub const EBML_DOC_TYPE_VERSION: u32 = 0x4287;

// 全局元素
pub const VOID: u32 = 0xEC;
pub const CRC32: u32 = 0xBF;

// Segment
pub const SEGMENT: u32 = 0x1853_8067;

// SeekHead
pub const SEEK_HEAD: u32 = 0x114D_9B74;
pub const SEEK: u32 = 0x4DBB;
pub const SEEK_ID: u32 = 0x53AB;
pub const SEEK_POSITION: u32 = 0x53AC;

// Segment Information
pub const SEGMENT_INFO: u32 = 0x1549_A966;
pub const INFO_TIMECODE_SCALE: u32 = 0x002A_D7B1;
pub const INFO_DURATION: u32 = 0x4489;
pub const INFO_TITLE: u32 = 0x7BA9;
pub const INFO_MUXING_APP: u32 = 0x4D80;
pub const INFO_WRITING_APP: u32 = 0x5741;

// Tracks
pub const TRACKS: u32 = 0x1654_AE6B;
pub const TRACK_ENTRY: u32 = 0xAE;
pub const TRACK_NUMBER: u32 = 0xD7;
pub const TRACK_UID: u32 = 0x73C5;
pub const TRACK_TYPE: u32 = 0x83;
pub const TRACK_FLAG_DEFAULT: u32 = 0x88;
pub const TRACK_FLAG_FORCED: u32 = 0x55AA;
pub const TRACK_FLAG_LACING: u32 = 0x9C;
pub const TRACK_DEFAULT_DURATION: u32 = 0x0023_E383;
pub const TRACK_NAME: u32 = 0x536E;
pub const TRACK_LANGUAGE: u32 = 0x0022_B59C;
pub const TRACK_CODEC_ID: u32 = 0x86;
pub const TRACK_CODEC_PRIVATE: u32 = 0x63A2;

// Video settings
pub const VIDEO_SETTINGS: u32 = 0xE0;
pub const VIDEO_PIXEL_WIDTH: u32 = 0xB0;
pub const VIDEO_PIXEL_HEIGHT: u32 = 0xBA;
pub const VIDEO_DISPLAY_WIDTH: u32 = 0x54B0;
pub const VIDEO_DISPLAY_HEIGHT: u32 = 0x54BA;

// Audio settings
pub const AUDIO_SETTINGS: u32 = 0xE1;
pub const AUDIO_SAMPLING_FREQ: u32 = 0xB5;
pub const AUDIO_OUTPUT_SAMPLING_FREQ: u32 = 0x78B5;
pub const AUDIO_CHANNELS: u32 = 0x9F;
pub const AUDIO_BIT_DEPTH: u32 = 0x6264;

// Cluster
pub const CLUSTER: u32 = 0x1F43_B675;
pub const CLUSTER_TIMECODE: u32 = 0xE7;
pub const CLUSTER_POSITION: u32 = 0xA7;
pub const CLUSTER_PREV_SIZE: u32 = 0xAB;
pub const SIMPLE_BLOCK: u32 = 0xA3;
pub const BLOCK_GROUP: u32 = 0xA0;
pub const BLOCK: u32 = 0xA1;
pub const BLOCK_DURATION: u32 = 0x9B;
pub const REFERENCE_BLOCK: u32 = 0xFB;

// Cues
pub const CUES: u32 = 0x1C53_BB6B;
pub const CUE_POINT: u32 = 0xBB;
pub const CUE_TIME: u32 = 0xB3;
pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
pub const CUE_TRACK: u32 = 0xF7;
pub const CUE_CLUSTER_POSITION: u32 = 0xF1;

// 其他顶层元素
pub const TAGS: u32 = 0x1254_C367;
pub const ATTACHMENTS: u32 = 0x1941_A469;
pub const CHAPTERS: u32 = 0x1043_A770;
