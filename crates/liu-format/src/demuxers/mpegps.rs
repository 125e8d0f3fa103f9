//! MPEG-PS (Program Stream) 解封装器.
//!
//! 覆盖 MPEG-1 系统流, MPEG-2 节目流与 DVD VOB, 以及没有系统层的
//! MPEG-1/2 视频基本流 (以序列头 `00 00 01 B3` 开头).
//!
//! # 结构
//! ```text
//! 00 00 01 BA  pack 头: SCR, mux_rate (MPEG-1 12 字节 / MPEG-2 14 字节 + 填充)
//! 00 00 01 BB  系统头
//! 00 00 01 BC  节目流映射 (PSM)
//! 00 00 01 xx  PES (BD 私有流 1, BF 私有流 2, C0-DF 音频, E0-EF 视频)
//! 00 00 01 B9  结束码
//! ```
//!
//! 私有流 1 的第一个负载字节是子流号: 0x20-0x3F 字幕, 0x80-0x87 AC-3,
//! 0x88-0x8F DTS, 0xA0-0xA7 LPCM, 子流头在输出前去掉.
//!
//! DVD 导航包 (私有流 2 的 PCI) 给出每个 VOBU 的起止 PTM. 相邻 VOBU
//! 不衔接时调整时间戳偏移并插入 Flush; 以序列结束码收尾的 VOBU 之后
//! 插入 Still; 音频子流集合变化时对相关音频流插入 Flush.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::SeekFrom;

use bytes::{Bytes, BytesMut};
use liu_core::crc::crc32_mpeg2;
use liu_core::timestamp::{format_ticks, from_90k, to_90k, unwrap_33bit};
use liu_core::{
    CodecId, DataPacket, LiuError, LiuResult, MediaType, Packet, PacketFlags, TICKS_PER_SECOND,
};
use log::{debug, info, trace, warn};

use crate::config::{DemuxConfig, MpegConfig};
use crate::demuxer::Demuxer;
use crate::demuxers::mpeg::descriptor::{self, EsDescriptors};
use crate::demuxers::mpeg::pes::{
    self, STREAM_ID_PADDING, STREAM_ID_PRIVATE_1, STREAM_ID_PRIVATE_2, STREAM_ID_PSM,
};
use crate::demuxers::mpeg::video::{self, FieldMerger, PictureStructure};
use crate::demuxers::mpeg::{self, resolve_codec};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{self, FormatProbe, ProbeScore};
use crate::stream::{AudioParams, Stream, StreamFlags};

const PACK_START_CODE: u8 = 0xBA;
const SYSTEM_HEADER_CODE: u8 = 0xBB;
const PROGRAM_END_CODE: u8 = 0xB9;

/// 起始码扫描窗口
const SCAN_WINDOW: usize = 64 * 1024;
/// 时长估算与定位采样的扫描范围
const PTS_SCAN_BYTES: u64 = 1 << 20;
/// 视频基本流每次读取的块大小
const ES_CHUNK: usize = 64 * 1024;
/// 定位时区间收缩到此以下即停止
const MIN_SEEK_SPAN: u64 = 2048;
/// 相邻 VOBU PTM 相差不超过此值 (90kHz) 视为衔接
const PTM_SLACK: i64 = 3;
/// DVD LPCM 子流头长度 (含子流号)
const LPCM_HEADER_LEN: usize = 7;

/// 流的查找键: stream_id << 8 | 子流号
fn stream_key(stream_id: u8, sub_id: u8) -> u16 {
    (u16::from(stream_id) << 8) | u16::from(sub_id)
}

/// 私有流 1 子流号 -> (编码, 需去掉的子流头字节数)
fn classify_private(sub_id: u8) -> Option<(CodecId, usize)> {
    match sub_id {
        0x20..=0x3F => Some((CodecId::DvdSubtitle, 1)),
        0x80..=0x87 => Some((CodecId::Ac3, 4)),
        0x88..=0x8F => Some((CodecId::Dts, 4)),
        0xA0..=0xA7 => Some((CodecId::PcmDvd, LPCM_HEADER_LEN)),
        _ => None,
    }
}

/// 带长度字段的系统层起始码 (pack 头与结束码之外的 0xBB..=0xFF)
fn has_length(code: u8) -> bool {
    code >= SYSTEM_HEADER_CODE
}

/// 查找系统层起始码 `00 00 01 (B9..FF)`, 返回 `00` 的位置
fn find_system_code(data: &[u8]) -> Option<usize> {
    data.windows(4)
        .position(|w| w[0] == 0 && w[1] == 0 && w[2] == 1 && w[3] >= PROGRAM_END_CODE)
}

/// pack 头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PackHeader {
    mpeg2: bool,
    /// 27MHz
    scr: i64,
    /// 字节/秒
    mux_rate: u64,
    /// 含填充的总长
    len: usize,
}

/// 解析 pack 头, `data` 从 `00 00 01 BA` 开始
fn parse_pack_header(data: &[u8]) -> Option<PackHeader> {
    let b = |i: usize| data.get(i).copied().map(i64::from);
    let first = *data.get(4)?;
    if first >> 6 == 0b01 {
        let h = data.get(..14)?;
        if h[4] & 0x04 == 0 || h[6] & 0x04 == 0 || h[8] & 0x04 == 0 || h[9] & 0x01 == 0 {
            return None;
        }
        let base = ((b(4)? >> 3) & 0x07) << 30
            | (b(4)? & 0x03) << 28
            | b(5)? << 20
            | (b(6)? >> 3) << 15
            | (b(6)? & 0x03) << 13
            | b(7)? << 5
            | b(8)? >> 3;
        let ext = (b(8)? & 0x03) << 7 | b(9)? >> 1;
        let mux_rate = (u64::from(h[10]) << 14) | (u64::from(h[11]) << 6) | u64::from(h[12] >> 2);
        Some(PackHeader {
            mpeg2: true,
            scr: base * 300 + ext,
            mux_rate: mux_rate * 50,
            len: 14 + usize::from(h[13] & 0x07),
        })
    } else if first >> 4 == 0b0010 {
        let h = data.get(..12)?;
        let scr = pes::read_timestamp(&h[4..9], 0b0010)?;
        let mux_rate =
            (u64::from(h[9] & 0x7F) << 15) | (u64::from(h[10]) << 7) | u64::from(h[11] >> 1);
        Some(PackHeader {
            mpeg2: false,
            scr: from_90k(scr),
            mux_rate: mux_rate * 50,
            len: 12,
        })
    } else {
        None
    }
}

/// DVD LPCM 子流头中的音频参数, `header` 从子流号开始
fn lpcm_params(header: &[u8]) -> Option<AudioParams> {
    let b = *header.get(5)?;
    let bits_per_sample: u16 = match b >> 6 {
        0 => 16,
        1 => 20,
        2 => 24,
        _ => return None,
    };
    let sample_rate = match (b >> 4) & 0x03 {
        0 => 48000,
        1 => 96000,
        _ => return None,
    };
    let channels = u16::from(b & 0x07) + 1;
    Some(AudioParams {
        sample_rate,
        channels,
        block_align: u32::from(channels * bits_per_sample).div_ceil(8),
        bits_per_sample,
        samples_per_frame: 0,
    })
}

/// 视频 PES 负载是否可作为随机访问点
fn is_video_keyframe(codec: CodecId, data: &[u8]) -> bool {
    match codec {
        CodecId::Mpeg1Video | CodecId::Mpeg2Video => {
            video::find_start_code(data, video::SEQUENCE_HEADER_CODE).is_some()
                || video::find_start_code(data, video::GOP_START_CODE).is_some()
        }
        CodecId::H264 => nal_types(data).any(|b| b & 0x1F == 5),
        CodecId::H265 => nal_types(data).any(|b| (16..=21).contains(&((b >> 1) & 0x3F))),
        _ => false,
    }
}

/// 起始码 `00 00 01` 之后的第一个字节
fn nal_types(data: &[u8]) -> impl Iterator<Item = u8> + '_ {
    data.windows(4)
        .filter(|w| w[0] == 0 && w[1] == 0 && w[2] == 1)
        .map(|w| w[3])
}

/// 定位/时长扫描的结果
#[derive(Debug, Default)]
struct ScanHit {
    /// (所在 pack 的位置, 90kHz PTS)
    first_pts: Option<(u64, i64)>,
    last_pts: Option<(u64, i64)>,
    /// (pack 位置, 27MHz SCR)
    first_scr: Option<(u64, i64)>,
    last_scr: Option<(u64, i64)>,
}

/// 在内存块中收集参考流的 PTS 与 SCR
fn scan_buffer(data: &[u8], base: u64, key: u16, stop_at_first: bool) -> ScanHit {
    let mut hit = ScanHit::default();
    let mut pack_pos: Option<usize> = None;
    let mut i = 0;
    while let Some(off) = find_system_code(&data[i..]) {
        let p = i + off;
        let code = data[p + 3];
        if code == PACK_START_CODE {
            if let Some(pack) = parse_pack_header(&data[p..]) {
                hit.first_scr.get_or_insert((base + p as u64, pack.scr));
                hit.last_scr = Some((base + p as u64, pack.scr));
                pack_pos = Some(p);
                i = p + pack.len;
            } else {
                i = p + 4;
            }
            continue;
        }
        if !has_length(code) {
            i = p + 4;
            continue;
        }
        let Some(len) = data.get(p + 4..p + 6) else {
            break;
        };
        let total = 6 + usize::from(u16::from_be_bytes([len[0], len[1]]));
        if let Ok(h) = pes::parse_pes_header(&data[p..]) {
            let sub = if code == STREAM_ID_PRIVATE_1 {
                data.get(p + h.header_len).copied()
            } else {
                Some(0)
            };
            if let (Some(pts), Some(sub)) = (h.pts, sub) {
                if stream_key(code, sub) == key {
                    let at = base + pack_pos.unwrap_or(p) as u64;
                    hit.first_pts.get_or_insert((at, pts));
                    hit.last_pts = Some((at, pts));
                    if stop_at_first {
                        return hit;
                    }
                }
            }
        }
        i = if p + total <= data.len() { p + total } else { p + 4 };
    }
    hit
}

/// 视频基本流的访问单元结束位置: 已含图像后遇到的下一个
/// 图像/GOP/序列头起始码
fn unit_end(data: &[u8]) -> Option<usize> {
    let mut seen_picture = false;
    let mut i = 0;
    while let Some(off) = data[i..]
        .windows(3)
        .position(|w| w[0] == 0 && w[1] == 0 && w[2] == 1)
    {
        let p = i + off;
        let code = *data.get(p + 3)?;
        let starts_unit = matches!(
            code,
            video::PICTURE_START_CODE | video::SEQUENCE_HEADER_CODE | video::GOP_START_CODE
        );
        if starts_unit && seen_picture {
            return Some(p);
        }
        if code == video::PICTURE_START_CODE {
            seen_picture = true;
        }
        i = p + 3;
    }
    None
}

/// 没有系统层的 MPEG 视频基本流
#[derive(Debug)]
struct VideoEs {
    buf: BytesMut,
    /// `buf[0]` 在源中的位置
    buf_pos: u64,
    /// 一帧的时长 (tick), 帧率未知时为 None
    frame_duration: Option<i64>,
    next_pts: i64,
    eof: bool,
}

impl VideoEs {
    fn next_unit(&mut self, io: &mut IoContext) -> LiuResult<Option<(u64, Bytes)>> {
        loop {
            if let Some(end) = unit_end(&self.buf) {
                let pos = self.buf_pos;
                self.buf_pos += end as u64;
                return Ok(Some((pos, self.buf.split_to(end).freeze())));
            }
            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let pos = self.buf_pos;
                self.buf_pos += self.buf.len() as u64;
                return Ok(Some((pos, self.buf.split().freeze())));
            }
            let mut chunk = vec![0u8; ES_CHUNK];
            let n = io.read_up_to(&mut chunk)?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }
    }

    fn reset(&mut self, pos: u64) {
        self.buf.clear();
        self.buf_pos = pos;
        self.eof = false;
    }
}

/// DVD 导航状态
#[derive(Debug, Default)]
struct NavState {
    /// 加到原始时间戳上的偏移 (90kHz)
    offset: i64,
    /// 上一个 VOBU 的结束 PTM
    last_end_ptm: Option<i64>,
    /// 上一个 VOBU 以静帧结束
    pending_still: bool,
    /// 当前 VOBU 中出现过的音频流
    audio_current: BTreeSet<usize>,
    /// 上一个 VOBU 的音频流集合
    audio_previous: Option<BTreeSet<usize>>,
}

/// MPEG-PS 解封装器
pub struct PsDemuxer {
    config: MpegConfig,
    streams: Vec<Stream>,
    /// 流查找键 -> 流索引
    ids: HashMap<u16, usize>,
    /// PSM: stream_id -> (stream_type, 描述符)
    psm: HashMap<u8, (u8, EsDescriptors)>,
    psm_version: Option<u8>,
    mergers: HashMap<usize, FieldMerger>,
    /// 打开阶段允许发现新流
    discovering: bool,
    mpeg1: bool,
    elementary: Option<VideoEs>,
    data_start: u64,
    /// 最近一个 pack 头
    last_pack: Option<PackHeader>,
    /// 最近一次输出的 90kHz 原始时间戳 (已展开环绕)
    ts_ref: Option<i64>,
    first_pts_90k: Option<i64>,
    duration: Option<i64>,
    /// 字节/tick
    byte_rate: Option<f64>,
    nav: NavState,
    queue: VecDeque<Packet>,
    eof: bool,
}

impl PsDemuxer {
    /// 创建 PS 解封装器实例 (工厂函数)
    pub fn create(config: &DemuxConfig) -> LiuResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new(config)))
    }

    pub fn new(config: &DemuxConfig) -> Self {
        Self {
            config: config.mpeg.clone(),
            streams: Vec::new(),
            ids: HashMap::new(),
            psm: HashMap::new(),
            psm_version: None,
            mergers: HashMap::new(),
            discovering: false,
            mpeg1: false,
            elementary: None,
            data_start: 0,
            last_pack: None,
            ts_ref: None,
            first_pts_90k: None,
            duration: None,
            byte_rate: None,
            nav: NavState::default(),
            queue: VecDeque::new(),
            eof: false,
        }
    }

    /// 最近一个 pack 头的 SCR (tick)
    pub fn last_scr(&self) -> Option<i64> {
        self.last_pack.map(|p| p.scr)
    }

    // ========================
    // 系统层
    // ========================

    /// 跳到下一个系统层起始码, 零填充静默跳过, 其他字节告警
    fn next_start_code(&mut self, io: &mut IoContext) -> LiuResult<Option<u8>> {
        let mut skipped = 0u64;
        let mut garbage = false;
        loop {
            let buf = io.peek(SCAN_WINDOW)?;
            if buf.len() < 4 {
                let n = buf.len() as u64;
                io.skip(n)?;
                return Ok(None);
            }
            if let Some(p) = find_system_code(buf) {
                let code = buf[p + 3];
                garbage |= buf[..p].iter().any(|&b| b != 0);
                io.skip(p as u64)?;
                skipped += p as u64;
                if garbage {
                    warn!("PS: 跳过 {skipped} 字节无效数据后重新同步");
                }
                return Ok(Some(code));
            }
            let step = buf.len() - 3;
            garbage |= buf[..step].iter().any(|&b| b != 0);
            skipped += step as u64;
            if skipped > self.config.max_sync_skip {
                warn!("PS: 连续 {skipped} 字节未找到起始码, 视为流结束");
                return Ok(None);
            }
            io.skip(step as u64)?;
        }
    }

    /// 处理一个系统层单元, 到达末尾时返回 false
    fn read_unit(&mut self, io: &mut IoContext) -> LiuResult<bool> {
        let Some(code) = self.next_start_code(io)? else {
            return Ok(false);
        };
        match code {
            PACK_START_CODE => self.read_pack(io),
            PROGRAM_END_CODE => {
                trace!("PS: 结束码 @{}", io.position());
                io.skip(4)?;
                Ok(true)
            }
            _ => self.read_pes_unit(io, code),
        }
    }

    fn read_pack(&mut self, io: &mut IoContext) -> LiuResult<bool> {
        let head = io.peek(14)?;
        match parse_pack_header(head) {
            Some(pack) => {
                if self.last_pack.is_none() {
                    debug!(
                        "PS: {} pack, mux_rate {} 字节/秒",
                        if pack.mpeg2 { "MPEG-2" } else { "MPEG-1" },
                        pack.mux_rate
                    );
                }
                self.mpeg1 = !pack.mpeg2;
                self.last_pack = Some(pack);
                io.skip(pack.len as u64)?;
            }
            None if head.len() < 12 => {
                let n = head.len() as u64;
                io.skip(n)?;
                return Ok(false);
            }
            None => {
                warn!("PS: pack 头无效 @{}", io.position());
                io.skip(4)?;
            }
        }
        Ok(true)
    }

    fn read_pes_unit(&mut self, io: &mut IoContext, code: u8) -> LiuResult<bool> {
        let pos = io.position();
        let head = io.peek(6)?;
        if head.len() < 6 {
            let n = head.len() as u64;
            io.skip(n)?;
            return Ok(false);
        }
        let len = usize::from(u16::from_be_bytes([head[4], head[5]]));
        let data = match io.read_bytes(6 + len) {
            Ok(d) => d,
            Err(LiuError::Eof | LiuError::InvalidData(_)) => {
                debug!("PS: 末尾 0x{code:02X} 包不完整");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        match code {
            SYSTEM_HEADER_CODE | STREAM_ID_PADDING => {}
            STREAM_ID_PSM => self.parse_psm(&data),
            STREAM_ID_PRIVATE_2 => self.handle_nav(&data[6..]),
            _ => self.handle_pes(pos, data),
        }
        Ok(true)
    }

    /// 解析节目流映射
    fn parse_psm(&mut self, data: &[u8]) {
        if data.len() < 16 || crc32_mpeg2(data) != 0 {
            warn!("PS: PSM 长度或 CRC 错误, 忽略");
            return;
        }
        let version = data[6] & 0x1F;
        if self.psm_version == Some(version) {
            return;
        }
        let info_len = usize::from(u16::from_be_bytes([data[8], data[9]]));
        let map_start = 10 + info_len;
        let Some(map_len) = data
            .get(map_start..map_start + 2)
            .map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])))
        else {
            return;
        };
        let mut entries = data
            .get(map_start + 2..map_start + 2 + map_len)
            .unwrap_or(&[]);
        let mut psm = HashMap::new();
        while entries.len() >= 4 {
            let stream_type = entries[0];
            let stream_id = entries[1];
            let info_len = usize::from(u16::from_be_bytes([entries[2], entries[3]]));
            let desc = entries
                .get(4..4 + info_len)
                .map(descriptor::parse_descriptors)
                .unwrap_or_default();
            psm.insert(stream_id, (stream_type, desc));
            entries = entries.get(4 + info_len..).unwrap_or(&[]);
        }
        debug!("PS: PSM 版本 {version}, {} 条基本流", psm.len());
        self.psm = psm;
        self.psm_version = Some(version);

        if self.discovering {
            let mut ids: Vec<u8> = self.psm.keys().copied().collect();
            ids.sort_unstable();
            for id in ids {
                if id == STREAM_ID_PRIVATE_1 || self.ids.contains_key(&stream_key(id, 0)) {
                    continue;
                }
                let codec = self.codec_for(id);
                if codec != CodecId::None {
                    self.add_stream(stream_key(id, 0), codec);
                }
            }
        }
    }

    /// stream_id 对应的编码, PSM 优先
    fn codec_for(&self, stream_id: u8) -> CodecId {
        if let Some((stream_type, desc)) = self.psm.get(&stream_id) {
            let codec = resolve_codec(*stream_type, desc);
            if codec != CodecId::None {
                return codec;
            }
        }
        match stream_id {
            0xC0..=0xDF => CodecId::Mp2,
            0xE0..=0xEF if self.mpeg1 => CodecId::Mpeg1Video,
            0xE0..=0xEF => CodecId::Mpeg2Video,
            _ => CodecId::None,
        }
    }

    fn add_stream(&mut self, key: u16, codec: CodecId) -> usize {
        let index = self.streams.len();
        let mut stream = Stream::new(index, codec);
        let (stream_id, sub_id) = ((key >> 8) as u8, key as u8);
        stream
            .metadata
            .push(("stream_id".into(), format!("0x{stream_id:02X}")));
        if stream_id == STREAM_ID_PRIVATE_1 {
            stream
                .metadata
                .push(("sub_id".into(), format!("0x{sub_id:02X}")));
        }
        if codec == CodecId::Mpeg2Video && self.config.force_frame_pic {
            self.mergers.insert(index, FieldMerger::new());
        }
        debug!("PS: 发现流 #{index} (0x{key:04X}) {codec}");
        self.streams.push(stream);
        self.ids.insert(key, index);
        index
    }

    fn handle_pes(&mut self, pos: u64, data: Vec<u8>) {
        let header = match pes::parse_pes_header(&data) {
            Ok(h) => h,
            Err(e) => {
                warn!("PS: PES 包头无效 @{pos}: {e}");
                return;
            }
        };
        let stream_id = header.stream_id;
        let start = header.header_len;
        let end = header
            .payload_len()
            .map_or(data.len(), |n| (start + n).min(data.len()));
        if start >= end {
            return;
        }

        let (key, codec, strip) = if stream_id == STREAM_ID_PRIVATE_1 {
            let sub_id = data[start];
            let Some((codec, strip)) = classify_private(sub_id) else {
                trace!("PS: 忽略私有流 1 子流 0x{sub_id:02X}");
                return;
            };
            (stream_key(stream_id, sub_id), codec, strip)
        } else {
            let codec = self.codec_for(stream_id);
            if codec == CodecId::None {
                trace!("PS: 忽略 stream_id 0x{stream_id:02X}");
                return;
            }
            (stream_key(stream_id, 0), codec, 0)
        };

        let index = match self.ids.get(&key) {
            Some(&index) => index,
            None if self.discovering => {
                let index = self.add_stream(key, codec);
                if codec == CodecId::PcmDvd {
                    if let Some(params) = lpcm_params(&data[start..end]) {
                        let stream = &mut self.streams[index];
                        stream.bit_rate = u64::from(params.sample_rate)
                            * u64::from(params.channels)
                            * u64::from(params.bits_per_sample);
                        if let Some(a) = stream.audio_params_mut() {
                            *a = params;
                        }
                    }
                }
                index
            }
            None => {
                trace!("PS: 忽略打开后新出现的流 0x{key:04X}");
                return;
            }
        };

        let body_start = start + strip;
        if body_start >= end {
            return;
        }
        let mut pkt = DataPacket::new(index, Bytes::from(data).slice(body_start..end));
        pkt.pos = Some(pos);
        pkt.pts = header.pts.map(|t| self.map_ts(t));
        pkt.dts = header.dts.map(|t| self.map_ts(t));

        let stream = &mut self.streams[index];
        match stream.media_type() {
            MediaType::Audio => {
                pkt.flags |= PacketFlags::KEYFRAME;
                self.nav.audio_current.insert(index);
            }
            MediaType::Subtitle => pkt.flags |= PacketFlags::KEYFRAME,
            MediaType::Video if is_video_keyframe(stream.codec_id, pkt.data()) => {
                pkt.flags |= PacketFlags::KEYFRAME;
            }
            _ => {}
        }
        if let Some(ts) = pkt.timestamp() {
            if stream.start_time.is_none_or(|s| ts < s) {
                stream.start_time = Some(ts);
            }
        }
        mpeg::fill_params(stream, pkt.data());
        trace!(
            "PS: 流 #{index} PES {} 字节 pts={:?}",
            pkt.size(),
            pkt.pts
        );

        match self.mergers.get_mut(&index) {
            Some(merger) => self
                .queue
                .extend(merger.push(pkt).into_iter().map(Packet::Data)),
            None => self.queue.push_back(Packet::Data(pkt)),
        }
    }

    /// 原始 90kHz 时间戳: 展开环绕, 加导航偏移, 换算为 tick
    fn map_ts(&mut self, raw: i64) -> i64 {
        let value = match self.ts_ref {
            Some(reference) => unwrap_33bit(raw, reference),
            None => raw,
        };
        self.ts_ref = Some(value);
        from_90k(value + self.nav.offset)
    }

    // ========================
    // DVD 导航
    // ========================

    /// 私有流 2 负载: 子流号 0x00 为 PCI, 0x01 为 DSI
    fn handle_nav(&mut self, payload: &[u8]) {
        match payload.first() {
            Some(0x00) if payload.len() >= 25 => {}
            Some(0x01) => {
                trace!("PS: DSI 导航包");
                return;
            }
            _ => return,
        }
        let be32 = |i: usize| {
            i64::from(u32::from_be_bytes([
                payload[i],
                payload[i + 1],
                payload[i + 2],
                payload[i + 3],
            ]))
        };
        let start_ptm = be32(13);
        let end_ptm = be32(17);
        let still_ptm = be32(21);

        // 上一个 VOBU 以静帧结束
        if std::mem::take(&mut self.nav.pending_still) {
            debug!("PS: VOBU 静帧");
            self.queue.push_back(Packet::Still { stream_index: None });
        }

        // 音频子流集合变化
        let current = std::mem::take(&mut self.nav.audio_current);
        if !current.is_empty() {
            if let Some(previous) = self.nav.audio_previous.as_ref() {
                for &index in previous.symmetric_difference(&current) {
                    debug!("PS: 音频流 #{index} 出现或消失, 插入 Flush");
                    self.queue.push_back(Packet::Flush {
                        stream_index: Some(index),
                        discard: false,
                    });
                }
            }
            self.nav.audio_previous = Some(current);
        }

        // VOBU 不衔接: 调整偏移使时间戳连续
        if let Some(last_end) = self.nav.last_end_ptm {
            if (start_ptm - last_end).abs() > PTM_SLACK {
                self.nav.offset += last_end - start_ptm;
                debug!(
                    "PS: VOBU 不连续 {last_end} -> {start_ptm}, 偏移调整为 {}",
                    self.nav.offset
                );
                self.queue.push_back(Packet::Flush {
                    stream_index: None,
                    discard: false,
                });
            }
        }
        self.nav.last_end_ptm = Some(end_ptm);
        self.nav.pending_still = still_ptm != 0;
    }

    /// 流结束: 输出挂起的静帧与未配对的场
    fn finish(&mut self) {
        if std::mem::take(&mut self.nav.pending_still) {
            self.queue.push_back(Packet::Still { stream_index: None });
        }
        let mut indices: Vec<usize> = self.mergers.keys().copied().collect();
        indices.sort_unstable();
        for index in indices {
            if let Some(held) = self.mergers.get_mut(&index).and_then(FieldMerger::take) {
                self.queue.push_back(Packet::Data(held));
            }
        }
    }

    fn reset_state(&mut self) {
        self.queue.clear();
        for merger in self.mergers.values_mut() {
            merger.take();
        }
        self.nav = NavState::default();
        self.eof = false;
    }

    // ========================
    // 视频基本流
    // ========================

    fn open_elementary(&mut self, io: &mut IoContext) -> LiuResult<()> {
        let head = io.peek(ES_CHUNK)?;
        let seq = video::parse_sequence_header(head)
            .ok_or_else(|| LiuError::Format("PS: 视频基本流序列头无效".into()))?;
        // MPEG-1 视频没有扩展起始码
        let mpeg2 = video::find_start_code(head, video::EXTENSION_START_CODE).is_some();
        let codec = if mpeg2 {
            CodecId::Mpeg2Video
        } else {
            CodecId::Mpeg1Video
        };
        let mut stream = Stream::new(0, codec);
        mpeg::fill_params(&mut stream, head);
        stream.flags |= StreamFlags::GENERATED_PTS;
        stream.start_time = Some(0);

        let rate = seq.frame_rate;
        let frame_duration = (rate.num > 0 && rate.den > 0)
            .then(|| TICKS_PER_SECOND * rate.den / rate.num);
        if let (Some(size), true) = (io.size(), seq.bit_rate > 0) {
            self.duration = Some(
                (u128::from(size) * 8 * TICKS_PER_SECOND as u128 / u128::from(seq.bit_rate))
                    as i64,
            );
            stream.duration = self.duration;
        }
        if codec == CodecId::Mpeg2Video && self.config.force_frame_pic {
            self.mergers.insert(0, FieldMerger::new());
        }
        self.streams = vec![stream];
        self.elementary = Some(VideoEs {
            buf: BytesMut::new(),
            buf_pos: io.position(),
            frame_duration,
            next_pts: 0,
            eof: false,
        });
        info!(
            "PS: MPEG 视频基本流 {codec} {}x{} {}",
            seq.width, seq.height, seq.frame_rate
        );
        Ok(())
    }

    fn read_elementary(&mut self, io: &mut IoContext) -> LiuResult<Packet> {
        loop {
            if let Some(pkt) = self.queue.pop_front() {
                return Ok(pkt);
            }
            if self.eof {
                return Err(LiuError::Eof);
            }
            let Some(es) = self.elementary.as_mut() else {
                return Err(LiuError::Internal("PS: 非视频基本流模式".into()));
            };
            let Some((pos, data)) = es.next_unit(io)? else {
                self.finish();
                self.eof = true;
                continue;
            };
            let coding = video::parse_picture_coding(&data);
            let is_field = coding.is_some_and(|c| c.structure != PictureStructure::Frame);
            let keyframe = video::picture_coding_type(&data) == Some(1);
            let mut pkt = DataPacket::new(0, data);
            pkt.pos = Some(pos);
            if let Some(d) = es.frame_duration {
                let dur = if is_field { d / 2 } else { d };
                pkt.pts = Some(es.next_pts);
                pkt.dts = Some(es.next_pts);
                pkt.duration = dur;
                es.next_pts += dur;
            }
            if keyframe {
                pkt.flags |= PacketFlags::KEYFRAME;
            }
            match self.mergers.get_mut(&0) {
                Some(merger) => self
                    .queue
                    .extend(merger.push(pkt).into_iter().map(Packet::Data)),
                None => self.queue.push_back(Packet::Data(pkt)),
            }
        }
    }

    fn seek_elementary(&mut self, io: &mut IoContext, time: i64) -> LiuResult<i64> {
        let bit_rate = self.streams.first().map_or(0, |s| s.bit_rate);
        if !io.is_seekable() || bit_rate == 0 {
            return Err(LiuError::Unsupported("PS: 视频基本流码率未知, 无法定位".into()));
        }
        let size = io.size().unwrap_or(u64::MAX);
        let offset = ((u128::from(time.max(0) as u64) * u128::from(bit_rate)
            / 8
            / TICKS_PER_SECOND as u128) as u64)
            .min(size);
        io.seek(SeekFrom::Start(offset))?;

        // 向后找序列头
        let mut landed = None;
        loop {
            let buf = io.peek(SCAN_WINDOW)?;
            if buf.len() < 4 {
                break;
            }
            if let Some(p) = video::find_start_code(buf, video::SEQUENCE_HEADER_CODE) {
                io.skip((p - 4) as u64)?;
                landed = Some(io.position());
                break;
            }
            let step = (buf.len() - 3) as u64;
            io.skip(step)?;
        }

        self.reset_state();
        let Some(es) = self.elementary.as_mut() else {
            return Err(LiuError::Internal("PS: 非视频基本流模式".into()));
        };
        es.reset(io.position());
        let Some(pos) = landed else {
            es.eof = true;
            return Ok(self.duration.unwrap_or(time));
        };
        let landed_time =
            (u128::from(pos) * 8 * TICKS_PER_SECOND as u128 / u128::from(bit_rate)) as i64;
        es.next_pts = match es.frame_duration {
            Some(d) if d > 0 => (landed_time + d / 2) / d * d,
            _ => landed_time,
        };
        debug!(
            "PS: 视频基本流定位 {} -> {} (偏移 {pos})",
            format_ticks(time),
            format_ticks(es.next_pts)
        );
        Ok(es.next_pts)
    }

    // ========================
    // 时长与定位
    // ========================

    /// 定位采样使用的参考流: 第一条视频流, 没有则第一条流
    fn reference_key(&self) -> Option<u16> {
        let by_index = |video_only: bool| {
            self.ids
                .iter()
                .filter(|&(_, &i)| !video_only || self.streams[i].media_type() == MediaType::Video)
                .min_by_key(|&(_, &i)| i)
                .map(|(&key, _)| key)
        };
        by_index(true).or_else(|| by_index(false))
    }

    fn scan(
        &self,
        io: &mut IoContext,
        start: u64,
        limit: u64,
        key: u16,
        stop_at_first: bool,
    ) -> LiuResult<ScanHit> {
        io.seek(SeekFrom::Start(start))?;
        let mut data = vec![0u8; limit as usize];
        let n = io.read_up_to(&mut data)?;
        data.truncate(n);
        Ok(scan_buffer(&data, start, key, stop_at_first))
    }

    /// 扫描首尾估算时长与码率
    fn estimate_duration(&mut self, io: &mut IoContext) -> LiuResult<()> {
        let (Some(key), Some(size)) = (self.reference_key(), io.size()) else {
            return Ok(());
        };
        let head = self.scan(io, self.data_start, PTS_SCAN_BYTES, key, true)?;
        let Some((_, first)) = head.first_pts else {
            debug!("PS: 开头未找到 PTS, 无法估算时长");
            return Ok(());
        };
        self.first_pts_90k = Some(first);

        let tail_start = size.saturating_sub(PTS_SCAN_BYTES).max(self.data_start);
        let tail = self.scan(io, tail_start, PTS_SCAN_BYTES, key, false)?;
        if let Some((_, last)) = tail.last_pts {
            let span = unwrap_33bit(last, first) - first;
            if span > 0 {
                self.duration = Some(from_90k(span));
            }
        }

        // 码率优先取 SCR 斜率, 其次 mux_rate
        let scr_rate = match (head.first_scr, tail.last_scr) {
            (Some((p0, c0)), Some((p1, c1))) if p1 > p0 && c1 > c0 => {
                Some((p1 - p0) as f64 / (c1 - c0) as f64)
            }
            _ => None,
        };
        let mux_rate = self
            .last_pack
            .filter(|p| p.mux_rate > 0)
            .map(|p| p.mux_rate as f64 / TICKS_PER_SECOND as f64);
        self.byte_rate = scr_rate.or(mux_rate).or_else(|| {
            self.duration
                .map(|d| (size - self.data_start) as f64 / d as f64)
        });
        debug!(
            "PS: 起始 PTS {}, 时长 {:?}, 码率 {:?} 字节/tick",
            format_ticks(from_90k(first)),
            self.duration.map(format_ticks),
            self.byte_rate
        );
        Ok(())
    }
}

impl Demuxer for PsDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::MpegPs
    }

    fn name(&self) -> &str {
        "mpegps"
    }

    fn open(&mut self, io: &mut IoContext) -> LiuResult<()> {
        if io.peek(4)?.starts_with(&[0, 0, 1, video::SEQUENCE_HEADER_CODE]) {
            return self.open_elementary(io);
        }
        if self.next_start_code(io)?.is_none() {
            return Err(LiuError::Format("PS: 未找到起始码".into()));
        }
        self.data_start = io.position();

        // 在有限的包数内被动发现流, 期间产生的包留在队列里
        self.discovering = true;
        let mut units = 0;
        while units < self.config.probe_packets {
            if !self.read_unit(io)? {
                self.finish();
                self.eof = true;
                break;
            }
            units += 1;
        }
        self.discovering = false;
        if self.streams.is_empty() {
            return Err(LiuError::Format(format!(
                "PS: {units} 个单元内未发现任何基本流"
            )));
        }

        if io.is_seekable() {
            let resume = io.position();
            self.estimate_duration(io)?;
            io.seek(SeekFrom::Start(resume))?;
        }
        info!(
            "PS: 打开完成, {} 条流{}",
            self.streams.len(),
            if self.psm_version.is_some() { " (PSM)" } else { "" }
        );
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LiuResult<Packet> {
        if self.elementary.is_some() {
            return self.read_elementary(io);
        }
        loop {
            if let Some(pkt) = self.queue.pop_front() {
                return Ok(pkt);
            }
            if self.eof {
                return Err(LiuError::Eof);
            }
            if !self.read_unit(io)? {
                self.finish();
                self.eof = true;
            }
        }
    }

    fn seek(&mut self, io: &mut IoContext, time: i64) -> LiuResult<i64> {
        if self.elementary.is_some() {
            return self.seek_elementary(io, time);
        }
        if !io.is_seekable() {
            return Err(LiuError::Unsupported("PS: 源不可定位".into()));
        }
        let (Some(size), Some(first), Some(rate), Some(key)) = (
            io.size(),
            self.first_pts_90k,
            self.byte_rate,
            self.reference_key(),
        ) else {
            return Err(LiuError::Unsupported("PS: 缺少时间戳或码率, 无法定位".into()));
        };
        let first_ticks = from_90k(first);
        let tolerance = self.config.seek_tolerance;

        let (mut lo, mut hi) = (self.data_start, size);
        let mut guess = self.data_start as f64 + (time - first_ticks).max(0) as f64 * rate;
        let mut best: Option<(u64, i64)> = None;
        for step in 0..self.config.seek_steps {
            let offset = (guess.max(0.0) as u64).clamp(lo, hi.saturating_sub(1).max(lo));
            let Some((pos, raw)) = self.scan(io, offset, PTS_SCAN_BYTES, key, true)?.first_pts
            else {
                // 之后已无 PTS, 往前折半
                hi = offset;
                guess = (lo + offset) as f64 / 2.0;
                if hi <= lo + MIN_SEEK_SPAN {
                    break;
                }
                continue;
            };
            let pts = from_90k(unwrap_33bit(raw, first));
            let diff = time - pts;
            trace!("PS: 定位第 {step} 步 @{pos} -> {}", format_ticks(pts));
            if best.is_none_or(|(_, b)| (time - b).abs() > diff.abs()) {
                best = Some((pos, pts));
            }
            if diff.abs() <= tolerance {
                break;
            }
            if diff > 0 {
                lo = pos;
            } else {
                hi = pos;
            }
            if hi <= lo + MIN_SEEK_SPAN {
                break;
            }
            guess = offset as f64 + diff as f64 * rate;
        }

        let (pos, pts) = best.ok_or(LiuError::Eof)?;
        io.seek(SeekFrom::Start(pos))?;
        self.reset_state();
        self.ts_ref = Some(to_90k(pts));
        debug!("PS: 定位 {} -> {} @{pos}", format_ticks(time), format_ticks(pts));
        Ok(pts)
    }

    fn duration(&self) -> Option<i64> {
        self.duration
    }
}

/// MPEG-PS 格式探测器
pub struct PsProbe;

impl FormatProbe for PsProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        let start = data.iter().position(|&b| b != 0).map_or(0, |p| p.saturating_sub(2));
        let body = &data[start..];
        if body.starts_with(&[0, 0, 1, PACK_START_CODE]) {
            if let Some(pack) = parse_pack_header(body) {
                // pack 之后紧跟另一个系统层起始码
                let next = body.get(pack.len..pack.len + 4);
                let chained = next.is_some_and(|w| w[..3] == [0, 0, 1] && w[3] >= PROGRAM_END_CODE);
                return Some(if chained {
                    probe::SCORE_MAX
                } else {
                    probe::SCORE_PARTIAL
                });
            }
        }
        if body.starts_with(&[0, 0, 1, video::SEQUENCE_HEADER_CODE])
            && video::parse_sequence_header(body).is_some()
        {
            let has_picture = video::find_start_code(body, video::PICTURE_START_CODE).is_some();
            return Some(if has_picture {
                probe::SCORE_MAX - 5
            } else {
                probe::SCORE_PARTIAL
            });
        }
        probe::extension_score(FormatId::MpegPs, filename)
    }

    fn format_id(&self) -> FormatId {
        FormatId::MpegPs
    }
}
