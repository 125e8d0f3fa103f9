//! MPEG-TS (Transport Stream) 解封装器.
//!
//! 广泛用于数字电视广播 (DVB/ATSC)、IPTV 和蓝光 (M2TS) 的容器格式.
//!
//! # TS 包结构 (188 字节, M2TS 前面另有 4 字节时间戳)
//! ```text
//! sync(0x47) TEI PUSI priority PID(13) scrambling(2) AFC(2) CC(4)
//! [adaptation field: length flags [PCR 6 字节] ...]
//! [payload]
//! ```
//!
//! # 解析流程
//! 1. 同步: 要求相隔一个包长的两个同步字节, 同时判定 188/192 包长
//! 2. PAT (PID 0) 给出各节目的 PMT PID
//! 3. PMT 给出每个基本流的 PID, stream_type 与描述符
//! 4. 按 PID 重组 PES, 包头中的 90kHz PTS/DTS 换算为 tick
//!
//! PSI 段可以跨越任意多个 TS 包, 按 pointer_field 重组后做 CRC 校验.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::SeekFrom;

use bytes::Bytes;
use liu_core::crc::crc32_mpeg2;
use liu_core::timestamp::{format_ticks, from_90k, to_90k, unwrap_33bit};
use liu_core::{CodecId, DataPacket, LiuError, LiuResult, MediaType, Packet, PacketFlags};
use log::{debug, info, trace, warn};

use crate::config::{DemuxConfig, MpegConfig};
use crate::demuxer::Demuxer;
use crate::demuxers::mpeg::descriptor::{self, EsDescriptors};
use crate::demuxers::mpeg::video::FieldMerger;
use crate::demuxers::mpeg::{self, pes};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{self, FormatProbe, ProbeScore};
use crate::stream::Stream;

/// TS 包大小
const TS_PACKET_SIZE: usize = 188;
/// M2TS 包大小 (4 字节时间戳 + 188)
const M2TS_PACKET_SIZE: usize = 192;
/// TS 同步字节
const TS_SYNC_BYTE: u8 = 0x47;
/// PAT 的 PID
const PID_PAT: u16 = 0x0000;
/// 空包 PID
const PID_NULL: u16 = 0x1FFF;

const TABLE_ID_PAT: u8 = 0x00;
const TABLE_ID_PMT: u8 = 0x02;

/// section_length 上限
const MAX_SECTION_LEN: usize = 4093;
/// 打开时查找 PMT 最多处理的包数
const OPEN_MAX_PACKETS: usize = 4096;
/// 打开时用于同步检测的头部长度
const SYNC_PROBE_SIZE: usize = M2TS_PACKET_SIZE * 8;
/// 重新同步时每次查看的窗口
const RESYNC_WINDOW: usize = 64 * 1024;
/// 时长估算与定位采样的扫描范围
const PTS_SCAN_BYTES: u64 = 1 << 20;
/// PES 缓冲上限的计量单位
const PES_BLOCK: usize = 64 * 1024;

/// 计数统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TsStats {
    /// 已读取的 TS 包
    pub packets: u64,
    /// 连续计数跳变 (丢包)
    pub cc_errors: u64,
    /// 重复包
    pub duplicates: u64,
    /// PSI 段 CRC 错误
    pub crc_errors: u64,
    /// 无法解析的 PES
    pub pes_errors: u64,
    /// 同步丢失次数
    pub sync_losses: u64,
}

/// TS 包头
#[derive(Debug, Clone, Copy)]
struct TsHeader {
    pid: u16,
    tei: bool,
    unit_start: bool,
    scrambling: u8,
    has_adaptation: bool,
    has_payload: bool,
    cc: u8,
}

impl TsHeader {
    fn parse(pkt: &[u8]) -> Self {
        Self {
            tei: pkt[1] & 0x80 != 0,
            unit_start: pkt[1] & 0x40 != 0,
            pid: (u16::from(pkt[1] & 0x1F) << 8) | u16::from(pkt[2]),
            scrambling: pkt[3] >> 6,
            has_adaptation: pkt[3] & 0x20 != 0,
            has_payload: pkt[3] & 0x10 != 0,
            cc: pkt[3] & 0x0F,
        }
    }
}

/// 适配域中用到的字段
#[derive(Debug, Clone, Copy, Default)]
struct Adaptation {
    discontinuity: bool,
    random_access: bool,
    /// 27MHz
    pcr: Option<i64>,
}

/// 解析适配域, 返回适配域与负载起始偏移; 长度越界时返回 None
fn parse_adaptation(pkt: &[u8], hdr: &TsHeader) -> Option<(Adaptation, usize)> {
    let mut af = Adaptation::default();
    if !hdr.has_adaptation {
        return Some((af, 4));
    }
    let len = usize::from(pkt[4]);
    let start = 5 + len;
    if start > TS_PACKET_SIZE {
        return None;
    }
    if len > 0 {
        let flags = pkt[5];
        af.discontinuity = flags & 0x80 != 0;
        af.random_access = flags & 0x40 != 0;
        if flags & 0x10 != 0 && len >= 7 {
            af.pcr = Some(parse_pcr(&pkt[6..12]));
        }
    }
    Some((af, start))
}

/// PCR = base(33 位, 90kHz) * 300 + ext(9 位)
fn parse_pcr(b: &[u8]) -> i64 {
    let base = (i64::from(b[0]) << 25)
        | (i64::from(b[1]) << 17)
        | (i64::from(b[2]) << 9)
        | (i64::from(b[3]) << 1)
        | (i64::from(b[4]) >> 7);
    let ext = (i64::from(b[4] & 0x01) << 8) | i64::from(b[5]);
    base * 300 + ext
}

/// 从 `pos` 起每隔 `stride` 连续出现的同步字节数
fn sync_run(data: &[u8], pos: usize, stride: usize) -> usize {
    let mut count = 0;
    let mut p = pos;
    while data.get(p) == Some(&TS_SYNC_BYTE) {
        count += 1;
        p += stride;
    }
    count
}

/// 检测同步偏移与包长
///
/// 数据足够时要求连续 3 个同步字节, 同等条件下优先 188.
fn detect_sync(data: &[u8]) -> Option<(usize, usize)> {
    let limit = data.len().min(M2TS_PACKET_SIZE * 2);
    for pos in 0..limit {
        if data[pos] != TS_SYNC_BYTE {
            continue;
        }
        for stride in [TS_PACKET_SIZE, M2TS_PACKET_SIZE] {
            let possible = (data.len() - pos - 1) / stride + 1;
            if sync_run(data, pos, stride) >= possible.clamp(1, 3) {
                return Some((pos, stride));
            }
        }
    }
    None
}

/// 在窗口中查找相隔 `stride` 的两个同步字节
fn find_resync(data: &[u8], stride: usize) -> Option<usize> {
    (0..data.len().saturating_sub(stride))
        .find(|&p| data[p] == TS_SYNC_BYTE && data[p + stride] == TS_SYNC_BYTE)
}

// ============================================================
// PSI 段重组
// ============================================================

/// 单个 PID 的 PSI 段重组缓冲
#[derive(Debug, Default)]
struct SectionBuffer {
    data: Vec<u8>,
    active: bool,
}

impl SectionBuffer {
    /// 送入一个 TS 包的负载, 返回其中已完整的段
    fn push(&mut self, payload: &[u8], unit_start: bool) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        if unit_start {
            let Some((&pointer, rest)) = payload.split_first() else {
                return out;
            };
            let pointer = usize::from(pointer);
            if pointer > rest.len() {
                self.reset();
                return out;
            }
            // pointer_field 之前的字节属于上一个段
            if self.active {
                self.data.extend_from_slice(&rest[..pointer]);
                self.drain_complete(&mut out);
            }
            self.data.clear();
            self.data.extend_from_slice(&rest[pointer..]);
            self.active = true;
        } else if self.active {
            self.data.extend_from_slice(payload);
        } else {
            return out;
        }
        self.drain_complete(&mut out);
        out
    }

    fn drain_complete(&mut self, out: &mut Vec<Vec<u8>>) {
        while self.active && !self.data.is_empty() {
            // 0xFF 为段后填充
            if self.data[0] == 0xFF {
                self.reset();
                return;
            }
            if self.data.len() < 3 {
                return;
            }
            let len = (usize::from(self.data[1] & 0x0F) << 8) | usize::from(self.data[2]);
            if len > MAX_SECTION_LEN {
                warn!("TS: section_length {len} 超出上限, 丢弃");
                self.reset();
                return;
            }
            let total = 3 + len;
            if self.data.len() < total {
                return;
            }
            out.push(self.data.drain(..total).collect());
        }
        if self.data.is_empty() {
            self.active = false;
        }
    }

    fn reset(&mut self) {
        self.data.clear();
        self.active = false;
    }
}

// ============================================================
// PES 重组
// ============================================================

/// 单个基本流的 PES 重组缓冲
struct PesBuffer {
    stream_index: usize,
    data: Vec<u8>,
    active: bool,
    /// 起始 TS 包的位置
    pos: Option<u64>,
    flags: PacketFlags,
    /// 空闲期间检测到丢包, 标记到下一个 PES
    discontinuity: bool,
    merger: Option<FieldMerger>,
}

impl PesBuffer {
    fn new(stream_index: usize, merger: Option<FieldMerger>) -> Self {
        Self {
            stream_index,
            data: Vec::new(),
            active: false,
            pos: None,
            flags: PacketFlags::empty(),
            discontinuity: false,
            merger,
        }
    }

    fn start(&mut self, pos: u64, random_access: bool, discontinuity: bool) {
        self.data.clear();
        self.active = true;
        self.pos = Some(pos);
        self.flags = PacketFlags::empty();
        if random_access {
            self.flags |= PacketFlags::KEYFRAME;
        }
        if discontinuity || self.discontinuity {
            self.flags |= PacketFlags::DISCONTINUITY;
        }
        self.discontinuity = false;
    }

    /// PES 声明的总长度 (含 6 字节包头), 不定长时为 None
    fn total_len(&self) -> Option<usize> {
        let len = usize::from(u16::from_be_bytes([*self.data.get(4)?, *self.data.get(5)?]));
        (len > 0).then_some(len + 6)
    }

    fn reset(&mut self) {
        self.data.clear();
        self.active = false;
        self.discontinuity = false;
        if let Some(merger) = self.merger.as_mut() {
            merger.take();
        }
    }
}

/// 定位/时长扫描的结果
#[derive(Debug, Default)]
struct ScanHit {
    /// (包位置, 90kHz PTS)
    first_pts: Option<(u64, i64)>,
    last_pts: Option<(u64, i64)>,
    /// (包位置, 27MHz PCR)
    first_pcr: Option<(u64, i64)>,
    last_pcr: Option<(u64, i64)>,
}

/// MPEG-TS 解封装器
pub struct TsDemuxer {
    config: MpegConfig,
    streams: Vec<Stream>,
    /// 包长: 188 或 192
    stride: usize,
    /// 第一个同步字节的位置
    data_start: u64,
    /// PMT PID -> 节目号
    programs: HashMap<u16, u16>,
    parsed_pmts: HashSet<u16>,
    /// 基本流 PID -> PES 缓冲
    pes: HashMap<u16, PesBuffer>,
    sections: HashMap<u16, SectionBuffer>,
    /// (PID, table_id, 扩展号, 段号) -> 已解析的版本号
    versions: HashMap<(u16, u8, u16, u8), u8>,
    /// 各 PID 上一个连续计数
    cc: HashMap<u16, u8>,
    pcr_pid: Option<u16>,
    /// 最近一次输出的 90kHz 时间戳 (已展开环绕)
    ts_ref: Option<i64>,
    /// 起始 PTS (90kHz 原始值)
    first_pts_90k: Option<i64>,
    duration: Option<i64>,
    /// 字节/tick
    byte_rate: Option<f64>,
    queue: VecDeque<DataPacket>,
    eof: bool,
    stats: TsStats,
}

impl TsDemuxer {
    /// 创建 TS 解封装器实例 (工厂函数)
    pub fn create(config: &DemuxConfig) -> LiuResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new(config)))
    }

    pub fn new(config: &DemuxConfig) -> Self {
        Self {
            config: config.mpeg.clone(),
            streams: Vec::new(),
            stride: TS_PACKET_SIZE,
            data_start: 0,
            programs: HashMap::new(),
            parsed_pmts: HashSet::new(),
            pes: HashMap::new(),
            sections: HashMap::new(),
            versions: HashMap::new(),
            cc: HashMap::new(),
            pcr_pid: None,
            ts_ref: None,
            first_pts_90k: None,
            duration: None,
            byte_rate: None,
            queue: VecDeque::new(),
            eof: false,
            stats: TsStats::default(),
        }
    }

    /// 计数统计
    pub fn stats(&self) -> TsStats {
        self.stats
    }

    // ========================
    // 读包与同步
    // ========================

    /// 读取下一个 TS 包 (M2TS 去掉前缀之外的部分), 到达末尾或无法重新同步时返回 None
    fn read_unit(&mut self, io: &mut IoContext) -> LiuResult<Option<(u64, [u8; TS_PACKET_SIZE])>> {
        loop {
            let pos = io.position();
            let head = io.peek(self.stride)?;
            if head.len() < TS_PACKET_SIZE {
                return Ok(None);
            }
            if head[0] == TS_SYNC_BYTE {
                let mut pkt = [0u8; TS_PACKET_SIZE];
                pkt.copy_from_slice(&head[..TS_PACKET_SIZE]);
                let len = head.len() as u64;
                io.skip(len)?;
                self.stats.packets += 1;
                return Ok(Some((pos, pkt)));
            }
            warn!("TS: 位置 {pos} 同步丢失, 重新同步");
            self.stats.sync_losses += 1;
            if !self.resync(io)? {
                warn!(
                    "TS: {} 字节内未能重新同步, 视为流结束",
                    self.config.max_sync_skip
                );
                return Ok(None);
            }
        }
    }

    /// 从当前位置向后查找同步, 最多跳过 `max_sync_skip` 字节
    fn resync(&self, io: &mut IoContext) -> LiuResult<bool> {
        let mut skipped = 0u64;
        loop {
            let window = io.peek(RESYNC_WINDOW)?;
            if let Some(off) = find_resync(window, self.stride) {
                io.skip(off as u64)?;
                debug!("TS: 跳过 {} 字节后重新同步", skipped + off as u64);
                return Ok(true);
            }
            if window.len() <= self.stride {
                return Ok(false);
            }
            // 保留窗口尾部一个包长, 与下一窗口拼接查找
            let advance = (window.len() - self.stride) as u64;
            skipped += advance;
            if skipped > self.config.max_sync_skip {
                return Ok(false);
            }
            io.skip(advance)?;
        }
    }

    // ========================
    // TS 包处理
    // ========================

    fn process_packet(&mut self, pos: u64, pkt: &[u8]) {
        let hdr = TsHeader::parse(pkt);
        if hdr.tei {
            trace!("TS: PID 0x{:04X} 传输错误标志置位, 丢弃", hdr.pid);
            return;
        }
        if hdr.pid == PID_NULL {
            return;
        }
        let Some((af, start)) = parse_adaptation(pkt, &hdr) else {
            warn!("TS: PID 0x{:04X} 适配域长度越界, 丢弃", hdr.pid);
            return;
        };
        if !hdr.has_payload {
            return;
        }
        if !self.check_continuity(&hdr, &af) {
            return;
        }
        if hdr.scrambling != 0 {
            trace!("TS: PID 0x{:04X} 负载已加扰, 丢弃", hdr.pid);
            return;
        }
        let payload = &pkt[start..TS_PACKET_SIZE];
        if hdr.pid == PID_PAT || self.programs.contains_key(&hdr.pid) {
            self.handle_psi(hdr.pid, payload, hdr.unit_start);
        } else if self.pes.contains_key(&hdr.pid) {
            self.handle_pes(pos, &hdr, &af, payload);
        }
    }

    /// 连续计数检查, 返回 false 表示重复包应丢弃
    fn check_continuity(&mut self, hdr: &TsHeader, af: &Adaptation) -> bool {
        let prev = self.cc.insert(hdr.pid, hdr.cc);
        if af.discontinuity {
            return true;
        }
        let Some(prev) = prev else {
            return true;
        };
        match hdr.cc.wrapping_sub(prev) & 0x0F {
            1 => true,
            0 => {
                trace!("TS: PID 0x{:04X} 重复包 (CC={})", hdr.pid, hdr.cc);
                self.stats.duplicates += 1;
                false
            }
            _ => {
                warn!(
                    "TS: PID 0x{:04X} 连续计数跳变 {prev} -> {}, 可能丢包",
                    hdr.pid, hdr.cc
                );
                self.stats.cc_errors += 1;
                if let Some(buf) = self.pes.get_mut(&hdr.pid) {
                    if buf.active {
                        buf.flags |= PacketFlags::DISCONTINUITY;
                    } else {
                        buf.discontinuity = true;
                    }
                }
                if let Some(sec) = self.sections.get_mut(&hdr.pid) {
                    sec.reset();
                }
                true
            }
        }
    }

    // ========================
    // PSI
    // ========================

    fn handle_psi(&mut self, pid: u16, payload: &[u8], unit_start: bool) {
        let sections = self
            .sections
            .entry(pid)
            .or_default()
            .push(payload, unit_start);
        for section in sections {
            self.handle_section(pid, &section);
        }
    }

    fn handle_section(&mut self, pid: u16, section: &[u8]) {
        // 8 字节通用头 + 4 字节 CRC, 且必须是长格式段
        if section.len() < 12 || section[1] & 0x80 == 0 {
            trace!("TS: PID 0x{pid:04X} 忽略短格式段");
            return;
        }
        if crc32_mpeg2(section) != 0 {
            warn!("TS: PID 0x{pid:04X} 段 CRC 校验失败 (table 0x{:02X})", section[0]);
            self.stats.crc_errors += 1;
            return;
        }
        let table_id = section[0];
        let ext = u16::from_be_bytes([section[3], section[4]]);
        let version = (section[5] >> 1) & 0x1F;
        if section[5] & 0x01 == 0 {
            // current_next_indicator = 0: 尚未生效的表
            return;
        }
        let key = (pid, table_id, ext, section[6]);
        if self.versions.get(&key) == Some(&version) {
            return;
        }
        let body = &section[8..section.len() - 4];
        match table_id {
            TABLE_ID_PAT if pid == PID_PAT => self.parse_pat(body),
            TABLE_ID_PMT if self.programs.contains_key(&pid) => self.parse_pmt(pid, ext, body),
            _ => trace!("TS: PID 0x{pid:04X} 忽略 table 0x{table_id:02X}"),
        }
        self.versions.insert(key, version);
    }

    fn parse_pat(&mut self, body: &[u8]) {
        for entry in body.chunks_exact(4) {
            let program = u16::from_be_bytes([entry[0], entry[1]]);
            let pmt_pid = u16::from_be_bytes([entry[2], entry[3]]) & 0x1FFF;
            // 节目号 0 指向 NIT
            if program == 0 {
                continue;
            }
            if self.programs.insert(pmt_pid, program).is_none() {
                debug!("TS: 节目 {program} -> PMT PID 0x{pmt_pid:04X}");
            }
        }
    }

    fn parse_pmt(&mut self, pid: u16, program: u16, body: &[u8]) {
        if body.len() < 4 {
            warn!("TS: PMT 过短 ({} 字节)", body.len());
            return;
        }
        let pcr_pid = u16::from_be_bytes([body[0], body[1]]) & 0x1FFF;
        let info_len = usize::from(u16::from_be_bytes([body[2], body[3]]) & 0x0FFF);
        let Some(program_info) = body.get(4..4 + info_len) else {
            warn!("TS: PMT program_info_length {info_len} 越界");
            return;
        };
        let program_desc = descriptor::parse_descriptors(program_info);
        if self.pcr_pid.is_none() && pcr_pid != PID_NULL {
            self.pcr_pid = Some(pcr_pid);
        }

        let mut rest = &body[4 + info_len..];
        while rest.len() >= 5 {
            let stream_type = rest[0];
            let es_pid = u16::from_be_bytes([rest[1], rest[2]]) & 0x1FFF;
            let es_info_len = usize::from(u16::from_be_bytes([rest[3], rest[4]]) & 0x0FFF);
            let Some(es_info) = rest.get(5..5 + es_info_len) else {
                warn!("TS: PMT 中 PID 0x{es_pid:04X} 的描述符越界");
                break;
            };
            let mut desc = descriptor::parse_descriptors(es_info);
            if desc.registration.is_none() {
                desc.registration = program_desc.registration;
            }
            self.add_stream(program, stream_type, es_pid, &desc);
            rest = &rest[5 + es_info_len..];
        }
        self.parsed_pmts.insert(pid);
    }

    fn add_stream(&mut self, program: u16, stream_type: u8, pid: u16, desc: &EsDescriptors) {
        if self.pes.contains_key(&pid) {
            return;
        }
        let codec = mpeg::resolve_codec(stream_type, desc);
        if codec == CodecId::None {
            debug!("TS: PID 0x{pid:04X} stream_type 0x{stream_type:02X} 无法识别, 忽略");
            return;
        }
        let index = self.streams.len();
        let mut stream = Stream::new(index, codec);
        stream.program = u32::from(program);
        stream.language = desc.language.clone();
        stream
            .metadata
            .push(("pid".into(), format!("0x{pid:04X}")));
        debug!(
            "TS: 流 #{index} PID 0x{pid:04X} type 0x{stream_type:02X} -> {}",
            codec.name()
        );
        let merger =
            (self.config.force_frame_pic && codec == CodecId::Mpeg2Video).then(FieldMerger::new);
        self.pes.insert(pid, PesBuffer::new(index, merger));
        self.streams.push(stream);
    }

    fn programs_ready(&self) -> bool {
        !self.programs.is_empty() && self.programs.keys().all(|p| self.parsed_pmts.contains(p))
    }

    // ========================
    // PES
    // ========================

    fn handle_pes(&mut self, pos: u64, hdr: &TsHeader, af: &Adaptation, payload: &[u8]) {
        if hdr.unit_start {
            self.emit_pes(hdr.pid);
        }
        let limit = self.config.bufpool.max(1) * PES_BLOCK;
        let Some(buf) = self.pes.get_mut(&hdr.pid) else {
            return;
        };
        if hdr.unit_start {
            buf.start(pos, af.random_access, af.discontinuity);
        } else if !buf.active {
            return;
        }
        if buf.data.len() + payload.len() > limit {
            warn!(
                "TS: PID 0x{:04X} PES 超过 {limit} 字节仍未结束, 丢弃",
                hdr.pid
            );
            buf.reset();
            self.stats.pes_errors += 1;
            return;
        }
        buf.data.extend_from_slice(payload);
        if buf.total_len().is_some_and(|n| buf.data.len() >= n) {
            self.emit_pes(hdr.pid);
        }
    }

    /// 输出 PID 上已重组的 PES
    fn emit_pes(&mut self, pid: u16) {
        let Some(buf) = self.pes.get_mut(&pid) else {
            return;
        };
        if !buf.active {
            return;
        }
        buf.active = false;
        let data = std::mem::take(&mut buf.data);
        let (index, pos, flags) = (buf.stream_index, buf.pos, buf.flags);

        let header = match pes::parse_pes_header(&data) {
            Ok(h) => h,
            Err(e) => {
                warn!("TS: PID 0x{pid:04X} PES 包头无效, 丢弃 {} 字节: {e}", data.len());
                self.stats.pes_errors += 1;
                return;
            }
        };
        let end = header
            .payload_len()
            .map_or(data.len(), |n| (header.header_len + n).min(data.len()));
        if header.header_len >= end {
            return;
        }

        let mut pkt = DataPacket::new(index, Bytes::from(data).slice(header.header_len..end));
        pkt.pos = pos;
        pkt.flags = flags;
        pkt.pts = header.pts.map(|t| self.unwrap_ts(t));
        pkt.dts = header.dts.map(|t| self.unwrap_ts(t));

        let stream = &mut self.streams[index];
        if stream.media_type() == MediaType::Audio {
            pkt.flags |= PacketFlags::KEYFRAME;
        }
        if let Some(ts) = pkt.timestamp() {
            if stream.start_time.is_none_or(|s| ts < s) {
                stream.start_time = Some(ts);
            }
        }
        mpeg::fill_params(stream, pkt.data());
        trace!(
            "TS: 流 #{index} PES {} 字节 pts={:?}",
            pkt.size(),
            pkt.pts
        );

        let Some(buf) = self.pes.get_mut(&pid) else {
            return;
        };
        match buf.merger.as_mut() {
            Some(merger) => self.queue.extend(merger.push(pkt)),
            None => self.queue.push_back(pkt),
        }
    }

    /// 90kHz 时间戳展开环绕后换算为 tick
    fn unwrap_ts(&mut self, raw: i64) -> i64 {
        let value = match self.ts_ref {
            Some(reference) => unwrap_33bit(raw, reference),
            None => raw,
        };
        self.ts_ref = Some(value);
        from_90k(value)
    }

    /// 输出所有未完成的 PES (流结束)
    fn flush_all(&mut self) {
        let mut pids: Vec<(usize, u16)> = self
            .pes
            .iter()
            .map(|(&pid, buf)| (buf.stream_index, pid))
            .collect();
        pids.sort_unstable();
        for (_, pid) in pids {
            self.emit_pes(pid);
            if let Some(held) = self
                .pes
                .get_mut(&pid)
                .and_then(|b| b.merger.as_mut())
                .and_then(FieldMerger::take)
            {
                self.queue.push_back(held);
            }
        }
    }

    fn reset_state(&mut self) {
        for buf in self.pes.values_mut() {
            buf.reset();
        }
        for sec in self.sections.values_mut() {
            sec.reset();
        }
        self.cc.clear();
        self.queue.clear();
        self.eof = false;
    }

    // ========================
    // 时长与定位
    // ========================

    /// 定位采样使用的参考流: 第一条视频流, 没有则第一条流
    fn reference_pid(&self) -> Option<u16> {
        let by_index = |video_only: bool| {
            self.pes
                .iter()
                .filter(|(_, b)| {
                    !video_only || self.streams[b.stream_index].media_type() == MediaType::Video
                })
                .min_by_key(|(_, b)| b.stream_index)
                .map(|(&pid, _)| pid)
        };
        by_index(true).or_else(|| by_index(false))
    }

    /// 从 `start` 起扫描 `limit` 字节, 收集参考流的 PTS 与 PCR
    ///
    /// `stop_at_first` 为 true 时找到第一个 PTS 即返回.
    fn scan(
        &self,
        io: &mut IoContext,
        start: u64,
        limit: u64,
        pid: u16,
        stop_at_first: bool,
    ) -> LiuResult<ScanHit> {
        let mut hit = ScanHit::default();
        io.seek(SeekFrom::Start(start))?;
        let end = start.saturating_add(limit);
        while io.position() < end {
            let pos = io.position();
            let head = io.peek(self.stride)?;
            if head.len() < TS_PACKET_SIZE {
                break;
            }
            if head[0] != TS_SYNC_BYTE {
                if !self.resync(io)? {
                    break;
                }
                continue;
            }
            let mut pkt = [0u8; TS_PACKET_SIZE];
            pkt.copy_from_slice(&head[..TS_PACKET_SIZE]);
            let len = head.len() as u64;
            io.skip(len)?;

            let hdr = TsHeader::parse(&pkt);
            if hdr.tei {
                continue;
            }
            let Some((af, off)) = parse_adaptation(&pkt, &hdr) else {
                continue;
            };
            if let Some(pcr) = af.pcr.filter(|_| Some(hdr.pid) == self.pcr_pid) {
                hit.first_pcr.get_or_insert((pos, pcr));
                hit.last_pcr = Some((pos, pcr));
            }
            if hdr.pid != pid || !hdr.unit_start || !hdr.has_payload || hdr.scrambling != 0 {
                continue;
            }
            if let Some(pts) = pes::parse_pes_header(&pkt[off..])
                .ok()
                .and_then(|h| h.pts)
            {
                hit.first_pts.get_or_insert((pos, pts));
                hit.last_pts = Some((pos, pts));
                if stop_at_first {
                    break;
                }
            }
        }
        Ok(hit)
    }

    /// 扫描首尾估算时长与码率
    fn estimate_duration(&mut self, io: &mut IoContext) -> LiuResult<()> {
        let (Some(pid), Some(size)) = (self.reference_pid(), io.size()) else {
            return Ok(());
        };
        let head = self.scan(io, self.data_start, PTS_SCAN_BYTES, pid, true)?;
        let Some((_, first)) = head.first_pts else {
            debug!("TS: 开头未找到 PTS, 无法估算时长");
            return Ok(());
        };
        self.first_pts_90k = Some(first);

        let tail_start = self.align(size.saturating_sub(PTS_SCAN_BYTES), self.data_start, size);
        let tail = self.scan(io, tail_start, PTS_SCAN_BYTES, pid, false)?;
        if let Some((_, last)) = tail.last_pts {
            let span = unwrap_33bit(last, first) - first;
            if span > 0 {
                self.duration = Some(from_90k(span));
            }
        }

        // 码率优先取 PCR 斜率
        let pcr_rate = match (head.first_pcr, tail.last_pcr) {
            (Some((p0, c0)), Some((p1, c1))) if p1 > p0 && c1 > c0 => {
                Some((p1 - p0) as f64 / (c1 - c0) as f64)
            }
            _ => None,
        };
        self.byte_rate = pcr_rate.or_else(|| {
            self.duration
                .map(|d| (size - self.data_start) as f64 / d as f64)
        });
        debug!(
            "TS: 起始 PTS {}, 时长 {:?}, 码率 {:?} 字节/tick",
            format_ticks(from_90k(first)),
            self.duration.map(format_ticks),
            self.byte_rate
        );
        Ok(())
    }

    /// 对齐到包边界并限制在 [lo, hi - stride]
    fn align(&self, offset: u64, lo: u64, hi: u64) -> u64 {
        let stride = self.stride as u64;
        let max = hi.saturating_sub(stride).max(lo);
        let clamped = offset.clamp(lo, max);
        self.data_start + (clamped.saturating_sub(self.data_start)) / stride * stride
    }
}

impl Demuxer for TsDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::MpegTs
    }

    fn name(&self) -> &str {
        "mpegts"
    }

    fn open(&mut self, io: &mut IoContext) -> LiuResult<()> {
        let head = io.peek(SYNC_PROBE_SIZE)?;
        let (offset, stride) =
            detect_sync(head).ok_or_else(|| LiuError::Format("TS: 未找到同步字节".into()))?;
        io.skip(offset as u64)?;
        self.stride = stride;
        self.data_start = io.position();
        if stride == M2TS_PACKET_SIZE {
            debug!("TS: 检测到 192 字节 M2TS 包");
        }

        // 处理到所有 PMT 解析完成, 期间产生的 PES 留在队列里
        let mut count = 0;
        while !self.programs_ready() && count < OPEN_MAX_PACKETS {
            match self.read_unit(io)? {
                Some((pos, pkt)) => self.process_packet(pos, &pkt),
                None => break,
            }
            count += 1;
        }
        if self.streams.is_empty() {
            return Err(LiuError::Format(format!(
                "TS: {count} 个包内未找到任何节目流"
            )));
        }

        if io.is_seekable() {
            let resume = io.position();
            self.estimate_duration(io)?;
            io.seek(SeekFrom::Start(resume))?;
        }
        info!(
            "TS: 打开完成, {} 个节目, {} 条流, 包长 {stride}",
            self.programs.len(),
            self.streams.len()
        );
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LiuResult<Packet> {
        loop {
            if let Some(pkt) = self.queue.pop_front() {
                return Ok(Packet::Data(pkt));
            }
            if self.eof {
                return Err(LiuError::Eof);
            }
            match self.read_unit(io)? {
                Some((pos, pkt)) => self.process_packet(pos, &pkt),
                None => {
                    self.flush_all();
                    self.eof = true;
                }
            }
        }
    }

    fn seek(&mut self, io: &mut IoContext, time: i64) -> LiuResult<i64> {
        if !io.is_seekable() {
            return Err(LiuError::Unsupported("TS: 源不可定位".into()));
        }
        let (Some(size), Some(first), Some(rate), Some(pid)) = (
            io.size(),
            self.first_pts_90k,
            self.byte_rate,
            self.reference_pid(),
        ) else {
            return Err(LiuError::Unsupported("TS: 缺少时间戳或码率, 无法定位".into()));
        };
        let first_ticks = from_90k(first);
        let tolerance = self.config.seek_tolerance;

        let (mut lo, mut hi) = (self.data_start, size);
        let mut guess = self.data_start as f64 + (time - first_ticks).max(0) as f64 * rate;
        let mut best: Option<(u64, i64)> = None;
        for step in 0..self.config.seek_steps {
            let offset = self.align(guess as u64, lo, hi);
            let Some((pos, raw)) = self.scan(io, offset, PTS_SCAN_BYTES, pid, true)?.first_pts
            else {
                // 之后已无 PTS, 往前折半
                hi = offset;
                guess = (lo + offset) as f64 / 2.0;
                if hi <= lo + self.stride as u64 {
                    break;
                }
                continue;
            };
            let pts = from_90k(unwrap_33bit(raw, first));
            let diff = time - pts;
            trace!("TS: 定位第 {step} 步 @{pos} -> {}", format_ticks(pts));
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
            if hi <= lo + self.stride as u64 {
                break;
            }
            guess = offset as f64 + diff as f64 * rate;
        }

        let (pos, pts) = best.ok_or(LiuError::Eof)?;
        io.seek(SeekFrom::Start(pos))?;
        self.reset_state();
        self.ts_ref = Some(to_90k(pts));
        Ok(pts)
    }

    fn duration(&self) -> Option<i64> {
        self.duration
    }
}

/// MPEG-TS 格式探测器
pub struct TsProbe;

impl FormatProbe for TsProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if let Some((offset, stride)) = detect_sync(data) {
            match sync_run(data, offset, stride) {
                n if n >= 5 => return Some(probe::SCORE_MAX),
                n if n >= 3 => return Some(probe::SCORE_PARTIAL),
                _ => {}
            }
        }
        probe::extension_score(FormatId::MpegTs, filename)
    }

    fn format_id(&self) -> FormatId {
        FormatId::MpegTs
    }
}
