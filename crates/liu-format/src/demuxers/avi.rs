//! AVI (Audio Video Interleave) 解封装器.
//!
//! AVI 基于 RIFF 格式, 结构如下:
//! ```text
//! RIFF 'AVI '
//!   LIST 'hdrl'
//!     avih (主 AVI 头: 56 字节)
//!     LIST 'strl' (每流一个)
//!       strh (流头)
//!       strf (流格式: BITMAPINFOHEADER 或 WAVEFORMATEX)
//!       strn (流名称, 可选)
//!       indx (OpenDML 超级索引, 可选)
//!   LIST 'INFO' (可选)
//!   LIST 'movi' (数据块)
//!     00dc (视频数据)
//!     01wb (音频数据)
//!     ix00 (OpenDML 标准索引, 可选)
//!   idx1 (可选旧式索引)
//! RIFF 'AVIX' (OpenDML 扩展段, 可有多个)
//!   LIST 'movi'
//! ```
//!
//! 交织模式按文件顺序读取 movi 中的块; 遇到无效块标签时依次尝试
//! 按索引重定位, 回退重扫, 按索引跳块, 逐字节扫描. 非交织模式每条流按
//! 自己的索引读取, 总是先输出时间戳最小的那条流.

use std::io::SeekFrom;

use bytes::Bytes;
use liu_core::timestamp::format_ticks;
use liu_core::{
    CodecId, DataPacket, LiuError, LiuResult, Packet, PacketFlags, Rational, TICKS_PER_SECOND,
};
use log::{debug, info, trace, warn};

use crate::config::{AviConfig, DemuxConfig};
use crate::demuxer::Demuxer;
use crate::demuxers::riff::{self, BitmapInfo, WaveFormat};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{self, FormatProbe, ProbeScore};
use crate::stream::{AudioParams, Stream, StreamFlags, VideoParams};

/// idx1 索引条目标志: 关键帧
const AVIIF_KEYFRAME: u32 = 0x10;
/// OpenDML 标准索引条目大小字段的最高位: 非关键帧
const ODML_NON_KEYFRAME: u32 = 0x8000_0000;
/// OpenDML 索引类型: 索引的索引
const AVI_INDEX_OF_INDEXES: u8 = 0x00;
/// OpenDML 索引类型: 块索引
const AVI_INDEX_OF_CHUNKS: u8 = 0x01;
/// 超级索引最多嵌套层数
const MAX_INDEX_DEPTH: u32 = 4;
/// 连续命中索引多少次后视为可信
const TRUSTED_HITS: u32 = 2;
/// 逐字节扫描的窗口
const SCAN_WINDOW: usize = 64 * 1024;

/// 块头长度
const CHUNK_HEADER_LEN: u64 = 8;

/// 按 RIFF 规则补齐到偶数
fn padded(size: u32) -> u64 {
    u64::from(size) + u64::from(size & 1)
}

/// 数据块标签 `NNxx` 中的流序号
fn chunk_stream(tag: &[u8; 4]) -> Option<usize> {
    if !(tag[0].is_ascii_digit() && tag[1].is_ascii_digit()) {
        return None;
    }
    if !(tag[2].is_ascii_alphanumeric() && tag[3].is_ascii_alphanumeric()) {
        return None;
    }
    Some(usize::from(tag[0] - b'0') * 10 + usize::from(tag[1] - b'0'))
}

/// movi 中合法的非数据块
fn is_structural(tag: &[u8; 4]) -> bool {
    matches!(tag, b"LIST" | b"JUNK" | b"idx1")
        || (&tag[..2] == b"ix" && tag[2].is_ascii_digit() && tag[3].is_ascii_digit())
}

fn le16(d: &[u8], o: usize) -> u16 {
    u16::from_le_bytes([d[o], d[o + 1]])
}

fn le32(d: &[u8], o: usize) -> u32 {
    u32::from_le_bytes([d[o], d[o + 1], d[o + 2], d[o + 3]])
}

fn le64(d: &[u8], o: usize) -> u64 {
    u64::from(le32(d, o)) | (u64::from(le32(d, o + 4)) << 32)
}

/// 流头 (strh) 中用到的字段
#[derive(Debug, Clone, Default)]
struct StreamHeader {
    fcc_type: [u8; 4],
    handler: [u8; 4],
    scale: u32,
    rate: u32,
    start: u32,
    length: u32,
    sample_size: u32,
}

impl StreamHeader {
    fn parse(d: &[u8]) -> LiuResult<Self> {
        if d.len() < 48 {
            return Err(LiuError::InvalidData(format!("AVI: strh 仅 {} 字节", d.len())));
        }
        Ok(Self {
            fcc_type: [d[0], d[1], d[2], d[3]],
            handler: [d[4], d[5], d[6], d[7]],
            scale: le32(d, 20),
            rate: le32(d, 24),
            start: le32(d, 28),
            length: le32(d, 32),
            sample_size: le32(d, 44),
        })
    }
}

/// 主 AVI 头 (avih) 中用到的字段
#[derive(Debug, Clone, Copy, Default)]
struct MainHeader {
    usec_per_frame: u32,
    total_frames: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackKind {
    Video,
    Audio,
    Text,
    Other,
}

/// 索引条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexEntry {
    /// 块头的绝对位置
    pos: u64,
    size: u32,
    keyframe: bool,
    /// strl 序号
    track: usize,
    /// 本块之前累计的帧数或字节数
    counter: u64,
}

/// 每个 strl 对应的解封装状态
#[derive(Debug)]
struct Track {
    kind: TrackKind,
    /// 对外的流索引, 不输出的流为 None
    stream: Option<usize>,
    scale: u32,
    rate: u32,
    start: u32,
    /// CBR 音频按字节计时时的块对齐, 其余按块计数
    cbr_align: Option<u32>,
    /// 已读取的帧数或字节数
    counter: u64,
    /// 超级索引: (标准索引块位置, 块大小)
    super_index: Vec<(u64, u32)>,
    /// 按位置排序的索引
    index: Vec<IndexEntry>,
    /// 非交织模式下的读取位置
    cursor: usize,
}

impl Track {
    /// 计数值对应的时间 (tick)
    fn ticks(&self, counter: u64) -> i64 {
        let units = match self.cbr_align {
            Some(align) => counter / u64::from(align.max(1)),
            None => counter,
        } + u64::from(self.start);
        if self.rate == 0 {
            return 0;
        }
        (i128::from(units) * i128::from(self.scale) * i128::from(TICKS_PER_SECOND)
            / i128::from(self.rate)) as i64
    }

    /// 一个块推进的计数
    fn advance(&self, size: u32) -> u64 {
        match self.cbr_align {
            Some(_) => u64::from(size),
            None => 1,
        }
    }

    /// 按位置查找索引条目
    fn entry_at(&self, pos: u64) -> Option<&IndexEntry> {
        self.index
            .binary_search_by_key(&pos, |e| e.pos)
            .ok()
            .map(|i| &self.index[i])
    }

    /// 索引末尾的计数值
    fn index_total(&self) -> Option<u64> {
        self.index.last().map(|e| e.counter + self.advance(e.size))
    }
}

/// 块头分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkKind {
    /// 数据块, 值为 strl 序号
    Data(usize),
    /// `LIST 'rec '` 分组, 进入其中
    Record,
    /// 需要整体跳过的块
    Skip,
    Invalid,
}

/// 同步恢复的计数, 成功读到块后清零
#[derive(Debug, Default)]
struct ResyncState {
    /// 按索引跳过的块数
    skipped: u32,
    /// 逐字节扫描过的字节数
    scanned: u64,
}

/// AVI 解封装器
pub struct AviDemuxer {
    config: AviConfig,
    streams: Vec<Stream>,
    tracks: Vec<Track>,
    metadata: Vec<(String, String)>,
    main: MainHeader,
    /// 各 movi 段的 (数据起始, 结束)
    segments: Vec<(u64, u64)>,
    /// 当前段的结束位置
    movi_end: u64,
    /// idx1 原始条目: (块标签, 标志, 偏移, 大小)
    idx1: Vec<([u8; 4], u32, u32, u32)>,
    /// 所有流的索引按位置合并
    global: Vec<IndexEntry>,
    noninterleaved: bool,
    /// 最近连续命中索引的块数
    index_hits: u32,
    /// 上一个成功读取的块头位置
    last_chunk: Option<u64>,
    resync: ResyncState,
    discontinuity: bool,
    duration: Option<i64>,
}

impl AviDemuxer {
    /// 创建 AVI 解封装器实例 (工厂函数)
    pub fn create(config: &DemuxConfig) -> LiuResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new(config)))
    }

    pub fn new(config: &DemuxConfig) -> Self {
        Self {
            config: config.avi.clone(),
            streams: Vec::new(),
            tracks: Vec::new(),
            metadata: Vec::new(),
            main: MainHeader::default(),
            segments: Vec::new(),
            movi_end: 0,
            idx1: Vec::new(),
            global: Vec::new(),
            noninterleaved: false,
            index_hits: 0,
            last_chunk: None,
            resync: ResyncState::default(),
            discontinuity: false,
            duration: None,
        }
    }

    /// 合并后的索引条目总数
    pub fn index_len(&self) -> usize {
        self.global.len()
    }

    // ========================
    // 头部解析
    // ========================

    /// 读取块头 (标签, 大小)
    fn read_chunk_header(io: &mut IoContext) -> LiuResult<([u8; 4], u32)> {
        let tag = io.read_tag()?;
        let size = io.read_u32_le()?;
        Ok((tag, size))
    }

    /// 块的结束位置, 越过父级时截断到父级
    fn chunk_end(io: &IoContext, size: u32, parent_end: u64) -> u64 {
        (io.position() + u64::from(size)).min(parent_end)
    }

    fn skip_to(io: &mut IoContext, end: u64) -> LiuResult<()> {
        let pos = io.position();
        if end > pos {
            io.skip(end - pos)?;
        }
        Ok(())
    }

    /// 遍历一个 RIFF 段的顶层块
    fn walk_riff(&mut self, io: &mut IoContext, end: u64, first: bool) -> LiuResult<()> {
        while io.position() + CHUNK_HEADER_LEN <= end {
            let (tag, size) = match Self::read_chunk_header(io) {
                Ok(h) => h,
                Err(LiuError::Eof) => break,
                Err(e) => return Err(e),
            };
            let body_end = Self::chunk_end(io, size, end);
            match &tag {
                b"LIST" => {
                    let kind = io.read_tag()?;
                    match &kind {
                        b"hdrl" if first => self.parse_hdrl(io, body_end)?,
                        b"INFO" => self.parse_info(io, body_end)?,
                        b"movi" => {
                            let start = io.position();
                            // 流式采集的文件 movi 大小可能为 0
                            let movi_end = if size <= 4 {
                                io.size().unwrap_or(u64::MAX)
                            } else {
                                body_end
                            };
                            debug!("AVI: movi 段 {start}..{movi_end}");
                            self.segments.push((start, movi_end));
                            if !io.is_seekable() {
                                return Ok(());
                            }
                            io.seek(SeekFrom::Start(movi_end))?;
                        }
                        _ => trace!("AVI: 跳过 LIST '{}'", riff::fourcc_str(&kind)),
                    }
                }
                b"idx1" if first => self.read_idx1(io, size)?,
                _ => trace!("AVI: 跳过块 '{}'", riff::fourcc_str(&tag)),
            }
            if io.position() < body_end {
                Self::skip_to(io, body_end)?;
            }
            if size & 1 == 1 && io.position() < end {
                io.skip(1)?;
            }
        }
        Ok(())
    }

    /// 解析 hdrl 列表
    fn parse_hdrl(&mut self, io: &mut IoContext, end: u64) -> LiuResult<()> {
        while io.position() + CHUNK_HEADER_LEN <= end {
            let (tag, size) = Self::read_chunk_header(io)?;
            let body_end = Self::chunk_end(io, size, end);
            match &tag {
                b"avih" => {
                    let d = io.read_bytes((body_end - io.position()) as usize)?;
                    if d.len() < 56 {
                        return Err(LiuError::InvalidData("AVI: avih 块不足 56 字节".into()));
                    }
                    self.main = MainHeader {
                        usec_per_frame: le32(&d, 0),
                        total_frames: le32(&d, 16),
                    };
                    debug!(
                        "AVI: avih {}us/帧, {} 帧, 声明 {} 条流",
                        self.main.usec_per_frame,
                        self.main.total_frames,
                        le32(&d, 24)
                    );
                }
                b"LIST" => {
                    let kind = io.read_tag()?;
                    if &kind == b"strl" {
                        self.parse_strl(io, body_end)?;
                    }
                }
                _ => {}
            }
            Self::skip_to(io, body_end)?;
            if size & 1 == 1 && io.position() < end {
                io.skip(1)?;
            }
        }
        Ok(())
    }

    /// 解析一个 strl 列表并建立对应的流
    fn parse_strl(&mut self, io: &mut IoContext, end: u64) -> LiuResult<()> {
        let mut header = None;
        let mut format = Vec::new();
        let mut name = None;
        let mut super_index = Vec::new();
        while io.position() + CHUNK_HEADER_LEN <= end {
            let (tag, size) = Self::read_chunk_header(io)?;
            let body_end = Self::chunk_end(io, size, end);
            let len = (body_end - io.position()) as usize;
            match &tag {
                b"strh" => header = Some(StreamHeader::parse(&io.read_bytes(len)?)?),
                b"strf" => format = io.read_bytes(len)?,
                b"strn" => {
                    let d = io.read_bytes(len)?;
                    let text = d.split(|&b| b == 0).next().unwrap_or_default();
                    name = Some(String::from_utf8_lossy(text).into_owned());
                }
                b"indx" => super_index = parse_super_index(&io.read_bytes(len)?),
                _ => {}
            }
            Self::skip_to(io, body_end)?;
            if size & 1 == 1 && io.position() < end {
                io.skip(1)?;
            }
        }
        let header =
            header.ok_or_else(|| LiuError::InvalidData("AVI: strl 中缺少 strh".into()))?;
        self.add_track(header, &format, name, super_index)
    }

    fn add_track(
        &mut self,
        h: StreamHeader,
        format: &[u8],
        name: Option<String>,
        super_index: Vec<(u64, u32)>,
    ) -> LiuResult<()> {
        let ordinal = self.tracks.len();
        let index = self.streams.len();
        let kind = match &h.fcc_type {
            b"vids" => TrackKind::Video,
            b"auds" => TrackKind::Audio,
            b"txts" => TrackKind::Text,
            _ => TrackKind::Other,
        };
        let mut cbr_align = None;
        let stream = match kind {
            TrackKind::Video => {
                let bi = BitmapInfo::parse(format).unwrap_or_else(|e| {
                    warn!("AVI: 流 {ordinal} 的 strf 无效 ({e}), 只用 strh");
                    BitmapInfo::default()
                });
                let mut codec = riff::fourcc_to_codec(&bi.compression);
                if codec == CodecId::None || bi.compression == [0; 4] {
                    let by_handler = riff::fourcc_to_codec(&h.handler);
                    if by_handler != CodecId::None && h.handler != [0; 4] {
                        codec = by_handler;
                    }
                }
                debug!(
                    "AVI: 视频流 {ordinal} '{}'/'{}' -> {codec}",
                    riff::fourcc_str(&h.handler),
                    riff::fourcc_str(&bi.compression)
                );
                let mut s = Stream::video(
                    index,
                    codec,
                    VideoParams {
                        frame_rate: Rational::new(i64::from(h.rate), i64::from(h.scale)),
                        width: bi.width,
                        height: bi.height,
                        aspect: Rational::UNDEFINED,
                    },
                );
                s.codec_private = bi.extra;
                s.nb_frames = u64::from(h.length);
                Some(s)
            }
            TrackKind::Audio => {
                let wf = WaveFormat::parse(format)?;
                let codec = riff::wave_format_to_codec(wf.format_tag, wf.bits_per_sample);
                debug!(
                    "AVI: 音频流 {ordinal} 格式码 0x{:04X} -> {codec}, {}Hz {}ch",
                    wf.format_tag, wf.sample_rate, wf.channels
                );
                let block_align = u32::from(wf.block_align);
                let mut s = Stream::audio(
                    index,
                    codec,
                    AudioParams {
                        sample_rate: wf.sample_rate,
                        channels: wf.channels,
                        block_align,
                        bits_per_sample: wf.bits_per_sample,
                        samples_per_frame: 0,
                    },
                );
                s.bit_rate = u64::from(wf.avg_bytes_per_sec) * 8;
                s.codec_private = wf.extra;
                if h.sample_size == 0 {
                    // 每块一帧的 VBR 音频
                    s.flags |= StreamFlags::VBR;
                } else {
                    cbr_align = Some(block_align.max(h.sample_size).max(1));
                }
                Some(s)
            }
            TrackKind::Text => Some(Stream::new(index, CodecId::Text)),
            TrackKind::Other => {
                debug!(
                    "AVI: 忽略类型为 '{}' 的流 {ordinal}",
                    riff::fourcc_str(&h.fcc_type)
                );
                None
            }
        };

        let mut track = Track {
            kind,
            stream: None,
            scale: h.scale,
            rate: h.rate,
            start: h.start,
            cbr_align,
            counter: 0,
            super_index,
            index: Vec::new(),
            cursor: 0,
        };
        if let Some(mut s) = stream {
            if h.length > 0 && h.rate > 0 {
                let end = track.ticks(match cbr_align {
                    Some(align) => u64::from(h.length) * u64::from(align),
                    None => u64::from(h.length),
                });
                s.duration = Some(end - track.ticks(0));
            }
            s.start_time = Some(track.ticks(0) + self.config.start_time);
            s.program = ordinal as u32;
            if let Some(name) = name {
                s.metadata.push(("title".into(), name));
            }
            track.stream = Some(index);
            self.streams.push(s);
        }
        self.tracks.push(track);
        Ok(())
    }

    /// 解析 LIST 'INFO' 中的文本标签
    fn parse_info(&mut self, io: &mut IoContext, end: u64) -> LiuResult<()> {
        while io.position() + CHUNK_HEADER_LEN <= end {
            let (tag, size) = Self::read_chunk_header(io)?;
            let body_end = Self::chunk_end(io, size, end);
            let d = io.read_bytes((body_end - io.position()) as usize)?;
            let text = d.split(|&b| b == 0).next().unwrap_or_default();
            let key = match &tag {
                b"INAM" => "title".to_string(),
                b"IART" => "artist".to_string(),
                b"ICMT" => "comment".to_string(),
                b"ICRD" => "date".to_string(),
                b"ISFT" => "encoder".to_string(),
                b"ICOP" => "copyright".to_string(),
                b"IGNR" => "genre".to_string(),
                other => riff::fourcc_str(other).to_ascii_lowercase(),
            };
            self.metadata
                .push((key, String::from_utf8_lossy(text).trim().to_string()));
            if size & 1 == 1 && io.position() < end {
                io.skip(1)?;
            }
        }
        Ok(())
    }

    fn read_idx1(&mut self, io: &mut IoContext, size: u32) -> LiuResult<()> {
        let count = size as usize / 16;
        let d = io.read_bytes(count * 16)?;
        self.idx1 = d
            .chunks_exact(16)
            .map(|e| ([e[0], e[1], e[2], e[3]], le32(e, 4), le32(e, 8), le32(e, 12)))
            .collect();
        debug!("AVI: idx1 {} 个条目", self.idx1.len());
        Ok(())
    }

    /// 继续读取 RIFF 'AVIX' 扩展段
    fn walk_extensions(&mut self, io: &mut IoContext, mut pos: u64) -> LiuResult<()> {
        let size = io.size().unwrap_or(u64::MAX);
        while pos + 12 <= size {
            io.seek(SeekFrom::Start(pos))?;
            let (tag, len) = Self::read_chunk_header(io)?;
            let form = io.read_tag()?;
            if &tag != b"RIFF" || &form != b"AVIX" {
                break;
            }
            let end = (pos + CHUNK_HEADER_LEN + u64::from(len)).min(size);
            self.walk_riff(io, end, false)?;
            pos = end + u64::from(len & 1);
        }
        Ok(())
    }

    // ========================
    // 索引
    // ========================

    /// 读取 OpenDML 索引块, 超级索引递归展开
    fn read_odml_index(
        &self,
        io: &mut IoContext,
        track: usize,
        pos: u64,
        depth: u32,
        out: &mut Vec<IndexEntry>,
    ) -> LiuResult<()> {
        if depth > MAX_INDEX_DEPTH {
            warn!("AVI: OpenDML 索引嵌套过深, 忽略");
            return Ok(());
        }
        io.seek(SeekFrom::Start(pos))?;
        let (_, size) = Self::read_chunk_header(io)?;
        let d = io.read_bytes(size as usize)?;
        if d.len() < 24 {
            return Err(LiuError::InvalidData("AVI: OpenDML 索引块过短".into()));
        }
        let longs_per_entry = usize::from(le16(&d, 0));
        let index_type = d[3];
        let entries = le32(&d, 4) as usize;
        match index_type {
            AVI_INDEX_OF_INDEXES => {
                for (offset, _) in parse_super_index(&d) {
                    self.read_odml_index(io, track, offset, depth + 1, out)?;
                }
            }
            AVI_INDEX_OF_CHUNKS if longs_per_entry >= 2 => {
                let base = le64(&d, 12);
                let stride = longs_per_entry * 4;
                for e in d[24..].chunks_exact(stride).take(entries) {
                    let offset = le32(e, 0);
                    let size = le32(e, 4);
                    out.push(IndexEntry {
                        // 条目偏移指向数据, 减去块头得到块位置
                        pos: (base + u64::from(offset)).saturating_sub(CHUNK_HEADER_LEN),
                        size: size & !ODML_NON_KEYFRAME,
                        keyframe: size & ODML_NON_KEYFRAME == 0,
                        track,
                        counter: 0,
                    });
                }
            }
            other => warn!("AVI: 未知的 OpenDML 索引类型 {other}"),
        }
        Ok(())
    }

    /// idx1 的偏移基准: 相对 'movi' 标签或文件开头, 以第一条数据条目的
    /// 块标签是否对得上判断
    fn idx1_base(&self, io: &mut IoContext) -> LiuResult<u64> {
        let movi_tag = self.segments.first().map_or(0, |s| s.0.saturating_sub(4));
        let Some(&(ckid, _, offset, _)) = self.idx1.iter().find(|e| chunk_stream(&e.0).is_some())
        else {
            return Ok(movi_tag);
        };
        for base in [movi_tag, 0] {
            let at = base + u64::from(offset);
            if io.size().is_some_and(|s| at + 4 > s) {
                continue;
            }
            io.seek(SeekFrom::Start(at))?;
            if io.read_tag()? == ckid {
                debug!("AVI: idx1 使用{}偏移", if base == 0 { "绝对" } else { "相对" });
                return Ok(base);
            }
        }
        warn!("AVI: idx1 偏移无法校验, 按相对偏移处理");
        Ok(movi_tag)
    }

    /// 合并 OpenDML 索引与 idx1, 计算每条目的计数值
    fn build_index(&mut self, io: &mut IoContext) -> LiuResult<()> {
        let mut per_track: Vec<Vec<IndexEntry>> = vec![Vec::new(); self.tracks.len()];
        for (t, entries) in per_track.iter_mut().enumerate() {
            for &(pos, _) in &self.tracks[t].super_index {
                if let Err(e) = self.read_odml_index(io, t, pos, 0, entries) {
                    warn!("AVI: 流 {t} 的 OpenDML 索引 @{pos} 读取失败: {e}");
                }
            }
        }
        if !self.idx1.is_empty() {
            let base = self.idx1_base(io)?;
            for &(ckid, flags, offset, size) in &self.idx1 {
                let Some(t) = chunk_stream(&ckid).filter(|&t| t < self.tracks.len()) else {
                    continue;
                };
                per_track[t].push(IndexEntry {
                    pos: base + u64::from(offset),
                    size,
                    keyframe: flags & AVIIF_KEYFRAME != 0,
                    track: t,
                    counter: 0,
                });
            }
        }

        self.global.clear();
        for (track, mut entries) in self.tracks.iter_mut().zip(per_track) {
            entries.sort_by_key(|e| e.pos);
            entries.dedup_by_key(|e| e.pos);
            let mut counter = 0;
            for e in &mut entries {
                e.counter = counter;
                counter += track.advance(e.size);
            }
            self.global.extend_from_slice(&entries);
            track.index = entries;
        }
        self.global.sort_by_key(|e| e.pos);
        debug!("AVI: 合并索引 {} 个条目", self.global.len());
        Ok(())
    }

    // ========================
    // 块读取
    // ========================

    /// 按块头判断块的类别, `head` 至少 8 字节, `at` 为其位置
    fn classify(&self, head: &[u8], at: u64) -> ChunkKind {
        let tag = [head[0], head[1], head[2], head[3]];
        let size = le32(head, 4);
        if at + CHUNK_HEADER_LEN + u64::from(size) > self.movi_end {
            return ChunkKind::Invalid;
        }
        if let Some(t) = chunk_stream(&tag) {
            return if t < self.tracks.len() {
                ChunkKind::Data(t)
            } else {
                ChunkKind::Invalid
            };
        }
        if &tag == b"LIST" {
            return match head.get(8..12) {
                Some(b"rec ") => ChunkKind::Record,
                _ => ChunkKind::Skip,
            };
        }
        if is_structural(&tag) {
            ChunkKind::Skip
        } else {
            ChunkKind::Invalid
        }
    }

    /// 进入下一个 movi 段
    fn next_segment(&mut self, io: &mut IoContext) -> LiuResult<bool> {
        let pos = io.position();
        if let Some(&(start, end)) = self.segments.iter().find(|s| s.0 > pos) {
            if io.is_seekable() {
                io.seek(SeekFrom::Start(start))?;
            } else {
                Self::skip_to(io, start)?;
            }
            self.movi_end = end;
            return Ok(true);
        }
        if io.is_seekable() {
            return Ok(false);
        }
        // 不可定位的源边读边找 AVIX 段
        if self.movi_end != u64::MAX {
            Self::skip_to(io, self.movi_end + (self.movi_end & 1))?;
        }
        loop {
            let head = io.peek(12)?;
            if head.len() < 12 {
                return Ok(false);
            }
            let tag = [head[0], head[1], head[2], head[3]];
            let form = [head[8], head[9], head[10], head[11]];
            let size = le32(head, 4);
            match (&tag, &form) {
                (b"RIFF", b"AVIX") => io.skip(12)?,
                (b"LIST", b"movi") => {
                    io.skip(12)?;
                    let start = io.position();
                    self.movi_end = start + u64::from(size).saturating_sub(4);
                    self.segments.push((start, self.movi_end));
                    return Ok(true);
                }
                _ if tag.iter().all(|b| b.is_ascii_graphic() || *b == b' ') => {
                    io.skip(CHUNK_HEADER_LEN + padded(size))?;
                }
                _ => return Ok(false),
            }
        }
    }

    /// 交织模式: 按文件顺序读取下一个数据块
    fn read_interleaved(&mut self, io: &mut IoContext) -> LiuResult<Packet> {
        loop {
            let pos = io.position();
            if pos + CHUNK_HEADER_LEN > self.movi_end {
                if !self.next_segment(io)? {
                    return Err(LiuError::Eof);
                }
                continue;
            }
            let head = io.peek(12)?;
            if head.len() < CHUNK_HEADER_LEN as usize {
                return Err(LiuError::Eof);
            }
            let size = le32(head, 4);
            match self.classify(head, pos) {
                ChunkKind::Record => io.skip(12)?,
                ChunkKind::Skip => {
                    let skip = (CHUNK_HEADER_LEN + padded(size)).min(self.movi_end - pos);
                    io.skip(skip)?;
                }
                ChunkKind::Data(t) => {
                    self.resync = ResyncState::default();
                    self.last_chunk = Some(pos);
                    if let Some(pkt) = self.read_chunk(io, t, pos, size)? {
                        return Ok(Packet::Data(pkt));
                    }
                }
                ChunkKind::Invalid => self.recover(io, pos)?,
            }
        }
    }

    /// 读取一个数据块, 空块和不输出的流返回 None
    fn read_chunk(
        &mut self,
        io: &mut IoContext,
        t: usize,
        pos: u64,
        size: u32,
    ) -> LiuResult<Option<DataPacket>> {
        io.skip(CHUNK_HEADER_LEN)?;
        let data = match io.read_bytes(size as usize) {
            Ok(d) => d,
            Err(LiuError::Eof | LiuError::InvalidData(_)) => {
                debug!("AVI: 末尾块 @{pos} 不完整");
                return Err(LiuError::Eof);
            }
            Err(e) => return Err(e),
        };
        if size & 1 == 1 && io.position() < self.movi_end {
            io.skip(1)?;
        }

        let track = &mut self.tracks[t];
        let indexed = track.entry_at(pos).copied();
        match indexed {
            Some(e) => {
                track.counter = e.counter;
                self.index_hits += 1;
            }
            None => self.index_hits = 0,
        }
        let counter = track.counter;
        track.counter += track.advance(size);
        let Some(stream_index) = track.stream else {
            return Ok(None);
        };
        if size == 0 {
            trace!("AVI: 流 {stream_index} 空块 @{pos}");
            return Ok(None);
        }

        let time = track.ticks(counter);
        let next = track.ticks(track.counter);
        let keyframe = match (track.kind, indexed) {
            (TrackKind::Video, Some(e)) => e.keyframe,
            (TrackKind::Video, None) => track.index.is_empty(),
            _ => true,
        };
        let ts = time + self.config.start_time;
        let mut pkt = DataPacket::new(stream_index, Bytes::from(data));
        pkt.pts = Some(ts);
        pkt.dts = Some(ts);
        pkt.duration = next - time;
        pkt.pos = Some(pos);
        if keyframe {
            pkt.flags |= PacketFlags::KEYFRAME;
        }
        if std::mem::take(&mut self.discontinuity) {
            pkt.flags |= PacketFlags::DISCONTINUITY;
        }
        trace!(
            "AVI: 流 {stream_index} 块 {size} 字节 @{pos} pts={}",
            format_ticks(ts)
        );
        Ok(Some(pkt))
    }

    // ========================
    // 同步恢复
    // ========================

    /// 在 `pos` 处遇到无效块后恢复同步, 成功时 io 停在有效块头
    fn recover(&mut self, io: &mut IoContext, pos: u64) -> LiuResult<()> {
        warn!("AVI: 无效块头 @{pos}, 尝试恢复同步");
        self.discontinuity = true;
        let seekable = io.is_seekable();

        // 1. 索引最近可信: 直接跳到下一个索引块
        if seekable && self.index_hits >= TRUSTED_HITS {
            let next = self.global.partition_point(|e| e.pos <= pos);
            if let Some(e) = self.global.get(next).copied() {
                if self.valid_at(io, e.pos)? {
                    debug!("AVI: 按索引重定位到 @{}", e.pos);
                    return Ok(());
                }
            }
        }
        self.index_hits = 0;

        // 2. 回退若干字节重扫
        if seekable && self.config.backup > 0 {
            let floor = self.last_chunk.map_or(0, |p| p + 1);
            let from = pos.saturating_sub(self.config.backup).max(floor);
            let until = pos + self.config.backup;
            if let Some(found) = self.scan_range(io, from, until, pos)? {
                debug!("AVI: 回退重扫在 @{found} 找到块头");
                io.seek(SeekFrom::Start(found))?;
                return Ok(());
            }
        }

        // 3. 按索引逐块向后跳
        if seekable {
            let mut next = self.global.partition_point(|e| e.pos <= pos);
            while self.resync.skipped < self.config.max_skip {
                let Some(e) = self.global.get(next).copied() else {
                    break;
                };
                self.resync.skipped += 1;
                next += 1;
                if self.valid_at(io, e.pos)? {
                    debug!(
                        "AVI: 按索引跳过 {} 块后在 @{} 恢复",
                        self.resync.skipped, e.pos
                    );
                    return Ok(());
                }
            }
        }

        // 4. 逐字节扫描
        if seekable {
            io.seek(SeekFrom::Start(pos))?;
        }
        if self.scan_forward(io)? {
            debug!("AVI: 逐字节扫描在 @{} 恢复", io.position());
            return Ok(());
        }
        Err(LiuError::Format(format!(
            "AVI: @{pos} 之后无法恢复同步 (已扫描 {} 字节, 跳过 {} 块)",
            self.resync.scanned, self.resync.skipped
        )))
    }

    /// `at` 处是否为有效块头, 是则 io 停在该处
    fn valid_at(&mut self, io: &mut IoContext, at: u64) -> LiuResult<bool> {
        if at + CHUNK_HEADER_LEN > self.movi_end {
            return Ok(false);
        }
        io.seek(SeekFrom::Start(at))?;
        let head = io.peek(12)?;
        Ok(head.len() >= 8 && self.classify(head, at) != ChunkKind::Invalid)
    }

    /// 在 `[from, until]` 内查找可继续读取的块头
    ///
    /// `exclude` 之前只接受数据块, 非数据块会被整体跳过并重新落回 `exclude`.
    fn scan_range(
        &mut self,
        io: &mut IoContext,
        from: u64,
        until: u64,
        exclude: u64,
    ) -> LiuResult<Option<u64>> {
        io.seek(SeekFrom::Start(from))?;
        let mut buf = vec![0u8; (until - from) as usize + 12];
        let n = io.read_up_to(&mut buf)?;
        buf.truncate(n);
        let found = (0..buf.len().saturating_sub(7)).find_map(|i| {
            let at = from + i as u64;
            let usable = match self.classify(&buf[i..], at) {
                ChunkKind::Invalid => false,
                ChunkKind::Data(_) => at != exclude,
                _ => at > exclude,
            };
            usable.then_some(at)
        });
        Ok(found)
    }

    /// 从当前位置后一字节起逐字节扫描, 总量受 max_scan 限制
    fn scan_forward(&mut self, io: &mut IoContext) -> LiuResult<bool> {
        if io.peek(1)?.is_empty() {
            return Ok(false);
        }
        io.skip(1)?;
        self.resync.scanned += 1;
        while self.resync.scanned < self.config.max_scan {
            let base = io.position();
            let buf = io.peek(SCAN_WINDOW)?;
            if buf.len() < 8 {
                return Ok(false);
            }
            let budget = (self.config.max_scan - self.resync.scanned) as usize;
            let limit = (buf.len() - 7).min(budget);
            let hit = (0..limit)
                .find(|&i| self.classify(&buf[i..], base + i as u64) != ChunkKind::Invalid);
            match hit {
                Some(i) => {
                    io.skip(i as u64)?;
                    self.resync.scanned += i as u64;
                    return Ok(true);
                }
                None => {
                    io.skip(limit as u64)?;
                    self.resync.scanned += limit as u64;
                }
            }
        }
        Ok(false)
    }

    // ========================
    // 非交织模式
    // ========================

    fn read_noninterleaved(&mut self, io: &mut IoContext) -> LiuResult<Packet> {
        loop {
            // 下一条目时间最小的流优先, 同时间取序号小的
            let next = self
                .tracks
                .iter()
                .enumerate()
                .filter(|(_, t)| t.stream.is_some())
                .filter_map(|(i, t)| t.index.get(t.cursor).map(|e| (t.ticks(e.counter), i)))
                .min();
            let Some((_, t)) = next else {
                return Err(LiuError::Eof);
            };
            let track = &mut self.tracks[t];
            let entry = track.index[track.cursor];
            track.cursor += 1;

            self.movi_end = self
                .segments
                .iter()
                .find(|s| entry.pos >= s.0.saturating_sub(4) && entry.pos < s.1)
                .map_or(u64::MAX, |s| s.1);
            io.seek(SeekFrom::Start(entry.pos))?;
            let head = io.peek(12)?;
            let tag_ok = head.len() >= 8
                && self.classify(head, entry.pos) == ChunkKind::Data(t)
                && le32(head, 4) == entry.size;
            if !tag_ok {
                warn!("AVI: 索引条目 @{} 与块头不符, 跳过", entry.pos);
                self.discontinuity = true;
                continue;
            }
            if let Some(pkt) = self.read_chunk(io, t, entry.pos, entry.size)? {
                return Ok(Packet::Data(pkt));
            }
        }
    }

    /// 定位参考流: 第一条有索引的视频流, 没有则第一条有索引的流
    fn reference_track(&self) -> Option<usize> {
        let usable = |t: &Track| t.stream.is_some() && !t.index.is_empty();
        self.tracks
            .iter()
            .position(|t| usable(t) && t.kind == TrackKind::Video)
            .or_else(|| self.tracks.iter().position(usable))
    }
}

/// 解析 OpenDML 超级索引 (indx 块内容), 返回 (标准索引块位置, 大小)
fn parse_super_index(d: &[u8]) -> Vec<(u64, u32)> {
    if d.len() < 24 || d[3] != AVI_INDEX_OF_INDEXES {
        return Vec::new();
    }
    let stride = usize::from(le16(d, 0)).max(4) * 4;
    let entries = le32(d, 4) as usize;
    d[24..]
        .chunks_exact(stride)
        .take(entries)
        .map(|e| (le64(e, 0), le32(e, 8)))
        .filter(|&(offset, _)| offset != 0)
        .collect()
}

impl Demuxer for AviDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Avi
    }

    fn name(&self) -> &str {
        "avi"
    }

    fn open(&mut self, io: &mut IoContext) -> LiuResult<()> {
        let (riff_tag, riff_size) = Self::read_chunk_header(io)?;
        let form = io.read_tag()?;
        if &riff_tag != b"RIFF" || &form != b"AVI " {
            return Err(LiuError::Format("AVI: 不是 RIFF 'AVI ' 文件".into()));
        }
        let file_size = io.size().unwrap_or(u64::MAX);
        let riff_end = if riff_size == 0 {
            file_size
        } else {
            (CHUNK_HEADER_LEN + u64::from(riff_size)).min(file_size)
        };

        self.walk_riff(io, riff_end, true)?;
        if self.streams.is_empty() {
            return Err(LiuError::Format("AVI: 文件中未找到有效流".into()));
        }
        let Some(&(movi_start, movi_end)) = self.segments.first() else {
            return Err(LiuError::Format("AVI: 缺少 movi 列表".into()));
        };

        if io.is_seekable() {
            self.walk_extensions(io, riff_end + (riff_end & 1))?;
            self.build_index(io)?;
            io.seek(SeekFrom::Start(movi_start))?;
        }
        self.movi_end = movi_end;

        self.noninterleaved = self.config.noninterleaved;
        if self.noninterleaved && self.global.is_empty() {
            warn!("AVI: 没有索引, 无法使用非交织模式");
            self.noninterleaved = false;
        }

        // 时长: 流头长度, 否则取索引末尾
        for track in &self.tracks {
            let Some(index) = track.stream else { continue };
            let stream = &mut self.streams[index];
            if stream.duration.is_none() {
                stream.duration = track
                    .index_total()
                    .map(|total| track.ticks(total) - track.ticks(0));
            }
        }
        self.duration = self
            .streams
            .iter()
            .filter_map(|s| s.duration)
            .max()
            .or_else(|| {
                let frames = u64::from(self.main.total_frames);
                let usec = u64::from(self.main.usec_per_frame);
                (frames > 0 && usec > 0).then(|| (frames * usec * 27) as i64)
            });

        info!(
            "AVI: 打开完成, {} 条流, {} 个 movi 段, 索引 {} 条{}",
            self.streams.len(),
            self.segments.len(),
            self.global.len(),
            if self.noninterleaved { ", 非交织" } else { "" }
        );
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LiuResult<Packet> {
        if self.noninterleaved {
            self.read_noninterleaved(io)
        } else {
            self.read_interleaved(io)
        }
    }

    fn seek(&mut self, io: &mut IoContext, time: i64) -> LiuResult<i64> {
        if !io.is_seekable() {
            return Err(LiuError::Unsupported("AVI: 源不可定位".into()));
        }
        let Some(r) = self.reference_track() else {
            return Err(LiuError::Unsupported("AVI: 没有索引, 无法定位".into()));
        };
        let target = time - self.config.start_time;
        let reference = &self.tracks[r];
        // 目标之前 (含) 的最后一个关键帧
        let upto = reference
            .index
            .partition_point(|e| reference.ticks(e.counter) <= target);
        let k = reference.index[..upto]
            .iter()
            .rposition(|e| e.keyframe)
            .unwrap_or(0);
        let entry = reference.index[k];
        let landed = reference.ticks(entry.counter);

        for (i, track) in self.tracks.iter_mut().enumerate() {
            if i == r {
                track.cursor = k;
                track.counter = entry.counter;
                continue;
            }
            track.cursor = track.index.partition_point(|e| track.ticks(e.counter) < landed);
            let after = track.index.partition_point(|e| e.pos < entry.pos);
            track.counter = match track.index.get(after) {
                Some(e) => e.counter,
                None => track.index_total().unwrap_or(track.counter),
            };
        }
        if !self.noninterleaved {
            self.movi_end = self
                .segments
                .iter()
                .find(|s| entry.pos >= s.0 && entry.pos < s.1)
                .map_or(self.movi_end, |s| s.1);
            io.seek(SeekFrom::Start(entry.pos))?;
        }
        self.index_hits = 0;
        self.last_chunk = None;
        self.resync = ResyncState::default();
        self.discontinuity = false;

        let actual = landed + self.config.start_time;
        debug!(
            "AVI: 定位 {} -> {} (流 {r} 条目 {k} @{})",
            format_ticks(time),
            format_ticks(actual),
            entry.pos
        );
        Ok(actual)
    }

    fn duration(&self) -> Option<i64> {
        self.duration
    }

    fn metadata(&self) -> &[(String, String)] {
        &self.metadata
    }
}

/// AVI 格式探测器
pub struct AviProbe;

impl FormatProbe for AviProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"AVI " {
            return Some(probe::SCORE_MAX);
        }
        probe::extension_score(FormatId::Avi, filename)
    }

    fn format_id(&self) -> FormatId {
        FormatId::Avi
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::io::MemoryBackend;

    /// 25fps, 每帧 1/25 秒
    const FRAME_TICKS: i64 = TICKS_PER_SECOND / 25;
    /// 8kHz 16 位立体声, 每块 40ms
    const AUDIO_CHUNK: usize = 320 * 4;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Idx1 {
        None,
        Relative,
        Absolute,
    }

    #[derive(Debug, Clone, Copy)]
    pub(crate) struct Opts {
        pub frames: usize,
        pub idx1: Idx1,
        /// 写 OpenDML 索引, 后一半帧放进 AVIX 段
        pub odml: bool,
        /// 在第 n 帧 (视频块前) 插入 100 字节垃圾
        pub garbage_before: Option<usize>,
    }

    impl Default for Opts {
        fn default() -> Self {
            Self {
                frames: 20,
                idx1: Idx1::Relative,
                odml: false,
                garbage_before: None,
            }
        }
    }

    /// 合成的文件及每个数据块的 (流序号, 块头位置)
    pub(crate) struct Built {
        pub data: Vec<u8>,
        pub chunks: Vec<(usize, u64)>,
    }

    fn chunk(out: &mut Vec<u8>, tag: &[u8; 4], body: &[u8]) {
        out.extend_from_slice(tag);
        out.extend((body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
    }

    fn begin_list(out: &mut Vec<u8>, tag: &[u8; 4], kind: &[u8; 4]) -> usize {
        let at = out.len();
        out.extend_from_slice(tag);
        out.extend([0; 4]);
        out.extend_from_slice(kind);
        at
    }

    fn end_list(out: &mut [u8], at: usize) {
        let size = (out.len() - at - 8) as u32;
        out[at + 4..at + 8].copy_from_slice(&size.to_le_bytes());
    }

    fn strh(
        kind: &[u8; 4],
        handler: &[u8; 4],
        scale: u32,
        rate: u32,
        length: u32,
        sample_size: u32,
    ) -> Vec<u8> {
        let mut d = vec![0u8; 56];
        d[0..4].copy_from_slice(kind);
        d[4..8].copy_from_slice(handler);
        d[20..24].copy_from_slice(&scale.to_le_bytes());
        d[24..28].copy_from_slice(&rate.to_le_bytes());
        d[32..36].copy_from_slice(&length.to_le_bytes());
        d[44..48].copy_from_slice(&sample_size.to_le_bytes());
        d
    }

    fn video_payload(i: usize) -> Vec<u8> {
        vec![i as u8; 100 + i % 7]
    }

    pub(crate) fn is_keyframe(i: usize) -> bool {
        i % 5 == 0
    }

    /// 写一个 OpenDML 标准索引块
    fn std_index(
        out: &mut Vec<u8>,
        stream: usize,
        ckid: &[u8; 4],
        chunks: &[(u64, u32, bool)],
    ) -> (u64, u32) {
        let at = out.len() as u64;
        let base = 0u64;
        let mut d = Vec::new();
        d.extend(2u16.to_le_bytes());
        d.push(0);
        d.push(AVI_INDEX_OF_CHUNKS);
        d.extend((chunks.len() as u32).to_le_bytes());
        d.extend_from_slice(ckid);
        d.extend(base.to_le_bytes());
        d.extend([0; 4]);
        for &(pos, size, key) in chunks {
            d.extend(((pos + 8 - base) as u32).to_le_bytes());
            let flag = if key { 0 } else { ODML_NON_KEYFRAME };
            d.extend((size | flag).to_le_bytes());
        }
        let tag = [b'i', b'x', b'0' + stream as u8 / 10, b'0' + stream as u8 % 10];
        chunk(out, &tag, &d);
        (at, (d.len() + 8) as u32)
    }

    pub(crate) fn build(opts: Opts) -> Built {
        let n = opts.frames;
        let mut out = Vec::new();
        let riff = begin_list(&mut out, b"RIFF", b"AVI ");

        let hdrl = begin_list(&mut out, b"LIST", b"hdrl");
        let mut avih = vec![0u8; 56];
        avih[0..4].copy_from_slice(&40_000u32.to_le_bytes());
        avih[16..20].copy_from_slice(&(n as u32).to_le_bytes());
        avih[24..28].copy_from_slice(&2u32.to_le_bytes());
        chunk(&mut out, b"avih", &avih);

        let mut indx_at = [0usize; 2];
        // 视频流
        let strl = begin_list(&mut out, b"LIST", b"strl");
        chunk(&mut out, b"strh", &strh(b"vids", b"H264", 1, 25, n as u32, 0));
        let mut bi = vec![0u8; 40];
        bi[0..4].copy_from_slice(&40u32.to_le_bytes());
        bi[4..8].copy_from_slice(&320u32.to_le_bytes());
        bi[8..12].copy_from_slice(&240u32.to_le_bytes());
        bi[16..20].copy_from_slice(b"H264");
        chunk(&mut out, b"strf", &bi);
        chunk(&mut out, b"strn", b"main video\0");
        if opts.odml {
            indx_at[0] = out.len() + 8;
            chunk(&mut out, b"indx", &[0u8; 56]);
        }
        end_list(&mut out, strl);
        // 音频流: PCM 8kHz 16 位立体声, 块对齐 4
        let strl = begin_list(&mut out, b"LIST", b"strl");
        chunk(&mut out, b"strh", &strh(b"auds", &[0; 4], 1, 8000, (n * 320) as u32, 4));
        let mut wf = vec![0u8; 18];
        wf[0..2].copy_from_slice(&1u16.to_le_bytes());
        wf[2..4].copy_from_slice(&2u16.to_le_bytes());
        wf[4..8].copy_from_slice(&8000u32.to_le_bytes());
        wf[8..12].copy_from_slice(&32000u32.to_le_bytes());
        wf[12..14].copy_from_slice(&4u16.to_le_bytes());
        wf[14..16].copy_from_slice(&16u16.to_le_bytes());
        chunk(&mut out, b"strf", &wf);
        if opts.odml {
            indx_at[1] = out.len() + 8;
            chunk(&mut out, b"indx", &[0u8; 56]);
        }
        end_list(&mut out, strl);
        end_list(&mut out, hdrl);

        let info = begin_list(&mut out, b"LIST", b"INFO");
        chunk(&mut out, b"INAM", b"test clip\0");
        chunk(&mut out, b"ISFT", b"liu\0");
        end_list(&mut out, info);

        let first_half = if opts.odml { n / 2 } else { n };
        let mut chunks = Vec::new();
        // 每段每流的 (位置, 大小, 关键帧)
        let mut seg_entries: Vec<[Vec<(u64, u32, bool)>; 2]> = Vec::new();
        let mut super_entries: [Vec<(u64, u32, u32)>; 2] = [Vec::new(), Vec::new()];

        let write_movi = |out: &mut Vec<u8>,
                          range: std::ops::Range<usize>,
                          chunks: &mut Vec<(usize, u64)>,
                          seg: &mut Vec<[Vec<(u64, u32, bool)>; 2]>,
                          supers: &mut [Vec<(u64, u32, u32)>; 2]| {
            let movi = begin_list(out, b"LIST", b"movi");
            let mut entries: [Vec<(u64, u32, bool)>; 2] = [Vec::new(), Vec::new()];
            for i in range.clone() {
                if opts.garbage_before == Some(i) {
                    out.extend([0x5A; 100]);
                }
                let v = video_payload(i);
                entries[0].push((out.len() as u64, v.len() as u32, is_keyframe(i)));
                chunks.push((0, out.len() as u64));
                chunk(out, b"00dc", &v);
                entries[1].push((out.len() as u64, AUDIO_CHUNK as u32, true));
                chunks.push((1, out.len() as u64));
                chunk(out, b"01wb", &vec![0xA0; AUDIO_CHUNK]);
            }
            if opts.odml {
                for (s, ckid) in [(0usize, b"00dc"), (1, b"01wb")] {
                    let (at, size) = std_index(out, s, ckid, &entries[s]);
                    supers[s].push((at, size, range.len() as u32));
                }
            }
            end_list(out, movi);
            seg.push(entries);
            movi
        };

        let movi = write_movi(
            &mut out,
            0..first_half,
            &mut chunks,
            &mut seg_entries,
            &mut super_entries,
        );
        let movi_tag = (movi + 8) as u64;

        if opts.idx1 != Idx1::None {
            let mut d = Vec::new();
            let base = if opts.idx1 == Idx1::Relative { movi_tag } else { 0 };
            for &(s, pos) in &chunks {
                let (ckid, flags, size) = if s == 0 {
                    let i = chunks.iter().filter(|c| c.0 == 0 && c.1 < pos).count();
                    (b"00dc", if is_keyframe(i) { AVIIF_KEYFRAME } else { 0 }, video_payload(i).len())
                } else {
                    (b"01wb", AVIIF_KEYFRAME, AUDIO_CHUNK)
                };
                d.extend_from_slice(ckid);
                d.extend(flags.to_le_bytes());
                d.extend(((pos - base) as u32).to_le_bytes());
                d.extend((size as u32).to_le_bytes());
            }
            chunk(&mut out, b"idx1", &d);
        }
        end_list(&mut out, riff);

        if opts.odml {
            let avix = begin_list(&mut out, b"RIFF", b"AVIX");
            write_movi(
                &mut out,
                first_half..n,
                &mut chunks,
                &mut seg_entries,
                &mut super_entries,
            );
            end_list(&mut out, avix);

            for s in 0..2 {
                let mut d = Vec::new();
                d.extend(4u16.to_le_bytes());
                d.push(0);
                d.push(AVI_INDEX_OF_INDEXES);
                d.extend((super_entries[s].len() as u32).to_le_bytes());
                d.extend_from_slice(if s == 0 { b"00dc" } else { b"01wb" });
                d.extend([0; 12]);
                for &(at, size, duration) in &super_entries[s] {
                    d.extend(at.to_le_bytes());
                    d.extend(size.to_le_bytes());
                    d.extend(duration.to_le_bytes());
                }
                out[indx_at[s]..indx_at[s] + d.len()].copy_from_slice(&d);
            }
        }
        Built { data: out, chunks }
    }

    fn open_with(data: Vec<u8>, config: &DemuxConfig) -> (AviDemuxer, IoContext) {
        let mut io = IoContext::from_memory(data);
        let mut demuxer = AviDemuxer::new(config);
        demuxer.open(&mut io).unwrap();
        (demuxer, io)
    }

    fn open(data: Vec<u8>) -> (AviDemuxer, IoContext) {
        open_with(data, &DemuxConfig::default())
    }

    fn read_all(demuxer: &mut AviDemuxer, io: &mut IoContext) -> LiuResult<Vec<DataPacket>> {
        let mut out = Vec::new();
        loop {
            match demuxer.read_packet(io) {
                Ok(Packet::Data(d)) => out.push(d),
                Ok(_) => {}
                Err(LiuError::Eof) => return Ok(out),
                Err(e) => return Err(e),
            }
        }
    }

    fn of_stream(pkts: &[DataPacket], index: usize) -> Vec<&DataPacket> {
        pkts.iter().filter(|p| p.stream_index == index).collect()
    }

    #[test]
    fn test_探测() {
        let built = build(Opts::default());
        assert_eq!(AviProbe.probe(&built.data, None), Some(probe::SCORE_MAX));
        assert_eq!(AviProbe.probe(&[], Some("a.avi")), Some(probe::SCORE_EXTENSION));
        assert_eq!(AviProbe.probe(&[], Some("a.mp4")), None);
    }

    #[test]
    fn test_流表与元数据() {
        let (demuxer, _) = open(build(Opts::default()).data);
        let streams = demuxer.streams();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].codec_id, CodecId::H264);
        let v = streams[0].video_params().unwrap();
        assert_eq!((v.width, v.height), (320, 240));
        assert_eq!(v.frame_rate, Rational::new(25, 1));
        assert!(streams[0]
            .metadata
            .contains(&("title".to_string(), "main video".to_string())));
        assert_eq!(streams[1].codec_id, CodecId::PcmS16le);
        let a = streams[1].audio_params().unwrap();
        assert_eq!((a.sample_rate, a.channels, a.block_align), (8000, 2, 4));
        assert_eq!(streams[1].bit_rate, 256_000);
        assert_eq!(demuxer.duration(), Some(20 * FRAME_TICKS));
        assert!(demuxer
            .metadata()
            .contains(&("title".to_string(), "test clip".to_string())));
        assert_eq!(demuxer.index_len(), 40);
    }

    #[test]
    fn test_按文件顺序读取() {
        let built = build(Opts::default());
        let (mut demuxer, mut io) = open(built.data.clone());
        let pkts = read_all(&mut demuxer, &mut io).unwrap();
        assert_eq!(pkts.len(), 40);
        for (pkt, &(s, pos)) in pkts.iter().zip(&built.chunks) {
            assert_eq!(pkt.stream_index, s);
            assert_eq!(pkt.pos, Some(pos));
        }
        let video = of_stream(&pkts, 0);
        for (i, p) in video.iter().enumerate() {
            assert_eq!(p.pts, Some(i as i64 * FRAME_TICKS));
            assert_eq!(p.is_keyframe(), is_keyframe(i));
            assert_eq!(p.size(), video_payload(i).len());
        }
        let audio = of_stream(&pkts, 1);
        assert_eq!(audio[3].pts, Some(3 * FRAME_TICKS));
        assert_eq!(audio[3].duration, FRAME_TICKS);
        assert!(audio.iter().all(|p| p.is_keyframe()));
    }

    #[test]
    fn test_idx1_绝对偏移() {
        let built = build(Opts {
            idx1: Idx1::Absolute,
            ..Opts::default()
        });
        let (mut demuxer, mut io) = open(built.data);
        assert_eq!(demuxer.index_len(), 40);
        let video = read_all(&mut demuxer, &mut io).unwrap();
        let video = of_stream(&video, 0);
        assert!(video[5].is_keyframe());
        assert!(!video[6].is_keyframe());
    }

    #[test]
    fn test_无索引() {
        let built = build(Opts {
            idx1: Idx1::None,
            ..Opts::default()
        });
        let (mut demuxer, mut io) = open(built.data);
        assert_eq!(demuxer.index_len(), 0);
        let pkts = read_all(&mut demuxer, &mut io).unwrap();
        assert_eq!(pkts.len(), 40);
        assert_eq!(of_stream(&pkts, 0)[7].pts, Some(7 * FRAME_TICKS));
        assert!(demuxer.seek(&mut io, 0).is_err());
    }

    #[test]
    fn test_opendml_多段() {
        let built = build(Opts {
            frames: 30,
            idx1: Idx1::Relative,
            odml: true,
            garbage_before: None,
        });
        let (mut demuxer, mut io) = open(built.data);
        assert_eq!(demuxer.segments.len(), 2);
        assert_eq!(demuxer.index_len(), 60);
        let pkts = read_all(&mut demuxer, &mut io).unwrap();
        assert_eq!(pkts.len(), 60);
        let video = of_stream(&pkts, 0);
        assert_eq!(video[29].pts, Some(29 * FRAME_TICKS));
        assert!(video[25].is_keyframe());
        assert!(!video[26].is_keyframe());

        // 定位到 AVIX 段
        let t = demuxer.seek(&mut io, 22 * FRAME_TICKS).unwrap();
        assert_eq!(t, 20 * FRAME_TICKS);
        let next = read_all(&mut demuxer, &mut io).unwrap();
        assert_eq!(next[0].stream_index, 0);
        assert_eq!(next[0].pts, Some(20 * FRAME_TICKS));
        assert_eq!(next.len(), 20);
    }

    #[test]
    fn test_非交织模式() {
        let config = DemuxConfig::from_json(r#"{ "avi": { "noninterleaved": true } }"#).unwrap();
        let (mut demuxer, mut io) = open_with(build(Opts::default()).data, &config);
        let pkts = read_all(&mut demuxer, &mut io).unwrap();
        assert_eq!(pkts.len(), 40);
        assert!(pkts.windows(2).all(|w| w[0].pts <= w[1].pts));
        // 同时间先输出序号小的流
        assert_eq!(pkts[0].stream_index, 0);
        assert_eq!(pkts[1].stream_index, 1);
    }

    #[test]
    fn test_起始时间偏移() {
        let config = DemuxConfig::from_json(r#"{ "avi": { "start_time": 2700000 } }"#).unwrap();
        let (mut demuxer, mut io) = open_with(build(Opts::default()).data, &config);
        assert_eq!(demuxer.streams()[0].start_time, Some(2_700_000));
        let pkts = read_all(&mut demuxer, &mut io).unwrap();
        assert_eq!(pkts[0].pts, Some(2_700_000));
        let t = demuxer.seek(&mut io, 2_700_000 + 10 * FRAME_TICKS).unwrap();
        assert_eq!(t, 2_700_000 + 10 * FRAME_TICKS);
    }

    #[test]
    fn test_恢复_按可信索引重定位() {
        let mut built = build(Opts::default());
        // 破坏第 6 个块 (视频帧 3) 的标签
        let (_, pos) = built.chunks[6];
        built.data[pos as usize..pos as usize + 4].copy_from_slice(b"\xFF\xFEzz");
        let (mut demuxer, mut io) = open(built.data);
        let pkts = read_all(&mut demuxer, &mut io).unwrap();
        assert_eq!(pkts.len(), 39);
        let after = pkts.iter().position(|p| p.pos == Some(built.chunks[7].1)).unwrap();
        assert!(pkts[after].flags.contains(PacketFlags::DISCONTINUITY));
        assert_eq!(pkts[after].pts, Some(3 * FRAME_TICKS));
        let marked = pkts
            .iter()
            .filter(|p| p.flags.contains(PacketFlags::DISCONTINUITY))
            .count();
        assert_eq!(marked, 1);
    }

    #[test]
    fn test_恢复_回退重扫() {
        let mut built = build(Opts {
            idx1: Idx1::None,
            ..Opts::default()
        });
        // 视频帧 2 的大小少报 6 字节, 读完后落在下一个块头之前
        let (_, pos) = built.chunks[4];
        let at = pos as usize + 4;
        let size = le32(&built.data, at) - 6;
        built.data[at..at + 4].copy_from_slice(&size.to_le_bytes());
        let (mut demuxer, mut io) = open(built.data);
        let pkts = read_all(&mut demuxer, &mut io).unwrap();
        assert_eq!(pkts.len(), 40);
        let next = &pkts[5];
        assert_eq!(next.pos, Some(built.chunks[5].1));
        assert!(next.flags.contains(PacketFlags::DISCONTINUITY));
    }

    #[test]
    fn test_恢复_按索引跳块() {
        let mut built = build(Opts::default());
        // 第一个块就损坏, 索引尚未可信, 回退重扫也找不到
        let (_, pos) = built.chunks[0];
        built.data[pos as usize..pos as usize + 4].copy_from_slice(b"\0\0\0\0");
        // 关闭逐字节扫描, 只有索引跳块能恢复
        let config =
            DemuxConfig::from_json(r#"{ "avi": { "backup": 0, "max_scan": 0 } }"#).unwrap();
        let (mut demuxer, mut io) = open_with(built.data, &config);
        let pkts = read_all(&mut demuxer, &mut io).unwrap();
        assert_eq!(pkts.len(), 39);
        assert_eq!(pkts[0].pos, Some(built.chunks[1].1));
        assert!(pkts[0].flags.contains(PacketFlags::DISCONTINUITY));
    }

    #[test]
    fn test_恢复_回退重扫不回到填充块() {
        let mut built = build(Opts {
            idx1: Idx1::None,
            ..Opts::default()
        });
        // 音频帧 3 的块改写为 JUNK(1264) + JUNK(0) + 损坏块头, 共 1288 字节
        let (stream, pos) = built.chunks[7];
        assert_eq!(stream, 1);
        let pos = pos as usize;
        built.data[pos..pos + 4].copy_from_slice(b"JUNK");
        built.data[pos + 4..pos + 8].copy_from_slice(&1264u32.to_le_bytes());
        built.data[pos + 1272..pos + 1276].copy_from_slice(b"JUNK");
        built.data[pos + 1276..pos + 1280].copy_from_slice(&0u32.to_le_bytes());
        built.data[pos + 1280..pos + 1284].copy_from_slice(b"\xFF\xFEzz");

        let (mut demuxer, mut io) = open(built.data);
        let pkts = read_all(&mut demuxer, &mut io).unwrap();
        assert_eq!(pkts.len(), 39);
        let audio = of_stream(&pkts, 1);
        assert_eq!(audio.len(), 19);
        let next = pkts
            .iter()
            .position(|p| p.pos == Some(built.chunks[8].1))
            .unwrap();
        assert!(pkts[next].flags.contains(PacketFlags::DISCONTINUITY));
        assert_eq!(pkts[next].pts, Some(4 * FRAME_TICKS));
    }

    #[test]
    fn test_恢复_逐字节扫描() {
        let built = build(Opts {
            idx1: Idx1::None,
            garbage_before: Some(8),
            ..Opts::default()
        });
        let (mut demuxer, mut io) = open(built.data);
        let pkts = read_all(&mut demuxer, &mut io).unwrap();
        assert_eq!(pkts.len(), 40);
        let video = of_stream(&pkts, 0);
        assert!(video[8].flags.contains(PacketFlags::DISCONTINUITY));
        assert_eq!(video[8].pts, Some(8 * FRAME_TICKS));
    }

    #[test]
    fn test_恢复失败为致命错误() {
        let built = build(Opts {
            idx1: Idx1::None,
            garbage_before: Some(8),
            ..Opts::default()
        });
        let config = DemuxConfig::from_json(r#"{ "avi": { "max_scan": 16 } }"#).unwrap();
        let (mut demuxer, mut io) = open_with(built.data, &config);
        let err = read_all(&mut demuxer, &mut io).unwrap_err();
        assert!(matches!(err, LiuError::Format(_)));
    }

    #[test]
    fn test_索引定位() {
        let (mut demuxer, mut io) = open(build(Opts::default()).data);
        // 第 12 帧之前最近的关键帧是第 10 帧
        let t = demuxer.seek(&mut io, 12 * FRAME_TICKS).unwrap();
        assert_eq!(t, 10 * FRAME_TICKS);
        let pkts = read_all(&mut demuxer, &mut io).unwrap();
        assert_eq!(pkts[0].pts, Some(10 * FRAME_TICKS));
        assert!(pkts[0].is_keyframe());
        assert_eq!(pkts[1].stream_index, 1);
        assert_eq!(pkts[1].pts, Some(10 * FRAME_TICKS));

        // 重复定位结果不变
        assert_eq!(demuxer.seek(&mut io, t).unwrap(), t);
        assert_eq!(demuxer.seek(&mut io, 0).unwrap(), 0);
    }

    #[test]
    fn test_流式源() {
        let built = build(Opts {
            frames: 10,
            ..Opts::default()
        });
        let mut io = IoContext::new(Box::new(MemoryBackend::streaming(built.data)));
        let mut demuxer = AviDemuxer::new(&DemuxConfig::default());
        demuxer.open(&mut io).unwrap();
        assert_eq!(demuxer.index_len(), 0);
        let pkts = read_all(&mut demuxer, &mut io).unwrap();
        assert_eq!(pkts.len(), 20);
        assert!(demuxer.seek(&mut io, 0).is_err());
    }
}
