//! Matroska/WebM 解封装器.
//!
//! 支持 Matroska (.mkv/.mka) 和 WebM (.webm) 容器格式.
//! 基于 EBML (Extensible Binary Meta Language) 编码.
//!
//! # Matroska 结构概览
//! ```text
//! EBML Header        文件头 (DocType: "matroska" 或 "webm")
//! Segment            根容器
//! ├── SeekHead       索引 (可选, 记录 Info/Tracks/Cues 的位置)
//! ├── Info           段信息 (时间刻度, 时长, 标题)
//! ├── Tracks         轨道定义 (编解码器, 参数)
//! ├── Cluster        数据簇
//! │   ├── Timecode   簇时间码
//! │   └── SimpleBlock / BlockGroup  音视频数据块
//! ├── Cues           时间索引 (可选)
//! └── Tags           元数据标签 (跳过)
//! ```
//!
//! 块时间戳 = (簇时间码 + 块内 16 位有符号偏移) x TimecodeScale 纳秒,
//! 读出后换算为 27MHz tick.

pub mod ebml;

use std::collections::{HashMap, VecDeque};
use std::io::SeekFrom;

use bytes::Bytes;
use liu_core::{CodecId, DataPacket, LiuError, LiuResult, Packet, PacketFlags, Rational};
use log::{debug, trace, warn};

use crate::config::DemuxConfig;
use crate::demuxer::Demuxer;
use crate::demuxers::riff::{self, BitmapInfo, WaveFormat};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{self, FormatProbe, ProbeScore};
use crate::stream::{Stream, StreamFlags};

use self::ebml::*;

/// 默认时间刻度 (纳秒)
const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// 轨道类型
const TRACK_TYPE_VIDEO: u64 = 1;
const TRACK_TYPE_AUDIO: u64 = 2;
const TRACK_TYPE_SUBTITLE: u64 = 0x11;

/// 块头中的标志位
const BLOCK_FLAG_KEYFRAME: u8 = 0x80;
const BLOCK_LACING_MASK: u8 = 0x06;

/// 重新同步时每次查看的字节数
const RESYNC_WINDOW: usize = 64 * 1024;

/// Matroska 编码名与内部编码的对照, 以 `*` 结尾的条目按前缀匹配
const CODEC_TABLE: &[(&str, CodecId)] = &[
    ("V_MPEG4/ISO/AVC", CodecId::H264),
    ("V_MPEGH/ISO/HEVC", CodecId::H265),
    ("V_MPEG4/ISO/*", CodecId::Mpeg4),
    ("V_MPEG4/MS/V3", CodecId::MsMpeg4v3),
    ("V_MPEG1", CodecId::Mpeg1Video),
    ("V_MPEG2", CodecId::Mpeg2Video),
    ("V_VP8", CodecId::Vp8),
    ("V_VP9", CodecId::Vp9),
    ("V_AV1", CodecId::Av1),
    ("V_THEORA", CodecId::Theora),
    ("V_MJPEG", CodecId::Mjpeg),
    ("V_UNCOMPRESSED", CodecId::RawVideo),
    ("A_MPEG/L1", CodecId::Mp1),
    ("A_MPEG/L2", CodecId::Mp2),
    ("A_MPEG/L3", CodecId::Mp3),
    ("A_AAC*", CodecId::Aac),
    ("A_AC3*", CodecId::Ac3),
    ("A_EAC3", CodecId::Eac3),
    ("A_DTS*", CodecId::Dts),
    ("A_VORBIS", CodecId::Vorbis),
    ("A_OPUS*", CodecId::Opus),
    ("A_FLAC", CodecId::Flac),
    ("A_PCM/INT/LIT", CodecId::PcmS16le),
    ("A_PCM/INT/BIG", CodecId::PcmS16be),
    ("S_TEXT/UTF8", CodecId::Text),
    ("S_TEXT/ASS", CodecId::Ass),
    ("S_TEXT/SSA", CodecId::Ass),
    ("S_ASS", CodecId::Ass),
    ("S_SSA", CodecId::Ass),
    ("S_VOBSUB", CodecId::DvdSubtitle),
    ("S_DVBSUB", CodecId::DvbSubtitle),
];

/// AAC 采样率索引表
const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// 按 `*` 后缀规则匹配编码名
fn codec_pattern_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

/// Matroska 编码名转内部编码
pub fn codec_from_name(name: &str) -> CodecId {
    CODEC_TABLE
        .iter()
        .find(|(pattern, _)| codec_pattern_matches(pattern, name))
        .map_or(CodecId::None, |&(_, id)| id)
}

// ========================
// 轨道
// ========================

/// TrackEntry 解析结果
#[derive(Debug, Clone)]
struct TrackInfo {
    number: u64,
    uid: u64,
    track_type: u64,
    codec_name: String,
    codec_private: Vec<u8>,
    lacing: bool,
    flag_default: bool,
    flag_forced: bool,
    default_duration: u64,
    language: String,
    name: Option<String>,
    pixel_width: u32,
    pixel_height: u32,
    display_width: u32,
    display_height: u32,
    sampling_freq: f64,
    output_sampling_freq: Option<f64>,
    channels: u16,
    bit_depth: u16,
}

impl Default for TrackInfo {
    fn default() -> Self {
        Self {
            number: 0,
            uid: 0,
            track_type: 0,
            codec_name: String::new(),
            codec_private: Vec::new(),
            lacing: true,
            flag_default: true,
            flag_forced: false,
            default_duration: 0,
            language: "eng".into(),
            name: None,
            pixel_width: 0,
            pixel_height: 0,
            display_width: 0,
            display_height: 0,
            sampling_freq: 8000.0,
            output_sampling_freq: None,
            channels: 1,
            bit_depth: 0,
        }
    }
}

impl ElementHandler for TrackInfo {
    fn element(&mut self, io: &mut IoContext, h: &ElementHeader) -> LiuResult<ElementAction> {
        match h.id {
            TRACK_NUMBER => self.number = read_uint(io, h.size)?,
            TRACK_UID => self.uid = read_uint(io, h.size)?,
            TRACK_TYPE => self.track_type = read_uint(io, h.size)?,
            TRACK_CODEC_ID => self.codec_name = read_string(io, h.size)?,
            TRACK_CODEC_PRIVATE => self.codec_private = read_binary(io, h.size)?,
            TRACK_FLAG_LACING => self.lacing = read_uint(io, h.size)? != 0,
            TRACK_FLAG_DEFAULT => self.flag_default = read_uint(io, h.size)? != 0,
            TRACK_FLAG_FORCED => self.flag_forced = read_uint(io, h.size)? != 0,
            TRACK_DEFAULT_DURATION => self.default_duration = read_uint(io, h.size)?,
            TRACK_LANGUAGE => self.language = read_string(io, h.size)?,
            TRACK_NAME => self.name = Some(read_string(io, h.size)?),
            VIDEO_SETTINGS => {
                read_elements(io, h.size, |io, e| {
                    let value = match e.id {
                        VIDEO_PIXEL_WIDTH
                        | VIDEO_PIXEL_HEIGHT
                        | VIDEO_DISPLAY_WIDTH
                        | VIDEO_DISPLAY_HEIGHT => {
                            u32::try_from(read_uint(io, e.size)?).unwrap_or(0)
                        }
                        _ => return Ok(ElementAction::Unknown),
                    };
                    match e.id {
                        VIDEO_PIXEL_WIDTH => self.pixel_width = value,
                        VIDEO_PIXEL_HEIGHT => self.pixel_height = value,
                        VIDEO_DISPLAY_WIDTH => self.display_width = value,
                        _ => self.display_height = value,
                    }
                    Ok(ElementAction::Consumed)
                })?;
            }
            AUDIO_SETTINGS => {
                read_elements(io, h.size, |io, e| {
                    match e.id {
                        AUDIO_SAMPLING_FREQ => self.sampling_freq = read_float(io, e.size)?,
                        AUDIO_OUTPUT_SAMPLING_FREQ => {
                            self.output_sampling_freq = Some(read_float(io, e.size)?)
                        }
                        AUDIO_CHANNELS => {
                            self.channels = u16::try_from(read_uint(io, e.size)?).unwrap_or(0)
                        }
                        AUDIO_BIT_DEPTH => {
                            self.bit_depth = u16::try_from(read_uint(io, e.size)?).unwrap_or(0)
                        }
                        _ => return Ok(ElementAction::Unknown),
                    }
                    Ok(ElementAction::Consumed)
                })?;
            }
            _ => return Ok(ElementAction::Unknown),
        }
        Ok(ElementAction::Consumed)
    }
}

/// 拆开 Xiph 交织的私有数据, 返回各段切片
fn split_xiph_private(data: &[u8]) -> LiuResult<Vec<&[u8]>> {
    let bad = || LiuError::InvalidData("MKV: Xiph 私有数据损坏".into());
    let count = usize::from(*data.first().ok_or_else(bad)?) + 1;
    let mut pos = 1;
    let mut sizes = Vec::with_capacity(count);
    for _ in 0..count - 1 {
        let mut size = 0usize;
        loop {
            let b = *data.get(pos).ok_or_else(bad)?;
            pos += 1;
            size += usize::from(b);
            if b != 0xFF {
                break;
            }
        }
        sizes.push(size);
    }
    let mut parts = Vec::with_capacity(count);
    for size in sizes {
        let part = data.get(pos..pos + size).ok_or_else(bad)?;
        parts.push(part);
        pos += size;
    }
    parts.push(&data[pos..]);
    Ok(parts)
}

/// Vorbis 私有数据: Xiph 交织的三个头包 → 三段 "大端 32 位长度 + 数据"
fn vorbis_private(data: &[u8]) -> LiuResult<Vec<u8>> {
    let parts = split_xiph_private(data)?;
    if parts.len() != 3 {
        return Err(LiuError::InvalidData(format!(
            "MKV: Vorbis 私有数据应含 3 个头包, 实际 {}",
            parts.len()
        )));
    }
    let mut out = Vec::with_capacity(data.len() + 12);
    for part in parts {
        let len = u32::try_from(part.len())
            .map_err(|_| LiuError::InvalidData("MKV: Vorbis 头包过大".into()))?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(part);
    }
    Ok(out)
}

fn aac_sample_rate_index(rate: u32) -> u8 {
    AAC_SAMPLE_RATES
        .iter()
        .position(|&r| r <= rate)
        .unwrap_or(AAC_SAMPLE_RATES.len() - 1) as u8
}

/// 根据编码名中的 profile 推导 AudioSpecificConfig
///
/// SBR 轨道额外写入 0x2B7 同步扩展, 指明输出采样率.
fn aac_private(
    codec_name: &str,
    sample_rate: u32,
    output_rate: Option<u32>,
    channels: u16,
) -> Vec<u8> {
    let profile: u8 = if codec_name.contains("/MAIN") {
        1
    } else if codec_name.contains("/SSR") {
        3
    } else if codec_name.contains("/LTP") {
        4
    } else {
        2
    };
    let sr_index = aac_sample_rate_index(sample_rate);
    let channels = (channels.min(7)) as u8;
    let mut asc = vec![
        (profile << 3) | (sr_index >> 1),
        ((sr_index & 1) << 7) | (channels << 3),
    ];
    if codec_name.contains("/SBR") {
        let ext_index =
            aac_sample_rate_index(output_rate.unwrap_or(sample_rate.saturating_mul(2)));
        asc.extend_from_slice(&[0x56, 0xE5, 0x80 | (ext_index << 3)]);
    }
    asc
}

/// 轨道在解复用时需要的状态
#[derive(Debug, Clone, Copy)]
struct TrackState {
    stream_index: usize,
    /// 每帧时长 (纳秒, 0 表示未知)
    default_duration: u64,
}

/// Cues 条目 (时间为 tick, 位置为绝对偏移)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CuePoint {
    time: i64,
    track: u64,
    cluster_pos: u64,
}

/// Matroska 解封装器
pub struct MkvDemuxer {
    streams: Vec<Stream>,
    /// 轨道号 → 轨道状态
    tracks: HashMap<u64, TrackState>,
    /// 纳秒/时间码
    timecode_scale: u64,
    /// 时长 (时间码单位, 浮点)
    raw_duration: Option<f64>,
    is_webm: bool,
    metadata: Vec<(String, String)>,
    /// Segment 数据区起止
    segment_start: u64,
    segment_end: u64,
    /// 第一个 Cluster 的起始位置
    first_cluster: Option<u64>,
    /// SeekHead 记录的一级元素位置
    seek_entries: Vec<(u32, u64)>,
    cues: Vec<CuePoint>,
    // 当前簇
    in_cluster: bool,
    cluster_end: u64,
    cluster_unknown: bool,
    cluster_timecode: i64,
    /// 重新同步后, 下一个数据包需标记不连续
    discontinuity: bool,
    /// 交织块拆出但尚未返回的帧
    pending: VecDeque<DataPacket>,
}

impl MkvDemuxer {
    /// 创建 Matroska 解封装器实例 (工厂函数)
    pub fn create(_config: &DemuxConfig) -> LiuResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new()))
    }

    fn new() -> Self {
        Self {
            streams: Vec::new(),
            tracks: HashMap::new(),
            timecode_scale: DEFAULT_TIMECODE_SCALE,
            raw_duration: None,
            is_webm: false,
            metadata: Vec::new(),
            segment_start: 0,
            segment_end: 0,
            first_cluster: None,
            seek_entries: Vec::new(),
            cues: Vec::new(),
            in_cluster: false,
            cluster_end: 0,
            cluster_unknown: false,
            cluster_timecode: 0,
            discontinuity: false,
            pending: VecDeque::new(),
        }
    }

    /// 时间码 → tick
    fn timecode_to_ticks(&self, timecode: i64) -> i64 {
        let ns = i128::from(timecode) * i128::from(self.timecode_scale);
        let ticks = ns * 27 / 1000;
        ticks.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    /// 纳秒 → tick
    fn ns_to_ticks(ns: u64) -> i64 {
        let ticks = u128::from(ns) * 27 / 1000;
        i64::try_from(ticks).unwrap_or(i64::MAX)
    }

    /// 解析 EBML 头部, 校验 DocType
    fn parse_ebml_header(&mut self, io: &mut IoContext) -> LiuResult<()> {
        let budget = source_budget(io);
        let header = read_element_header(io, budget)?;
        if header.id != EBML_HEADER {
            return Err(LiuError::Format("不是有效的 EBML/Matroska 文件".into()));
        }
        let mut doc_type = String::from("matroska");
        read_elements(io, header.size, |io, h| {
            if h.id != EBML_DOC_TYPE {
                return Ok(ElementAction::Unknown);
            }
            doc_type = read_string(io, h.size)?;
            Ok(ElementAction::Consumed)
        })?;
        debug!("MKV: DocType = {doc_type}");
        match doc_type.as_str() {
            "matroska" => {}
            "webm" => self.is_webm = true,
            other => {
                return Err(LiuError::Format(format!("MKV: 不支持的 DocType \"{other}\"")));
            }
        }
        self.metadata.push(("doctype".into(), doc_type));
        Ok(())
    }

    fn parse_seek_head(&mut self, io: &mut IoContext, size: u64) -> LiuResult<()> {
        let segment_start = self.segment_start;
        let entries = &mut self.seek_entries;
        read_elements(io, size, |io, h| {
            if h.id != SEEK {
                return Ok(ElementAction::Unknown);
            }
            let mut id = 0u32;
            let mut position = None;
            read_elements(io, h.size, |io, e| {
                match e.id {
                    SEEK_ID => id = u32::try_from(read_uint(io, e.size)?).unwrap_or(0),
                    SEEK_POSITION => position = Some(read_uint(io, e.size)?),
                    _ => return Ok(ElementAction::Unknown),
                }
                Ok(ElementAction::Consumed)
            })?;
            if let Some(pos) = position {
                trace!("MKV: SeekHead 0x{id:X} @ {}", segment_start + pos);
                entries.push((id, segment_start + pos));
            }
            Ok(ElementAction::Consumed)
        })?;
        Ok(())
    }

    fn parse_info(&mut self, io: &mut IoContext, size: u64) -> LiuResult<()> {
        read_elements(io, size, |io, h| {
            match h.id {
                INFO_TIMECODE_SCALE => {
                    let scale = read_uint(io, h.size)?;
                    if scale > 0 {
                        self.timecode_scale = scale;
                    }
                }
                INFO_DURATION => self.raw_duration = Some(read_float(io, h.size)?),
                INFO_TITLE => {
                    let title = read_string(io, h.size)?;
                    self.metadata.push(("title".into(), title));
                }
                INFO_MUXING_APP => {
                    let app = read_string(io, h.size)?;
                    self.metadata.push(("muxing_app".into(), app));
                }
                INFO_WRITING_APP => {
                    let app = read_string(io, h.size)?;
                    self.metadata.push(("writing_app".into(), app));
                }
                _ => return Ok(ElementAction::Unknown),
            }
            Ok(ElementAction::Consumed)
        })?;
        debug!("MKV: TimecodeScale = {} ns", self.timecode_scale);
        Ok(())
    }

    fn parse_tracks(&mut self, io: &mut IoContext, size: u64) -> LiuResult<()> {
        let mut entries = Vec::new();
        read_elements(io, size, |io, h| {
            if h.id != TRACK_ENTRY {
                return Ok(ElementAction::Unknown);
            }
            let mut track = TrackInfo::default();
            read_elements_with(io, h.size, &mut track)?;
            entries.push(track);
            Ok(ElementAction::Consumed)
        })?;
        for track in entries {
            self.add_track(track);
        }
        Ok(())
    }

    /// 将 TrackInfo 转换为 Stream 并登记轨道号
    fn add_track(&mut self, track: TrackInfo) {
        if self.tracks.contains_key(&track.number) {
            warn!("MKV: 轨道号 {} 重复, 忽略后一个", track.number);
            return;
        }
        let kind_ok = matches!(
            track.track_type,
            TRACK_TYPE_VIDEO | TRACK_TYPE_AUDIO | TRACK_TYPE_SUBTITLE
        );
        if !kind_ok {
            debug!(
                "MKV: 跳过轨道 {} (类型 {}, 编码 {})",
                track.number, track.track_type, track.codec_name
            );
            return;
        }
        let index = self.streams.len();
        let stream = match build_stream(index, &track) {
            Ok(s) => s,
            Err(e) => {
                warn!("MKV: 轨道 {} 无法识别: {e}", track.number);
                return;
            }
        };
        debug!(
            "MKV: 轨道 #{index} (num={}, uid={}, lacing={}) {} -> {}",
            track.number, track.uid, track.lacing, track.codec_name, stream.codec_id
        );
        self.tracks.insert(
            track.number,
            TrackState {
                stream_index: index,
                default_duration: track.default_duration,
            },
        );
        self.streams.push(stream);
    }

    fn parse_cues(&mut self, io: &mut IoContext, size: u64) -> LiuResult<()> {
        let mut points = Vec::new();
        read_elements(io, size, |io, h| {
            if h.id != CUE_POINT {
                return Ok(ElementAction::Unknown);
            }
            let mut time = None;
            let mut positions = Vec::new();
            read_elements(io, h.size, |io, e| {
                match e.id {
                    CUE_TIME => time = Some(read_uint(io, e.size)?),
                    CUE_TRACK_POSITIONS => {
                        let mut track = 0;
                        let mut cluster = None;
                        read_elements(io, e.size, |io, p| {
                            match p.id {
                                CUE_TRACK => track = read_uint(io, p.size)?,
                                CUE_CLUSTER_POSITION => cluster = Some(read_uint(io, p.size)?),
                                _ => return Ok(ElementAction::Unknown),
                            }
                            Ok(ElementAction::Consumed)
                        })?;
                        if let Some(pos) = cluster {
                            positions.push((track, pos));
                        }
                    }
                    _ => return Ok(ElementAction::Unknown),
                }
                Ok(ElementAction::Consumed)
            })?;
            if let Some(t) = time {
                points.extend(positions.into_iter().map(|(track, pos)| (t, track, pos)));
            }
            Ok(ElementAction::Consumed)
        })?;
        let mut cues: Vec<CuePoint> = points
            .into_iter()
            .map(|(t, track, pos)| CuePoint {
                time: self.timecode_to_ticks(i64::try_from(t).unwrap_or(i64::MAX)),
                track,
                cluster_pos: self.segment_start + pos,
            })
            .collect();
        cues.sort_by_key(|c| (c.time, c.cluster_pos));
        cues.dedup_by_key(|c| c.cluster_pos);
        debug!("MKV: 载入 {} 个索引点", cues.len());
        self.cues = cues;
        Ok(())
    }

    /// 按 SeekHead 记录的位置加载一级元素, 完成后回到原位置
    fn load_level1(&mut self, io: &mut IoContext, id: u32) -> LiuResult<bool> {
        let Some(&(_, pos)) = self.seek_entries.iter().find(|(eid, _)| *eid == id) else {
            return Ok(false);
        };
        if !io.is_seekable() || pos >= self.segment_end {
            return Ok(false);
        }
        let back = io.position();
        io.seek(SeekFrom::Start(pos))?;
        let result = read_element_header(io, self.segment_end - pos).and_then(|h| {
            if h.id != id {
                return Err(LiuError::InvalidData(format!(
                    "MKV: SeekHead 指向 0x{pos:X} 处为 0x{:X}, 期望 0x{id:X}",
                    h.id
                )));
            }
            match id {
                SEGMENT_INFO => self.parse_info(io, h.size),
                TRACKS => self.parse_tracks(io, h.size),
                _ => self.parse_cues(io, h.size),
            }
        });
        io.seek(SeekFrom::Start(back))?;
        result.map(|_| true)
    }

    /// 进入簇, I/O 位于簇数据区起点
    fn enter_cluster(&mut self, header: &ElementHeader) {
        self.in_cluster = true;
        self.cluster_end = header.end_pos();
        self.cluster_unknown = header.unknown_size;
        self.cluster_timecode = 0;
    }

    /// 未知大小的簇遇到下一个一级元素时结束
    fn at_level1_boundary(io: &mut IoContext) -> LiuResult<bool> {
        let window = io.peek(4)?;
        let id = parse_element_id(window).map(|(id, _)| id);
        Ok(matches!(
            id,
            Some(CLUSTER | CUES | TAGS | SEGMENT_INFO | TRACKS | SEEK_HEAD | ATTACHMENTS | CHAPTERS)
        ))
    }

    /// 拆分块数据, 把帧放入待发队列
    fn parse_block(
        &mut self,
        data: Bytes,
        pos: u64,
        keyframe: Option<bool>,
        block_duration: Option<u64>,
    ) -> LiuResult<()> {
        let (track, n) = parse_vint(&data)
            .ok_or_else(|| LiuError::InvalidData("MKV: 块轨道号无效".into()))?;
        if data.len() < n + 3 {
            return Err(LiuError::InvalidData("MKV: 块头不完整".into()));
        }
        let Some(&state) = self.tracks.get(&track) else {
            trace!("MKV: 丢弃未知轨道 {track} 的块");
            return Ok(());
        };
        let delta = i16::from_be_bytes([data[n], data[n + 1]]);
        let flags = data[n + 2];
        let frames = split_laced_frames(&data, n + 3, (flags & BLOCK_LACING_MASK) >> 1)?;

        let keyframe = keyframe.unwrap_or(flags & BLOCK_FLAG_KEYFRAME != 0);
        let pts = self.timecode_to_ticks(self.cluster_timecode.saturating_add(i64::from(delta)));
        let frame_duration = match block_duration {
            Some(d) if !frames.is_empty() => {
                let total = self.timecode_to_ticks(i64::try_from(d).unwrap_or(i64::MAX));
                total / frames.len() as i64
            }
            _ => Self::ns_to_ticks(state.default_duration),
        };
        for (i, frame) in frames.into_iter().enumerate() {
            let mut pkt = DataPacket::new(state.stream_index, frame);
            if i == 0 {
                pkt.pts = Some(pts);
                pkt.pos = Some(pos);
                if std::mem::take(&mut self.discontinuity) {
                    pkt.flags |= PacketFlags::DISCONTINUITY;
                }
            }
            pkt.duration = frame_duration;
            if keyframe {
                pkt.flags |= PacketFlags::KEYFRAME;
            }
            self.pending.push_back(pkt);
        }
        Ok(())
    }

    fn parse_block_group(&mut self, io: &mut IoContext, header: &ElementHeader) -> LiuResult<()> {
        let mut block = None;
        let mut duration = None;
        let mut referenced = false;
        read_elements(io, header.size, |io, h| {
            match h.id {
                BLOCK => {
                    let pos = io.position();
                    block = Some((Bytes::from(read_binary(io, h.size)?), pos));
                }
                BLOCK_DURATION => duration = Some(read_uint(io, h.size)?),
                REFERENCE_BLOCK => {
                    read_sint(io, h.size)?;
                    referenced = true;
                }
                _ => return Ok(ElementAction::Unknown),
            }
            Ok(ElementAction::Consumed)
        })?;
        match block {
            Some((data, pos)) => self.parse_block(data, pos, Some(!referenced), duration),
            None => Ok(()),
        }
    }

    /// 读取簇内的下一个子元素, 返回 false 表示簇已结束
    fn read_cluster_element(&mut self, io: &mut IoContext) -> LiuResult<bool> {
        let pos = io.position();
        if pos >= self.cluster_end {
            return Ok(false);
        }
        if self.cluster_unknown && Self::at_level1_boundary(io)? {
            return Ok(false);
        }
        let header = match read_element_header(io, self.cluster_end - pos) {
            Ok(h) => h,
            Err(e) if e.is_recoverable() => {
                warn!("MKV: 偏移 {pos} 处簇内元素头损坏, 跳到下一个簇: {e}");
                self.resync_to_cluster(io)?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        match header.id {
            CLUSTER_TIMECODE => {
                self.cluster_timecode = i64::try_from(read_uint(io, header.size)?).unwrap_or(0);
            }
            SIMPLE_BLOCK => {
                let data = Bytes::from(read_binary(io, header.size)?);
                if let Err(e) = self.parse_block(data, pos, None, None) {
                    if !e.is_recoverable() {
                        return Err(e);
                    }
                    warn!("MKV: 偏移 {pos} 处块损坏, 已丢弃: {e}");
                }
            }
            BLOCK_GROUP => {
                if let Err(e) = self.parse_block_group(io, &header) {
                    if !e.is_recoverable() {
                        return Err(e);
                    }
                    warn!("MKV: 偏移 {pos} 处块组损坏, 已丢弃: {e}");
                    io.seek(SeekFrom::Start(header.end_pos()))?;
                }
            }
            _ => io.skip(header.size)?,
        }
        Ok(true)
    }

    /// 从当前位置之后查找下一个 Cluster ID, 找到时 I/O 停在该簇起点
    fn resync_to_cluster(&mut self, io: &mut IoContext) -> LiuResult<()> {
        let sync = CLUSTER.to_be_bytes();
        io.skip(1)?;
        loop {
            let pos = io.position();
            if pos >= self.segment_end {
                return Err(LiuError::Eof);
            }
            let want = usize::try_from(self.segment_end - pos)
                .unwrap_or(usize::MAX)
                .min(RESYNC_WINDOW);
            let (hit, len) = {
                let window = io.peek(want)?;
                (window.windows(sync.len()).position(|w| w == sync), window.len())
            };
            if let Some(off) = hit {
                io.skip(off as u64)?;
                debug!("MKV: 在偏移 {} 处重新找到簇", pos + off as u64);
                self.in_cluster = false;
                self.discontinuity = true;
                return Ok(());
            }
            if len < sync.len() {
                return Err(LiuError::Eof);
            }
            io.skip((len - (sync.len() - 1)) as u64)?;
        }
    }

    /// 读取簇的时间码 (时间码须位于块之前), 完成后 I/O 停在簇内
    fn peek_cluster_timecode(io: &mut IoContext, header: &ElementHeader) -> LiuResult<Option<u64>> {
        let mut timecode = None;
        let end = read_elements(io, header.size, |io, h| match h.id {
            CLUSTER_TIMECODE => {
                timecode = Some(read_uint(io, h.size)?);
                Ok(ElementAction::Stop)
            }
            SIMPLE_BLOCK | BLOCK_GROUP => Ok(ElementAction::Stop),
            _ => Ok(ElementAction::Unknown),
        });
        match end {
            Ok(_) => Ok(timecode),
            Err(e) if e.is_recoverable() => Ok(timecode),
            Err(e) => Err(e),
        }
    }

    /// 无索引定位: 从第一个簇开始顺序扫描簇时间码
    fn seek_by_scan(&mut self, io: &mut IoContext, target: i64) -> LiuResult<(u64, i64)> {
        let first = self.first_cluster.ok_or(LiuError::Eof)?;
        io.seek(SeekFrom::Start(first))?;
        let mut best: Option<(u64, i64)> = None;
        loop {
            let pos = io.position();
            if pos >= self.segment_end {
                break;
            }
            let header = match read_element_header(io, self.segment_end - pos) {
                Ok(h) => h,
                Err(LiuError::Eof) => break,
                Err(e) => return Err(e),
            };
            if header.id != CLUSTER {
                io.skip(header.size)?;
                continue;
            }
            let timecode = Self::peek_cluster_timecode(io, &header)?.unwrap_or(0);
            let time = self.timecode_to_ticks(i64::try_from(timecode).unwrap_or(i64::MAX));
            if time > target && best.is_some() {
                break;
            }
            best = Some((pos, time));
            if time >= target || header.unknown_size {
                break;
            }
            io.seek(SeekFrom::Start(header.end_pos()))?;
        }
        best.ok_or(LiuError::Eof)
    }
}

/// 源剩余可读字节数, 未知时视为无限
fn source_budget(io: &IoContext) -> u64 {
    io.remaining().unwrap_or(u64::MAX >> 1)
}

/// 按交织方式切分块数据 (`start` 为帧区起点)
///
/// lacing: 0 无交织, 1 Xiph, 2 固定大小, 3 EBML
fn split_laced_frames(data: &Bytes, start: usize, lacing: u8) -> LiuResult<Vec<Bytes>> {
    let bad = |what: &str| LiuError::InvalidData(format!("MKV: {what}交织块损坏"));
    if lacing == 0 {
        return Ok(vec![data.slice(start..)]);
    }
    let count = usize::from(*data.get(start).ok_or_else(|| bad(""))?) + 1;
    let mut pos = start + 1;
    let mut sizes = Vec::with_capacity(count);
    // 已声明的帧大小之和, 不得超过帧区剩余字节
    let mut used = 0usize;
    match lacing {
        1 => {
            for _ in 0..count - 1 {
                let mut size = 0usize;
                loop {
                    let b = *data.get(pos).ok_or_else(|| bad("Xiph "))?;
                    pos += 1;
                    size = size.checked_add(usize::from(b)).ok_or_else(|| bad("Xiph "))?;
                    if b != 0xFF {
                        break;
                    }
                }
                used = used
                    .checked_add(size)
                    .filter(|&total| total <= data.len().saturating_sub(pos))
                    .ok_or_else(|| bad("Xiph "))?;
                sizes.push(size);
            }
        }
        3 => {
            if count > 1 {
                let (first, n) = parse_vint(data.get(pos..).unwrap_or_default())
                    .ok_or_else(|| bad("EBML "))?;
                pos += n;
                let mut size = usize::try_from(first).map_err(|_| bad("EBML "))?;
                used = used
                    .checked_add(size)
                    .filter(|&total| total <= data.len().saturating_sub(pos))
                    .ok_or_else(|| bad("EBML "))?;
                sizes.push(size);
                for _ in 1..count - 1 {
                    let (delta, n) = parse_svint(data.get(pos..).unwrap_or_default())
                        .ok_or_else(|| bad("EBML "))?;
                    pos += n;
                    size = i64::try_from(size)
                        .ok()
                        .and_then(|s| s.checked_add(delta))
                        .and_then(|s| usize::try_from(s).ok())
                        .ok_or_else(|| bad("EBML "))?;
                    used = used
                        .checked_add(size)
                        .filter(|&total| total <= data.len().saturating_sub(pos))
                        .ok_or_else(|| bad("EBML "))?;
                    sizes.push(size);
                }
            }
        }
        _ => {
            let body = data.len().saturating_sub(pos);
            if body % count != 0 {
                return Err(bad("固定大小"));
            }
            sizes = vec![body / count; count - 1];
            used = body - body / count;
        }
    }
    if pos.saturating_add(used) > data.len() {
        return Err(bad(""));
    }
    let mut frames = Vec::with_capacity(count);
    for size in sizes {
        frames.push(data.slice(pos..pos + size));
        pos += size;
    }
    frames.push(data.slice(pos..));
    Ok(frames)
}

/// 由轨道信息构造流, 完成私有数据变换
fn build_stream(index: usize, track: &TrackInfo) -> LiuResult<Stream> {
    let mut codec_id = codec_from_name(&track.codec_name);
    let mut private = track.codec_private.clone();
    let mut bitmap = None;
    let mut wave = None;

    match track.codec_name.as_str() {
        "V_MS/VFW/FOURCC" => {
            let bi = BitmapInfo::parse(&private)?;
            codec_id = riff::fourcc_to_codec(&bi.compression);
            debug!("MKV: VfW FourCC {}", riff::fourcc_str(&bi.compression));
            private = bi.extra.clone();
            bitmap = Some(bi);
        }
        "A_MS/ACM" => {
            let wf = WaveFormat::parse(&private)?;
            codec_id = riff::wave_format_to_codec(wf.format_tag, wf.bits_per_sample);
            private = wf.extra.clone();
            wave = Some(wf);
        }
        "A_VORBIS" => private = vorbis_private(&private)?,
        name if codec_pattern_matches("A_AAC*", name) && private.is_empty() => {
            private = aac_private(
                name,
                track.sampling_freq as u32,
                track.output_sampling_freq.map(|f| f as u32),
                track.channels,
            );
        }
        "A_PCM/INT/LIT" if track.bit_depth == 8 => codec_id = CodecId::PcmU8,
        _ => {}
    }
    if codec_id == CodecId::None {
        return Err(LiuError::Unsupported(format!("编码 {}", track.codec_name)));
    }

    let mut stream = Stream::new(index, codec_id);
    stream.codec_private = private;
    stream.program = u32::try_from(track.number).unwrap_or(u32::MAX);
    stream.language = Some(track.language.clone());
    if track.flag_default {
        stream.flags |= StreamFlags::DEFAULT;
    }
    if track.flag_forced {
        stream.flags |= StreamFlags::FORCED;
    }
    if let Some(name) = &track.name {
        stream.metadata.push(("name".into(), name.clone()));
    }

    if let Some(v) = stream.video_params_mut() {
        v.width = track.pixel_width;
        v.height = track.pixel_height;
        if let Some(bi) = &bitmap {
            if v.width == 0 {
                v.width = bi.width;
                v.height = bi.height;
            }
        }
        if track.default_duration > 0 {
            v.frame_rate =
                Rational::new(1_000_000_000, track.default_duration as i64).reduce();
        }
        if track.display_width > 0 && track.display_height > 0 {
            v.aspect = Rational::new(
                i64::from(track.display_width),
                i64::from(track.display_height),
            )
            .reduce();
        }
    } else if let Some(a) = stream.audio_params_mut() {
        let rate = track.output_sampling_freq.unwrap_or(track.sampling_freq);
        a.sample_rate = rate as u32;
        a.channels = track.channels;
        a.bits_per_sample = track.bit_depth;
        if let Some(wf) = &wave {
            a.block_align = u32::from(wf.block_align);
            if a.bits_per_sample == 0 {
                a.bits_per_sample = wf.bits_per_sample;
            }
        }
    }
    Ok(stream)
}

impl Demuxer for MkvDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Matroska
    }

    fn name(&self) -> &str {
        if self.is_webm { "webm" } else { "matroska" }
    }

    fn open(&mut self, io: &mut IoContext) -> LiuResult<()> {
        // 1) EBML 头部
        self.parse_ebml_header(io)?;

        // 2) Segment
        let budget = source_budget(io);
        let segment = read_element_header(io, budget)?;
        if segment.id != SEGMENT {
            return Err(LiuError::Format("MKV: 未找到 Segment 元素".into()));
        }
        self.segment_start = segment.data_pos;
        self.segment_end = segment.end_pos();

        // 3) 扫描一级元素直到第一个 Cluster
        let mut have_info = false;
        let mut have_tracks = false;
        loop {
            let pos = io.position();
            if pos >= self.segment_end {
                break;
            }
            let header = match read_element_header(io, self.segment_end - pos) {
                Ok(h) => h,
                Err(LiuError::Eof) => break,
                Err(e) => return Err(e),
            };
            match header.id {
                SEEK_HEAD => self.parse_seek_head(io, header.size)?,
                SEGMENT_INFO => {
                    self.parse_info(io, header.size)?;
                    have_info = true;
                }
                TRACKS => {
                    self.parse_tracks(io, header.size)?;
                    have_tracks = true;
                }
                CUES => self.parse_cues(io, header.size)?,
                CLUSTER => {
                    self.first_cluster = Some(pos);
                    self.enter_cluster(&header);
                    break;
                }
                _ => {
                    trace!("MKV: 跳过一级元素 0x{:X}", header.id);
                    io.skip(header.size)?;
                }
            }
        }

        // 4) 头部之后的元素经由 SeekHead 加载
        if !have_info {
            self.load_level1(io, SEGMENT_INFO)?;
        }
        if !have_tracks {
            self.load_level1(io, TRACKS)?;
        }
        if self.cues.is_empty() {
            if let Err(e) = self.load_level1(io, CUES) {
                warn!("MKV: 加载 Cues 失败, 定位将顺序扫描: {e}");
            }
        }

        if self.streams.is_empty() {
            return Err(LiuError::Format("MKV: 未找到任何可用轨道".into()));
        }
        if let Some(duration) = self.duration() {
            for stream in &mut self.streams {
                stream.duration = Some(duration);
            }
        }
        debug!(
            "打开 MKV: {} 个轨道, webm={}, 索引点 {}",
            self.streams.len(),
            self.is_webm,
            self.cues.len()
        );
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LiuResult<Packet> {
        loop {
            if let Some(pkt) = self.pending.pop_front() {
                return Ok(Packet::Data(pkt));
            }
            if self.in_cluster {
                if !self.read_cluster_element(io)? {
                    self.in_cluster = false;
                }
                continue;
            }

            let pos = io.position();
            if pos >= self.segment_end {
                return Err(LiuError::Eof);
            }
            let header = match read_element_header(io, self.segment_end - pos) {
                Ok(h) => h,
                Err(e) if e.is_recoverable() => {
                    warn!("MKV: 偏移 {pos} 处一级元素头损坏, 查找下一个簇: {e}");
                    self.resync_to_cluster(io)?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            match header.id {
                CLUSTER => {
                    self.first_cluster.get_or_insert(pos);
                    self.enter_cluster(&header);
                }
                CUES if self.cues.is_empty() => self.parse_cues(io, header.size)?,
                _ => io.skip(header.size)?,
            }
        }
    }

    fn seek(&mut self, io: &mut IoContext, time: i64) -> LiuResult<i64> {
        if !io.is_seekable() {
            return Err(LiuError::Unsupported("MKV: 源不可定位".into()));
        }
        let (pos, actual) = if self.cues.is_empty() {
            self.seek_by_scan(io, time)?
        } else {
            let cue = self
                .cues
                .iter()
                .rev()
                .find(|c| c.time <= time)
                .or_else(|| self.cues.first())
                .copied()
                .ok_or(LiuError::Eof)?;
            trace!("MKV: 命中索引点 track={} @ {}", cue.track, cue.cluster_pos);
            (cue.cluster_pos, cue.time)
        };
        io.seek(SeekFrom::Start(pos))?;
        self.pending.clear();
        self.in_cluster = false;
        self.discontinuity = false;
        Ok(actual)
    }

    fn duration(&self) -> Option<i64> {
        self.raw_duration.map(|d| {
            let ns = d * self.timecode_scale as f64;
            Self::ns_to_ticks(ns.max(0.0) as u64)
        })
    }

    fn metadata(&self) -> &[(String, String)] {
        &self.metadata
    }
}

/// Matroska 格式探测器
pub struct MkvProbe;

impl FormatProbe for MkvProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
            let head = &data[..data.len().min(64)];
            let has_doc_type = head.windows(8).any(|w| w == b"matroska")
                || head.windows(4).any(|w| w == b"webm");
            return Some(if has_doc_type {
                probe::SCORE_MAX
            } else {
                probe::SCORE_PARTIAL
            });
        }
        probe::extension_score(FormatId::Matroska, filename)
    }

    fn format_id(&self) -> FormatId {
        FormatId::Matroska
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryBackend;
    use liu_core::TICKS_PER_SECOND;

    const MS: i64 = TICKS_PER_SECOND / 1000;

    fn element(id: u32, content: &[u8]) -> Vec<u8> {
        let mut buf = encode_element_id(id);
        buf.extend(encode_vint(content.len() as u64));
        buf.extend_from_slice(content);
        buf
    }

    fn uint_element(id: u32, value: u64) -> Vec<u8> {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
        element(id, &bytes[skip..])
    }

    fn float_element(id: u32, value: f64) -> Vec<u8> {
        element(id, &value.to_be_bytes())
    }

    fn simple_block(track: u8, delta: i16, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut body = vec![0x80 | track];
        body.extend_from_slice(&delta.to_be_bytes());
        body.push(flags);
        body.extend_from_slice(payload);
        element(SIMPLE_BLOCK, &body)
    }

    fn track_entry(number: u64, kind: u64, codec: &str, extra: &[Vec<u8>]) -> Vec<u8> {
        let mut body = uint_element(TRACK_NUMBER, number);
        body.extend(uint_element(TRACK_TYPE, kind));
        body.extend(element(TRACK_CODEC_ID, codec.as_bytes()));
        for e in extra {
            body.extend_from_slice(e);
        }
        element(TRACK_ENTRY, &body)
    }

    fn cluster(timecode: u64, blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut body = uint_element(CLUSTER_TIMECODE, timecode);
        for b in blocks {
            body.extend_from_slice(b);
        }
        element(CLUSTER, &body)
    }

    fn info_element() -> Vec<u8> {
        let mut info = uint_element(INFO_TIMECODE_SCALE, 1_000_000);
        info.extend(float_element(INFO_DURATION, 2000.0));
        info.extend(element(INFO_TITLE, b"demo"));
        element(SEGMENT_INFO, &info)
    }

    /// 组装文件: EBML 头 + Segment(Info, Tracks, 其余一级元素)
    fn build_file(doc_type: &str, tracks: &[Vec<u8>], rest: &[Vec<u8>]) -> Vec<u8> {
        let mut data = element(EBML_HEADER, &element(EBML_DOC_TYPE, doc_type.as_bytes()));
        let mut segment = info_element();
        segment.extend(element(TRACKS, &tracks.concat()));
        for e in rest {
            segment.extend_from_slice(e);
        }
        data.extend(element(SEGMENT, &segment));
        data
    }

    fn two_track_file() -> Vec<u8> {
        let video = track_entry(
            1,
            TRACK_TYPE_VIDEO,
            "V_MPEG4/ISO/AVC",
            &[element(
                VIDEO_SETTINGS,
                &[uint_element(VIDEO_PIXEL_WIDTH, 1280), uint_element(VIDEO_PIXEL_HEIGHT, 720)]
                    .concat(),
            )],
        );
        let audio = track_entry(
            2,
            TRACK_TYPE_AUDIO,
            "A_MPEG/L3",
            &[element(
                AUDIO_SETTINGS,
                &[float_element(AUDIO_SAMPLING_FREQ, 44100.0), uint_element(AUDIO_CHANNELS, 2)]
                    .concat(),
            )],
        );
        build_file(
            "matroska",
            &[video, audio],
            &[
                cluster(
                    0,
                    &[
                        simple_block(1, 0, 0x80, &[0xDE, 0xAD]),
                        simple_block(2, 5, 0x80, &[0xBE, 0xEF]),
                    ],
                ),
                cluster(1000, &[simple_block(1, 40, 0x00, &[0x01])]),
            ],
        )
    }

    fn open(data: Vec<u8>) -> (Box<dyn Demuxer>, IoContext) {
        let mut io = IoContext::from_memory(data);
        let mut demuxer = MkvDemuxer::create(&DemuxConfig::default()).unwrap();
        demuxer.open(&mut io).unwrap();
        (demuxer, io)
    }

    fn next_data(demuxer: &mut Box<dyn Demuxer>, io: &mut IoContext) -> DataPacket {
        match demuxer.read_packet(io).unwrap() {
            Packet::Data(d) => d,
            other => panic!("应为数据包: {other:?}"),
        }
    }

    #[test]
    fn test_probe_mkv() {
        let probe = MkvProbe;
        assert_eq!(
            probe.probe(&[0x1A, 0x45, 0xDF, 0xA3], None),
            Some(probe::SCORE_PARTIAL)
        );
        assert_eq!(probe.probe(&two_track_file(), None), Some(probe::SCORE_MAX));
        assert!(probe.probe(&[], Some("video.webm")).is_some());
        assert!(probe.probe(&[], Some("video.mp4")).is_none());
    }

    #[test]
    fn test_解析流表() {
        let (demuxer, _) = open(two_track_file());
        let streams = demuxer.streams();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].codec_id, CodecId::H264);
        assert_eq!(streams[0].program, 1);
        let v = streams[0].video_params().unwrap();
        assert_eq!((v.width, v.height), (1280, 720));
        let a = streams[1].audio_params().unwrap();
        assert_eq!((a.sample_rate, a.channels), (44100, 2));
        assert_eq!(demuxer.duration(), Some(2 * TICKS_PER_SECOND));
        assert!(demuxer
            .metadata()
            .iter()
            .any(|(k, v)| k == "title" && v == "demo"));
    }

    #[test]
    fn test_读取数据包与时间戳() {
        let (mut demuxer, mut io) = open(two_track_file());
        let p0 = next_data(&mut demuxer, &mut io);
        assert_eq!(p0.stream_index, 0);
        assert!(p0.is_keyframe());
        assert_eq!(p0.data().as_ref(), &[0xDE, 0xAD]);
        assert_eq!(p0.pts, Some(0));

        let p1 = next_data(&mut demuxer, &mut io);
        assert_eq!(p1.stream_index, 1);
        assert_eq!(p1.pts, Some(5 * MS));

        let p2 = next_data(&mut demuxer, &mut io);
        assert_eq!(p2.pts, Some(1040 * MS));
        assert!(!p2.is_keyframe());
        assert!(demuxer.read_packet(&mut io).unwrap_err().is_eof());
    }

    #[test]
    fn test_拒绝未知_doctype() {
        let data = build_file("foo", &[], &[]);
        let mut io = IoContext::from_memory(data);
        let mut demuxer = MkvDemuxer::create(&DemuxConfig::default()).unwrap();
        assert!(demuxer.open(&mut io).is_err());
    }

    #[test]
    fn test_webm_doctype() {
        let track = track_entry(1, TRACK_TYPE_VIDEO, "V_VP9", &[]);
        let (demuxer, _) = open(build_file("webm", &[track], &[]));
        assert_eq!(demuxer.name(), "webm");
        assert_eq!(demuxer.streams()[0].codec_id, CodecId::Vp9);
    }

    fn laced_file(flags: u8, lace_body: &[u8]) -> Vec<u8> {
        let track = track_entry(
            7,
            TRACK_TYPE_AUDIO,
            "A_AC3",
            &[uint_element(TRACK_DEFAULT_DURATION, 32_000_000)],
        );
        let mut body = vec![0x87, 0x00, 0x0A, 0x80 | flags];
        body.extend_from_slice(lace_body);
        build_file(
            "matroska",
            &[track],
            &[cluster(100, &[element(SIMPLE_BLOCK, &body)])],
        )
    }

    fn collect_frames(data: Vec<u8>) -> Vec<DataPacket> {
        let (mut demuxer, mut io) = open(data);
        let mut out = Vec::new();
        while let Ok(Packet::Data(d)) = demuxer.read_packet(&mut io) {
            out.push(d);
        }
        out
    }

    fn check_lacing(frames: &[DataPacket], sizes: &[usize]) {
        assert_eq!(frames.len(), sizes.len());
        for (f, &s) in frames.iter().zip(sizes) {
            assert_eq!(f.size(), s);
            assert_eq!(f.duration, 32 * MS);
        }
        assert_eq!(frames[0].pts, Some(110 * MS));
        assert!(frames[1..].iter().all(|f| f.pts.is_none()));
    }

    #[test]
    fn test_xiph_交织() {
        // 3 帧: 300, 2, 剩余 4
        let mut body = vec![2, 0xFF, 45, 2];
        body.extend(vec![0xAA; 306]);
        check_lacing(&collect_frames(laced_file(0x02, &body)), &[300, 2, 4]);
    }

    #[test]
    fn test_固定大小交织() {
        let mut body = vec![3];
        body.extend(vec![0x11; 20]);
        check_lacing(&collect_frames(laced_file(0x04, &body)), &[5, 5, 5, 5]);
    }

    #[test]
    fn test_ebml_交织() {
        // 3 帧: 10, 10-3=7, 剩余 6
        let mut body = vec![2, 0x8A];
        body.push(0xBC); // svint -3
        body.extend(vec![0x22; 23]);
        check_lacing(&collect_frames(laced_file(0x06, &body)), &[10, 7, 6]);
    }

    #[test]
    fn test_固定交织长度不整除时丢弃块() {
        let mut body = vec![2];
        body.extend(vec![0x11; 10]);
        assert!(collect_frames(laced_file(0x04, &body)).is_empty());
    }

    #[test]
    fn test_ebml_交织_超大差值返回错误() {
        let mut data = vec![199];
        for _ in 0..199 {
            data.extend_from_slice(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]);
        }
        data.extend(vec![0x33; 16]);
        let result = split_laced_frames(&Bytes::from(data), 0, 3);
        assert!(matches!(result, Err(LiuError::InvalidData(_))));

        // 首帧合法, 后续差值把大小推到帧区之外
        let mut data = vec![2, 0x81];
        data.extend_from_slice(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]);
        data.extend(vec![0x33; 16]);
        let result = split_laced_frames(&Bytes::from(data), 0, 3);
        assert!(matches!(result, Err(LiuError::InvalidData(_))));
    }

    #[test]
    fn test_xiph_交织_超大长度返回错误() {
        let mut data = vec![1];
        data.extend(vec![0xFF; 4000]);
        data.push(0x10);
        data.extend(vec![0x44; 8]);
        let result = split_laced_frames(&Bytes::from(data), 0, 1);
        assert!(matches!(result, Err(LiuError::InvalidData(_))));

        // 整个块被丢弃, 解封装继续
        let mut body = vec![1];
        body.extend(vec![0xFF; 4000]);
        body.push(0x10);
        body.extend(vec![0x44; 8]);
        assert!(collect_frames(laced_file(0x02, &body)).is_empty());
    }

    #[test]
    fn test_簇时间码接近上限时饱和() {
        let track = track_entry(1, TRACK_TYPE_AUDIO, "A_OPUS", &[]);
        let frames = collect_frames(build_file(
            "matroska",
            &[track],
            &[cluster(
                (i64::MAX - 10) as u64,
                &[simple_block(1, i16::MAX, 0x80, &[1])],
            )],
        ));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pts, Some(i64::MAX));
    }

    #[test]
    fn test_块组关键帧判定() {
        let track = track_entry(1, TRACK_TYPE_VIDEO, "V_MPEG2", &[]);
        let block = |ref_block: bool| {
            let mut body = element(BLOCK, &[0x81, 0x00, 0x00, 0x00, 0x42]);
            body.extend(uint_element(BLOCK_DURATION, 40));
            if ref_block {
                body.extend(element(REFERENCE_BLOCK, &[0xD8]));
            }
            element(BLOCK_GROUP, &body)
        };
        let frames = collect_frames(build_file(
            "matroska",
            &[track],
            &[cluster(0, &[block(false), block(true)])],
        ));
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_keyframe());
        assert!(!frames[1].is_keyframe());
        assert_eq!(frames[0].duration, 40 * MS);
    }

    #[test]
    fn test_vorbis_私有数据变换() {
        let mut private = vec![2, 3, 2];
        private.extend_from_slice(b"abcdeXYZ");
        let track = track_entry(
            1,
            TRACK_TYPE_AUDIO,
            "A_VORBIS",
            &[element(TRACK_CODEC_PRIVATE, &private)],
        );
        let (demuxer, _) = open(build_file("matroska", &[track], &[]));
        let cp = &demuxer.streams()[0].codec_private;
        let mut expected = Vec::new();
        for part in [&b"abc"[..], b"de", b"XYZ"] {
            expected.extend((part.len() as u32).to_be_bytes());
            expected.extend_from_slice(part);
        }
        assert_eq!(cp, &expected);
    }

    #[test]
    fn test_aac_推导_audio_specific_config() {
        assert_eq!(aac_private("A_AAC/MPEG4/LC", 48000, None, 2), vec![0x11, 0x90]);
        let sbr = aac_private("A_AAC/MPEG4/LC/SBR", 24000, Some(48000), 2);
        assert_eq!(sbr.len(), 5);
        assert_eq!(&sbr[2..4], &[0x56, 0xE5]);
        assert_eq!(sbr[4], 0x80 | (3 << 3));

        let sbr = aac_private("A_AAC/MPEG4/LC/SBR", u32::MAX, None, 2);
        assert_eq!(sbr.len(), 5);
    }

    #[test]
    fn test_vfw_fourcc() {
        let mut bih = vec![0u8; 40];
        bih[4..8].copy_from_slice(&640u32.to_le_bytes());
        bih[8..12].copy_from_slice(&480u32.to_le_bytes());
        bih[16..20].copy_from_slice(b"XVID");
        bih.extend_from_slice(&[0, 0, 1, 0xB0]);
        let track = track_entry(
            3,
            TRACK_TYPE_VIDEO,
            "V_MS/VFW/FOURCC",
            &[element(TRACK_CODEC_PRIVATE, &bih)],
        );
        let (demuxer, _) = open(build_file("matroska", &[track], &[]));
        let s = &demuxer.streams()[0];
        assert_eq!(s.codec_id, CodecId::Mpeg4);
        assert_eq!(s.codec_private, vec![0, 0, 1, 0xB0]);
        assert_eq!(s.video_params().unwrap().width, 640);
    }

    #[test]
    fn test_编码名映射() {
        assert_eq!(codec_from_name("V_MPEG4/ISO/ASP"), CodecId::Mpeg4);
        assert_eq!(codec_from_name("V_MPEG4/ISO/AVC"), CodecId::H264);
        assert_eq!(codec_from_name("A_AAC/MPEG2/LC"), CodecId::Aac);
        assert_eq!(codec_from_name("S_TEXT/UTF8"), CodecId::Text);
        assert_eq!(codec_from_name("X_UNKNOWN"), CodecId::None);
    }

    fn seek_head(target: u32, offset: u64) -> Vec<u8> {
        let seek = [
            element(SEEK_ID, &encode_element_id(target)),
            element(SEEK_POSITION, &offset.to_be_bytes()),
        ]
        .concat();
        element(SEEK_HEAD, &element(SEEK, &seek))
    }

    /// SeekHead + 三个簇 (0s, 1s, 2s), 可选在末尾附带由 SeekHead 指向的 Cues
    fn seekable_file(with_cues: bool) -> Vec<u8> {
        let track = track_entry(1, TRACK_TYPE_VIDEO, "V_VP8", &[]);
        let clusters: Vec<Vec<u8>> = (0..3u8)
            .map(|i| cluster(u64::from(i) * 1000, &[simple_block(1, 0, 0x80, &[i])]))
            .collect();
        // 簇相对 Segment 数据区的偏移
        let mut offset = (info_element().len()
            + element(TRACKS, &track).len()
            + seek_head(CUES, 0).len()) as u64;
        let mut points = Vec::new();
        for (i, c) in clusters.iter().enumerate() {
            let positions = [
                uint_element(CUE_TRACK, 1),
                uint_element(CUE_CLUSTER_POSITION, offset),
            ]
            .concat();
            let body = [
                uint_element(CUE_TIME, i as u64 * 1000),
                element(CUE_TRACK_POSITIONS, &positions),
            ]
            .concat();
            points.extend(element(CUE_POINT, &body));
            offset += c.len() as u64;
        }
        let mut rest = vec![seek_head(CUES, offset)];
        rest.extend(clusters);
        if with_cues {
            rest.push(element(CUES, &points));
        }
        build_file("matroska", &[track], &rest)
    }

    fn seek_and_read(with_cues: bool, target: i64) -> (i64, DataPacket) {
        let (mut demuxer, mut io) = open(seekable_file(with_cues));
        // 先读一个包, 确认定位会重置簇状态
        next_data(&mut demuxer, &mut io);
        let actual = demuxer.seek(&mut io, target).unwrap();
        (actual, next_data(&mut demuxer, &mut io))
    }

    #[test]
    fn test_按索引定位() {
        let (actual, pkt) = seek_and_read(true, 1500 * MS);
        assert_eq!(actual, TICKS_PER_SECOND);
        assert_eq!(pkt.data().as_ref(), &[1]);
        assert_eq!(pkt.pts, Some(TICKS_PER_SECOND));
    }

    #[test]
    fn test_无索引顺序扫描定位() {
        let (actual, pkt) = seek_and_read(false, 2500 * MS);
        assert_eq!(actual, 2 * TICKS_PER_SECOND);
        assert_eq!(pkt.data().as_ref(), &[2]);
        let (actual, pkt) = seek_and_read(false, 0);
        assert_eq!(actual, 0);
        assert_eq!(pkt.data().as_ref(), &[0]);
    }

    #[test]
    fn test_定位结果幂等() {
        let (mut demuxer, mut io) = open(seekable_file(true));
        let a = demuxer.seek(&mut io, 1200 * MS).unwrap();
        let b = demuxer.seek(&mut io, a).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_未知大小簇在下一个簇处结束() {
        let track = track_entry(1, TRACK_TYPE_AUDIO, "A_OPUS", &[]);
        let mut open_cluster = encode_element_id(CLUSTER);
        open_cluster.push(0xFF);
        open_cluster.extend(uint_element(CLUSTER_TIMECODE, 0));
        open_cluster.extend(simple_block(1, 0, 0x80, &[1]));
        let closed = cluster(500, &[simple_block(1, 0, 0x80, &[2])]);
        let frames = collect_frames(build_file("matroska", &[track], &[open_cluster, closed]));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].pts, Some(500 * MS));
    }

    #[test]
    fn test_簇内元素头损坏后跳到下一个簇() {
        let track = track_entry(1, TRACK_TYPE_AUDIO, "A_OPUS", &[]);
        let mut damaged = uint_element(CLUSTER_TIMECODE, 1000);
        damaged.extend_from_slice(&[0x00, 0x12, 0x34]);
        damaged.extend(simple_block(1, 0, 0x80, &[3]));
        let frames = collect_frames(build_file(
            "matroska",
            &[track],
            &[
                cluster(0, &[simple_block(1, 0, 0x80, &[1]), simple_block(1, 10, 0x80, &[2])]),
                element(CLUSTER, &damaged),
                cluster(2000, &[simple_block(1, 0, 0x80, &[5])]),
            ],
        ));
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].data()[0], 5);
        assert_eq!(frames[2].pts, Some(2000 * MS));
        assert!(!frames[1].flags.contains(PacketFlags::DISCONTINUITY));
        assert!(frames[2].flags.contains(PacketFlags::DISCONTINUITY));
    }

    #[test]
    fn test_簇外元素头损坏后找到簇() {
        let track = track_entry(1, TRACK_TYPE_AUDIO, "A_OPUS", &[]);
        let frames = collect_frames(build_file(
            "matroska",
            &[track],
            &[
                cluster(0, &[simple_block(1, 0, 0x80, &[1])]),
                vec![0x00, 0x00, 0x7F],
                cluster(500, &[simple_block(1, 0, 0x80, &[2])]),
            ],
        ));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].pts, Some(500 * MS));
        assert!(frames[1].flags.contains(PacketFlags::DISCONTINUITY));
    }

    #[test]
    fn test_截断文件报错不崩溃() {
        let mut data = two_track_file();
        data.truncate(data.len() - 3);
        let mut io = IoContext::new(Box::new(MemoryBackend::from_data(data)));
        let mut demuxer = MkvDemuxer::create(&DemuxConfig::default()).unwrap();
        assert!(demuxer.open(&mut io).is_err());
    }
}
