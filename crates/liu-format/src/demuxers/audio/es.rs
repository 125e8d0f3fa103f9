//! 音频裸流解封装器.
//!
//! 一种实现覆盖 MPEG 音频, ADTS, AC-3/E-AC-3 与 DTS, 差别只在帧头解析.
//! 读取时维护一个滑动窗口: 帧头无效就前移一个字节重新同步, 候选帧只有
//! 在下一帧帧头同样有效 (或其后就是流末尾) 时才被接受.

use std::io::SeekFrom;

use liu_core::timestamp::format_ticks;
use liu_core::{DataPacket, LiuError, LiuResult, Packet, PacketFlags, TICKS_PER_SECOND};
use log::{debug, warn};

use super::xing::{self, VbrInfo};
use super::{FrameInfo, FrameKind, adts, mpa, scan, tags};
use crate::config::DemuxConfig;
use crate::demuxer::Demuxer;
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{self, FormatProbe, ProbeScore};
use crate::stream::{AudioParams, Stream, StreamFlags};

/// 同步窗口, 大于任何一种格式的最大帧长
const WINDOW: usize = 64 * 1024;
/// 探测时在开头多少字节内寻找第一帧
const PROBE_SCAN: usize = 4096;

fn samples_to_ticks(samples: u64, sample_rate: u32) -> i64 {
    (u128::from(samples) * TICKS_PER_SECOND as u128 / u128::from(sample_rate.max(1))) as i64
}

fn ticks_to_samples(ticks: i64, sample_rate: u32) -> u64 {
    (u128::from(ticks.max(0) as u64) * u128::from(sample_rate) / TICKS_PER_SECOND as u128) as u64
}

/// 音频裸流解封装器
pub struct EsDemuxer {
    kind: FrameKind,
    max_skip: u64,
    streams: Vec<Stream>,
    /// 第一个音频帧 (VBR 标签帧之后)
    data_start: u64,
    /// 尾部标签之前的位置
    data_end: Option<u64>,
    sample_rate: u32,
    /// 平均码率, 用于无查找表时的时间与偏移换算
    bit_rate: u32,
    vbr: Option<VbrInfo>,
    duration: Option<i64>,
    /// 已输出的采样数, 决定下一包的时间戳
    samples: u64,
    /// 当前位置紧接在一个已接受的帧之后
    locked: bool,
    opened: bool,
    discontinuity: bool,
}

impl EsDemuxer {
    pub fn new(kind: FrameKind, config: &DemuxConfig) -> Self {
        Self {
            kind,
            max_skip: config.mpeg.max_sync_skip,
            streams: Vec::new(),
            data_start: 0,
            data_end: None,
            sample_rate: 0,
            bit_rate: 0,
            vbr: None,
            duration: None,
            samples: 0,
            locked: false,
            opened: false,
            discontinuity: false,
        }
    }

    pub fn create_mpa(config: &DemuxConfig) -> LiuResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new(FrameKind::Mpa, config)))
    }

    pub fn create_adts(config: &DemuxConfig) -> LiuResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new(FrameKind::Adts, config)))
    }

    pub fn create_ac3(config: &DemuxConfig) -> LiuResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new(FrameKind::Ac3, config)))
    }

    pub fn create_dts(config: &DemuxConfig) -> LiuResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new(FrameKind::Dts, config)))
    }

    /// 定位到下一个可信帧的起点, 到达末尾时返回 None
    fn sync(&mut self, io: &mut IoContext) -> LiuResult<Option<FrameInfo>> {
        let mut skipped = 0u64;
        loop {
            let pos = io.position();
            let limit = match self.data_end {
                Some(end) => end.saturating_sub(pos).min(WINDOW as u64) as usize,
                None => WINDOW,
            };
            let buf = io.peek(limit)?;
            let len = buf.len();
            let at_end = len < WINDOW;
            let found = scan(self.kind, buf, at_end);

            if let Some((off, info)) = found {
                io.skip(off as u64)?;
                skipped += off as u64;
                if skipped > 0 && self.opened {
                    warn!(
                        "{}: 位置 {pos} 处丢失同步, 跳过 {skipped} 字节",
                        self.kind.format_id()
                    );
                    self.discontinuity = true;
                }
                return Ok(Some(info));
            }
            if at_end {
                io.skip(len as u64)?;
                return Ok(None);
            }
            // 末尾不足一个帧头的字节留到下一轮
            let step = len + 1 - self.kind.header_len();
            skipped += step as u64;
            if skipped > self.max_skip {
                warn!(
                    "{}: 连续 {skipped} 字节未找到有效帧, 视为流结束",
                    self.kind.format_id()
                );
                return Ok(None);
            }
            io.skip(step as u64)?;
        }
    }

    /// 已同步时直接解析当前位置的帧头, 不做前瞻校验
    fn next_locked(&mut self, io: &mut IoContext) -> LiuResult<Option<FrameInfo>> {
        if !self.locked {
            return Ok(None);
        }
        let header_len = self.kind.header_len();
        if self
            .data_end
            .is_some_and(|end| io.position() + header_len as u64 > end)
        {
            return Ok(None);
        }
        let head = io.peek(header_len)?;
        Ok(self.kind.parse(head))
    }

    fn estimate_duration(&self) -> Option<i64> {
        let spf = self.streams.first()?.audio_params()?.samples_per_frame;
        if let Some(frames) = self.vbr.as_ref().and_then(|v| v.frames) {
            return Some(samples_to_ticks(u64::from(frames) * u64::from(spf), self.sample_rate));
        }
        let bytes = self.data_end?.checked_sub(self.data_start)?;
        if self.bit_rate == 0 {
            return None;
        }
        Some((u128::from(bytes) * 8 * TICKS_PER_SECOND as u128 / u128::from(self.bit_rate)) as i64)
    }

    /// 相对第一帧的字节偏移对应的时间
    fn time_for_offset(&self, rel: u64) -> i64 {
        if let (Some(vbr), Some(duration)) = (&self.vbr, self.duration) {
            if let Some(fraction) = vbr.fraction_for(rel) {
                return (fraction * duration as f64) as i64;
            }
        }
        if self.bit_rate == 0 {
            return 0;
        }
        (u128::from(rel) * 8 * TICKS_PER_SECOND as u128 / u128::from(self.bit_rate)) as i64
    }

    /// 时间对应的相对字节偏移
    fn offset_for_time(&self, time: i64) -> Option<u64> {
        if let (Some(vbr), Some(duration)) = (&self.vbr, self.duration) {
            if duration > 0 {
                if let Some(off) = vbr.offset_for(time as f64 / duration as f64) {
                    return Some(off);
                }
            }
        }
        (self.bit_rate > 0).then(|| {
            (u128::from(time.max(0) as u64) * u128::from(self.bit_rate)
                / 8
                / TICKS_PER_SECOND as u128) as u64
        })
    }

    /// 从文件末尾计算尾部标签长度, 不改变当前位置
    fn detect_trailer(io: &mut IoContext) -> LiuResult<Option<u64>> {
        let Some(size) = io.size().filter(|_| io.is_seekable()) else {
            return Ok(None);
        };
        let here = io.position();
        let tail_start = size
            .saturating_sub(tags::TRAILER_PROBE_LEN as u64)
            .max(here);
        io.seek(SeekFrom::Start(tail_start))?;
        let tail = io.read_bytes((size - tail_start) as usize)?;
        io.seek(SeekFrom::Start(here))?;
        let trailing = tags::trailing_len(&tail);
        if trailing > 0 {
            debug!("音频裸流: 末尾标签 {trailing} 字节");
        }
        Ok(Some(size.saturating_sub(trailing).max(here)))
    }
}

impl Demuxer for EsDemuxer {
    fn format_id(&self) -> FormatId {
        self.kind.format_id()
    }

    fn name(&self) -> &str {
        self.kind.format_id().name()
    }

    fn open(&mut self, io: &mut IoContext) -> LiuResult<()> {
        if let Some(len) = tags::id3v2_len(io.peek(10)?) {
            debug!("跳过 ID3v2 标签 {len} 字节");
            io.skip(len)?;
        }
        self.data_end = Self::detect_trailer(io)?;

        let info = self.sync(io)?.ok_or_else(|| {
            LiuError::Format(format!("{}: 未找到有效音频帧", self.kind.format_id()))
        })?;
        self.data_start = io.position();
        self.sample_rate = info.sample_rate;
        self.bit_rate = info.bit_rate;

        let mut codec_private = Vec::new();
        let head = io.peek(info.frame_size)?;
        match self.kind {
            FrameKind::Mpa => {
                self.vbr = mpa::parse_header(head).and_then(|h| xing::parse(head, &h));
            }
            FrameKind::Adts => {
                if let Some(h) = adts::parse_header(head) {
                    codec_private = h.audio_specific_config().to_vec();
                }
            }
            _ => {}
        }
        if let Some(vbr) = &self.vbr {
            debug!(
                "MPEG 音频: {:?} 标签, 帧数 {:?}, 字节数 {:?}",
                vbr.kind, vbr.frames, vbr.bytes
            );
            // 标签帧本身不含音频
            io.skip(info.frame_size as u64)?;
            self.data_start = io.position();
            if let (Some(frames), Some(bytes)) = (vbr.frames, vbr.bytes) {
                let total = u64::from(frames) * u64::from(info.samples_per_frame);
                if total > 0 {
                    self.bit_rate = (u128::from(bytes) * 8 * u128::from(info.sample_rate)
                        / u128::from(total)) as u32;
                }
            }
        }

        let mut stream = Stream::audio(
            0,
            info.codec_id,
            AudioParams {
                sample_rate: info.sample_rate,
                channels: info.channels,
                samples_per_frame: info.samples_per_frame,
                ..Default::default()
            },
        );
        stream.codec_private = codec_private;
        stream.bit_rate = u64::from(self.bit_rate);
        stream.start_time = Some(0);
        if self.vbr.as_ref().is_some_and(VbrInfo::is_vbr) {
            stream.flags |= StreamFlags::VBR;
        }
        if let Some(frames) = self.vbr.as_ref().and_then(|v| v.frames) {
            stream.nb_frames = u64::from(frames);
        }
        self.streams = vec![stream];
        self.duration = self.estimate_duration();
        self.streams[0].duration = self.duration;
        self.opened = true;
        self.locked = true;

        debug!(
            "{}: {} {}Hz {}ch {}kbps, 时长 {}",
            self.kind.format_id(),
            info.codec_id,
            info.sample_rate,
            info.channels,
            self.bit_rate / 1000,
            self.duration.map_or_else(|| "未知".to_string(), format_ticks),
        );
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LiuResult<Packet> {
        let info = match self.next_locked(io)? {
            Some(info) => info,
            None => match self.sync(io)? {
                Some(info) => info,
                None => {
                    self.locked = false;
                    return Err(LiuError::Eof);
                }
            },
        };
        let pos = io.position();
        let data = match io.read_bytes(info.frame_size) {
            Ok(data) => data,
            Err(LiuError::Eof | LiuError::InvalidData(_)) => {
                debug!("{}: 末尾帧不完整, 丢弃", self.kind.format_id());
                self.locked = false;
                return Err(LiuError::Eof);
            }
            Err(e) => return Err(e),
        };
        self.locked = true;

        let pts = samples_to_ticks(self.samples, self.sample_rate);
        // 采样率与首帧不同的帧按时长折算
        self.samples += u64::from(info.samples_per_frame) * u64::from(self.sample_rate)
            / u64::from(info.sample_rate.max(1));
        let mut pkt = DataPacket::new(0, data)
            .with_pts(Some(pts), Some(pts))
            .with_flags(PacketFlags::KEYFRAME);
        pkt.duration = samples_to_ticks(self.samples, self.sample_rate) - pts;
        pkt.pos = Some(pos);
        if std::mem::take(&mut self.discontinuity) {
            pkt.flags |= PacketFlags::DISCONTINUITY;
        }
        Ok(Packet::Data(pkt))
    }

    fn seek(&mut self, io: &mut IoContext, time: i64) -> LiuResult<i64> {
        if !io.is_seekable() {
            return Err(LiuError::Unsupported(format!(
                "{}: 输入不可定位",
                self.kind.format_id()
            )));
        }
        let rel = self.offset_for_time(time.max(0)).ok_or_else(|| {
            LiuError::Unsupported(format!("{}: 码率未知, 无法定位", self.kind.format_id()))
        })?;
        let span = self.data_end.map(|end| end.saturating_sub(self.data_start));
        let rel = span.map_or(rel, |s| rel.min(s));
        io.seek(SeekFrom::Start(self.data_start + rel))?;

        self.opened = false;
        let found = self.sync(io)?;
        self.opened = true;
        self.discontinuity = false;
        self.locked = found.is_some();
        let landed = match found {
            Some(_) => self.time_for_offset(io.position() - self.data_start),
            None => self.duration.unwrap_or(time),
        };
        self.samples = ticks_to_samples(landed, self.sample_rate);
        let actual = samples_to_ticks(self.samples, self.sample_rate);
        debug!(
            "{}: 定位 {} -> {} (偏移 {})",
            self.kind.format_id(),
            format_ticks(time),
            format_ticks(actual),
            io.position()
        );
        Ok(actual)
    }

    fn duration(&self) -> Option<i64> {
        self.duration
    }
}

/// 连续有效帧的个数
fn chain_len(kind: FrameKind, data: &[u8], start: usize) -> usize {
    let mut count = 0;
    let mut pos = start;
    let mut prev: Option<FrameInfo> = None;
    while pos + kind.header_len() <= data.len() {
        let Some(info) = kind.parse(&data[pos..]) else {
            break;
        };
        if prev.is_some_and(|p| !kind.compatible(&p, &info)) {
            break;
        }
        count += 1;
        pos += info.frame_size;
        prev = Some(info);
    }
    count
}

/// 音频裸流探测器, 每种帧格式一个实例
pub struct EsProbe {
    kind: FrameKind,
}

impl EsProbe {
    pub fn new(kind: FrameKind) -> Self {
        Self { kind }
    }
}

impl FormatProbe for EsProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        let format = self.kind.format_id();
        let start = tags::id3v2_len(data).map_or(0, |len| len as usize);
        if start >= data.len() {
            // ID3v2 标签比探测数据还长
            return probe::extension_score(format, filename);
        }
        let body = &data[start..];
        let window = body.len().min(PROBE_SCAN);
        let best = (0..window)
            .map(|pos| (pos, chain_len(self.kind, body, pos)))
            .find(|&(_, n)| n >= 2);
        match best {
            Some((0, n)) if n >= 4 => Some(probe::SCORE_MAX),
            Some((_, n)) if n >= 3 => Some(probe::SCORE_PARTIAL),
            _ => probe::extension_score(format, filename),
        }
    }

    fn format_id(&self) -> FormatId {
        self.kind.format_id()
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ac3, adts, dts, mpa, xing};
    use super::*;
    use crate::io::MemoryBackend;

    fn open(kind: FrameKind, data: Vec<u8>) -> (EsDemuxer, IoContext) {
        let mut io = IoContext::from_memory(data);
        let mut demuxer = EsDemuxer::new(kind, &DemuxConfig::default());
        demuxer.open(&mut io).unwrap();
        (demuxer, io)
    }

    fn read_all(demuxer: &mut EsDemuxer, io: &mut IoContext) -> Vec<DataPacket> {
        let mut out = Vec::new();
        loop {
            match demuxer.read_packet(io) {
                Ok(Packet::Data(d)) => out.push(d),
                Ok(other) => panic!("意外的控制包: {other:?}"),
                Err(LiuError::Eof) => return out,
                Err(e) => panic!("读取失败: {e}"),
            }
        }
    }

    /// n 个 128kbps 44.1kHz 的 MP3 帧
    fn mp3_frames(n: usize) -> Vec<u8> {
        (0..n).flat_map(|_| mpa::tests::frame(9, 0, false)).collect()
    }

    #[test]
    fn test_mp3_读取与时间戳() {
        let (mut demuxer, mut io) = open(FrameKind::Mpa, mp3_frames(10));
        let stream = &demuxer.streams()[0];
        assert_eq!(stream.codec_id, liu_core::CodecId::Mp3);
        assert_eq!(stream.audio_params().unwrap().sample_rate, 44100);
        assert_eq!(stream.bit_rate, 128_000);

        let pkts = read_all(&mut demuxer, &mut io);
        assert_eq!(pkts.len(), 10);
        assert_eq!(pkts[0].pts, Some(0));
        assert_eq!(pkts[1].pts, Some(samples_to_ticks(1152, 44100)));
        assert!(pkts.iter().all(|p| p.size() == 417 && p.is_keyframe()));
        assert_eq!(pkts[3].pos, Some(3 * 417));
    }

    #[test]
    fn test_id3_标签与尾部标签() {
        let mut data = vec![b'I', b'D', b'3', 3, 0, 0, 0, 0, 0, 20];
        data.extend([0u8; 20]);
        data.extend(mp3_frames(4));
        let mut id3v1 = vec![0u8; 128];
        id3v1[..3].copy_from_slice(b"TAG");
        data.extend(id3v1);

        let (mut demuxer, mut io) = open(FrameKind::Mpa, data);
        assert_eq!(demuxer.data_start, 30);
        assert_eq!(demuxer.data_end, Some(30 + 4 * 417));
        let pkts = read_all(&mut demuxer, &mut io);
        assert_eq!(pkts.len(), 4);
    }

    #[test]
    fn test_丢失同步后恢复() {
        let mut data = mp3_frames(3);
        data.extend([0x55u8; 100]);
        data.extend(mp3_frames(3));
        let (mut demuxer, mut io) = open(FrameKind::Mpa, data);
        let pkts = read_all(&mut demuxer, &mut io);
        assert_eq!(pkts.len(), 6);
        assert!(!pkts[2].flags.contains(PacketFlags::DISCONTINUITY));
        assert!(pkts[3].flags.contains(PacketFlags::DISCONTINUITY));
        assert_eq!(pkts[3].pos, Some(3 * 417 + 100));
    }

    #[test]
    fn test_伪帧头不被接受() {
        // 合法帧头后面跟着垃圾, 下一帧位置不是帧头
        let mut data = mpa::tests::header(9, 0, false).to_vec();
        data.extend([0x11u8; 500]);
        data.extend(mp3_frames(3));
        let (mut demuxer, mut io) = open(FrameKind::Mpa, data);
        assert_eq!(demuxer.data_start, 504);
        assert_eq!(read_all(&mut demuxer, &mut io).len(), 3);
    }

    #[test]
    fn test_xing_时长与定位() {
        let frames = 100u32;
        let mut data = xing::tests::xing_frame(frames, frames * 417);
        data.extend(mp3_frames(frames as usize));
        let (mut demuxer, mut io) = open(FrameKind::Mpa, data);
        assert_eq!(demuxer.data_start, 417);
        let expected = samples_to_ticks(u64::from(frames) * 1152, 44100);
        assert_eq!(demuxer.duration(), Some(expected));
        assert!(demuxer.streams()[0].flags.contains(StreamFlags::VBR));

        let target = expected / 2;
        let t1 = demuxer.seek(&mut io, target).unwrap();
        assert!((t1 - target).abs() < TICKS_PER_SECOND / 10);
        let first = match demuxer.read_packet(&mut io).unwrap() {
            Packet::Data(d) => d,
            other => panic!("{other:?}"),
        };
        assert_eq!(first.pts, Some(t1));
        assert_eq!((first.pos.unwrap() - 417) % 417, 0);

        // 用返回值再次定位落在同一位置附近
        let t2 = demuxer.seek(&mut io, t1).unwrap();
        assert!((t2 - t1).abs() < samples_to_ticks(1152, 44100));
    }

    #[test]
    fn test_cbr_定位() {
        let (mut demuxer, mut io) = open(FrameKind::Mpa, mp3_frames(50));
        let duration = demuxer.duration().unwrap();
        let t = demuxer.seek(&mut io, duration / 4).unwrap();
        assert!(t >= duration / 4);
        assert!(t - duration / 4 < samples_to_ticks(1152, 44100) * 2);
        assert_eq!(demuxer.seek(&mut io, 0).unwrap(), 0);
        assert_eq!(read_all(&mut demuxer, &mut io).len(), 50);
    }

    #[test]
    fn test_adts() {
        let data: Vec<u8> = (0..5).flat_map(|_| adts::tests::frame(200)).collect();
        let (mut demuxer, mut io) = open(FrameKind::Adts, data);
        let stream = &demuxer.streams()[0];
        assert_eq!(stream.codec_id, liu_core::CodecId::Aac);
        assert_eq!(stream.codec_private, vec![0x11, 0x90]);
        let pkts = read_all(&mut demuxer, &mut io);
        assert_eq!(pkts.len(), 5);
        assert_eq!(pkts[4].pts, Some(samples_to_ticks(4 * 1024, 48000)));
    }

    #[test]
    fn test_ac3_与_eac3() {
        let data: Vec<u8> = (0..3).flat_map(|_| ac3::tests::ac3_frame(15)).collect();
        let (mut demuxer, mut io) = open(FrameKind::Ac3, data);
        assert_eq!(demuxer.streams()[0].codec_id, liu_core::CodecId::Ac3);
        assert_eq!(read_all(&mut demuxer, &mut io).len(), 3);

        let data: Vec<u8> = (0..3).flat_map(|_| ac3::tests::eac3_frame(768)).collect();
        let (demuxer, _) = open(FrameKind::Ac3, data);
        assert_eq!(demuxer.streams()[0].codec_id, liu_core::CodecId::Eac3);
    }

    #[test]
    fn test_dts_14位() {
        let be: Vec<u8> = (0..4).flat_map(|_| dts::tests::be16_frame(1792)).collect();
        let data = dts::tests::to_14bit(&be, true);
        let (mut demuxer, mut io) = open(FrameKind::Dts, data);
        let pkts = read_all(&mut demuxer, &mut io);
        assert_eq!(pkts.len(), 4);
        assert!(pkts.iter().all(|p| p.size() == 2048));
        assert_eq!(pkts[1].pts, Some(samples_to_ticks(512, 48000)));
    }

    #[test]
    fn test_流式输入() {
        let mut io = IoContext::new(Box::new(MemoryBackend::streaming(mp3_frames(5))));
        let mut demuxer = EsDemuxer::new(FrameKind::Mpa, &DemuxConfig::default());
        demuxer.open(&mut io).unwrap();
        assert_eq!(demuxer.duration(), None);
        assert!(demuxer.seek(&mut io, 0).is_err());
        assert_eq!(read_all(&mut demuxer, &mut io).len(), 5);
    }

    #[test]
    fn test_探测() {
        let probe = EsProbe::new(FrameKind::Mpa);
        assert_eq!(probe.probe(&mp3_frames(6), None), Some(probe::SCORE_MAX));
        let mut shifted = vec![0u8; 7];
        shifted.extend(mp3_frames(6));
        assert_eq!(probe.probe(&shifted, None), Some(probe::SCORE_PARTIAL));
        assert_eq!(probe.probe(&[0u8; 1000], Some("a.mp3")), Some(probe::SCORE_EXTENSION));
        assert_eq!(probe.probe(&[0u8; 1000], None), None);

        let adts_probe = EsProbe::new(FrameKind::Adts);
        let data: Vec<u8> = (0..5).flat_map(|_| adts::tests::frame(100)).collect();
        assert_eq!(adts_probe.probe(&data, None), Some(probe::SCORE_MAX));
        assert_eq!(adts_probe.probe(&mp3_frames(6), None), None);
    }
}
