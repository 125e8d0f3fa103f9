//! 集成测试共用的容器合成工具.
//!
//! 每个构造函数生成 25fps 视频 + 一路音频的最小合法文件, 视频每 10 帧一个关键帧.

#![allow(dead_code)]

use liu_core::TICKS_PER_SECOND;
use liu_core::crc::crc32_mpeg2;
use liu_format::demuxers::mkv::ebml::*;
use liu_format::{DemuxConfig, FormatRegistry, IoContext, MuxedStream};

/// 一帧的时长 (tick)
pub const FRAME_TICKS: i64 = TICKS_PER_SECOND / 25;
/// 一帧的时长 (90kHz)
pub const FRAME_90K: i64 = 3600;
/// MPEG 文件的起始 PTS (90kHz), 1 秒
pub const START_90K: i64 = 90_000;

pub fn is_keyframe(i: usize) -> bool {
    i % 10 == 0
}

pub fn open_memory(data: Vec<u8>, filename: &str) -> MuxedStream {
    let registry = FormatRegistry::with_all();
    let io = IoContext::from_memory(data);
    MuxedStream::open_io(&registry, io, Some(filename), &DemuxConfig::default())
        .expect("打开内存文件失败")
}

// ============================================================
// Matroska
// ============================================================

fn element(id: u32, body: &[u8]) -> Vec<u8> {
    let mut out = encode_element_id(id);
    out.extend(encode_vint(body.len() as u64));
    out.extend_from_slice(body);
    out
}

fn uint_element(id: u32, value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    element(id, &bytes[skip..])
}

fn float_element(id: u32, value: f64) -> Vec<u8> {
    element(id, &value.to_be_bytes())
}

fn simple_block(track: u8, delta: i16, keyframe: bool, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![0x80 | track];
    body.extend_from_slice(&delta.to_be_bytes());
    body.push(if keyframe { 0x80 } else { 0 });
    body.extend_from_slice(payload);
    element(SIMPLE_BLOCK, &body)
}

/// H.264 视频 (轨道 1) + MP3 音频 (轨道 2), 每 10 帧一个簇, 无 Cues
pub fn mkv_file(frames: usize) -> Vec<u8> {
    let mut info = uint_element(INFO_TIMECODE_SCALE, 1_000_000);
    info.extend(float_element(INFO_DURATION, frames as f64 * 40.0));
    info.extend(element(INFO_TITLE, b"liu test"));
    let info = element(SEGMENT_INFO, &info);

    let mut video = uint_element(TRACK_NUMBER, 1);
    video.extend(uint_element(TRACK_TYPE, 1));
    video.extend(element(TRACK_CODEC_ID, b"V_MPEG4/ISO/AVC"));
    video.extend(uint_element(TRACK_DEFAULT_DURATION, 40_000_000));
    video.extend(element(
        VIDEO_SETTINGS,
        &[uint_element(VIDEO_PIXEL_WIDTH, 320), uint_element(VIDEO_PIXEL_HEIGHT, 240)].concat(),
    ));
    let mut audio = uint_element(TRACK_NUMBER, 2);
    audio.extend(uint_element(TRACK_TYPE, 2));
    audio.extend(element(TRACK_CODEC_ID, b"A_MPEG/L3"));
    audio.extend(element(TRACK_LANGUAGE, b"chi"));
    audio.extend(element(
        AUDIO_SETTINGS,
        &[float_element(AUDIO_SAMPLING_FREQ, 48000.0), uint_element(AUDIO_CHANNELS, 2)].concat(),
    ));
    let tracks = element(
        TRACKS,
        &[element(TRACK_ENTRY, &video), element(TRACK_ENTRY, &audio)].concat(),
    );

    let mut body = info;
    body.extend(tracks);
    for start in (0..frames).step_by(10) {
        let mut blocks = uint_element(CLUSTER_TIMECODE, start as u64 * 40);
        for i in start..frames.min(start + 10) {
            let delta = ((i - start) * 40) as i16;
            blocks.extend(simple_block(1, delta, is_keyframe(i), &vec![i as u8; 200 + i % 13]));
            blocks.extend(simple_block(2, delta, true, &[0xFF, 0xFB, 0x90, 0x00]));
        }
        body.extend(element(CLUSTER, &blocks));
    }

    let mut data = element(EBML_HEADER, &element(EBML_DOC_TYPE, b"matroska"));
    data.extend(element(SEGMENT, &body));
    data
}

// ============================================================
// MPEG-TS / MPEG-PS
// ============================================================

const TS_PACKET_SIZE: usize = 188;
pub const PMT_PID: u16 = 0x100;
pub const VIDEO_PID: u16 = 0x101;
pub const AUDIO_PID: u16 = 0x102;

fn write_timestamp(prefix: u8, ts: i64) -> [u8; 5] {
    [
        (prefix << 4) | ((((ts >> 30) & 0x07) as u8) << 1) | 1,
        (ts >> 22) as u8,
        ((((ts >> 15) & 0x7F) as u8) << 1) | 1,
        (ts >> 7) as u8,
        (((ts & 0x7F) as u8) << 1) | 1,
    ]
}

/// MPEG-2 PES 包
pub fn pes(stream_id: u8, pts: Option<i64>, dts: Option<i64>, data: &[u8]) -> Vec<u8> {
    let mut opt = Vec::new();
    let flags = match (pts, dts) {
        (Some(p), Some(d)) => {
            opt.extend(write_timestamp(0b0011, p));
            opt.extend(write_timestamp(0b0001, d));
            0xC0
        }
        (Some(p), None) => {
            opt.extend(write_timestamp(0b0010, p));
            0x80
        }
        _ => 0x00,
    };
    let len = 3 + opt.len() + data.len();
    let mut out = vec![0, 0, 1, stream_id, (len >> 8) as u8, len as u8, 0x84, flags];
    out.push(opt.len() as u8);
    out.extend(opt);
    out.extend_from_slice(data);
    out
}

/// TS 包; 负载不足 184 字节时用适配域填充. `pcr` 为 27MHz
fn ts_packet(
    pid: u16,
    pusi: bool,
    cc: u8,
    random_access: bool,
    pcr: Option<i64>,
    payload: &[u8],
) -> Vec<u8> {
    let mut pkt = vec![
        0x47,
        if pusi { 0x40 } else { 0x00 } | ((pid >> 8) as u8 & 0x1F),
        pid as u8,
        0,
    ];
    let needs_af = random_access || pcr.is_some() || payload.len() < 184;
    if !needs_af {
        pkt[3] = 0x10 | cc;
        pkt.extend_from_slice(payload);
        return pkt;
    }
    let af_len = 183 - payload.len();
    let mut af = Vec::new();
    if af_len > 0 {
        let mut flags = if random_access { 0x40 } else { 0 };
        let mut pcr_bytes = Vec::new();
        if let Some(pcr) = pcr {
            flags |= 0x10;
            let (base, ext) = (pcr / 300, pcr % 300);
            pcr_bytes = vec![
                (base >> 25) as u8,
                (base >> 17) as u8,
                (base >> 9) as u8,
                (base >> 1) as u8,
                ((base & 1) << 7) as u8 | 0x7E | (ext >> 8) as u8,
                ext as u8,
            ];
        }
        af.push(flags);
        af.extend(pcr_bytes);
        af.resize(af_len, 0xFF);
    }
    pkt[3] = 0x30 | cc;
    pkt.push(af_len as u8);
    pkt.extend(af);
    pkt.extend_from_slice(payload);
    assert_eq!(pkt.len(), TS_PACKET_SIZE);
    pkt
}

/// 把一个 PES 切成 TS 包, 适配域只放在第一个包
fn pes_to_ts(
    pid: u16,
    cc: &mut u8,
    data: &[u8],
    random_access: bool,
    pcr: Option<i64>,
) -> Vec<u8> {
    let first_max = if random_access || pcr.is_some() {
        182 - if pcr.is_some() { 6 } else { 0 }
    } else {
        184
    };
    let mut out = Vec::new();
    let mut rest = data;
    let mut first = true;
    while first || !rest.is_empty() {
        let n = rest.len().min(if first { first_max } else { 184 });
        let (ra, p) = if first { (random_access, pcr) } else { (false, None) };
        out.extend(ts_packet(pid, first, *cc, ra, p, &rest[..n]));
        *cc = (*cc + 1) & 0x0F;
        rest = &rest[n..];
        first = false;
    }
    out
}

fn section(table_id: u8, ext: u16, body: &[u8]) -> Vec<u8> {
    let len = 5 + body.len() + 4;
    let mut s = vec![table_id, 0xB0 | (len >> 8) as u8, len as u8, (ext >> 8) as u8, ext as u8];
    s.extend([0xC1, 0, 0]);
    s.extend_from_slice(body);
    let crc = crc32_mpeg2(&s);
    s.extend_from_slice(&crc.to_be_bytes());
    s
}

fn psi_packet(pid: u16, section: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8];
    data.extend_from_slice(section);
    ts_packet(pid, true, 0, false, None, &data)
}

/// PAT + PMT (H.264 + AAC) + `frames` 组音视频 PES, 视频带 PCR
pub fn ts_file(frames: usize) -> Vec<u8> {
    let mut pat = Vec::new();
    pat.extend_from_slice(&1u16.to_be_bytes());
    pat.extend_from_slice(&(0xE000 | PMT_PID).to_be_bytes());
    let mut out = psi_packet(0, &section(0x00, 1, &pat));

    let mut pmt = Vec::new();
    pmt.extend_from_slice(&(0xE000 | VIDEO_PID).to_be_bytes());
    pmt.extend_from_slice(&[0xF0, 0x00]);
    for (stream_type, pid) in [(0x1B, VIDEO_PID), (0x0F, AUDIO_PID)] {
        pmt.push(stream_type);
        pmt.extend_from_slice(&(0xE000 | pid).to_be_bytes());
        pmt.extend_from_slice(&[0xF0, 0x00]);
    }
    out.extend(psi_packet(PMT_PID, &section(0x02, 1, &pmt)));

    let (mut cc_v, mut cc_a) = (0, 0);
    for i in 0..frames {
        let pts = START_90K + i as i64 * FRAME_90K;
        let video = pes(0xE0, Some(pts), None, &vec![i as u8; 300 + i % 11]);
        out.extend(pes_to_ts(VIDEO_PID, &mut cc_v, &video, is_keyframe(i), Some(pts * 300)));
        let audio = pes(0xC0, Some(pts), None, &[0xA0; 100]);
        out.extend(pes_to_ts(AUDIO_PID, &mut cc_a, &audio, false, None));
    }
    out
}

fn pack_header(scr_90k: i64) -> Vec<u8> {
    let s = scr_90k;
    let rate = 25_200u32;
    vec![
        0,
        0,
        1,
        0xBA,
        0x44 | (((s >> 30) & 0x07) << 3) as u8 | ((s >> 28) & 0x03) as u8,
        (s >> 20) as u8,
        ((((s >> 15) & 0x1F) << 3) as u8) | 0x04 | ((s >> 13) & 0x03) as u8,
        (s >> 5) as u8,
        (((s & 0x1F) << 3) as u8) | 0x04,
        0x01,
        (rate >> 14) as u8,
        (rate >> 6) as u8,
        ((rate as u8 & 0x3F) << 2) | 0x03,
        0xF8,
    ]
}

/// 352x288 25fps MPEG-2 序列头
fn sequence_header() -> Vec<u8> {
    vec![0, 0, 1, 0xB3, 0x16, 0x01, 0x20, 0x23, 0x00, 0x00, 0x60, 0x00, 0, 0, 0, 0]
}

fn video_frame(i: usize) -> Vec<u8> {
    let mut data = Vec::new();
    if is_keyframe(i) {
        data.extend(sequence_header());
        data.extend([0, 0, 1, 0xB8, 0, 0, 0, 0]);
    }
    // 图像头 + 图像编码扩展 (帧图像)
    data.extend([0, 0, 1, 0x00, 0, 0, 0, 0]);
    data.extend([0, 0, 1, 0xB5, 0x8F, 0xFF, 0xF3, 0]);
    data
}

/// 48kHz 5.1 声道, 448kbps 的 AC-3 帧
pub fn ac3_frame() -> Vec<u8> {
    let mut f = vec![0x0B, 0x77, 0, 0, 30, 8 << 3, 0b1110_0001, 0];
    f.resize(1792, 0);
    f
}

/// MPEG-2 节目流: 每个 pack 一帧 MPEG-2 视频 + 一帧 AC-3 (私有流 1, 子流 0x80)
pub fn ps_file(frames: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..frames {
        let pts = START_90K + i as i64 * FRAME_90K;
        out.extend(pack_header(pts - 9000));
        out.extend(pes(0xE0, Some(pts + 3600), Some(pts), &video_frame(i)));
        let mut ac3 = vec![0x80, 1, 0, 1];
        ac3.extend(ac3_frame());
        out.extend(pes(0xBD, Some(pts), None, &ac3));
    }
    out.extend([0, 0, 1, 0xB9]);
    out
}

// ============================================================
// AVI
// ============================================================

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

fn strh(kind: &[u8; 4], rate: u32, length: u32, sample_size: u32) -> Vec<u8> {
    let mut d = vec![0u8; 56];
    d[0..4].copy_from_slice(kind);
    d[20..24].copy_from_slice(&1u32.to_le_bytes());
    d[24..28].copy_from_slice(&rate.to_le_bytes());
    d[32..36].copy_from_slice(&length.to_le_bytes());
    d[44..48].copy_from_slice(&sample_size.to_le_bytes());
    d
}

pub fn avi_video_payload(i: usize) -> Vec<u8> {
    vec![i as u8; 64 + i % 5]
}

/// 25fps H.264 + 8kHz 立体声 PCM 交织, 可选 idx1; 返回文件与每个数据块的头部位置
pub fn avi_file(frames: usize, with_index: bool) -> (Vec<u8>, Vec<u64>) {
    let mut out = Vec::new();
    let riff = begin_list(&mut out, b"RIFF", b"AVI ");
    let hdrl = begin_list(&mut out, b"LIST", b"hdrl");
    let mut avih = vec![0u8; 56];
    avih[0..4].copy_from_slice(&40_000u32.to_le_bytes());
    avih[16..20].copy_from_slice(&(frames as u32).to_le_bytes());
    avih[24..28].copy_from_slice(&2u32.to_le_bytes());
    chunk(&mut out, b"avih", &avih);

    let strl = begin_list(&mut out, b"LIST", b"strl");
    chunk(&mut out, b"strh", &strh(b"vids", 25, frames as u32, 0));
    let mut bi = vec![0u8; 40];
    bi[0..4].copy_from_slice(&40u32.to_le_bytes());
    bi[4..8].copy_from_slice(&320u32.to_le_bytes());
    bi[8..12].copy_from_slice(&240u32.to_le_bytes());
    bi[16..20].copy_from_slice(b"H264");
    chunk(&mut out, b"strf", &bi);
    end_list(&mut out, strl);

    let strl = begin_list(&mut out, b"LIST", b"strl");
    chunk(&mut out, b"strh", &strh(b"auds", 8000, (frames * 320) as u32, 4));
    let mut wf = vec![0u8; 18];
    wf[0..2].copy_from_slice(&1u16.to_le_bytes());
    wf[2..4].copy_from_slice(&2u16.to_le_bytes());
    wf[4..8].copy_from_slice(&8000u32.to_le_bytes());
    wf[8..12].copy_from_slice(&32000u32.to_le_bytes());
    wf[12..14].copy_from_slice(&4u16.to_le_bytes());
    wf[14..16].copy_from_slice(&16u16.to_le_bytes());
    chunk(&mut out, b"strf", &wf);
    end_list(&mut out, strl);
    end_list(&mut out, hdrl);

    let movi = begin_list(&mut out, b"LIST", b"movi");
    let base = movi + 8;
    let mut idx1 = Vec::new();
    let mut positions = Vec::new();
    for i in 0..frames {
        let key = is_keyframe(i);
        for (tag, body, flags) in [
            (b"00dc", avi_video_payload(i), if key { 0x10u32 } else { 0 }),
            (b"01wb", vec![0; 1280], 0x10),
        ] {
            positions.push(out.len() as u64);
            idx1.extend_from_slice(tag);
            idx1.extend(flags.to_le_bytes());
            idx1.extend(((out.len() - base) as u32).to_le_bytes());
            idx1.extend((body.len() as u32).to_le_bytes());
            chunk(&mut out, tag, &body);
        }
    }
    end_list(&mut out, movi);
    if with_index {
        chunk(&mut out, b"idx1", &idx1);
    }
    end_list(&mut out, riff);
    (out, positions)
}
