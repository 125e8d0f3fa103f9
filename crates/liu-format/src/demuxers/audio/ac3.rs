//! AC-3 / E-AC-3 同步帧头.
//!
//! 两者共用同步字 0x0B77, 由第 6 字节高 5 位的 bsid 区分:
//! bsid <= 10 为 AC-3, 11..=16 为 E-AC-3.

use liu_core::CodecId;
use liu_core::bitreader::BitReader;

use super::FrameInfo;

/// frmsizecod / 2 对应的码率 (kbps)
const BITRATES: [u32; 19] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 576, 640,
];

const SAMPLE_RATES: [u32; 3] = [48000, 44100, 32000];
/// E-AC-3 fscod=3 时的降半采样率
const REDUCED_SAMPLE_RATES: [u32; 3] = [24000, 22050, 16000];
/// numblkscod 对应的音频块数
const BLOCKS: [u32; 4] = [1, 2, 3, 6];
/// acmod 对应的全带宽声道数
const ACMOD_CHANNELS: [u16; 8] = [2, 1, 2, 3, 3, 4, 4, 5];

/// 解析后的帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ac3Header {
    pub eac3: bool,
    pub bsid: u8,
    pub sample_rate: u32,
    /// 含 LFE
    pub channels: u16,
    pub lfe: bool,
    /// 整帧字节数
    pub frame_size: usize,
    pub samples_per_frame: u32,
    pub bit_rate: u32,
}

impl Ac3Header {
    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            codec_id: if self.eac3 { CodecId::Eac3 } else { CodecId::Ac3 },
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples_per_frame: self.samples_per_frame,
            bit_rate: self.bit_rate,
            frame_size: self.frame_size,
        }
    }
}

/// AC-3 帧长 (字节), 44.1kHz 时奇数 frmsizecod 多一个字
fn ac3_frame_size(fscod: usize, frmsizecod: usize) -> usize {
    let kbps = BITRATES[frmsizecod / 2] as usize;
    let words = match fscod {
        0 => kbps * 2,
        1 => kbps * 1000 * 1536 / (44100 * 16) + (frmsizecod & 1),
        _ => kbps * 3,
    };
    words * 2
}

/// 解析 AC-3 或 E-AC-3 帧头
pub fn parse_header(data: &[u8]) -> Option<Ac3Header> {
    let head = data.get(..8)?;
    if head[0] != 0x0B || head[1] != 0x77 {
        return None;
    }
    let bsid = head[5] >> 3;
    match bsid {
        0..=10 => parse_ac3(head, bsid),
        11..=16 => parse_eac3(head, bsid),
        _ => None,
    }
}

fn parse_ac3(head: &[u8], bsid: u8) -> Option<Ac3Header> {
    let mut br = BitReader::new(head);
    br.skip(32).ok()?; // syncword + crc1
    let fscod = br.read(2).ok()? as usize;
    let frmsizecod = br.read(6).ok()? as usize;
    if fscod == 3 || frmsizecod >= 38 {
        return None;
    }
    br.skip(8).ok()?; // bsid + bsmod
    let acmod = br.read(3).ok()? as usize;
    if acmod & 1 == 1 && acmod != 1 {
        br.skip(2).ok()?; // cmixlev
    }
    if acmod & 4 != 0 {
        br.skip(2).ok()?; // surmixlev
    }
    if acmod == 2 {
        br.skip(2).ok()?; // dsurmod
    }
    let lfe = br.read_flag().ok()?;
    Some(Ac3Header {
        eac3: false,
        bsid,
        sample_rate: SAMPLE_RATES[fscod],
        channels: ACMOD_CHANNELS[acmod] + u16::from(lfe),
        lfe,
        frame_size: ac3_frame_size(fscod, frmsizecod),
        samples_per_frame: 1536,
        bit_rate: BITRATES[frmsizecod / 2] * 1000,
    })
}

fn parse_eac3(head: &[u8], bsid: u8) -> Option<Ac3Header> {
    let mut br = BitReader::new(head);
    br.skip(16).ok()?;
    let strmtyp = br.read(2).ok()?;
    if strmtyp == 3 {
        return None;
    }
    br.skip(3).ok()?; // substreamid
    let frmsiz = br.read(11).ok()? as usize;
    let fscod = br.read(2).ok()? as usize;
    let (sample_rate, blocks) = if fscod == 3 {
        let fscod2 = br.read(2).ok()? as usize;
        (*REDUCED_SAMPLE_RATES.get(fscod2)?, 6)
    } else {
        let numblkscod = br.read(2).ok()? as usize;
        (SAMPLE_RATES[fscod], BLOCKS[numblkscod])
    };
    let acmod = br.read(3).ok()? as usize;
    let lfe = br.read_flag().ok()?;

    let frame_size = (frmsiz + 1) * 2;
    let samples_per_frame = blocks * 256;
    let bit_rate =
        (frame_size as u64 * 8 * u64::from(sample_rate) / u64::from(samples_per_frame)) as u32;
    Some(Ac3Header {
        eac3: true,
        bsid,
        sample_rate,
        channels: ACMOD_CHANNELS[acmod] + u16::from(lfe),
        lfe,
        frame_size,
        samples_per_frame,
        bit_rate,
    })
}
