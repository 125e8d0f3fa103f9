//! DTS 核心帧头, 支持四种字节布局.
//!
//! | 布局 | 同步字 |
//! |------|--------|
//! | 16 位大端 | `7F FE 80 01` |
//! | 16 位小端 | `FE 7F 01 80` |
//! | 14 位大端 | `1F FF E8 00 07 Fx` |
//! | 14 位小端 | `FF 1F 00 E8 Fx 07` |
//!
//! 14 位布局每个 16 位字只携带低 14 位有效数据, 先重新打包成 16 位大端
//! 比特流再按同一套语法解析.

use liu_core::CodecId;
use liu_core::bitreader::BitReader;

use super::FrameInfo;

/// 解析帧头需要的原始字节数 (14 位布局最长)
pub const HEADER_RAW_LEN: usize = 16;

/// 采样率表, 0 为非法
const SAMPLE_RATES: [u32; 16] = [
    0, 8000, 16000, 32000, 0, 0, 11025, 22050, 44100, 0, 0, 12000, 24000, 48000, 0, 0,
];

/// 码率表 (kbps), 下标 29 之后为 open/variable/lossless
const BITRATES: [u32; 29] = [
    32, 56, 64, 96, 112, 128, 192, 224, 256, 320, 384, 448, 512, 576, 640, 768, 960, 1024, 1152,
    1280, 1344, 1408, 1411, 1472, 1536, 1920, 2048, 3072, 3840,
];

/// AMODE 对应的声道数 (不含 LFE)
const AMODE_CHANNELS: [u16; 16] = [1, 2, 2, 2, 2, 3, 3, 4, 4, 5, 6, 6, 6, 7, 8, 8];

/// 字节布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtsLayout {
    Be16,
    Le16,
    Be14,
    Le14,
}

impl DtsLayout {
    pub fn is_14bit(self) -> bool {
        matches!(self, Self::Be14 | Self::Le14)
    }
}

/// 解析后的帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtsHeader {
    pub layout: DtsLayout,
    pub sample_rate: u32,
    /// 含 LFE
    pub channels: u16,
    pub lfe: bool,
    pub samples_per_frame: u32,
    /// 原始布局下的整帧字节数
    pub frame_size: usize,
    /// bit/s
    pub bit_rate: u32,
}

impl DtsHeader {
    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            codec_id: CodecId::Dts,
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples_per_frame: self.samples_per_frame,
            bit_rate: self.bit_rate,
            frame_size: self.frame_size,
        }
    }
}

/// 识别同步字对应的布局
pub fn detect_layout(data: &[u8]) -> Option<DtsLayout> {
    match data.get(..6)? {
        [0x7F, 0xFE, 0x80, 0x01, ..] => Some(DtsLayout::Be16),
        [0xFE, 0x7F, 0x01, 0x80, ..] => Some(DtsLayout::Le16),
        [0x1F, 0xFF, 0xE8, 0x00, 0x07, b] if b & 0xF0 == 0xF0 => Some(DtsLayout::Be14),
        [0xFF, 0x1F, 0x00, 0xE8, b, 0x07] if b & 0xF0 == 0xF0 => Some(DtsLayout::Le14),
        _ => None,
    }
}

/// 把任意布局的数据转为 16 位大端比特流, 尾部不足一个字的字节被丢弃
pub fn to_be16(layout: DtsLayout, raw: &[u8]) -> Vec<u8> {
    let words = raw.chunks_exact(2);
    match layout {
        DtsLayout::Be16 => raw.to_vec(),
        DtsLayout::Le16 => words.flat_map(|w| [w[1], w[0]]).collect(),
        DtsLayout::Be14 | DtsLayout::Le14 => {
            let mut out = Vec::with_capacity(raw.len() * 7 / 8);
            let mut acc = 0u32;
            let mut bits = 0u32;
            for w in words {
                let word = if layout == DtsLayout::Be14 {
                    u16::from_be_bytes([w[0], w[1]])
                } else {
                    u16::from_le_bytes([w[0], w[1]])
                };
                acc = (acc << 14) | u32::from(word & 0x3FFF);
                bits += 14;
                while bits >= 8 {
                    bits -= 8;
                    out.push((acc >> bits) as u8);
                }
                acc &= (1 << bits) - 1;
            }
            out
        }
    }
}

/// 解析 DTS 核心帧头
pub fn parse_header(data: &[u8]) -> Option<DtsHeader> {
    let layout = detect_layout(data)?;
    let raw = data.get(..HEADER_RAW_LEN)?;
    let be = to_be16(layout, raw);

    let mut br = BitReader::new(&be);
    br.skip(32).ok()?; // sync
    br.skip(1 + 5 + 1).ok()?; // FTYPE SHORT CPF
    let nblks = br.read(7).ok()?;
    let fsize = br.read(14).ok()? as usize;
    let amode = br.read(6).ok()? as usize;
    let sfreq = br.read(4).ok()? as usize;
    let rate = br.read(5).ok()? as usize;
    br.skip(5 + 3 + 1 + 1).ok()?; // MIX DYNF TIMEF AUXF HDCD EXT_AUDIO_ID EXT_AUDIO ASPF
    let lff = br.read(2).ok()?;

    if nblks < 5 || fsize < 95 || amode >= AMODE_CHANNELS.len() || lff == 3 {
        return None;
    }
    let sample_rate = SAMPLE_RATES[sfreq];
    if sample_rate == 0 {
        return None;
    }
    let samples_per_frame = (nblks + 1) * 32;
    let frame_size = if layout.is_14bit() {
        (fsize + 1) * 16 / 14
    } else {
        fsize + 1
    };
    let bit_rate = match BITRATES.get(rate) {
        Some(kbps) => kbps * 1000,
        None => (frame_size as u64 * 8 * u64::from(sample_rate) / u64::from(samples_per_frame))
            as u32,
    };
    let lfe = lff != 0;
    Some(DtsHeader {
        layout,
        sample_rate,
        channels: AMODE_CHANNELS[amode] + u16::from(lfe),
        lfe,
        samples_per_frame,
        frame_size,
        bit_rate,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    struct BitWriter {
        out: Vec<u8>,
        acc: u64,
        bits: u32,
    }

    impl BitWriter {
        fn new() -> Self {
            Self { out: Vec::new(), acc: 0, bits: 0 }
        }

        fn put(&mut self, n: u32, v: u32) {
            self.acc = (self.acc << n) | u64::from(v);
            self.bits += n;
            while self.bits >= 8 {
                self.bits -= 8;
                self.out.push((self.acc >> self.bits) as u8);
            }
        }

        fn finish(mut self) -> Vec<u8> {
            if self.bits > 0 {
                let pad = 8 - self.bits;
                self.put(pad, 0);
            }
            self.out
        }
    }

    /// 16 位大端帧: 512 采样, 48kHz, 5.1, 1536kbps
    pub(crate) fn be16_frame(frame_size: usize) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put(32, 0x7FFE_8001);
        w.put(1, 1); // FTYPE
        w.put(5, 31); // SHORT
        w.put(1, 0); // CPF
        w.put(7, 15); // NBLKS
        w.put(14, frame_size as u32 - 1);
        w.put(6, 9); // AMODE
        w.put(4, 13); // SFREQ
        w.put(5, 24); // RATE
        w.put(10, 0);
        w.put(2, 1); // LFF
        let mut f = w.finish();
        f.resize(frame_size, 0);
        f
    }

    /// 16 位大端转 14 位 (符号扩展到 16 位字)
    pub(crate) fn to_14bit(be16: &[u8], little_endian: bool) -> Vec<u8> {
        let mut out = Vec::new();
        let mut acc = 0u64;
        let mut bits = 0u32;
        for &b in be16 {
            acc = (acc << 8) | u64::from(b);
            bits += 8;
            while bits >= 14 {
                bits -= 14;
                let mut word = ((acc >> bits) & 0x3FFF) as u16;
                if word & 0x2000 != 0 {
                    word |= 0xC000;
                }
                if little_endian {
                    out.extend(word.to_le_bytes());
                } else {
                    out.extend(word.to_be_bytes());
                }
            }
        }
        out
    }

    #[test]
    fn test_16位大端() {
        let f = be16_frame(1024);
        let h = parse_header(&f).unwrap();
        assert_eq!(h.layout, DtsLayout::Be16);
        assert_eq!(h.sample_rate, 48000);
        assert_eq!(h.samples_per_frame, 512);
        assert_eq!(h.frame_size, 1024);
        assert_eq!(h.channels, 6);
        assert_eq!(h.bit_rate, 1_536_000);
    }

    #[test]
    fn test_四种布局解析一致() {
        let be = be16_frame(1792);
        let le: Vec<u8> = be.chunks(2).flat_map(|w| [w[1], w[0]]).collect();
        let be14 = to_14bit(&be, false);
        let le14 = to_14bit(&be, true);
        assert_eq!(&be14[..4], &[0x1F, 0xFF, 0xE8, 0x00]);
        assert_eq!(&le14[..4], &[0xFF, 0x1F, 0x00, 0xE8]);

        let reference = parse_header(&be).unwrap();
        for (data, layout) in [
            (&le, DtsLayout::Le16),
            (&be14, DtsLayout::Be14),
            (&le14, DtsLayout::Le14),
        ] {
            let h = parse_header(data).unwrap();
            assert_eq!(h.layout, layout);
            assert_eq!(h.sample_rate, reference.sample_rate);
            assert_eq!(h.samples_per_frame, reference.samples_per_frame);
        }
        // 14 位布局的原始帧长按 16/14 放大
        assert_eq!(parse_header(&be14).unwrap().frame_size, 2048);
    }

    #[test]
    fn test_重新打包() {
        let be = be16_frame(1024);
        let be14 = to_14bit(&be[..14], false);
        assert_eq!(to_be16(DtsLayout::Be14, &be14), &be[..14]);
    }

    #[test]
    fn test_非法帧头() {
        let mut f = be16_frame(1024);
        f[4] = 0x80; // NBLKS 高位清零后 < 5
        f[5] = 0x00;
        assert!(parse_header(&f).is_none());
        assert!(parse_header(&[0x7F, 0xFE, 0x80, 0x01]).is_none());
        assert!(detect_layout(&[0x1F, 0xFF, 0xE8, 0x00, 0x07, 0x00]).is_none());
    }
}
