//! ADTS (Audio Data Transport Stream) 帧头.
//!
//! ```text
//! syncword(12)=0xFFF  ID(1)  layer(2)=0  protection_absent(1)
//! profile(2)  sf_index(4)  private(1)  channel_config(3)
//! original(1)  home(1)  copyright_id(1)  copyright_start(1)
//! frame_length(13)  buffer_fullness(11)  raw_data_blocks(2)
//! [crc(16)]
//! ```

use liu_core::CodecId;
use liu_core::bitreader::BitReader;

use super::FrameInfo;

/// ADTS 采样率表, 下标为 sampling_frequency_index
pub const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// 解析后的 ADTS 帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// 0=Main 1=LC 2=SSR 3=LTP
    pub profile: u8,
    pub sample_rate: u32,
    pub sf_index: u8,
    /// 0 表示由 PCE 描述
    pub channel_config: u8,
    /// 整帧字节数 (含帧头)
    pub frame_length: usize,
    /// 7 或 9 (带 CRC)
    pub header_len: usize,
    pub raw_data_blocks: u8,
}

impl AdtsHeader {
    pub fn channels(&self) -> u16 {
        match self.channel_config {
            7 => 8,
            c => u16::from(c),
        }
    }

    pub fn samples_per_frame(&self) -> u32 {
        1024 * (u32::from(self.raw_data_blocks) + 1)
    }

    /// 由帧头生成 2 字节 AudioSpecificConfig
    pub fn audio_specific_config(&self) -> [u8; 2] {
        let object_type = self.profile + 1;
        [
            (object_type << 3) | (self.sf_index >> 1),
            ((self.sf_index & 1) << 7) | (self.channel_config << 3),
        ]
    }

    pub fn info(&self) -> FrameInfo {
        let samples = self.samples_per_frame();
        let bit_rate = (self.frame_length as u64 * 8 * u64::from(self.sample_rate)
            / u64::from(samples)) as u32;
        FrameInfo {
            codec_id: CodecId::Aac,
            sample_rate: self.sample_rate,
            channels: self.channels(),
            samples_per_frame: samples,
            bit_rate,
            frame_size: self.frame_length,
        }
    }
}

/// 解析 ADTS 帧头
pub fn parse_header(data: &[u8]) -> Option<AdtsHeader> {
    let head = data.get(..7)?;
    let mut br = BitReader::new(head);
    if br.read(12).ok()? != 0xFFF {
        return None;
    }
    br.skip(1).ok()?; // ID
    if br.read(2).ok()? != 0 {
        return None;
    }
    let protection_absent = br.read_flag().ok()?;
    let profile: u8 = br.read_as(2).ok()?;
    let sf_index: u8 = br.read_as(4).ok()?;
    let sample_rate = *SAMPLE_RATES.get(usize::from(sf_index))?;
    br.skip(1).ok()?;
    let channel_config: u8 = br.read_as(3).ok()?;
    br.skip(4).ok()?;
    let frame_length = br.read(13).ok()? as usize;
    br.skip(11).ok()?;
    let raw_data_blocks: u8 = br.read_as(2).ok()?;

    let header_len = if protection_absent { 7 } else { 9 };
    if frame_length <= header_len {
        return None;
    }
    Some(AdtsHeader {
        profile,
        sample_rate,
        sf_index,
        channel_config,
        frame_length,
        header_len,
        raw_data_blocks,
    })
}
