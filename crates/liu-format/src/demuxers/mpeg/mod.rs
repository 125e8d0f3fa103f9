//! MPEG 系统层公共部分 (TS 与 PS 共用).
//!
//! - [`pes`]: PES 包头 (MPEG-1 / MPEG-2 两种布局) 与 33 位时间戳
//! - [`descriptor`]: PMT / PSM 中的描述符
//! - [`video`]: MPEG-1/2 视频序列头与场图像合并

pub mod descriptor;
pub mod pes;
pub mod video;

use liu_core::{CodecId, MediaType};
use log::debug;

use self::descriptor::EsDescriptors;
use crate::demuxers::audio;
use crate::stream::Stream;

/// stream_type 转编码, 0x06 (私有数据) 等需借助描述符判定的返回 None
pub fn stream_type_to_codec(stream_type: u8) -> CodecId {
    match stream_type {
        // 视频
        0x01 => CodecId::Mpeg1Video,
        0x02 | 0x80 => CodecId::Mpeg2Video,
        0x10 => CodecId::Mpeg4,
        0x1B => CodecId::H264,
        0x24 => CodecId::H265,
        // 音频
        0x03 | 0x04 => CodecId::Mp2,
        0x0F | 0x11 => CodecId::Aac,
        0x81 => CodecId::Ac3,
        0x87 => CodecId::Eac3,
        0x82 | 0x86 | 0x8A => CodecId::Dts,
        _ => CodecId::None,
    }
}

/// 结合描述符确定编码
///
/// 描述符只在 stream_type 本身无法确定编码时生效 (0x06 私有数据,
/// 或 DVB 系统里复用的 ATSC 类型).
pub fn resolve_codec(stream_type: u8, desc: &EsDescriptors) -> CodecId {
    let by_type = stream_type_to_codec(stream_type);
    if by_type != CodecId::None && stream_type != 0x06 {
        return by_type;
    }
    if desc.eac3 {
        return CodecId::Eac3;
    }
    if desc.ac3 {
        return CodecId::Ac3;
    }
    if desc.dts {
        return CodecId::Dts;
    }
    if desc.aac {
        return CodecId::Aac;
    }
    if desc.dvb_subtitle {
        return CodecId::DvbSubtitle;
    }
    if let Some(reg) = desc.registration {
        match &reg {
            b"AC-3" => return CodecId::Ac3,
            b"EAC3" => return CodecId::Eac3,
            b"DTS1" | b"DTS2" | b"DTS3" => return CodecId::Dts,
            b"HEVC" => return CodecId::H265,
            b"VC-1" | b"drac" => return CodecId::None,
            _ => {}
        }
    }
    by_type
}

/// 用负载中的第一个帧补全流参数 (只填尚未知的字段)
///
/// MPEG 音频按帧头修正层 (stream_type 0x03/0x04 只说明是 MPEG 音频),
/// AC-3 流遇到 E-AC-3 帧时同样修正.
pub fn fill_params(stream: &mut Stream, data: &[u8]) {
    match stream.media_type() {
        MediaType::Audio => {
            if stream.audio_params().is_some_and(|a| a.sample_rate != 0) {
                return;
            }
            let Some(info) = audio::find_frame(stream.codec_id, data) else {
                return;
            };
            if info.codec_id != stream.codec_id {
                debug!("流 #{}: 编码按帧头修正为 {}", stream.index, info.codec_id);
                stream.codec_id = info.codec_id;
            }
            if stream.bit_rate == 0 {
                stream.bit_rate = u64::from(info.bit_rate);
            }
            if let Some(a) = stream.audio_params_mut() {
                a.sample_rate = info.sample_rate;
                a.channels = info.channels;
                a.samples_per_frame = info.samples_per_frame;
            }
        }
        MediaType::Video => {
            if !matches!(stream.codec_id, CodecId::Mpeg1Video | CodecId::Mpeg2Video) {
                return;
            }
            if stream.video_params().is_some_and(|v| v.width != 0) {
                return;
            }
            let Some(seq) = video::parse_sequence_header(data) else {
                return;
            };
            if stream.bit_rate == 0 {
                stream.bit_rate = seq.bit_rate;
            }
            if let Some(v) = stream.video_params_mut() {
                v.width = seq.width;
                v.height = seq.height;
                v.frame_rate = seq.frame_rate;
                v.aspect = seq.aspect;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_type映射() {
        assert_eq!(stream_type_to_codec(0x1B), CodecId::H264);
        assert_eq!(stream_type_to_codec(0x24), CodecId::H265);
        assert_eq!(stream_type_to_codec(0x0F), CodecId::Aac);
        assert_eq!(stream_type_to_codec(0x03), CodecId::Mp2);
        assert_eq!(stream_type_to_codec(0x81), CodecId::Ac3);
        assert_eq!(stream_type_to_codec(0x8A), CodecId::Dts);
        assert_eq!(stream_type_to_codec(0x06), CodecId::None);
    }

    #[test]
    fn test_私有数据靠描述符判定() {
        let desc = EsDescriptors {
            registration: Some(*b"DTS2"),
            ..Default::default()
        };
        assert_eq!(resolve_codec(0x06, &desc), CodecId::Dts);
        let desc = EsDescriptors {
            ac3: true,
            ..Default::default()
        };
        assert_eq!(resolve_codec(0x06, &desc), CodecId::Ac3);
        // stream_type 已明确时描述符不覆盖
        assert_eq!(resolve_codec(0x1B, &desc), CodecId::H264);
        assert_eq!(resolve_codec(0x06, &EsDescriptors::default()), CodecId::None);
    }

    #[test]
    fn test_补全音频参数并修正层() {
        let mut stream = Stream::new(0, CodecId::Mp2);
        let mut data = audio::mpa::tests::frame(9, 0, false);
        data.extend(audio::mpa::tests::frame(9, 0, false));
        fill_params(&mut stream, &data);
        assert_eq!(stream.codec_id, CodecId::Mp3);
        let a = stream.audio_params().unwrap();
        assert_eq!((a.sample_rate, a.channels), (44100, 2));
        assert_eq!(stream.bit_rate, 128_000);
    }

    #[test]
    fn test_补全视频参数() {
        let mut stream = Stream::new(0, CodecId::Mpeg2Video);
        fill_params(&mut stream, &video::tests::sequence_header());
        let v = stream.video_params().unwrap();
        assert_eq!((v.width, v.height), (352, 288));
        // 已知参数不会被覆盖
        let mut other = video::tests::sequence_header();
        other[4] = 0x2D;
        fill_params(&mut stream, &other);
        assert_eq!(stream.video_params().unwrap().width, 352);
    }
}
