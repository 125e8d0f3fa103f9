//! 解封装器实现模块.

pub mod audio;
pub mod avi;
pub mod mkv;
pub mod mpeg;
pub mod mpegps;
pub mod mpegts;
pub mod riff;

use crate::format_id::FormatId;
use crate::registry::FormatRegistry;

use audio::FrameKind;
use audio::{EsDemuxer, EsProbe};

/// 注册所有内置解封装器
pub fn register_all_demuxers(registry: &mut FormatRegistry) {
    registry.register_demuxer(FormatId::Matroska, "matroska", mkv::MkvDemuxer::create);
    registry.register_probe(Box::new(mkv::MkvProbe));

    registry.register_demuxer(FormatId::Avi, "avi", avi::AviDemuxer::create);
    registry.register_probe(Box::new(avi::AviProbe));

    registry.register_demuxer(FormatId::MpegTs, "mpegts", mpegts::TsDemuxer::create);
    registry.register_probe(Box::new(mpegts::TsProbe));

    registry.register_demuxer(FormatId::MpegPs, "mpegps", mpegps::PsDemuxer::create);
    registry.register_probe(Box::new(mpegps::PsProbe));

    registry.register_demuxer(FormatId::MpegAudio, "mpa", EsDemuxer::create_mpa);
    registry.register_probe(Box::new(EsProbe::new(FrameKind::Mpa)));

    registry.register_demuxer(FormatId::AacAdts, "aac", EsDemuxer::create_adts);
    registry.register_probe(Box::new(EsProbe::new(FrameKind::Adts)));

    registry.register_demuxer(FormatId::Ac3, "ac3", EsDemuxer::create_ac3);
    registry.register_probe(Box::new(EsProbe::new(FrameKind::Ac3)));

    registry.register_demuxer(FormatId::Dts, "dts", EsDemuxer::create_dts);
    registry.register_probe(Box::new(EsProbe::new(FrameKind::Dts)));
}
