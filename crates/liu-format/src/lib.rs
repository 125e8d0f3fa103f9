//! # liu-format
//!
//! Liu 多媒体框架的解封装库.
//!
//! 负责把容器字节流拆成带 27MHz 时间戳的压缩数据包, 支持 Matroska, AVI,
//! MPEG-TS, MPEG-PS (含 DVD VOB) 以及 MPEG/AAC/AC-3/DTS 音频基本流.

pub mod config;
pub mod demuxer;
pub mod demuxers;
pub mod format_id;
pub mod io;
pub mod muxed;
pub mod probe;
pub mod registry;
pub mod stream;

// 重导出常用类型
pub use config::{AviConfig, DemuxConfig, MpegConfig};
pub use demuxer::Demuxer;
pub use format_id::FormatId;
pub use io::IoContext;
pub use muxed::MuxedStream;
pub use probe::ProbeResult;
pub use registry::FormatRegistry;
pub use stream::{AudioParams, Stream, StreamFlags, StreamParams, VideoParams};
