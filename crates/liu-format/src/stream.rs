//! 流描述.
//!
//! 每条流由公共头 (编码、私有数据、起始时间、码率、节目号等)
//! 与按媒体类型区分的参数组成:
//!
//! ```text
//! Stream
//! ├── 公共头: index / codec_id / codec_private / start_time / flags / bit_rate / program
//! └── params
//!     ├── Video     (frame_rate, width, height, aspect)
//!     ├── Audio     (sample_rate, channels, block_align, bits_per_sample)
//!     ├── Subtitle
//!     └── Multiplex
//! ```

use bitflags::bitflags;
use liu_core::{CodecId, MediaType, Rational};

bitflags! {
    /// 流标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StreamFlags: u32 {
        /// 容器标记为默认轨道
        const DEFAULT    = 1 << 0;
        /// 强制显示 (字幕)
        const FORCED     = 1 << 1;
        /// 可变码率
        const VBR        = 1 << 2;
        /// 时间戳由容器按帧推算, 而非逐包携带
        const GENERATED_PTS = 1 << 3;
    }
}

/// 流描述
#[derive(Debug, Clone)]
pub struct Stream {
    /// 流索引 (从 0 开始连续编号)
    pub index: usize,
    /// 编码标识
    pub codec_id: CodecId,
    /// 编码私有数据 (SPS/PPS, Vorbis 头, AudioSpecificConfig 等)
    pub codec_private: Vec<u8>,
    /// 起始时间 (tick)
    pub start_time: Option<i64>,
    /// 时长 (tick)
    pub duration: Option<i64>,
    /// 标志
    pub flags: StreamFlags,
    /// 码率 (bps, 0 表示未知)
    pub bit_rate: u64,
    /// 节目号 (TS) 或容器内原始编号 (MKV 轨道号, PS stream id)
    pub program: u32,
    /// 语言 (ISO 639-2)
    pub language: Option<String>,
    /// 总帧数 (0 表示未知)
    pub nb_frames: u64,
    /// 元数据
    pub metadata: Vec<(String, String)>,
    /// 媒体类型相关参数
    pub params: StreamParams,
}

/// 媒体类型相关参数
#[derive(Debug, Clone, PartialEq)]
pub enum StreamParams {
    /// 视频
    Video(VideoParams),
    /// 音频
    Audio(AudioParams),
    /// 字幕
    Subtitle,
    /// 复用流
    Multiplex,
}

/// 视频参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoParams {
    /// 帧率, 未知时为 UNDEFINED
    pub frame_rate: Rational,
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
    /// 显示宽高比, 未知时为 UNDEFINED
    pub aspect: Rational,
}

/// 音频参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioParams {
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道数
    pub channels: u16,
    /// 块对齐 (字节)
    pub block_align: u32,
    /// 采样位深
    pub bits_per_sample: u16,
    /// 每帧采样数 (0 表示未知)
    pub samples_per_frame: u32,
}

impl Stream {
    /// 按编码创建一条流, 参数按编码的媒体类型初始化为默认值
    pub fn new(index: usize, codec_id: CodecId) -> Self {
        let params = match codec_id.media_type() {
            MediaType::Video => StreamParams::Video(VideoParams::default()),
            MediaType::Audio => StreamParams::Audio(AudioParams::default()),
            MediaType::Subtitle => StreamParams::Subtitle,
            MediaType::Multiplex => StreamParams::Multiplex,
        };
        Self {
            index,
            codec_id,
            codec_private: Vec::new(),
            start_time: None,
            duration: None,
            flags: StreamFlags::empty(),
            bit_rate: 0,
            program: 0,
            language: None,
            nb_frames: 0,
            metadata: Vec::new(),
            params,
        }
    }

    /// 创建视频流
    pub fn video(index: usize, codec_id: CodecId, params: VideoParams) -> Self {
        Self {
            params: StreamParams::Video(params),
            ..Self::new(index, codec_id)
        }
    }

    /// 创建音频流
    pub fn audio(index: usize, codec_id: CodecId, params: AudioParams) -> Self {
        Self {
            params: StreamParams::Audio(params),
            ..Self::new(index, codec_id)
        }
    }

    /// 媒体类型
    pub fn media_type(&self) -> MediaType {
        match self.params {
            StreamParams::Video(_) => MediaType::Video,
            StreamParams::Audio(_) => MediaType::Audio,
            StreamParams::Subtitle => MediaType::Subtitle,
            StreamParams::Multiplex => MediaType::Multiplex,
        }
    }

    /// 视频参数
    pub fn video_params(&self) -> Option<&VideoParams> {
        match &self.params {
            StreamParams::Video(v) => Some(v),
            _ => None,
        }
    }

    /// 音频参数
    pub fn audio_params(&self) -> Option<&AudioParams> {
        match &self.params {
            StreamParams::Audio(a) => Some(a),
            _ => None,
        }
    }

    /// 音频参数 (可变)
    pub fn audio_params_mut(&mut self) -> Option<&mut AudioParams> {
        match &mut self.params {
            StreamParams::Audio(a) => Some(a),
            _ => None,
        }
    }

    /// 视频参数 (可变)
    pub fn video_params_mut(&mut self) -> Option<&mut VideoParams> {
        match &mut self.params {
            StreamParams::Video(v) => Some(v),
            _ => None,
        }
    }
}
