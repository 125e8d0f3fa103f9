//! 播放器事件.

use std::fmt;

use liu_pipeline::MediaFormat;

/// 播放器向外发布的状态变化
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// 流握手成功, 开始缓冲与消费
    ProbeOk {
        stream: usize,
        format: Option<MediaFormat>,
    },
    /// 流被拒绝或握手次数用尽
    ProbeFailed { stream: usize, reason: String },
    /// 流的全部数据已送入管线
    StreamEnded { stream: usize },
    /// 所有流结束
    End,
    /// 读取或处理出错
    Error(String),
    /// 时钟滴答 (tick)
    Tick { time: i64 },
    /// 队列与管线已清空
    Flushed,
    /// 定位完成
    Seeked { target: i64, actual: i64 },
}

impl fmt::Display for PlayerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProbeOk { stream, format } => match format {
                Some(fmt) => write!(f, "流 {stream} 握手成功 ({})", fmt.codec_id),
                None => write!(f, "流 {stream} 握手成功"),
            },
            Self::ProbeFailed { stream, reason } => write!(f, "流 {stream} 被拒绝: {reason}"),
            Self::StreamEnded { stream } => write!(f, "流 {stream} 结束"),
            Self::End => write!(f, "播放结束"),
            Self::Error(msg) => write!(f, "错误: {msg}"),
            Self::Tick { time } => write!(f, "滴答 {}", liu_core::timestamp::format_ticks(*time)),
            Self::Flushed => write!(f, "已清空"),
            Self::Seeked { target, actual } => write!(
                f,
                "定位 {} -> {}",
                liu_core::timestamp::format_ticks(*target),
                liu_core::timestamp::format_ticks(*actual)
            ),
        }
    }
}
