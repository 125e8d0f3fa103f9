//! # liu-pipeline
//!
//! Liu 多媒体框架的处理级 (Stage) 抽象.
//!
//! 每条输出流对应一条线性管线, 数据包从头部依次流过各级. 每一级要么把包
//! 转交下一级, 要么丢弃它. 播放器在把流接入管线之前先用样本包与管线握手
//! (probe), 只有所有级都返回 [`ProbeStatus::Ok`] 后才开始缓冲与消费.
//!
//! ## 内置处理级
//!
//! - **选择**: [`MediaSelect`] (按媒体类型或编码接受/拒绝流)
//! - **整形**: [`KeyframeGate`] (关键帧之前的包丢弃), [`PtsInterpolator`] (补全缺失 PTS)
//! - **终点**: [`NullSink`] (统计后丢弃), [`CollectSink`] (保存全部包, 测试用)
//!
//! ## 使用示例
//!
//! ```rust
//! use liu_core::{CodecId, DataPacket, Packet};
//! use liu_format::Stream;
//! use liu_pipeline::{MediaFormat, NullSink, Pipeline, ProbeStatus};
//!
//! let (sink, stats) = NullSink::new();
//! let mut pipeline = Pipeline::new();
//! pipeline.push(Box::new(sink));
//!
//! let stream = Stream::new(0, CodecId::Mp3);
//! let sample = DataPacket::new(0, vec![0u8; 4]);
//! assert_eq!(pipeline.probe(&sample, &MediaFormat::from(&stream)), ProbeStatus::Ok);
//! pipeline.input(Packet::Data(sample)).unwrap();
//! assert_eq!(stats.snapshot().packets, 1);
//! ```

pub mod stages;

use std::fmt;

use liu_core::{CodecId, DataPacket, LiuError, LiuResult, MediaType, Packet};
use liu_format::stream::{Stream, StreamParams};
use log::debug;

/// 握手结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// 接受该格式, 输出格式已确定
    Ok,
    /// 还需要更多样本, 样本包保留
    Again,
    /// 拒绝该流
    Fail,
    /// 样本包不可用, 丢弃后继续握手
    Discard,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::Again => "again",
            Self::Fail => "fail",
            Self::Discard => "discard",
        };
        write!(f, "{name}")
    }
}

/// 处理级之间协商的格式
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFormat {
    /// 流索引
    pub stream_index: usize,
    pub codec_id: CodecId,
    pub params: StreamParams,
}

impl MediaFormat {
    pub fn media_type(&self) -> MediaType {
        self.codec_id.media_type()
    }
}

impl From<&Stream> for MediaFormat {
    fn from(stream: &Stream) -> Self {
        Self {
            stream_index: stream.index,
            codec_id: stream.codec_id,
            params: stream.params.clone(),
        }
    }
}

/// 处理级 trait
///
/// 输出格式只在 `probe` 返回 Ok 之后有效.
pub trait Stage: Send {
    /// 处理级名称
    fn name(&self) -> &str;

    /// 用样本包与上游给出的格式握手
    fn probe(&mut self, sample: &DataPacket, hint: &MediaFormat) -> ProbeStatus;

    /// 协商后的输出格式, 握手完成前为 None
    fn output_format(&self) -> Option<&MediaFormat>;

    /// 开始处理
    fn start(&mut self) -> LiuResult<()> {
        Ok(())
    }

    /// 停止处理
    fn stop(&mut self) -> LiuResult<()> {
        Ok(())
    }

    /// 送入一个包
    fn input(&mut self, packet: Packet) -> LiuResult<()>;

    /// 取出一个待转交下一级的包, 没有时返回 NeedMoreData
    fn output(&mut self) -> LiuResult<Packet>;

    /// 清空内部缓存; `discard` 为 false 时缓存的包仍会从 `output` 取出
    fn flush(&mut self, discard: bool) -> LiuResult<()>;
}

/// 线性管线
///
/// 由若干处理级组成, 前一级的输出作为后一级的输入.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    /// 已握手成功的级数
    probed: usize,
    started: bool,
}

impl Pipeline {
    /// 创建空管线
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            probed: 0,
            started: false,
        }
    }

    /// 追加处理级到末尾
    pub fn push(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    /// 链式追加
    pub fn with(mut self, stage: Box<dyn Stage>) -> Self {
        self.push(stage);
        self
    }

    /// 处理级数量
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 处理级名称列表 (调试用)
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// 依次与各级握手
    ///
    /// 已返回 Ok 的级不再重复握手, 后一级收到前一级的输出格式.
    /// 空管线不接受任何流.
    pub fn probe(&mut self, sample: &DataPacket, hint: &MediaFormat) -> ProbeStatus {
        if self.stages.is_empty() {
            return ProbeStatus::Fail;
        }
        while self.probed < self.stages.len() {
            let upstream = match self.probed {
                0 => hint.clone(),
                i => match self.stages[i - 1].output_format() {
                    Some(f) => f.clone(),
                    None => hint.clone(),
                },
            };
            let stage = &mut self.stages[self.probed];
            let status = stage.probe(sample, &upstream);
            debug!(
                "管线握手: 流 {} 第 {} 级 '{}' -> {status}",
                hint.stream_index,
                self.probed,
                stage.name()
            );
            if status != ProbeStatus::Ok {
                return status;
            }
            self.probed += 1;
        }
        ProbeStatus::Ok
    }

    /// 是否已完成握手
    pub fn is_probed(&self) -> bool {
        !self.stages.is_empty() && self.probed == self.stages.len()
    }

    /// 最后一级的输出格式
    pub fn output_format(&self) -> Option<&MediaFormat> {
        if !self.is_probed() {
            return None;
        }
        self.stages.last().and_then(|s| s.output_format())
    }

    /// 启动所有级, 须在握手完成之后
    pub fn start(&mut self) -> LiuResult<()> {
        if !self.is_probed() {
            return Err(LiuError::InvalidArgument("管线尚未完成握手".into()));
        }
        for stage in &mut self.stages {
            stage.start()?;
        }
        self.started = true;
        Ok(())
    }

    /// 停止所有级 (从尾到头)
    pub fn stop(&mut self) -> LiuResult<()> {
        if !self.started {
            return Ok(());
        }
        for stage in self.stages.iter_mut().rev() {
            stage.stop()?;
        }
        self.started = false;
        Ok(())
    }

    /// 送入一个包, 返回从最后一级流出的包
    pub fn input(&mut self, packet: Packet) -> LiuResult<Vec<Packet>> {
        self.feed(0, vec![packet])
    }

    /// 从第 `from` 级开始推送一批包
    fn feed(&mut self, from: usize, mut batch: Vec<Packet>) -> LiuResult<Vec<Packet>> {
        for stage in &mut self.stages[from..] {
            let mut next = Vec::new();
            for packet in batch {
                stage.input(packet)?;
                drain(stage.as_mut(), &mut next)?;
            }
            batch = next;
            if batch.is_empty() {
                break;
            }
        }
        Ok(batch)
    }

    /// 清空所有级
    ///
    /// `discard` 为 false 时各级缓存的包继续流向下游.
    pub fn flush(&mut self, discard: bool) -> LiuResult<Vec<Packet>> {
        let mut tail = Vec::new();
        for i in 0..self.stages.len() {
            self.stages[i].flush(discard)?;
            let mut pending = Vec::new();
            drain(self.stages[i].as_mut(), &mut pending)?;
            if pending.is_empty() {
                continue;
            }
            if i + 1 == self.stages.len() {
                tail.extend(pending);
            } else {
                tail.extend(self.feed(i + 1, pending)?);
            }
        }
        Ok(tail)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.names())
            .field("probed", &self.probed)
            .field("started", &self.started)
            .finish()
    }
}

/// 取出某一级当前所有输出
fn drain(stage: &mut dyn Stage, out: &mut Vec<Packet>) -> LiuResult<()> {
    loop {
        match stage.output() {
            Ok(packet) => out.push(packet),
            Err(LiuError::NeedMoreData) | Err(LiuError::Eof) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

// 便捷重导出
pub use stages::collect::{CollectHandle, CollectSink};
pub use stages::gate::KeyframeGate;
pub use stages::interp::PtsInterpolator;
pub use stages::null::{NullSink, SinkStats, StatsHandle};
pub use stages::select::MediaSelect;
