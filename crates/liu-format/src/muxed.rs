//! 复用流句柄 (MuxedStream).
//!
//! 把解封装器、I/O 上下文和 "是否需要此流" 掩码绑在一起, 是播放器唯一
//! 接触的解封装接口. 未被使用的流的数据包在这里被直接丢弃.

use liu_core::{LiuError, LiuResult, Packet};

use crate::config::DemuxConfig;
use crate::demuxer::Demuxer;
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::registry::FormatRegistry;
use crate::stream::Stream;

/// 复用流句柄
pub struct MuxedStream {
    demuxer: Box<dyn Demuxer>,
    io: IoContext,
    used: Vec<bool>,
}

impl MuxedStream {
    /// 用已打开的解封装器创建, 所有流默认被使用
    pub fn new(demuxer: Box<dyn Demuxer>, io: IoContext) -> Self {
        let used = vec![true; demuxer.streams().len()];
        Self { demuxer, io, used }
    }

    /// 探测并打开 I/O 上下文
    pub fn open_io(
        registry: &FormatRegistry,
        mut io: IoContext,
        filename: Option<&str>,
        config: &DemuxConfig,
    ) -> LiuResult<Self> {
        let demuxer = registry.open_input(&mut io, filename, config)?;
        Ok(Self::new(demuxer, io))
    }

    /// 按路径或 URL 打开, 使用全部内置格式
    pub fn open(source: &str, config: &DemuxConfig) -> LiuResult<Self> {
        let registry = FormatRegistry::with_all();
        let io = IoContext::open(source)?;
        Self::open_io(&registry, io, Some(source), config)
    }

    /// 流表
    pub fn streams(&self) -> &[Stream] {
        self.demuxer.streams()
    }

    /// 流数量
    pub fn n_streams(&self) -> usize {
        self.demuxer.streams().len()
    }

    /// 格式标识
    pub fn format_id(&self) -> FormatId {
        self.demuxer.format_id()
    }

    /// 格式名称
    pub fn format_name(&self) -> &str {
        self.demuxer.name()
    }

    /// 总时长 (tick)
    pub fn duration(&self) -> Option<i64> {
        self.demuxer.duration()
    }

    /// 容器元数据
    pub fn metadata(&self) -> &[(String, String)] {
        self.demuxer.metadata()
    }

    /// 设置流是否被使用, 索引越界时报错
    pub fn set_used(&mut self, index: usize, used: bool) -> LiuResult<()> {
        // 部分格式 (PS 被动发现) 在读包过程中才新增流
        self.sync_used();
        let slot = self
            .used
            .get_mut(index)
            .ok_or(LiuError::StreamNotFound(index))?;
        *slot = used;
        Ok(())
    }

    /// 流是否被使用
    pub fn is_used(&self, index: usize) -> bool {
        self.used.get(index).copied().unwrap_or(true)
    }

    fn sync_used(&mut self) {
        let n = self.demuxer.streams().len();
        if self.used.len() < n {
            self.used.resize(n, true);
        }
    }

    /// 读取下一个包
    ///
    /// `filter` 为 Some 时只返回该流的数据包; 作用于全部流的控制包总会返回.
    pub fn next_packet(&mut self, filter: Option<usize>) -> LiuResult<Packet> {
        loop {
            let pkt = self.demuxer.read_packet(&mut self.io)?;
            self.sync_used();
            match pkt.stream_index() {
                None => return Ok(pkt),
                Some(idx) => {
                    if !self.is_used(idx) {
                        continue;
                    }
                    if filter.is_some_and(|f| f != idx) {
                        continue;
                    }
                    return Ok(pkt);
                }
            }
        }
    }

    /// 跳转到 `time` (tick), 返回实际落点
    pub fn seek(&mut self, time: i64) -> LiuResult<i64> {
        let actual = self.demuxer.seek(&mut self.io, time)?;
        log::info!(
            "{}: 定位 {} -> {}",
            self.demuxer.name(),
            liu_core::timestamp::format_ticks(time),
            liu_core::timestamp::format_ticks(actual)
        );
        Ok(actual)
    }
}
