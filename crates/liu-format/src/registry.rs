//! 容器格式注册表.
//!
//! 管理所有已注册的解封装器, 支持按格式标识创建和按内容自动探测.

use std::collections::HashMap;

use liu_core::{LiuError, LiuResult};

use crate::config::DemuxConfig;
use crate::demuxer::Demuxer;
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeResult};

/// 解封装器工厂函数类型
pub type DemuxerFactory = fn(&DemuxConfig) -> LiuResult<Box<dyn Demuxer>>;

/// 探测时读取的头部字节数
const PROBE_SIZE: usize = 64 * 1024;

/// 解封装器注册条目
struct DemuxerEntry {
    name: String,
    factory: DemuxerFactory,
}

/// 容器格式注册表
pub struct FormatRegistry {
    demuxers: HashMap<FormatId, DemuxerEntry>,
    probes: Vec<Box<dyn FormatProbe>>,
}

impl FormatRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            demuxers: HashMap::new(),
            probes: Vec::new(),
        }
    }

    /// 创建注册了全部内置格式的注册表
    pub fn with_all() -> Self {
        let mut registry = Self::new();
        crate::demuxers::register_all_demuxers(&mut registry);
        registry
    }

    /// 注册一个解封装器
    pub fn register_demuxer(
        &mut self,
        format_id: FormatId,
        name: impl Into<String>,
        factory: DemuxerFactory,
    ) {
        self.demuxers.insert(
            format_id,
            DemuxerEntry {
                name: name.into(),
                factory,
            },
        );
    }

    /// 注册一个格式探测器
    pub fn register_probe(&mut self, probe: Box<dyn FormatProbe>) {
        self.probes.push(probe);
    }

    /// 创建指定格式的解封装器实例
    pub fn create_demuxer(
        &self,
        format_id: FormatId,
        config: &DemuxConfig,
    ) -> LiuResult<Box<dyn Demuxer>> {
        let entry = self
            .demuxers
            .get(&format_id)
            .ok_or_else(|| LiuError::FormatNotFound(format!("未注册 {format_id} 的解封装器")))?;
        (entry.factory)(config)
    }

    /// 探测数据的容器格式, 返回置信度最高的结果
    pub fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeResult> {
        let mut best: Option<ProbeResult> = None;
        for probe in &self.probes {
            if let Some(score) = probe.probe(data, filename) {
                if best.as_ref().is_none_or(|b| score > b.score) {
                    best = Some(ProbeResult {
                        format_id: probe.format_id(),
                        score,
                    });
                }
            }
        }
        best
    }

    /// 已注册的解封装器名称
    pub fn list_demuxers(&self) -> Vec<(FormatId, &str)> {
        let mut list: Vec<_> = self
            .demuxers
            .iter()
            .map(|(id, entry)| (*id, entry.name.as_str()))
            .collect();
        list.sort_by_key(|(_, name)| *name);
        list
    }

    /// 探测输入格式, 完成后回到起始位置
    pub fn probe_input(&self, io: &mut IoContext, filename: Option<&str>) -> LiuResult<ProbeResult> {
        let start = io.position();
        let head = io.peek(PROBE_SIZE)?.to_vec();
        let result = self
            .probe(&head, filename)
            .ok_or_else(|| LiuError::FormatNotFound("无法识别输入格式".into()))?;
        log::debug!("探测结果: {} (score={})", result.format_id, result.score);
        if io.position() != start {
            io.seek(std::io::SeekFrom::Start(start))?;
        }
        Ok(result)
    }

    /// 自动探测格式, 创建对应解封装器并解析头部
    pub fn open_input(
        &self,
        io: &mut IoContext,
        filename: Option<&str>,
        config: &DemuxConfig,
    ) -> LiuResult<Box<dyn Demuxer>> {
        let result = self.probe_input(io, filename)?;
        let mut demuxer = self.create_demuxer(result.format_id, config)?;
        demuxer.open(io)?;
        log::info!(
            "已打开 {} 容器, {} 条流",
            demuxer.name(),
            demuxer.streams().len()
        );
        Ok(demuxer)
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
