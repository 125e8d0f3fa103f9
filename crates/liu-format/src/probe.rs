//! 格式探测.
//!
//! 通过分析文件头部数据和文件扩展名识别容器格式.

use crate::format_id::FormatId;

/// 探测置信度, 数值越高越有把握
pub type ProbeScore = u32;

/// 仅扩展名匹配
pub const SCORE_EXTENSION: ProbeScore = 50;

/// 同步字匹配但只验证了一次
pub const SCORE_PARTIAL: ProbeScore = 75;

/// 魔数或多次同步完全匹配
pub const SCORE_MAX: ProbeScore = 100;

/// 探测结果
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// 识别出的格式
    pub format_id: FormatId,
    /// 置信度
    pub score: ProbeScore,
}

/// 格式探测器 trait
pub trait FormatProbe: Send + Sync {
    /// 根据文件头部数据探测格式, 不是此格式时返回 None
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore>;

    /// 此探测器对应的格式
    fn format_id(&self) -> FormatId;
}

/// 仅按扩展名给分, 供头部特征不明显的格式兜底
pub(crate) fn extension_score(format: FormatId, filename: Option<&str>) -> Option<ProbeScore> {
    let name = filename?;
    (FormatId::from_filename(name) == Some(format)).then_some(SCORE_EXTENSION)
}
