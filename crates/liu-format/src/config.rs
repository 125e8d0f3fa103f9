//! 解封装配置.
//!
//! 各格式的可调参数集中在一个结构体里, 经由工厂函数传入解封装器.
//! 默认值沿用长期实践调出的经验数, 可从 JSON 覆盖:
//!
//! ```json
//! { "avi": { "max_scan": 65536, "noninterleaved": true }, "mpeg": { "probe_packets": 512 } }
//! ```

use serde::Deserialize;

/// 解封装配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DemuxConfig {
    /// AVI 参数
    pub avi: AviConfig,
    /// MPEG (TS/PS/基本流) 参数
    pub mpeg: MpegConfig,
}

/// AVI 解封装参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AviConfig {
    /// 借助索引向前跳过时最多跳过的块数
    pub max_skip: u32,
    /// 逐字节扫描的最大字节数
    pub max_scan: u64,
    /// 遇到坏块时回退重扫的字节数
    pub backup: u64,
    /// 非交织模式: 每条流只按自己的索引读取
    pub noninterleaved: bool,
    /// 所有时间戳的偏移 (tick)
    pub start_time: i64,
}

impl Default for AviConfig {
    fn default() -> Self {
        Self {
            max_skip: 16,
            max_scan: 1 << 20,
            backup: 16,
            noninterleaved: false,
            start_time: 0,
        }
    }
}

/// MPEG 解封装参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MpegConfig {
    /// 单个 PES 重组缓冲的上限, 以 64KiB 块计
    pub bufpool: usize,
    /// 强制按帧图像输出 (MPEG-2 成对的场图像合并为一个包)
    pub force_frame_pic: bool,
    /// 无 PSM 时被动发现流的前瞻包数
    pub probe_packets: usize,
    /// 同步丢失后最多跳过的字节数
    pub max_sync_skip: u64,
    /// 定位收敛容差 (tick)
    pub seek_tolerance: i64,
    /// 定位最多迭代次数
    pub seek_steps: u32,
}

impl Default for MpegConfig {
    fn default() -> Self {
        Self {
            bufpool: 64,
            force_frame_pic: false,
            probe_packets: 256,
            max_sync_skip: 1 << 20,
            seek_tolerance: liu_core::TICKS_PER_SECOND,
            seek_steps: 16,
        }
    }
}

impl DemuxConfig {
    /// 从 JSON 文本解析, 缺失字段使用默认值
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
