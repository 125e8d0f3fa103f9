//! 播放器配置.
//!
//! 时间量均为 tick (27MHz), `tick_interval` 为毫秒:
//!
//! ```json
//! { "buffer": 54000000, "max_packets": 512, "end_time": 270000000, "realtime": true }
//! ```

use liu_core::{LiuError, LiuResult, TICKS_PER_SECOND};
use serde::Deserialize;

/// 播放器配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 每条流缓冲的目标时长 (tick), 0 表示不按时长限制
    pub buffer: i64,
    /// 包数低水位
    pub min_packets: usize,
    /// 包数高水位, 也是队列容量
    pub max_packets: usize,
    /// 每条流最多握手次数
    pub max_probe: u32,
    /// 开始前定位到的时间 (容器时间, tick)
    pub start_time: Option<i64>,
    /// 相对起始时间的结束点 (tick), 之后的包丢弃
    pub end_time: Option<i64>,
    /// 时钟滴答间隔 (毫秒)
    pub tick_interval: u64,
    /// 按时钟节奏向管线送包
    pub realtime: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer: 2 * TICKS_PER_SECOND,
            min_packets: 4,
            max_packets: 256,
            max_probe: 32,
            start_time: None,
            end_time: None,
            tick_interval: 100,
            realtime: false,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文本解析, 缺失字段使用默认值
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// 检查取值是否自洽
    pub fn validate(&self) -> LiuResult<()> {
        if self.max_packets == 0 {
            return Err(LiuError::InvalidArgument("max_packets 不能为 0".into()));
        }
        if self.min_packets > self.max_packets {
            return Err(LiuError::InvalidArgument(format!(
                "min_packets ({}) 大于 max_packets ({})",
                self.min_packets, self.max_packets
            )));
        }
        if self.max_probe == 0 {
            return Err(LiuError::InvalidArgument("max_probe 不能为 0".into()));
        }
        if self.buffer < 0 {
            return Err(LiuError::InvalidArgument("buffer 不能为负".into()));
        }
        Ok(())
    }
}
