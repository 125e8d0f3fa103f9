//! 数据包 (Packet).
//!
//! 解封装器产出的最小调度单位. 除了携带压缩数据的 Data 包,
//! 还有三种控制包在同一条队列中流动:
//!
//! ```text
//! Packet
//! ├── Data   压缩数据 (1~4 个数据平面, PTS/DTS 位于 27MHz tick 域)
//! ├── Flush  清空下游缓冲 (discard=true 时丢弃, 否则排空)
//! ├── Still  静帧 (DVD 菜单等), 下游保持当前画面
//! └── Timer  时钟滴答
//! ```
//!
//! 数据平面是 `Bytes` 引用计数句柄, 向多个下游分发时只克隆句柄, 不复制数据.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use bytes::Bytes;

use crate::{LiuError, LiuResult};

/// 单个数据包最多的数据平面数 (平面视频 Y/U/V/A)
pub const MAX_PLANES: usize = 4;

bitflags! {
    /// 数据包标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// 关键帧 (可随机访问)
        const KEYFRAME        = 1 << 0;
        /// 与前一个包之间存在时间或数据不连续
        const DISCONTINUITY   = 1 << 1;
        /// 隔行视频顶场优先
        const TOP_FIELD_FIRST = 1 << 2;
    }
}

/// 携带压缩数据的数据包
#[derive(Clone)]
pub struct DataPacket {
    /// 所属流的索引
    pub stream_index: usize,
    /// 数据平面, 至少一个
    pub planes: Vec<Bytes>,
    /// 显示时间戳 (tick)
    pub pts: Option<i64>,
    /// 解码时间戳 (tick)
    pub dts: Option<i64>,
    /// 时长 (tick), 0 表示未知
    pub duration: i64,
    /// 标志位
    pub flags: PacketFlags,
    /// 在容器中的字节偏移量
    pub pos: Option<u64>,
    /// 生产者私有的附加数据
    pub opaque: Option<Arc<dyn Any + Send + Sync>>,
}

impl DataPacket {
    /// 从单个数据平面创建
    pub fn new(stream_index: usize, data: impl Into<Bytes>) -> Self {
        Self {
            stream_index,
            planes: vec![data.into()],
            pts: None,
            dts: None,
            duration: 0,
            flags: PacketFlags::empty(),
            pos: None,
            opaque: None,
        }
    }

    /// 从多个数据平面创建, 平面数须在 1..=MAX_PLANES
    pub fn with_planes(stream_index: usize, planes: Vec<Bytes>) -> LiuResult<Self> {
        if planes.is_empty() || planes.len() > MAX_PLANES {
            return Err(LiuError::InvalidArgument(format!(
                "数据平面数 {} 超出范围 1..={MAX_PLANES}",
                planes.len()
            )));
        }
        let mut pkt = Self::new(stream_index, Bytes::new());
        pkt.planes = planes;
        Ok(pkt)
    }

    /// 第一个数据平面
    pub fn data(&self) -> &Bytes {
        &self.planes[0]
    }

    /// 所有平面的总字节数
    pub fn size(&self) -> usize {
        self.planes.iter().map(Bytes::len).sum()
    }

    /// 是否为关键帧
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }

    /// 用于排序和调度的时间: 优先 DTS, 其次 PTS
    pub fn timestamp(&self) -> Option<i64> {
        self.dts.or(self.pts)
    }

    /// 设置时间戳
    pub fn with_pts(mut self, pts: Option<i64>, dts: Option<i64>) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    /// 设置标志位
    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags |= flags;
        self
    }
}

impl fmt::Debug for DataPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPacket")
            .field("stream_index", &self.stream_index)
            .field("size", &self.size())
            .field("planes", &self.planes.len())
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("duration", &self.duration)
            .field("flags", &self.flags)
            .field("pos", &self.pos)
            .field("opaque", &self.opaque.is_some())
            .finish()
    }
}

/// 调度单位
#[derive(Debug, Clone)]
pub enum Packet {
    /// 压缩数据
    Data(DataPacket),
    /// 清空下游缓冲; `stream_index` 为 None 时作用于所有流
    Flush {
        stream_index: Option<usize>,
        discard: bool,
    },
    /// 静帧, 下游保持当前输出直到后续数据到来
    Still { stream_index: Option<usize> },
    /// 时钟滴答 (tick)
    Timer { time: i64 },
}

impl Packet {
    /// 所属流; 作用于全部流的控制包返回 None
    pub fn stream_index(&self) -> Option<usize> {
        match self {
            Self::Data(d) => Some(d.stream_index),
            Self::Flush { stream_index, .. } | Self::Still { stream_index } => *stream_index,
            Self::Timer { .. } => None,
        }
    }

    /// 数据包 PTS
    pub fn pts(&self) -> Option<i64> {
        match self {
            Self::Data(d) => d.pts,
            _ => None,
        }
    }

    /// 取数据包引用
    pub fn as_data(&self) -> Option<&DataPacket> {
        match self {
            Self::Data(d) => Some(d),
            _ => None,
        }
    }

    /// 是否为控制包
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::Data(_))
    }
}

impl From<DataPacket> for Packet {
    fn from(d: DataPacket) -> Self {
        Self::Data(d)
    }
}
