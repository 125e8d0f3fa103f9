//! 空终点: 统计后丢弃所有包.

use std::sync::Arc;

use liu_core::{DataPacket, LiuError, LiuResult, Packet, PacketFlags};
use parking_lot::Mutex;

use crate::{MediaFormat, ProbeStatus, Stage};

/// 终点统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// 数据包数
    pub packets: u64,
    /// 数据字节数
    pub bytes: u64,
    pub flushes: u64,
    pub stills: u64,
    pub timers: u64,
    pub first_pts: Option<i64>,
    pub last_pts: Option<i64>,
    /// 没有不连续标志却倒退的 PTS 次数
    pub pts_regressions: u64,
}

impl SinkStats {
    /// 记录一个数据包
    pub fn record(&mut self, pkt: &DataPacket) {
        self.packets += 1;
        self.bytes += pkt.size() as u64;
        let Some(pts) = pkt.pts else { return };
        if let Some(last) = self.last_pts {
            if pts < last && !pkt.flags.contains(PacketFlags::DISCONTINUITY) {
                self.pts_regressions += 1;
            }
        }
        self.first_pts.get_or_insert(pts);
        self.last_pts = Some(pts);
    }
}

/// 统计句柄, 可跨线程读取
#[derive(Debug, Clone, Default)]
pub struct StatsHandle(Arc<Mutex<SinkStats>>);

impl StatsHandle {
    /// 当前统计的快照
    pub fn snapshot(&self) -> SinkStats {
        self.0.lock().clone()
    }
}

/// 空终点
pub struct NullSink {
    stats: StatsHandle,
    format: Option<MediaFormat>,
}

impl NullSink {
    /// 创建终点及其统计句柄
    pub fn new() -> (Self, StatsHandle) {
        let stats = StatsHandle::default();
        let sink = Self {
            stats: stats.clone(),
            format: None,
        };
        (sink, stats)
    }
}

impl Stage for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn probe(&mut self, _sample: &DataPacket, hint: &MediaFormat) -> ProbeStatus {
        self.format = Some(hint.clone());
        ProbeStatus::Ok
    }

    fn output_format(&self) -> Option<&MediaFormat> {
        self.format.as_ref()
    }

    fn input(&mut self, packet: Packet) -> LiuResult<()> {
        let mut stats = self.stats.0.lock();
        match &packet {
            Packet::Data(d) => stats.record(d),
            Packet::Flush { .. } => {
                stats.flushes += 1;
                stats.last_pts = None;
            }
            Packet::Still { .. } => stats.stills += 1,
            Packet::Timer { .. } => stats.timers += 1,
        }
        Ok(())
    }

    fn output(&mut self) -> LiuResult<Packet> {
        Err(LiuError::NeedMoreData)
    }

    fn flush(&mut self, _discard: bool) -> LiuResult<()> {
        let mut stats = self.stats.0.lock();
        stats.flushes += 1;
        stats.last_pts = None;
        Ok(())
    }
}
