//! PTS 补全.
//!
//! 容器常常只在部分包上携带时间戳 (PES 每帧不一定带 PTS, AVI/ES 按帧推算).
//! 本级用上一个包的 PTS 加时长补全缺失值, 包没有时长时使用按格式推算的
//! 帧时长.

use std::collections::VecDeque;

use liu_core::{DataPacket, LiuError, LiuResult, PacketFlags, Packet, TICKS_PER_SECOND};
use liu_format::stream::StreamParams;

use crate::{MediaFormat, ProbeStatus, Stage};

/// PTS 补全级
pub struct PtsInterpolator {
    format: Option<MediaFormat>,
    /// 按格式推算的帧时长 (tick), 0 表示未知
    frame_duration: i64,
    /// 下一个包的预期 PTS
    next_pts: Option<i64>,
    /// 补全的包数
    filled: u64,
    queue: VecDeque<Packet>,
}

impl PtsInterpolator {
    pub fn new() -> Self {
        Self {
            format: None,
            frame_duration: 0,
            next_pts: None,
            filled: 0,
            queue: VecDeque::new(),
        }
    }

    /// 已补全的包数
    pub fn filled(&self) -> u64 {
        self.filled
    }

    fn duration_of(format: &MediaFormat) -> i64 {
        match &format.params {
            StreamParams::Video(v) if v.frame_rate.is_valid() && v.frame_rate.num > 0 => {
                TICKS_PER_SECOND * v.frame_rate.den / v.frame_rate.num
            }
            StreamParams::Audio(a) if a.sample_rate > 0 && a.samples_per_frame > 0 => {
                TICKS_PER_SECOND * i64::from(a.samples_per_frame) / i64::from(a.sample_rate)
            }
            _ => 0,
        }
    }

    fn fill(&mut self, pkt: &mut DataPacket) {
        if pkt.pts.is_none() {
            if let Some(next) = self.next_pts {
                pkt.pts = Some(next);
                self.filled += 1;
            }
        }
        if pkt.flags.contains(PacketFlags::DISCONTINUITY) && pkt.pts.is_none() {
            self.next_pts = None;
            return;
        }
        let duration = if pkt.duration > 0 {
            pkt.duration
        } else {
            self.frame_duration
        };
        self.next_pts = pkt.pts.map(|p| p + duration);
    }
}

impl Default for PtsInterpolator {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for PtsInterpolator {
    fn name(&self) -> &str {
        "pts-interp"
    }

    /// 需要一个带时间戳的样本作为起点
    fn probe(&mut self, sample: &DataPacket, hint: &MediaFormat) -> ProbeStatus {
        if sample.pts.is_none() {
            return ProbeStatus::Again;
        }
        self.frame_duration = Self::duration_of(hint);
        self.format = Some(hint.clone());
        ProbeStatus::Ok
    }

    fn output_format(&self) -> Option<&MediaFormat> {
        self.format.as_ref()
    }

    fn input(&mut self, mut packet: Packet) -> LiuResult<()> {
        if let Packet::Data(d) = &mut packet {
            self.fill(d);
        }
        self.queue.push_back(packet);
        Ok(())
    }

    fn output(&mut self) -> LiuResult<Packet> {
        self.queue.pop_front().ok_or(LiuError::NeedMoreData)
    }

    fn flush(&mut self, discard: bool) -> LiuResult<()> {
        if discard {
            self.queue.clear();
        }
        self.next_pts = None;
        Ok(())
    }
}
