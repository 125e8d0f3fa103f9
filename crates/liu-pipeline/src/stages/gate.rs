//! 关键帧门: 视频流在第一个关键帧之前的包不进入下游.

use std::collections::VecDeque;

use liu_core::{DataPacket, LiuError, LiuResult, MediaType, Packet};
use log::trace;

use crate::{MediaFormat, ProbeStatus, Stage};

/// 关键帧门
///
/// 握手时非关键帧样本返回 Discard. 丢弃式清空 (定位) 之后重新等待关键帧.
/// 非视频流不受影响.
pub struct KeyframeGate {
    format: Option<MediaFormat>,
    waiting: bool,
    dropped: u64,
    queue: VecDeque<Packet>,
}

impl KeyframeGate {
    pub fn new() -> Self {
        Self {
            format: None,
            waiting: false,
            dropped: 0,
            queue: VecDeque::new(),
        }
    }

    /// 被拦下的包数
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn is_video(&self) -> bool {
        self.format
            .as_ref()
            .is_some_and(|f| f.media_type() == MediaType::Video)
    }
}

impl Default for KeyframeGate {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for KeyframeGate {
    fn name(&self) -> &str {
        "keyframe-gate"
    }

    fn probe(&mut self, sample: &DataPacket, hint: &MediaFormat) -> ProbeStatus {
        if hint.media_type() == MediaType::Video && !sample.is_keyframe() {
            self.dropped += 1;
            return ProbeStatus::Discard;
        }
        self.format = Some(hint.clone());
        ProbeStatus::Ok
    }

    fn output_format(&self) -> Option<&MediaFormat> {
        self.format.as_ref()
    }

    fn input(&mut self, packet: Packet) -> LiuResult<()> {
        if let Packet::Data(d) = &packet {
            if self.waiting && self.is_video() {
                if !d.is_keyframe() {
                    trace!("keyframe-gate: 丢弃非关键帧 pts={:?}", d.pts);
                    self.dropped += 1;
                    return Ok(());
                }
                self.waiting = false;
            }
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
            self.waiting = true;
        }
        Ok(())
    }
}
