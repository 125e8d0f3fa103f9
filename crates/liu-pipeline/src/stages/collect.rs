//! 收集终点: 保存流到这里的全部包.

use std::sync::Arc;

use liu_core::{DataPacket, LiuError, LiuResult, Packet};
use parking_lot::Mutex;

use crate::{MediaFormat, ProbeStatus, Stage};

#[derive(Debug, Default)]
struct Collected {
    packets: Vec<Packet>,
    flushes: usize,
}

/// 收集结果的句柄
#[derive(Debug, Clone, Default)]
pub struct CollectHandle(Arc<Mutex<Collected>>);

impl CollectHandle {
    /// 取走已收集的包
    pub fn take(&self) -> Vec<Packet> {
        std::mem::take(&mut self.0.lock().packets)
    }

    /// 已收集的包数
    pub fn len(&self) -> usize {
        self.0.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 被清空的次数
    pub fn flushes(&self) -> usize {
        self.0.lock().flushes
    }
}

/// 收集终点
pub struct CollectSink {
    handle: CollectHandle,
    format: Option<MediaFormat>,
}

impl CollectSink {
    pub fn new() -> (Self, CollectHandle) {
        let handle = CollectHandle::default();
        let sink = Self {
            handle: handle.clone(),
            format: None,
        };
        (sink, handle)
    }
}

impl Stage for CollectSink {
    fn name(&self) -> &str {
        "collect"
    }

    fn probe(&mut self, _sample: &DataPacket, hint: &MediaFormat) -> ProbeStatus {
        self.format = Some(hint.clone());
        ProbeStatus::Ok
    }

    fn output_format(&self) -> Option<&MediaFormat> {
        self.format.as_ref()
    }

    fn input(&mut self, packet: Packet) -> LiuResult<()> {
        self.handle.0.lock().packets.push(packet);
        Ok(())
    }

    fn output(&mut self) -> LiuResult<Packet> {
        Err(LiuError::NeedMoreData)
    }

    fn flush(&mut self, _discard: bool) -> LiuResult<()> {
        self.handle.0.lock().flushes += 1;
        Ok(())
    }
}
