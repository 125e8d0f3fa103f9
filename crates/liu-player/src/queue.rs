//! 带水位的每流包队列.
//!
//! 高水位: 包数达到 `max_packets` 或缓冲时长达到 `buffer`, 此时清除
//! "需要数据" 位. 低水位: 包数低于 `min_packets` 或时长低于 `buffer` 的
//! 一半, 此时重新置位. 两者之间保持原状态.

use std::collections::VecDeque;

use liu_core::Packet;

use crate::config::PlayerConfig;

/// 包队列
#[derive(Debug)]
pub struct PacketQueue {
    packets: VecDeque<Packet>,
    min_packets: usize,
    max_packets: usize,
    buffer: i64,
    wants: bool,
}

impl PacketQueue {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            packets: VecDeque::new(),
            min_packets: config.min_packets,
            max_packets: config.max_packets,
            buffer: config.buffer,
            wants: true,
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// 达到容量, 不能再入队
    pub fn is_full(&self) -> bool {
        self.packets.len() >= self.max_packets
    }

    /// 是否需要更多数据
    pub fn wants_data(&self) -> bool {
        self.wants
    }

    /// 队首与队尾带时间戳的数据包之间的时长
    pub fn duration(&self) -> i64 {
        let first = self.packets.iter().find_map(|p| p.as_data()?.timestamp());
        let last = self.packets.iter().rev().find_map(|p| p.as_data()?.timestamp());
        match (first, last) {
            (Some(a), Some(b)) if b > a => b - a,
            _ => 0,
        }
    }

    pub fn front(&self) -> Option<&Packet> {
        self.packets.front()
    }

    /// 入队, 调用方须先确认未满
    pub fn push(&mut self, packet: Packet) {
        debug_assert!(!self.is_full());
        self.packets.push_back(packet);
        self.update();
    }

    pub fn pop(&mut self) -> Option<Packet> {
        let packet = self.packets.pop_front()?;
        self.update();
        Some(packet)
    }

    /// 清空并恢复 "需要数据"
    pub fn clear(&mut self) {
        self.packets.clear();
        self.wants = true;
    }

    fn update(&mut self) {
        let len = self.packets.len();
        let duration = if self.buffer > 0 { self.duration() } else { 0 };
        if len >= self.max_packets || (self.buffer > 0 && duration >= self.buffer) {
            self.wants = false;
        } else if len < self.min_packets || (self.buffer > 0 && duration < self.buffer / 2) {
            self.wants = true;
        }
    }
}
