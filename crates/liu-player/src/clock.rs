//! 共享媒体时钟.
//!
//! 以容器时间 (tick) 计. 时钟在第一次 `set` 之前停在 0, 之后按系统时间
//! 前进, 暂停时冻结.

use std::sync::Arc;
use std::time::{Duration, Instant};

use liu_core::TICKS_PER_SECOND;
use parking_lot::Mutex;

/// 每微秒的 tick 数
const TICKS_PER_MICRO: i64 = TICKS_PER_SECOND / 1_000_000;

#[derive(Debug)]
struct ClockState {
    /// 锚点时刻对应的媒体时间
    base: i64,
    /// 锚点, 未启动时为 None
    anchor: Option<Instant>,
    paused: bool,
}

/// 媒体时钟 (线程安全)
#[derive(Debug, Clone)]
pub struct Clock {
    inner: Arc<Mutex<ClockState>>,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockState {
                base: 0,
                anchor: None,
                paused: false,
            })),
        }
    }

    /// 当前媒体时间 (tick)
    pub fn now(&self) -> i64 {
        let state = self.inner.lock();
        Self::current(&state)
    }

    fn current(state: &ClockState) -> i64 {
        match state.anchor {
            Some(anchor) if !state.paused => {
                state.base + anchor.elapsed().as_micros() as i64 * TICKS_PER_MICRO
            }
            _ => state.base,
        }
    }

    /// 重新定位并开始走时
    pub fn set(&self, time: i64) {
        let mut state = self.inner.lock();
        state.base = time;
        state.anchor = Some(Instant::now());
    }

    /// 是否已启动
    pub fn is_started(&self) -> bool {
        self.inner.lock().anchor.is_some()
    }

    pub fn pause(&self) {
        let mut state = self.inner.lock();
        if !state.paused {
            state.base = Self::current(&state);
            state.paused = true;
        }
    }

    pub fn resume(&self) {
        let mut state = self.inner.lock();
        if state.paused {
            state.paused = false;
            if state.anchor.is_some() {
                state.anchor = Some(Instant::now());
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// tick 转为等待时长, 负值为 0
pub fn ticks_to_duration(ticks: i64) -> Duration {
    Duration::from_micros((ticks.max(0) / TICKS_PER_MICRO) as u64)
}
