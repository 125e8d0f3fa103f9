//! 滴答线程: 按固定间隔发布时钟时间.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;

use crate::event::PlayerEvent;
use crate::player::Shared;

pub(crate) fn run(shared: Arc<Shared>) {
    let interval = Duration::from_millis(shared.config.tick_interval.max(1));
    let mut state = shared.state.lock();
    loop {
        let deadline = Instant::now() + interval;
        while !state.terminate && !state.end_sent && Instant::now() < deadline {
            shared.cond.wait_until(&mut state, deadline);
        }
        if state.terminate || state.end_sent {
            debug!("滴答线程退出");
            return;
        }
        if !state.paused && shared.clock.is_started() {
            shared.emit(PlayerEvent::Tick {
                time: shared.clock.now(),
            });
        }
    }
}
