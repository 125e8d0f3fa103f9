//! 消费线程: 从队列取包送入流的管线.

use std::sync::Arc;
use std::time::Duration;

use liu_core::Packet;
use liu_pipeline::Pipeline;
use log::{debug, info, warn};

use crate::clock::ticks_to_duration;
use crate::event::PlayerEvent;
use crate::player::{Shared, StreamStatus};

/// 实时模式下单次等待的上限, 保证能及时响应暂停与清空
const MAX_PACE_WAIT: Duration = Duration::from_millis(20);

enum Next {
    Packet(Packet),
    Flush(bool),
    /// 输入结束且队列已空
    Drained,
    Terminate,
}

pub(crate) fn run(shared: Arc<Shared>, idx: usize, mut pipeline: Pipeline) {
    debug!("流 {idx} 消费线程启动: {:?}", pipeline.names());
    loop {
        match take_next(&shared, idx) {
            Next::Packet(packet) => {
                if let Err(e) = deliver(&mut pipeline, packet) {
                    warn!("流 {idx} 管线出错: {e}");
                    shared.emit(PlayerEvent::Error(format!("流 {idx}: {e}")));
                    stop(&mut pipeline, idx, true);
                    finish(&shared, idx);
                    return;
                }
            }
            Next::Flush(discard) => {
                if let Err(e) = pipeline.flush(discard) {
                    warn!("流 {idx} 清空管线失败: {e}");
                }
            }
            Next::Drained => {
                stop(&mut pipeline, idx, false);
                finish(&shared, idx);
                return;
            }
            Next::Terminate => {
                stop(&mut pipeline, idx, true);
                return;
            }
        }
    }
}

fn deliver(pipeline: &mut Pipeline, packet: Packet) -> liu_core::LiuResult<()> {
    match packet {
        Packet::Flush { discard, .. } => pipeline.flush(discard).map(|_| ()),
        other => pipeline.input(other).map(|_| ()),
    }
}

/// 清空一次并停止管线
fn stop(pipeline: &mut Pipeline, idx: usize, discard: bool) {
    if let Err(e) = pipeline.flush(discard).and_then(|_| pipeline.stop()) {
        warn!("流 {idx} 停止管线失败: {e}");
    }
}

fn finish(shared: &Shared, idx: usize) {
    let mut state = shared.state.lock();
    let slot = &mut state.slots[idx];
    slot.status = StreamStatus::Ended;
    slot.queue.clear();
    info!("流 {idx} 结束, 共送入 {} 个包", slot.delivered);
    shared.emit(PlayerEvent::StreamEnded { stream: idx });
    shared.maybe_end(&mut state);
    shared.cond.notify_all();
}

fn take_next(shared: &Shared, idx: usize) -> Next {
    let mut state = shared.state.lock();
    loop {
        if state.terminate {
            return Next::Terminate;
        }
        let paused = state.paused;
        let slot = &mut state.slots[idx];
        if let Some(discard) = slot.flush_request.take() {
            return Next::Flush(discard);
        }
        if !paused {
            let due = slot.queue.front().and_then(|p| p.as_data()?.timestamp());
            let wait = match due {
                Some(ts) if shared.config.realtime => {
                    let now = shared.clock.now();
                    (ts > now).then(|| ticks_to_duration(ts - now).min(MAX_PACE_WAIT))
                }
                _ => None,
            };
            if let Some(wait) = wait {
                shared.cond.wait_for(&mut state, wait);
                continue;
            }
            if let Some(packet) = slot.queue.pop() {
                slot.delivered += 1;
                shared.cond.notify_all();
                return Next::Packet(packet);
            }
            if slot.input_ended {
                return Next::Drained;
            }
        }
        shared.cond.wait(&mut state);
    }
}
