//! 读取线程: 从复用流取包, 握手并分发到各流队列.

use std::sync::Arc;

use liu_core::timestamp::format_ticks;
use liu_core::{DataPacket, LiuError, LiuResult, Packet};
use liu_format::MuxedStream;
use liu_pipeline::{MediaFormat, ProbeStatus};
use log::{debug, info, trace, warn};
use parking_lot::MutexGuard;

use crate::consumer;
use crate::event::PlayerEvent;
use crate::player::{PipelineFactory, Shared, Slot, State, StreamStatus};

/// 连续可恢复读取错误的上限, 超过后放弃输入
const MAX_RECOVERABLE_ERRORS: u32 = 32;

/// 读取线程入口
pub(crate) fn run(shared: Arc<Shared>, mut muxed: MuxedStream, factory: PipelineFactory) {
    info!("读取线程启动");
    let result = read_loop(&shared, &mut muxed, &factory);
    if let Err(e) = result {
        warn!("读取中止: {e}");
        shared.emit(PlayerEvent::Error(e.to_string()));
    }
    finish_input(&shared);
    info!("读取线程退出");
}

fn read_loop(
    shared: &Arc<Shared>,
    muxed: &mut MuxedStream,
    factory: &PipelineFactory,
) -> LiuResult<()> {
    let mut errors = 0u32;
    loop {
        let seek = {
            let mut state = shared.state.lock();
            loop {
                if state.terminate {
                    return Ok(());
                }
                if let Some(t) = state.seek_request.take() {
                    break Some(t);
                }
                if state.input_exhausted() {
                    debug!("没有存活的流或均已越过结束点");
                    return Ok(());
                }
                if !state.paused && state.any_wants() {
                    break None;
                }
                shared.cond.wait(&mut state);
            }
        };
        if let Some(target) = seek {
            seek_to(shared, muxed, target);
            continue;
        }

        let packet = match muxed.next_packet(None) {
            Ok(p) => p,
            Err(LiuError::Eof) => {
                info!("输入结束");
                return Ok(());
            }
            Err(e) if e.is_recoverable() && errors < MAX_RECOVERABLE_ERRORS => {
                errors += 1;
                warn!("读包出错, 继续读取 ({errors}/{MAX_RECOVERABLE_ERRORS}): {e}");
                continue;
            }
            Err(e) => return Err(e),
        };
        errors = 0;
        add_new_streams(shared, muxed, factory)?;
        dispatch(shared, muxed, packet);
    }
}

/// 部分格式在读包过程中才发现新流
fn add_new_streams(
    shared: &Shared,
    muxed: &mut MuxedStream,
    factory: &PipelineFactory,
) -> LiuResult<()> {
    let known = shared.state.lock().slots.len();
    if muxed.n_streams() <= known {
        return Ok(());
    }
    let added: Vec<Slot> = muxed.streams()[known..]
        .iter()
        .map(|s| Slot::new(s.clone(), factory(s), &shared.config))
        .collect();
    for slot in &added {
        info!("发现新流 {} ({})", slot.stream.index, slot.stream.codec_id);
        if slot.status == StreamStatus::Discarded {
            muxed.set_used(slot.stream.index, false)?;
        }
    }
    shared.state.lock().slots.extend(added);
    Ok(())
}

fn seek_to(shared: &Shared, muxed: &mut MuxedStream, target: i64) {
    match muxed.seek(target) {
        Ok(actual) => {
            let mut state = shared.state.lock();
            state.flush_all(true);
            shared.clock.set(actual);
            if state.global_start.is_none() {
                state.global_start = Some(actual);
            }
            shared.emit(PlayerEvent::Flushed);
            shared.emit(PlayerEvent::Seeked { target, actual });
            shared.cond.notify_all();
        }
        Err(e) => {
            warn!("定位到 {} 失败: {e}", format_ticks(target));
            shared.emit(PlayerEvent::Error(format!("定位失败: {e}")));
        }
    }
}

fn dispatch(shared: &Arc<Shared>, muxed: &mut MuxedStream, packet: Packet) {
    let mut state = shared.state.lock();
    match packet {
        Packet::Data(d) => dispatch_data(shared, &mut state, muxed, d),
        control => {
            let targets: Vec<usize> = match control.stream_index() {
                Some(i) => vec![i],
                None => (0..state.slots.len()).collect(),
            };
            for i in targets {
                let active = state
                    .slots
                    .get(i)
                    .is_some_and(|s| s.status == StreamStatus::Active);
                if active {
                    push_wait(shared, &mut state, i, control.clone());
                }
            }
        }
    }
}

fn dispatch_data(
    shared: &Arc<Shared>,
    state: &mut MutexGuard<'_, State>,
    muxed: &mut MuxedStream,
    d: DataPacket,
) {
    let idx = d.stream_index;
    if idx >= state.slots.len() {
        return;
    }
    let ts = d.timestamp();
    if state.global_start.is_none() {
        if let Some(ts) = ts {
            info!("起始时间 {}", format_ticks(ts));
            state.global_start = Some(ts);
            shared.clock.set(ts);
        }
    }
    if let (Some(end), Some(start), Some(ts)) = (shared.config.end_time, state.global_start, ts) {
        if ts - start > end {
            let slot = &mut state.slots[idx];
            if !slot.past_end {
                debug!("流 {idx} 越过结束点 {}", format_ticks(ts));
                slot.past_end = true;
            }
            return;
        }
    }

    match state.slots[idx].status {
        StreamStatus::Probing => probe(shared, state, muxed, d),
        StreamStatus::Active => push_wait(shared, state, idx, Packet::Data(d)),
        StreamStatus::Discarded | StreamStatus::Ended => trace!("丢弃流 {idx} 的包"),
    }
}

/// 用包与流的管线握手
fn probe(
    shared: &Arc<Shared>,
    state: &mut MutexGuard<'_, State>,
    muxed: &mut MuxedStream,
    d: DataPacket,
) {
    let idx = d.stream_index;
    let max_probe = shared.config.max_probe;
    let slot = &mut state.slots[idx];
    let hint = MediaFormat::from(&slot.stream);
    let status = match slot.pipeline.as_mut() {
        Some(p) => p.probe(&d, &hint),
        None => ProbeStatus::Fail,
    };
    slot.attempts += 1;
    trace!("流 {idx} 第 {} 次握手: {status}", slot.attempts);
    match status {
        ProbeStatus::Ok => activate(shared, state, muxed, d),
        ProbeStatus::Fail => reject(shared, state, muxed, idx, "管线拒绝".into()),
        ProbeStatus::Again | ProbeStatus::Discard => {
            if status == ProbeStatus::Again {
                slot.pending.push(Packet::Data(d));
            }
            if slot.attempts >= max_probe {
                let reason = format!("{max_probe} 次握手未成功");
                reject(shared, state, muxed, idx, reason);
            }
        }
    }
}

fn reject(
    shared: &Shared,
    state: &mut State,
    muxed: &mut MuxedStream,
    idx: usize,
    reason: String,
) {
    let slot = &mut state.slots[idx];
    warn!("流 {idx} ({}) 被拒绝: {reason}", slot.stream.codec_id);
    slot.status = StreamStatus::Discarded;
    slot.pending.clear();
    slot.pipeline = None;
    muxed.set_used(idx, false).ok();
    shared.emit(PlayerEvent::ProbeFailed { stream: idx, reason });
    if state.slots.iter().all(|s| s.status == StreamStatus::Discarded) {
        shared.emit(PlayerEvent::Error("所有流均被拒绝".into()));
    }
    shared.cond.notify_all();
}

/// 握手成功: 保留的包入队并启动消费线程
fn activate(shared: &Arc<Shared>, state: &mut State, muxed: &mut MuxedStream, d: DataPacket) {
    let idx = d.stream_index;
    let max_packets = shared.config.max_packets;
    let slot = &mut state.slots[idx];
    let Some(mut pipeline) = slot.pipeline.take() else {
        return;
    };
    if let Err(e) = pipeline.start() {
        reject(shared, state, muxed, idx, format!("管线启动失败: {e}"));
        return;
    }
    let format = pipeline.output_format().cloned();

    let mut pending = std::mem::take(&mut slot.pending);
    pending.push(Packet::Data(d));
    if pending.len() > max_packets {
        let excess = pending.len() - max_packets;
        warn!("流 {idx} 握手期间积压 {} 个包, 丢弃最早的 {excess} 个", pending.len());
        pending.drain(..excess);
    }
    for packet in pending {
        slot.queue.push(packet);
    }
    slot.status = StreamStatus::Active;

    let worker = Arc::clone(shared);
    if let Err(e) = shared.spawn(format!("liu-consumer-{idx}"), move || {
        consumer::run(worker, idx, pipeline)
    }) {
        state.slots[idx].queue.clear();
        reject(shared, state, muxed, idx, format!("无法启动消费线程: {e}"));
        return;
    }
    info!("流 {idx} 握手成功, 开始消费");
    shared.emit(PlayerEvent::ProbeOk { stream: idx, format });
    shared.cond.notify_all();
}

/// 入队; 队列已满时等待消费线程腾出空间
fn push_wait(shared: &Shared, state: &mut MutexGuard<'_, State>, idx: usize, packet: Packet) {
    loop {
        if state.terminate || state.seek_request.is_some() {
            return;
        }
        let slot = &mut state.slots[idx];
        if slot.status != StreamStatus::Active {
            return;
        }
        if !slot.queue.is_full() {
            slot.queue.push(packet);
            shared.cond.notify_all();
            return;
        }
        trace!("流 {idx} 队列已满, 等待");
        shared.cond.wait(state);
    }
}

/// 读取结束: 通知消费线程排空后退出
fn finish_input(shared: &Shared) {
    let mut state = shared.state.lock();
    state.input_done = true;
    let mut unprobed = Vec::new();
    for slot in &mut state.slots {
        match slot.status {
            StreamStatus::Active => slot.input_ended = true,
            StreamStatus::Probing => {
                slot.status = StreamStatus::Discarded;
                slot.pending.clear();
                slot.pipeline = None;
                unprobed.push(slot.stream.index);
            }
            _ => {}
        }
    }
    for stream in unprobed {
        shared.emit(PlayerEvent::ProbeFailed {
            stream,
            reason: "输入结束前未完成握手".into(),
        });
    }
    shared.maybe_end(&mut state);
    shared.cond.notify_all();
}
