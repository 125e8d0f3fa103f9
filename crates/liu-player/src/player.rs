//! 播放器: 共享状态与对外接口.
//!
//! 一个播放器对应一个打开的容器:
//!
//! ```text
//!                    ┌──────────┐  queue 0  ┌────────────┐
//!  MuxedStream ──►   │  reader  │ ────────► │ consumer 0 │ ─► Pipeline 0
//!                    │  thread  │  queue 1  ├────────────┤
//!                    │          │ ────────► │ consumer 1 │ ─► Pipeline 1
//!                    └──────────┘           └────────────┘
//!                          ▲ Mutex<State> + Condvar ▲
//!                          └──────── ticker ────────┘
//! ```
//!
//! 流表、队列与 "需要数据" 位由同一把锁保护. 读取线程独占 MuxedStream,
//! 消费线程各自独占握手成功后的管线.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use liu_core::{CodecId, LiuError, LiuResult, Packet};
use liu_format::{DemuxConfig, MuxedStream, Stream};
use liu_pipeline::Pipeline;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::clock::Clock;
use crate::config::PlayerConfig;
use crate::event::PlayerEvent;
use crate::queue::PacketQueue;
use crate::{reader, ticker};

/// 为每条流构造管线; 返回 None 表示不播放该流
pub type PipelineFactory = Arc<dyn Fn(&Stream) -> Option<Pipeline> + Send + Sync>;

/// 流的调度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// 尚未握手成功
    Probing,
    /// 正在缓冲与消费
    Active,
    /// 被拒绝, 其数据包直接丢弃
    Discarded,
    /// 数据已全部送入管线
    Ended,
}

/// 单条流的状态快照
#[derive(Debug, Clone)]
pub struct StreamState {
    pub index: usize,
    pub codec_id: CodecId,
    pub status: StreamStatus,
    /// 握手次数
    pub attempts: u32,
    /// 排队的包数
    pub queued: usize,
    /// 排队的时长 (tick)
    pub buffered: i64,
    pub wants_data: bool,
    /// 已送入管线的包数
    pub delivered: u64,
}

/// 每条流在播放器中的槽位
pub(crate) struct Slot {
    pub stream: Stream,
    pub status: StreamStatus,
    pub attempts: u32,
    /// 握手期间保留的包
    pub pending: Vec<Packet>,
    /// 握手成功前由读取线程持有
    pub pipeline: Option<Pipeline>,
    pub queue: PacketQueue,
    /// 待消费线程执行的清空, 值为 discard
    pub flush_request: Option<bool>,
    /// 不会再有新包入队
    pub input_ended: bool,
    /// 时间戳已超过结束点
    pub past_end: bool,
    pub delivered: u64,
}

impl Slot {
    pub fn new(stream: Stream, pipeline: Option<Pipeline>, config: &PlayerConfig) -> Self {
        let status = if pipeline.is_some() {
            StreamStatus::Probing
        } else {
            StreamStatus::Discarded
        };
        Self {
            stream,
            status,
            attempts: 0,
            pending: Vec::new(),
            pipeline,
            queue: PacketQueue::new(config),
            flush_request: None,
            input_ended: false,
            past_end: false,
            delivered: 0,
        }
    }

    /// 读取线程是否应为此流继续读包
    pub fn wants_data(&self) -> bool {
        match self.status {
            StreamStatus::Probing => !self.past_end,
            StreamStatus::Active => self.queue.wants_data() && !self.past_end,
            StreamStatus::Discarded | StreamStatus::Ended => false,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.status, StreamStatus::Probing | StreamStatus::Active)
    }
}

/// 锁保护的播放器状态
pub(crate) struct State {
    pub slots: Vec<Slot>,
    /// 第一个带时间戳的包的时间
    pub global_start: Option<i64>,
    pub terminate: bool,
    pub paused: bool,
    pub seek_request: Option<i64>,
    /// 读取线程已结束
    pub input_done: bool,
    pub end_sent: bool,
}

impl State {
    pub fn any_wants(&self) -> bool {
        self.slots.iter().any(Slot::wants_data)
    }

    /// 所有存活的流都已越过结束点, 或已没有存活的流
    pub fn input_exhausted(&self) -> bool {
        self.slots.iter().filter(|s| s.is_live()).all(|s| s.past_end)
    }

    /// 清空所有队列并通知消费线程清空管线
    pub fn flush_all(&mut self, discard: bool) {
        for slot in &mut self.slots {
            match slot.status {
                StreamStatus::Active => {
                    slot.queue.clear();
                    slot.flush_request = Some(discard);
                }
                StreamStatus::Probing => slot.pending.clear(),
                _ => {}
            }
            slot.past_end = false;
        }
    }
}

/// 各线程共享的播放器核心
pub(crate) struct Shared {
    pub config: PlayerConfig,
    pub state: Mutex<State>,
    pub cond: Condvar,
    pub clock: Clock,
    events: Sender<PlayerEvent>,
    pub threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    pub fn emit(&self, event: PlayerEvent) {
        debug!("播放器事件: {event}");
        // 接收端随播放器存活, 发送不会失败
        self.events.send(event).ok();
    }

    /// 输入结束且没有存活的流时发布 End
    pub fn maybe_end(&self, state: &mut State) {
        if state.end_sent || !state.input_done {
            return;
        }
        if state.slots.iter().any(Slot::is_live) {
            return;
        }
        state.end_sent = true;
        info!("所有流已结束");
        self.emit(PlayerEvent::End);
        self.cond.notify_all();
    }

    pub fn spawn(&self, name: String, f: impl FnOnce() + Send + 'static) -> LiuResult<()> {
        let handle = std::thread::Builder::new().name(name).spawn(f)?;
        self.threads.lock().push(handle);
        Ok(())
    }
}

/// 流式播放器
pub struct Player {
    shared: Arc<Shared>,
    events: Receiver<PlayerEvent>,
    closed: bool,
}

impl Player {
    /// 按路径或 URL 打开并开始播放
    pub fn open(
        source: &str,
        demux_config: &DemuxConfig,
        config: PlayerConfig,
        factory: PipelineFactory,
    ) -> LiuResult<Self> {
        let muxed = MuxedStream::open(source, demux_config)?;
        Self::start(muxed, config, factory)
    }

    /// 用已打开的复用流开始播放
    pub fn start(
        mut muxed: MuxedStream,
        config: PlayerConfig,
        factory: PipelineFactory,
    ) -> LiuResult<Self> {
        config.validate()?;
        let slots: Vec<Slot> = muxed
            .streams()
            .iter()
            .map(|s| Slot::new(s.clone(), factory(s), &config))
            .collect();
        for slot in &slots {
            if slot.status == StreamStatus::Discarded {
                muxed.set_used(slot.stream.index, false)?;
            }
        }
        info!(
            "播放器启动: {} ({} 条流, {} 条待握手)",
            muxed.format_name(),
            slots.len(),
            slots.iter().filter(|s| s.is_live()).count()
        );

        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                slots,
                global_start: None,
                terminate: false,
                paused: false,
                seek_request: config.start_time,
                input_done: false,
                end_sent: false,
            }),
            cond: Condvar::new(),
            clock: Clock::new(),
            events: tx,
            threads: Mutex::new(Vec::new()),
            config,
        });

        let worker = Arc::clone(&shared);
        shared.spawn("liu-reader".into(), move || {
            reader::run(worker, muxed, factory)
        })?;
        let worker = Arc::clone(&shared);
        shared.spawn("liu-ticker".into(), move || ticker::run(worker))?;

        Ok(Self {
            shared,
            events: rx,
            closed: false,
        })
    }

    /// 事件接收端
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events.clone()
    }

    /// 共享时钟
    pub fn clock(&self) -> &Clock {
        &self.shared.clock
    }

    /// 全局起始时间, 读到第一个带时间戳的包后确定
    pub fn start_time(&self) -> Option<i64> {
        self.shared.state.lock().global_start
    }

    /// 各流状态快照
    pub fn streams(&self) -> Vec<StreamState> {
        let state = self.shared.state.lock();
        state
            .slots
            .iter()
            .map(|s| StreamState {
                index: s.stream.index,
                codec_id: s.stream.codec_id,
                status: s.status,
                attempts: s.attempts,
                queued: s.queue.len(),
                buffered: s.queue.duration(),
                wants_data: s.wants_data(),
                delivered: s.delivered,
            })
            .collect()
    }

    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if !state.paused {
            state.paused = true;
            self.shared.clock.pause();
            info!("暂停");
        }
    }

    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        if state.paused {
            state.paused = false;
            self.shared.clock.resume();
            self.shared.cond.notify_all();
            info!("继续播放");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// 请求定位到 `time` (容器时间, tick), 完成后发布 Seeked
    pub fn seek(&self, time: i64) -> LiuResult<()> {
        let mut state = self.shared.state.lock();
        if state.input_done || state.terminate {
            return Err(LiuError::Unsupported("读取已结束, 无法定位".into()));
        }
        state.seek_request = Some(time);
        self.shared.cond.notify_all();
        Ok(())
    }

    /// 丢弃所有排队的包并清空管线
    pub fn flush(&self) {
        let mut state = self.shared.state.lock();
        state.flush_all(true);
        self.shared.emit(PlayerEvent::Flushed);
        self.shared.cond.notify_all();
    }

    /// 是否已发布 End
    pub fn is_ended(&self) -> bool {
        self.shared.state.lock().end_sent
    }

    /// 等待播放结束, 超时返回 false
    pub fn wait_end(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.end_sent {
            if self.shared.cond.wait_until(&mut state, deadline).timed_out() {
                return state.end_sent;
            }
        }
        true
    }

    /// 停止所有线程; 消费线程丢弃式清空一次管线后退出
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut state = self.shared.state.lock();
            state.terminate = true;
            self.shared.cond.notify_all();
        }
        // 消费线程可能在运行中登记, 反复取直到为空
        loop {
            let handles: Vec<_> = self.shared.threads.lock().drain(..).collect();
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if handle.join().is_err() {
                    warn!("播放器线程异常退出");
                }
            }
        }
        info!("播放器已关闭");
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.close();
    }
}
