//! 播放器集成测试: 复用流 → 读取线程 → 各流管线.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{FRAME_TICKS, avi_file, mkv_file, open_memory, ts_file};
use liu_core::{MediaType, TICKS_PER_SECOND};
use liu_format::Stream;
use liu_pipeline::{
    KeyframeGate, MediaSelect, NullSink, Pipeline, PtsInterpolator, SinkStats, StatsHandle,
};
use liu_player::{PipelineFactory, Player, PlayerConfig, PlayerEvent, StreamStatus};
use parking_lot::Mutex;

const WAIT: Duration = Duration::from_secs(10);

type Handles = Arc<Mutex<Vec<(usize, StatsHandle)>>>;

/// 每条流: [媒体选择] → 关键帧门 → PTS 补全 → 空输出
fn factory(only: Option<MediaType>) -> (PipelineFactory, Handles) {
    let handles: Handles = Arc::new(Mutex::new(Vec::new()));
    let registered = Arc::clone(&handles);
    let factory: PipelineFactory = Arc::new(move |s: &Stream| {
        let mut pipeline = Pipeline::new();
        if let Some(media) = only {
            pipeline.push(Box::new(MediaSelect::media(&[media])));
        }
        let (sink, stats) = NullSink::new();
        registered.lock().push((s.index, stats));
        Some(
            pipeline
                .with(Box::new(KeyframeGate::new()))
                .with(Box::new(PtsInterpolator::new()))
                .with(Box::new(sink)),
        )
    });
    (factory, handles)
}

fn stats_of(handles: &Handles, stream: usize) -> SinkStats {
    let handles = handles.lock();
    let (_, handle) = handles.iter().find(|(i, _)| *i == stream).unwrap();
    handle.snapshot()
}

fn events_until_end(player: &Player) -> Vec<PlayerEvent> {
    let rx = player.events();
    let deadline = Instant::now() + WAIT;
    let mut events = Vec::new();
    while let Ok(event) = rx.recv_deadline(deadline) {
        let end = event == PlayerEvent::End;
        if !matches!(event, PlayerEvent::Tick { .. }) {
            events.push(event);
        }
        if end {
            break;
        }
    }
    events
}

fn probed(events: &[PlayerEvent], stream: usize) -> bool {
    events
        .iter()
        .any(|e| matches!(e, PlayerEvent::ProbeOk { stream: s, .. } if *s == stream))
}

#[test]
fn test_matroska_完整播放() {
    let (factory, handles) = factory(None);
    let muxed = open_memory(mkv_file(30), "clip.mkv");
    let mut player = Player::start(muxed, PlayerConfig::default(), factory).unwrap();
    let events = events_until_end(&player);

    assert!(probed(&events, 0) && probed(&events, 1));
    assert_eq!(events.last(), Some(&PlayerEvent::End));
    assert!(!events.iter().any(|e| matches!(e, PlayerEvent::Error(_))));
    for stream in 0..2 {
        let stats = stats_of(&handles, stream);
        assert_eq!(stats.packets, 30);
        assert_eq!(stats.pts_regressions, 0);
    }
    assert_eq!(stats_of(&handles, 0).last_pts, Some(29 * FRAME_TICKS));
    player.close();
    assert!(player.streams().iter().all(|s| s.status == StreamStatus::Ended));
}

#[test]
fn test_matroska_簇内损坏后继续播放后续簇() {
    let mut data = mkv_file(30);
    // 第二个簇里第一个 SimpleBlock 的 ID 改坏
    let clusters: Vec<usize> = data
        .windows(4)
        .enumerate()
        .filter(|(_, w)| *w == [0x1F, 0x43, 0xB6, 0x75])
        .map(|(i, _)| i)
        .collect();
    assert_eq!(clusters.len(), 3);
    let block = clusters[1] + 6 + data[clusters[1] + 6..].iter().position(|&b| b == 0xA3).unwrap();
    data[block] = 0x00;

    let (factory, handles) = factory(None);
    let muxed = open_memory(data, "clip.mkv");
    let player = Player::start(muxed, PlayerConfig::default(), factory).unwrap();
    let events = events_until_end(&player);

    assert_eq!(events.last(), Some(&PlayerEvent::End));
    assert!(!events.iter().any(|e| matches!(e, PlayerEvent::Error(_))));
    let video = stats_of(&handles, 0);
    assert_eq!(video.packets, 20);
    assert_eq!(video.pts_regressions, 0);
    assert_eq!(video.last_pts, Some(29 * FRAME_TICKS));
    assert_eq!(stats_of(&handles, 1).packets, 20);
}

#[test]
fn test_matroska_起始定位() {
    let (factory, handles) = factory(None);
    let muxed = open_memory(mkv_file(30), "clip.mkv");
    let config = PlayerConfig {
        start_time: Some(15 * FRAME_TICKS),
        ..PlayerConfig::default()
    };
    let player = Player::start(muxed, config, factory).unwrap();
    let events = events_until_end(&player);

    assert!(events.contains(&PlayerEvent::Seeked {
        target: 15 * FRAME_TICKS,
        actual: 10 * FRAME_TICKS,
    }));
    assert_eq!(player.start_time(), Some(10 * FRAME_TICKS));
    let video = stats_of(&handles, 0);
    assert_eq!(video.packets, 20);
    assert_eq!(video.first_pts, Some(10 * FRAME_TICKS));
}

#[test]
fn test_ts_只播放视频() {
    let (factory, handles) = factory(Some(MediaType::Video));
    let muxed = open_memory(ts_file(30), "live.ts");
    let player = Player::start(muxed, PlayerConfig::default(), factory).unwrap();
    let events = events_until_end(&player);

    assert!(probed(&events, 0));
    assert!(events.iter().any(|e| matches!(e, PlayerEvent::ProbeFailed { stream: 1, .. })));
    assert_eq!(player.start_time(), Some(TICKS_PER_SECOND));

    let video = stats_of(&handles, 0);
    assert_eq!(video.packets, 30);
    assert_eq!(video.first_pts, Some(TICKS_PER_SECOND));
    assert_eq!(video.pts_regressions, 0);
    let states = player.streams();
    assert_eq!(states[1].status, StreamStatus::Discarded);
    assert_eq!(states[1].delivered, 0);
}

#[test]
fn test_avi_结束点截断() {
    let (factory, handles) = factory(None);
    let (data, _) = avi_file(40, true);
    let muxed = open_memory(data, "clip.avi");
    let config = PlayerConfig {
        end_time: Some(20 * FRAME_TICKS),
        ..PlayerConfig::default()
    };
    let player = Player::start(muxed, config, factory).unwrap();
    let events = events_until_end(&player);

    assert_eq!(events.last(), Some(&PlayerEvent::End));
    let video = stats_of(&handles, 0);
    assert_eq!(video.packets, 21);
    assert_eq!(video.last_pts, Some(20 * FRAME_TICKS));
}

#[test]
fn test_暂停后清空再继续() {
    let (factory, handles) = factory(None);
    let muxed = open_memory(mkv_file(30), "clip.mkv");
    // 只缓冲几帧, 清空时读取还远未结束
    let config = PlayerConfig {
        buffer: 8 * FRAME_TICKS,
        min_packets: 2,
        max_packets: 16,
        realtime: true,
        tick_interval: 10,
        ..PlayerConfig::default()
    };
    let mut player = Player::start(muxed, config, factory).unwrap();
    let rx = player.events();
    let deadline = Instant::now() + WAIT;
    let mut ready = 0;
    while ready < 2 {
        if let PlayerEvent::ProbeOk { .. } = rx.recv_deadline(deadline).unwrap() {
            ready += 1;
        }
    }

    player.pause();
    player.flush();
    let states = player.streams();
    assert!(states.iter().all(|s| s.queued == 0));
    assert!(states.iter().all(|s| s.wants_data));

    player.resume();
    assert!(player.wait_end(WAIT));
    let video = stats_of(&handles, 0);
    assert!(video.flushes >= 1);
    assert_eq!(video.last_pts, Some(29 * FRAME_TICKS));
    player.close();
}
