//! # liu-play
//!
//! 用空终点管线驱动流式播放器: 打开容器, 为每条流握手并消费数据包,
//! 报告播放器事件与每条流的包统计. 不做解码与渲染.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use liu::core::MediaType;
use liu::core::timestamp::{format_ticks, seconds_to_ticks};
use liu::format::{DemuxConfig, Stream};
use liu::logging::{self, LogOptions};
use liu::pipeline::{KeyframeGate, MediaSelect, NullSink, Pipeline, PtsInterpolator, StatsHandle};
use liu::player::{PipelineFactory, Player, PlayerConfig, PlayerEvent, StreamStatus};

/// 只播放的媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Only {
    Video,
    Audio,
    Subtitle,
}

/// Liu 流式播放器 (空终点)
#[derive(Parser, Debug)]
#[command(name = "liu-play", version, about = "Liu 流式播放调度器")]
struct Cli {
    /// 输入文件路径或 URL
    input: String,

    /// 配置文件 (JSON, 含 demux 与 player 两节)
    #[arg(long)]
    config: Option<PathBuf>,

    /// 起始时间 (秒, 容器时间)
    #[arg(long)]
    start: Option<f64>,

    /// 相对起始点的播放时长 (秒)
    #[arg(long)]
    duration: Option<f64>,

    /// 按时钟节奏送包
    #[arg(long)]
    realtime: bool,

    /// 只播放某一类流
    #[arg(long, value_enum)]
    only: Option<Only>,

    /// 视频流在首个关键帧之前的包丢弃
    #[arg(long)]
    keyframe_gate: bool,

    /// 补全缺失的 PTS
    #[arg(long)]
    interpolate: bool,

    /// 超时 (秒), 到时关闭播放器
    #[arg(long)]
    timeout: Option<f64>,

    /// 以 JSON 输出统计
    #[arg(long)]
    json: bool,

    /// 日志详细程度 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// 不写日志文件
    #[arg(long)]
    no_log_file: bool,
}

/// 配置文件
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlayConfig {
    demux: DemuxConfig,
    player: PlayerConfig,
}

#[derive(Serialize)]
struct StreamReport {
    index: usize,
    codec: String,
    status: String,
    attempts: u32,
    packets: u64,
    bytes: u64,
    flushes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_pts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_pts: Option<i64>,
    pts_regressions: u64,
}

#[derive(Serialize)]
struct Report {
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<i64>,
    elapsed_ms: u128,
    ended: bool,
    errors: Vec<String>,
    streams: Vec<StreamReport>,
}

fn main() {
    let cli = Cli::parse();
    let mut log_options = LogOptions::new("liu-play", cli.verbose);
    if cli.no_log_file {
        log_options.directory = None;
    }
    if let Err(e) = logging::init(&log_options) {
        eprintln!("日志初始化失败: {e:#}");
    }
    match run(&cli) {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            eprintln!("错误: {e:#}");
            process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> Result<PlayConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("读取配置失败: {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("解析配置失败: {}", path.display()))?
        }
        None => PlayConfig::default(),
    };
    if let Some(start) = cli.start {
        config.player.start_time = Some(seconds_to_ticks(start));
    }
    if let Some(duration) = cli.duration {
        if duration <= 0.0 {
            bail!("--duration 必须为正");
        }
        config.player.end_time = Some(seconds_to_ticks(duration));
    }
    if cli.realtime {
        config.player.realtime = true;
    }
    Ok(config)
}

/// 每条流: [选择] -> [关键帧门] -> [PTS 补全] -> 空终点
fn pipeline_factory(
    cli: &Cli,
    stats: Arc<Mutex<Vec<(usize, StatsHandle)>>>,
) -> PipelineFactory {
    let only = cli.only.map(|o| match o {
        Only::Video => MediaType::Video,
        Only::Audio => MediaType::Audio,
        Only::Subtitle => MediaType::Subtitle,
    });
    let keyframe_gate = cli.keyframe_gate;
    let interpolate = cli.interpolate;
    Arc::new(move |stream: &Stream| {
        let mut pipeline = Pipeline::new();
        if let Some(media) = only {
            pipeline.push(Box::new(MediaSelect::media(&[media])));
        }
        if keyframe_gate && stream.media_type() == MediaType::Video {
            pipeline.push(Box::new(KeyframeGate::new()));
        }
        if interpolate {
            pipeline.push(Box::new(PtsInterpolator::new()));
        }
        let (sink, handle) = NullSink::new();
        pipeline.push(Box::new(sink));
        stats.lock().push((stream.index, handle));
        debug!("流 {} 管线: {:?}", stream.index, pipeline.names());
        Some(pipeline)
    })
}

fn run(cli: &Cli) -> Result<bool> {
    let config = load_config(cli)?;
    let stats = Arc::new(Mutex::new(Vec::new()));
    let factory = pipeline_factory(cli, Arc::clone(&stats));

    let started = Instant::now();
    let mut player = Player::open(&cli.input, &config.demux, config.player, factory)
        .with_context(|| format!("无法打开 '{}'", cli.input))?;
    let deadline = cli
        .timeout
        .map(|t| started + Duration::from_secs_f64(t.max(0.0)));

    let events = player.events();
    let mut errors = Vec::new();
    let mut ended = false;
    loop {
        let event = match deadline {
            Some(deadline) => match events.recv_deadline(deadline) {
                Ok(event) => event,
                Err(_) => {
                    warn!("超时, 关闭播放器");
                    break;
                }
            },
            None => match events.recv() {
                Ok(event) => event,
                Err(_) => break,
            },
        };
        match &event {
            PlayerEvent::Tick { time } => debug!("时钟 {}", format_ticks(*time)),
            PlayerEvent::Error(msg) => {
                warn!("{event}");
                errors.push(msg.clone());
            }
            PlayerEvent::End => {
                info!("{event}");
                ended = true;
                break;
            }
            _ => info!("{event}"),
        }
    }
    let start_time = player.start_time();
    let states = player.streams();
    player.close();

    let stats = stats.lock();
    let streams = states
        .iter()
        .map(|state| {
            let snapshot = stats
                .iter()
                .find(|(index, _)| *index == state.index)
                .map(|(_, handle)| handle.snapshot())
                .unwrap_or_default();
            StreamReport {
                index: state.index,
                codec: state.codec_id.to_string(),
                status: status_name(state.status).to_string(),
                attempts: state.attempts,
                packets: snapshot.packets,
                bytes: snapshot.bytes,
                flushes: snapshot.flushes,
                first_pts: snapshot.first_pts,
                last_pts: snapshot.last_pts,
                pts_regressions: snapshot.pts_regressions,
            }
        })
        .collect();
    let report = Report {
        input: cli.input.clone(),
        start_time,
        elapsed_ms: started.elapsed().as_millis(),
        ended,
        errors,
        streams,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report);
    }
    Ok(ended && report.errors.is_empty())
}

fn status_name(status: StreamStatus) -> &'static str {
    match status {
        StreamStatus::Probing => "probing",
        StreamStatus::Active => "active",
        StreamStatus::Discarded => "discarded",
        StreamStatus::Ended => "ended",
    }
}

fn print_text(report: &Report) {
    println!("[PLAYBACK]");
    println!("  输入         : {}", report.input);
    if let Some(start) = report.start_time {
        println!("  起始时间     : {}", format_ticks(start));
    }
    println!("  耗时         : {} ms", report.elapsed_ms);
    println!("  正常结束     : {}", if report.ended { "是" } else { "否" });
    for error in &report.errors {
        println!("  错误         : {error}");
    }
    println!("[/PLAYBACK]");
    println!();
    for s in &report.streams {
        println!("[STREAM #{}] {} ({})", s.index, s.codec, s.status);
        println!("  握手次数     : {}", s.attempts);
        println!("  数据包       : {}", s.packets);
        println!("  字节数       : {}", s.bytes);
        if s.flushes > 0 {
            println!("  清空次数     : {}", s.flushes);
        }
        if let (Some(first), Some(last)) = (s.first_pts, s.last_pts) {
            println!("  PTS 范围     : {} - {}", format_ticks(first), format_ticks(last));
        }
        if s.pts_regressions > 0 {
            println!("  PTS 倒退     : {}", s.pts_regressions);
        }
        println!("[/STREAM]");
    }
}
