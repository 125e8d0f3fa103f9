//! liu-probe - 容器信息探测工具
//!
//! 打开一个文件或 URL, 输出容器与流信息 (文本或 JSON), 可选逐包转储.

use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use serde::Serialize;

use liu::core::timestamp::{format_ticks, ticks_to_seconds};
use liu::core::{LiuError, Packet, PacketFlags};
use liu::format::{DemuxConfig, MuxedStream, Stream, StreamParams};
use liu::logging::{self, LogOptions};

/// Liu 容器信息探测工具
#[derive(Parser, Debug)]
#[command(name = "liu-probe", version, about = "纯 Rust 容器信息探测工具")]
struct Cli {
    /// 输入文件路径或 URL
    input: String,

    /// 解封装配置 (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// 逐包输出 (会读取全部数据包)
    #[arg(long)]
    show_packets: bool,

    /// 最多读取的包数, 0 表示不限
    #[arg(long, default_value_t = 0)]
    max_packets: u64,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,

    /// 日志详细程度 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// 不写日志文件
    #[arg(long)]
    no_log_file: bool,
}

// ============================================================
// 输出结构体
// ============================================================

#[derive(Serialize)]
struct ProbeOutput {
    format: FormatInfo,
    streams: Vec<StreamInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    packets: Vec<PacketInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<PacketSummary>,
}

#[derive(Serialize)]
struct FormatInfo {
    filename: String,
    format_name: String,
    nb_streams: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    metadata: Vec<(String, String)>,
}

#[derive(Serialize)]
struct StreamInfo {
    index: usize,
    codec_type: String,
    codec_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bit_rate: Option<u64>,
    nb_frames: u64,
    default: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    metadata: Vec<(String, String)>,
}

#[derive(Serialize)]
struct PacketInfo {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pos: Option<u64>,
    keyframe: bool,
    discontinuity: bool,
}

#[derive(Serialize, Default)]
struct PacketSummary {
    total_packets: u64,
    total_bytes: u64,
    control_packets: u64,
    per_stream: Vec<u64>,
}

// ============================================================
// 主逻辑
// ============================================================

fn main() {
    let cli = Cli::parse();
    let mut log_options = LogOptions::new("liu-probe", cli.verbose);
    if cli.no_log_file {
        log_options.directory = None;
    }
    if let Err(e) = logging::init(&log_options) {
        eprintln!("日志初始化失败: {e:#}");
    }
    if let Err(e) = run(&cli) {
        eprintln!("错误: {e:#}");
        process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<DemuxConfig> {
    let Some(path) = path else {
        return Ok(DemuxConfig::default());
    };
    let text =
        fs::read_to_string(path).with_context(|| format!("读取配置失败: {}", path.display()))?;
    DemuxConfig::from_json(&text).with_context(|| format!("解析配置失败: {}", path.display()))
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    let mut muxed = MuxedStream::open(&cli.input, &config)
        .with_context(|| format!("无法打开 '{}'", cli.input))?;
    info!("格式: {} ({} 条流)", muxed.format_name(), muxed.n_streams());

    let mut packets = Vec::new();
    let summary = if cli.show_packets || cli.max_packets > 0 {
        Some(read_packets(&mut muxed, cli, &mut packets)?)
    } else {
        None
    };

    // 部分格式在读包过程中才发现新流, 所以流表在读包之后收集
    let output = ProbeOutput {
        format: FormatInfo {
            filename: cli.input.clone(),
            format_name: muxed.format_name().to_string(),
            nb_streams: muxed.n_streams(),
            duration: muxed.duration().map(ticks_to_seconds),
            metadata: muxed.metadata().to_vec(),
        },
        streams: muxed.streams().iter().map(build_stream_info).collect(),
        packets,
        summary,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text(&output);
    }
    Ok(())
}

fn read_packets(
    muxed: &mut MuxedStream,
    cli: &Cli,
    dump: &mut Vec<PacketInfo>,
) -> Result<PacketSummary> {
    let mut summary = PacketSummary::default();
    loop {
        if cli.max_packets > 0 && summary.total_packets >= cli.max_packets {
            break;
        }
        let packet = match muxed.next_packet(None) {
            Ok(p) => p,
            Err(LiuError::Eof) => break,
            Err(e) => {
                warn!("读取数据包时出错: {e}");
                break;
            }
        };
        summary.total_packets += 1;
        match &packet {
            Packet::Data(d) => {
                summary.total_bytes += d.size() as u64;
                if summary.per_stream.len() <= d.stream_index {
                    summary.per_stream.resize(d.stream_index + 1, 0);
                }
                summary.per_stream[d.stream_index] += 1;
            }
            _ => summary.control_packets += 1,
        }
        if cli.show_packets {
            dump.push(packet_info(&packet));
        }
    }
    Ok(summary)
}

fn packet_info(packet: &Packet) -> PacketInfo {
    let kind = match packet {
        Packet::Data(_) => "data",
        Packet::Flush { .. } => "flush",
        Packet::Still { .. } => "still",
        Packet::Timer { .. } => "timer",
    };
    let data = packet.as_data();
    PacketInfo {
        kind,
        stream: packet.stream_index(),
        pts: packet.pts(),
        dts: data.and_then(|d| d.dts),
        size: data.map(|d| d.size()),
        pos: data.and_then(|d| d.pos),
        keyframe: data.is_some_and(|d| d.is_keyframe()),
        discontinuity: data.is_some_and(|d| d.flags.contains(PacketFlags::DISCONTINUITY)),
    }
}

fn build_stream_info(stream: &Stream) -> StreamInfo {
    let mut info = StreamInfo {
        index: stream.index,
        codec_type: stream.media_type().to_string(),
        codec_name: stream.codec_id.to_string(),
        start_time: stream.start_time.map(ticks_to_seconds),
        duration: stream.duration.map(ticks_to_seconds),
        language: stream.language.clone(),
        width: None,
        height: None,
        frame_rate: None,
        aspect: None,
        sample_rate: None,
        channels: None,
        bit_rate: (stream.bit_rate > 0).then_some(stream.bit_rate),
        nb_frames: stream.nb_frames,
        default: stream.flags.contains(liu::format::StreamFlags::DEFAULT),
        metadata: stream.metadata.clone(),
    };
    match &stream.params {
        StreamParams::Video(v) => {
            info.width = (v.width > 0).then_some(v.width);
            info.height = (v.height > 0).then_some(v.height);
            info.frame_rate = v.frame_rate.is_valid().then(|| v.frame_rate.to_string());
            info.aspect = v.aspect.is_valid().then(|| v.aspect.to_string());
        }
        StreamParams::Audio(a) => {
            info.sample_rate = (a.sample_rate > 0).then_some(a.sample_rate);
            info.channels = (a.channels > 0).then_some(a.channels);
        }
        _ => {}
    }
    info
}

fn print_text(output: &ProbeOutput) {
    let format = &output.format;
    println!("[FORMAT]");
    println!("  文件名       : {}", format.filename);
    println!("  格式名称     : {}", format.format_name);
    println!("  流数量       : {}", format.nb_streams);
    if let Some(dur) = format.duration {
        println!("  时长         : {dur:.3} 秒");
    }
    for (key, value) in &format.metadata {
        println!("  {key:<13}: {value}");
    }
    println!("[/FORMAT]");
    println!();

    for stream in &output.streams {
        println!("[STREAM #{}]", stream.index);
        println!("  类型         : {}", stream.codec_type);
        println!("  编码         : {}", stream.codec_name);
        if let Some(start) = stream.start_time {
            println!("  起始时间     : {start:.3} 秒");
        }
        if let Some(dur) = stream.duration {
            println!("  时长         : {dur:.3} 秒");
        }
        if let Some(ref lang) = stream.language {
            println!("  语言         : {lang}");
        }
        if let (Some(w), Some(h)) = (stream.width, stream.height) {
            println!("  分辨率       : {w}x{h}");
        }
        if let Some(ref fr) = stream.frame_rate {
            println!("  帧率         : {fr}");
        }
        if let Some(ref aspect) = stream.aspect {
            println!("  宽高比       : {aspect}");
        }
        if let Some(sr) = stream.sample_rate {
            println!("  采样率       : {sr} Hz");
        }
        if let Some(ch) = stream.channels {
            println!("  声道数       : {ch}");
        }
        if let Some(br) = stream.bit_rate {
            println!("  码率         : {} kbps", br / 1000);
        }
        if stream.nb_frames > 0 {
            println!("  帧数         : {}", stream.nb_frames);
        }
        if stream.default {
            println!("  默认流       : 是");
        }
        println!("[/STREAM]");
        println!();
    }

    for p in &output.packets {
        let stream = p.stream.map_or("-".to_string(), |s| s.to_string());
        let pts = p.pts.map_or("-".to_string(), format_ticks);
        let dts = p.dts.map_or("-".to_string(), format_ticks);
        let size = p.size.map_or("-".to_string(), |s| s.to_string());
        let flags = format!(
            "{}{}",
            if p.keyframe { "K" } else { "_" },
            if p.discontinuity { "D" } else { "_" }
        );
        println!(
            "{:<6} #{stream:<3} pts={pts:<14} dts={dts:<14} size={size:<8} {flags}",
            p.kind
        );
    }

    if let Some(summary) = &output.summary {
        println!("[PACKETS]");
        println!("  数据包总数   : {}", summary.total_packets);
        println!("  控制包       : {}", summary.control_packets);
        println!(
            "  数据总量     : {} 字节 ({:.2} KB)",
            summary.total_bytes,
            summary.total_bytes as f64 / 1024.0
        );
        for (index, count) in summary.per_stream.iter().enumerate() {
            println!("  流 #{index:<8}: {count}");
        }
        println!("[/PACKETS]");
    }
}
