//! Matroska 解封装集成测试: 探测 → 打开 → 读包 → 定位.

mod common;

use std::io::Write;

use common::{FRAME_TICKS, is_keyframe, mkv_file, open_memory};
use liu_core::{CodecId, LiuError, Packet};
use liu_format::{DemuxConfig, FormatId, MuxedStream};

fn read_data(muxed: &mut MuxedStream) -> Vec<liu_core::DataPacket> {
    let mut out = Vec::new();
    loop {
        match muxed.next_packet(None) {
            Ok(Packet::Data(d)) => out.push(d),
            Ok(_) => {}
            Err(LiuError::Eof) => return out,
            Err(e) => panic!("读取失败: {e}"),
        }
    }
}

#[test]
fn test_打开并解析流表() {
    let muxed = open_memory(mkv_file(30), "clip.mkv");
    assert_eq!(muxed.format_id(), FormatId::Matroska);
    assert_eq!(muxed.n_streams(), 2);

    let streams = muxed.streams();
    assert_eq!(streams[0].codec_id, CodecId::H264);
    let v = streams[0].video_params().unwrap();
    assert_eq!((v.width, v.height), (320, 240));
    assert_eq!(streams[1].codec_id, CodecId::Mp3);
    assert_eq!(streams[1].language.as_deref(), Some("chi"));
    let a = streams[1].audio_params().unwrap();
    assert_eq!((a.sample_rate, a.channels), (48000, 2));

    assert_eq!(muxed.duration(), Some(30 * FRAME_TICKS));
    assert!(muxed.metadata().iter().any(|(k, v)| k == "title" && v == "liu test"));
}

#[test]
fn test_按文件顺序读取全部数据包() {
    let mut muxed = open_memory(mkv_file(30), "clip.mkv");
    let packets = read_data(&mut muxed);
    assert_eq!(packets.len(), 60);

    let video: Vec<_> = packets.iter().filter(|p| p.stream_index == 0).collect();
    assert_eq!(video.len(), 30);
    for (i, p) in video.iter().enumerate() {
        assert_eq!(p.pts, Some(i as i64 * FRAME_TICKS));
        assert_eq!(p.is_keyframe(), is_keyframe(i), "帧 {i}");
        assert_eq!(p.size(), 200 + i % 13);
    }
    let audio: Vec<_> = packets.iter().filter(|p| p.stream_index == 1).collect();
    assert!(audio.windows(2).all(|w| w[0].pts < w[1].pts));
}

#[test]
fn test_定位到簇起点且可重复() {
    let mut muxed = open_memory(mkv_file(30), "clip.mkv");
    read_data(&mut muxed);

    let target = 15 * FRAME_TICKS;
    let actual = muxed.seek(target).unwrap();
    assert_eq!(actual, 10 * FRAME_TICKS);
    let first = read_data(&mut muxed);
    assert_eq!(first[0].pts, Some(actual));
    assert!(first[0].is_keyframe());

    assert_eq!(muxed.seek(target).unwrap(), actual);
    assert_eq!(muxed.seek(0).unwrap(), 0);
    assert_eq!(read_data(&mut muxed).len(), 60);
}

#[test]
fn test_未使用的流不输出() {
    let mut muxed = open_memory(mkv_file(20), "clip.mkv");
    muxed.set_used(1, false).unwrap();
    assert!(!muxed.is_used(1));
    let packets = read_data(&mut muxed);
    assert_eq!(packets.len(), 20);
    assert!(packets.iter().all(|p| p.stream_index == 0));
}

#[test]
fn test_从文件路径打开() {
    let mut file = tempfile::Builder::new().suffix(".mkv").tempfile().unwrap();
    file.write_all(&mkv_file(10)).unwrap();
    file.flush().unwrap();

    let path = file.path().to_string_lossy().to_string();
    let mut muxed = MuxedStream::open(&path, &DemuxConfig::default()).unwrap();
    assert_eq!(muxed.format_id(), FormatId::Matroska);
    assert_eq!(read_data(&mut muxed).len(), 20);
}
