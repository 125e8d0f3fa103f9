//! # Liu (流)
//!
//! 纯 Rust 实现的容器解封装与流式播放调度框架.
//!
//! - **解封装**: Matroska, MPEG-TS, MPEG-PS (含 DVD 导航包), AVI (含 OpenDML),
//!   以及 MP3/AAC/AC-3/DTS 裸流
//! - **管线**: 统一的处理级握手与数据流接口
//! - **播放调度**: 读取/消费/滴答线程, 按水位缓冲, 共享时钟, 清空与定位
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use liu::format::{DemuxConfig, MuxedStream};
//!
//! let mut muxed = MuxedStream::open("movie.ts", &DemuxConfig::default())?;
//! for stream in muxed.streams() {
//!     println!("#{} {}", stream.index, stream.codec_id);
//! }
//! while let Ok(packet) = muxed.next_packet(None) {
//!     println!("{:?}", packet.pts());
//! }
//! # Ok::<(), liu::core::LiuError>(())
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `liu-core` | 数据包, 错误, 时间与位读取工具 |
//! | `liu-format` | IO, 格式探测与各容器解封装 |
//! | `liu-pipeline` | 处理级与线性管线 |
//! | `liu-player` | 流式播放调度 |

/// 核心类型与工具
pub use liu_core as core;

/// 容器格式与解封装
pub use liu_format as format;

/// 处理级与管线
pub use liu_pipeline as pipeline;

/// 流式播放调度
pub use liu_player as player;

pub mod logging;
