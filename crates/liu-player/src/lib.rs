//! # liu-player
//!
//! Liu 多媒体框架的流式播放调度器.
//!
//! 播放器从 [`liu_format::MuxedStream`] 读包, 先用样本包与每条流的管线握手,
//! 握手成功后把包放进该流的队列, 由独立的消费线程按顺序送入管线.
//! 每个队列有按包数与时长计的高低水位, 读取线程只在至少一条流需要数据时读包.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use liu_format::DemuxConfig;
//! use liu_pipeline::{NullSink, Pipeline};
//! use liu_player::{Player, PlayerConfig, PlayerEvent};
//!
//! let factory = Arc::new(|_: &liu_format::Stream| {
//!     let (sink, _stats) = NullSink::new();
//!     Some(Pipeline::new().with(Box::new(sink)))
//! });
//! let player = Player::open("movie.mkv", &DemuxConfig::default(), PlayerConfig::default(), factory)?;
//! for event in player.events().iter() {
//!     if event == PlayerEvent::End {
//!         break;
//!     }
//! }
//! # Ok::<(), liu_core::LiuError>(())
//! ```

pub mod clock;
pub mod config;
mod consumer;
pub mod event;
mod player;
pub mod queue;
mod reader;
mod ticker;

pub use clock::Clock;
pub use config::PlayerConfig;
pub use event::PlayerEvent;
pub use player::{PipelineFactory, Player, StreamState, StreamStatus};
pub use queue::PacketQueue;
