//! # liu-core
//!
//! liu 框架核心库, 提供数据包模型、错误类型、时间戳工具与位读取器.
//!
//! 所有时间戳统一使用 27MHz tick 域, 见 [`timestamp`].

pub mod bitreader;
pub mod codec_id;
pub mod crc;
pub mod error;
pub mod media_type;
pub mod packet;
pub mod rational;
pub mod timestamp;

// 重导出常用类型
pub use codec_id::CodecId;
pub use error::{LiuError, LiuResult};
pub use media_type::MediaType;
pub use packet::{DataPacket, Packet, PacketFlags};
pub use rational::Rational;
pub use timestamp::TICKS_PER_SECOND;
