//! 解封装器 (Demuxer) trait 定义.

use liu_core::{LiuResult, Packet};

use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::stream::Stream;

/// 解封装器 trait
///
/// 所有容器格式的解封装器都实现此 trait, 彼此之间没有依赖.
///
/// 使用流程:
/// 1. `open()` 解析容器头部, 建立流表
/// 2. `streams()` 获取流信息
/// 3. 循环 `read_packet()`, 直到返回 `Err(LiuError::Eof)`
/// 4. 可选: `seek()` 跳转到指定时间
///
/// 所有时间戳均位于 27MHz tick 域.
pub trait Demuxer: Send {
    /// 格式标识
    fn format_id(&self) -> FormatId;

    /// 格式名称
    fn name(&self) -> &str;

    /// 打开容器并解析头部信息
    fn open(&mut self, io: &mut IoContext) -> LiuResult<()>;

    /// 所有流信息
    fn streams(&self) -> &[Stream];

    /// 读取下一个包
    ///
    /// 除 Data 包外, 部分格式 (DVD 导航) 会插入 Flush/Still 控制包.
    /// 到达末尾时返回 `Err(LiuError::Eof)`.
    fn read_packet(&mut self, io: &mut IoContext) -> LiuResult<Packet>;

    /// 跳转到 `time` (tick), 返回实际落点
    fn seek(&mut self, io: &mut IoContext, time: i64) -> LiuResult<i64>;

    /// 容器时长 (tick), None 表示未知
    fn duration(&self) -> Option<i64>;

    /// 容器元数据
    fn metadata(&self) -> &[(String, String)] {
        &[]
    }
}
