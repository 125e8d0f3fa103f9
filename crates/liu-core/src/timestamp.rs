//! 时间戳工具.
//!
//! 所有数据包的 PTS/DTS 都位于 27MHz tick 域 (MPEG 90kHz 时钟 x 300),
//! 这样 MPEG 的 PCR 可以不经换算直接使用, 其他容器在解封装时换算进来.

use crate::rational::Rational;

/// 每秒 tick 数 (27MHz)
pub const TICKS_PER_SECOND: i64 = 27_000_000;

/// 90kHz 时钟到 tick 的倍数
pub const TICKS_PER_90K: i64 = 300;

/// tick 域时间基
pub const TICK_BASE: Rational = Rational::new(1, TICKS_PER_SECOND);

/// 把 90kHz 时间戳换算为 tick
pub const fn from_90k(value: i64) -> i64 {
    value * TICKS_PER_90K
}

/// 把 tick 换算为 90kHz 时间戳
pub const fn to_90k(ticks: i64) -> i64 {
    ticks.div_euclid(TICKS_PER_90K)
}

/// 把以 `time_base` 为单位的值换算为 tick
pub fn to_ticks(value: i64, time_base: Rational) -> Option<i64> {
    time_base.rescale(value, TICK_BASE)
}

/// 把 tick 换算为以 `time_base` 为单位的值
pub fn from_ticks(ticks: i64, time_base: Rational) -> Option<i64> {
    TICK_BASE.rescale(ticks, time_base)
}

/// tick 转秒
pub fn ticks_to_seconds(ticks: i64) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

/// 秒转 tick
pub fn seconds_to_ticks(seconds: f64) -> i64 {
    (seconds * TICKS_PER_SECOND as f64).round() as i64
}

/// 把 tick 格式化为 `HH:MM:SS.mmm`
pub fn format_ticks(ticks: i64) -> String {
    let sign = if ticks < 0 { "-" } else { "" };
    let ms = ticks.unsigned_abs() / (TICKS_PER_SECOND as u64 / 1000);
    format!(
        "{sign}{:02}:{:02}:{:02}.{:03}",
        ms / 3_600_000,
        ms / 60_000 % 60,
        ms / 1000 % 60,
        ms % 1000
    )
}

/// MPEG 33-bit 时间戳环绕修正
///
/// 若 `value` 比 `reference` 小了超过半个周期, 视为已经环绕并补上一个周期.
pub fn unwrap_33bit(value: i64, reference: i64) -> i64 {
    const PERIOD: i64 = 1 << 33;
    let mut v = value;
    while reference - v > PERIOD / 2 {
        v += PERIOD;
    }
    v
}
