//! 有理数类型, 用于时间基、帧率与宽高比.

use std::fmt;

/// 有理数, 由分子和分母组成
///
/// 时间基 1/90000 表示 90kHz 时钟, 帧率 30000/1001 表示 29.97fps.
/// AVI 的 `dwRate/dwScale` 与 Matroska 的 TimecodeScale 都先转成有理数再换算到 tick 域.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rational {
    /// 分子
    pub num: i64,
    /// 分母
    pub den: i64,
}

impl Rational {
    /// 创建新的有理数
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// 未定义 (分母为 0)
    pub const UNDEFINED: Self = Self { num: 0, den: 0 };

    /// 纳秒时间基
    pub const NANO: Self = Self {
        num: 1,
        den: 1_000_000_000,
    };

    /// MPEG 系统时钟 90kHz
    pub const MPEG_90K: Self = Self { num: 1, den: 90_000 };

    /// 判断是否有效 (分母不为 0)
    pub const fn is_valid(&self) -> bool {
        self.den != 0
    }

    /// 转换为 f64, 分母为 0 时返回 NaN
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            return f64::NAN;
        }
        self.num as f64 / self.den as f64
    }

    /// 约分, 并保证分母为正
    pub fn reduce(self) -> Self {
        if self.den == 0 {
            return self;
        }
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs());
        if g == 0 {
            return self;
        }
        let g = g as i64;
        let sign = if self.den < 0 { -1 } else { 1 };
        Self {
            num: sign * self.num / g,
            den: sign * self.den / g,
        }
    }

    /// 求倒数
    pub const fn invert(self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }

    /// 计算 `value * self`, 结果以 `unit` 为单位, 向下取整
    ///
    /// 内部使用 i128, 不会在中间结果上溢出. 任一时间基无效时返回 None.
    pub fn rescale(self, value: i64, unit: Rational) -> Option<i64> {
        if !self.is_valid() || !unit.is_valid() || unit.num == 0 {
            return None;
        }
        let num = i128::from(value) * i128::from(self.num) * i128::from(unit.den);
        let den = i128::from(self.den) * i128::from(unit.num);
        i64::try_from(num.div_euclid(den)).ok()
    }
}

impl std::ops::Mul for Rational {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        Self {
            num: self.num * other.num,
            den: self.den * other.den,
        }
        .reduce()
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(u32, u32)> for Rational {
    fn from((num, den): (u32, u32)) -> Self {
        Self::new(i64::from(num), i64::from(den))
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}
