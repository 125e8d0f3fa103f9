//! 比特流读取器.
//!
//! 按大端位序 (MSB first) 读取帧头字段. ADTS, AC-3, DTS 等帧头都是
//! 紧凑的位域, 长度不超过几十字节, 因此读取器直接在切片上工作.

use crate::{LiuError, LiuResult};

/// 比特流读取器
///
/// ```
/// use liu_core::bitreader::BitReader;
///
/// let data = [0b1011_0001, 0b0101_0101];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read(4).unwrap(), 0b1011);
/// assert_eq!(br.read(12).unwrap(), 0b0001_0101_0101);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    /// 已读位数
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// 创建新的读取器
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// 剩余可读位数
    pub fn bits_left(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    /// 已读位数
    pub fn position(&self) -> usize {
        self.pos
    }

    /// 读取 n 位 (n <= 32)
    pub fn read(&mut self, n: u32) -> LiuResult<u32> {
        if n > 32 {
            return Err(LiuError::InvalidArgument(format!("一次最多读取 32 位, 请求 {n}")));
        }
        if n as usize > self.bits_left() {
            return Err(LiuError::NeedMoreData);
        }
        let mut value = 0u64;
        for _ in 0..n {
            let byte = self.data[self.pos >> 3];
            let bit = (byte >> (7 - (self.pos & 7))) & 1;
            value = (value << 1) | u64::from(bit);
            self.pos += 1;
        }
        Ok(value as u32)
    }

    /// 读取单个标志位
    pub fn read_flag(&mut self) -> LiuResult<bool> {
        Ok(self.read(1)? == 1)
    }

    /// 读取 n 位并转换为 u8/u16 等窄类型
    pub fn read_as<T: TryFrom<u32>>(&mut self, n: u32) -> LiuResult<T> {
        let v = self.read(n)?;
        T::try_from(v).map_err(|_| LiuError::Internal(format!("{n} 位字段无法装入目标类型")))
    }

    /// 跳过 n 位
    pub fn skip(&mut self, n: usize) -> LiuResult<()> {
        if n > self.bits_left() {
            return Err(LiuError::NeedMoreData);
        }
        self.pos += n;
        Ok(())
    }
}
