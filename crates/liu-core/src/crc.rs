//! CRC 校验和计算.
//!
//! MPEG-TS 的 PSI 段 (PAT/PMT) 以 CRC-32/MPEG-2 结尾
//! (多项式 0x04C11DB7, 初始值 0xFFFFFFFF, 不反射, 不异或输出).
//! 对包含尾部 CRC 的完整段计算, 结果为 0 即校验通过.

/// CRC-32/MPEG-2 查找表
const CRC32_MPEG2_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i << 24;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04C1_1DB7;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// 计算 CRC-32/MPEG-2
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc = (crc << 8) ^ CRC32_MPEG2_TABLE[((crc >> 24) as u8 ^ byte) as usize];
    }
    crc
}
