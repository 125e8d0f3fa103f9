//! 音频裸流前后附带的元数据标签 (ID3v2, ID3v1, APEv2).
//!
//! 解封装只需要知道标签占了多少字节, 内容不解析.

/// ID3v1 固定长度
const ID3V1_LEN: usize = 128;
/// APEv2 页眉/页脚长度
const APE_FOOTER_LEN: usize = 32;
/// 计算尾部标签需要读取的字节数
pub const TRAILER_PROBE_LEN: usize = ID3V1_LEN + APE_FOOTER_LEN;

/// 开头的 ID3v2 标签总长 (含 10 字节头与可选页脚), 不是 ID3v2 时返回 None
pub fn id3v2_len(data: &[u8]) -> Option<u64> {
    let h = data.get(..10)?;
    if &h[..3] != b"ID3" || h[3] == 0xFF || h[4] == 0xFF {
        return None;
    }
    if h[6..10].iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    let size = h[6..10]
        .iter()
        .fold(0u64, |acc, &b| (acc << 7) | u64::from(b & 0x7F));
    let footer = if h[5] & 0x10 != 0 { 10 } else { 0 };
    Some(10 + size + footer)
}

/// 文件末尾 ID3v1 与 APEv2 标签总长, `tail` 为文件最后若干字节
pub fn trailing_len(tail: &[u8]) -> u64 {
    let mut end = tail.len();
    let mut total = 0u64;
    if end >= ID3V1_LEN && &tail[end - ID3V1_LEN..end - ID3V1_LEN + 3] == b"TAG" {
        end -= ID3V1_LEN;
        total += ID3V1_LEN as u64;
    }
    if end >= APE_FOOTER_LEN {
        let footer = &tail[end - APE_FOOTER_LEN..end];
        if &footer[..8] == b"APETAGEX" {
            let size = u32::from_le_bytes([footer[12], footer[13], footer[14], footer[15]]);
            let flags = u32::from_le_bytes([footer[20], footer[21], footer[22], footer[23]]);
            let header = if flags & 0x8000_0000 != 0 { APE_FOOTER_LEN as u64 } else { 0 };
            total += u64::from(size) + header;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id3v2_长度() {
        // 同步安全整数 0x00 0x00 0x02 0x01 = 257
        let h = [b'I', b'D', b'3', 4, 0, 0, 0, 0, 2, 1];
        assert_eq!(id3v2_len(&h), Some(267));
        let with_footer = [b'I', b'D', b'3', 4, 0, 0x10, 0, 0, 0, 5];
        assert_eq!(id3v2_len(&with_footer), Some(25));
        assert_eq!(id3v2_len(&[b'I', b'D', b'3', 4, 0, 0, 0x80, 0, 0, 0]), None);
        assert_eq!(id3v2_len(b"RIFF......"), None);
    }

    #[test]
    fn test_尾部标签() {
        let mut tail = vec![0u8; 200];
        assert_eq!(trailing_len(&tail), 0);

        let n = tail.len();
        tail[n - 128..n - 125].copy_from_slice(b"TAG");
        assert_eq!(trailing_len(&tail), 128);

        // APE 页脚位于 ID3v1 之前, 带页眉
        let ape = n - 128 - 32;
        tail[ape..ape + 8].copy_from_slice(b"APETAGEX");
        tail[ape + 12..ape + 16].copy_from_slice(&100u32.to_le_bytes());
        tail[ape + 20..ape + 24].copy_from_slice(&0x8000_0000u32.to_le_bytes());
        assert_eq!(trailing_len(&tail), 128 + 100 + 32);
    }
}
