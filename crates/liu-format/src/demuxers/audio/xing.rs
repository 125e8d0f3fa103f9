//! VBR 信息帧 (Xing/Info 与 VBRI).
//!
//! 两种标签都写在第一个 MPEG 音频帧里, 给出总帧数, 总字节数以及一张
//! 时间到字节偏移的查找表. 这里把两种查找表统一成等时间间隔的偏移点.

use super::mpa::MpaHeader;

/// 标签来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VbrKind {
    /// LAME 等编码器写入的 VBR 标签
    Xing,
    /// CBR 文件中的同格式标签
    Info,
    /// Fraunhofer 编码器的标签
    Vbri,
}

/// 解析出的 VBR 信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VbrInfo {
    pub kind: VbrKind,
    pub frames: Option<u32>,
    pub bytes: Option<u32>,
    /// 等时间间隔的字节偏移点 (相对第一个数据帧), 首点为 0
    pub seek_points: Vec<u64>,
}

const XING_FLAG_FRAMES: u32 = 0x01;
const XING_FLAG_BYTES: u32 = 0x02;
const XING_FLAG_TOC: u32 = 0x04;

/// VBRI 标签相对帧头的固定偏移
const VBRI_OFFSET: usize = 4 + 32;

fn be32(d: &[u8], pos: usize) -> Option<u32> {
    let b = d.get(pos..pos + 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn be16(d: &[u8], pos: usize) -> Option<u16> {
    let b = d.get(pos..pos + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

/// 在第一帧中查找 VBR 标签, `frame` 从帧头开始
pub fn parse(frame: &[u8], header: &MpaHeader) -> Option<VbrInfo> {
    if header.layer != 3 {
        return None;
    }
    parse_xing(frame, 4 + header.side_info_len()).or_else(|| parse_vbri(frame))
}

fn parse_xing(frame: &[u8], offset: usize) -> Option<VbrInfo> {
    let kind = match frame.get(offset..offset + 4)? {
        b"Xing" => VbrKind::Xing,
        b"Info" => VbrKind::Info,
        _ => return None,
    };
    let flags = be32(frame, offset + 4)?;
    let mut pos = offset + 8;
    let mut info = VbrInfo {
        kind,
        frames: None,
        bytes: None,
        seek_points: Vec::new(),
    };
    if flags & XING_FLAG_FRAMES != 0 {
        info.frames = Some(be32(frame, pos)?);
        pos += 4;
    }
    if flags & XING_FLAG_BYTES != 0 {
        info.bytes = Some(be32(frame, pos)?);
        pos += 4;
    }
    if flags & XING_FLAG_TOC != 0 {
        let toc = frame.get(pos..pos + 100)?;
        // 表项是总字节数的 1/256, 只有已知总字节数时才能换算
        if let Some(bytes) = info.bytes {
            let total = u64::from(bytes);
            info.seek_points = toc.iter().map(|&t| u64::from(t) * total / 256).collect();
            info.seek_points.push(total);
        }
    }
    Some(info)
}

fn parse_vbri(frame: &[u8]) -> Option<VbrInfo> {
    let base = VBRI_OFFSET;
    if frame.get(base..base + 4)? != b"VBRI" {
        return None;
    }
    let bytes = be32(frame, base + 10)?;
    let frames = be32(frame, base + 14)?;
    let entries = usize::from(be16(frame, base + 18)?);
    let scale = u64::from(be16(frame, base + 20)?);
    let entry_size = usize::from(be16(frame, base + 22)?);

    let mut seek_points = Vec::new();
    if (1..=4).contains(&entry_size) && entries > 0 {
        let table = frame.get(base + 26..base + 26 + entries * entry_size);
        if let Some(table) = table {
            let mut acc = 0u64;
            seek_points.push(0);
            for e in table.chunks_exact(entry_size) {
                let v = e.iter().fold(0u64, |v, &b| (v << 8) | u64::from(b));
                acc += v * scale;
                seek_points.push(acc);
            }
        }
    }
    Some(VbrInfo {
        kind: VbrKind::Vbri,
        frames: Some(frames),
        bytes: Some(bytes),
        seek_points,
    })
}

impl VbrInfo {
    /// 是否真正的 VBR (Info 标签表示 CBR)
    pub fn is_vbr(&self) -> bool {
        self.kind != VbrKind::Info
    }

    /// 按时间比例 (0.0..=1.0) 查表得到字节偏移
    pub fn offset_for(&self, fraction: f64) -> Option<u64> {
        let n = self.seek_points.len().checked_sub(1).filter(|&n| n > 0)?;
        let x = fraction.clamp(0.0, 1.0) * n as f64;
        let i = (x.floor() as usize).min(n - 1);
        let (a, b) = (self.seek_points[i] as f64, self.seek_points[i + 1] as f64);
        Some((a + (b - a) * (x - i as f64)) as u64)
    }

    /// `offset_for` 的反查: 字节偏移对应的时间比例
    pub fn fraction_for(&self, offset: u64) -> Option<f64> {
        let n = self.seek_points.len().checked_sub(1).filter(|&n| n > 0)?;
        for i in 0..n {
            let (a, b) = (self.seek_points[i], self.seek_points[i + 1]);
            if offset < b || i == n - 1 {
                let frac = if b > a {
                    (offset.saturating_sub(a)) as f64 / (b - a) as f64
                } else {
                    0.0
                };
                return Some(((i as f64 + frac.min(1.0)) / n as f64).clamp(0.0, 1.0));
            }
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::super::mpa::{self, tests::frame};
    use super::*;

    /// 128kbps 44.1kHz 立体声帧里写入 Xing 标签 (线性 TOC)
    pub(crate) fn xing_frame(frames: u32, bytes: u32) -> Vec<u8> {
        let mut f = frame(9, 0, false);
        let mut pos = 4 + 32;
        f[pos..pos + 4].copy_from_slice(b"Xing");
        f[pos + 4..pos + 8].copy_from_slice(&7u32.to_be_bytes());
        pos += 8;
        f[pos..pos + 4].copy_from_slice(&frames.to_be_bytes());
        f[pos + 4..pos + 8].copy_from_slice(&bytes.to_be_bytes());
        pos += 8;
        for i in 0..100 {
            f[pos + i] = (i * 256 / 100) as u8;
        }
        f
    }

    #[test]
    fn test_xing_标签() {
        let f = xing_frame(1000, 417_000);
        let h = mpa::parse_header(&f).unwrap();
        let info = parse(&f, &h).unwrap();
        assert_eq!(info.kind, VbrKind::Xing);
        assert!(info.is_vbr());
        assert_eq!(info.frames, Some(1000));
        assert_eq!(info.bytes, Some(417_000));
        assert_eq!(info.seek_points.len(), 101);
        assert_eq!(info.offset_for(0.0), Some(0));
        assert_eq!(info.offset_for(1.0), Some(417_000));
        let mid = info.offset_for(0.5).unwrap();
        assert!((mid as i64 - 208_500).abs() < 3000);
        let back = info.fraction_for(mid).unwrap();
        assert!((back - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_vbri_标签() {
        let mut f = frame(9, 0, false);
        let base = VBRI_OFFSET;
        f[base..base + 4].copy_from_slice(b"VBRI");
        f[base + 10..base + 14].copy_from_slice(&8000u32.to_be_bytes());
        f[base + 14..base + 18].copy_from_slice(&20u32.to_be_bytes());
        f[base + 18..base + 20].copy_from_slice(&4u16.to_be_bytes()); // 表项数
        f[base + 20..base + 22].copy_from_slice(&10u16.to_be_bytes()); // 缩放
        f[base + 22..base + 24].copy_from_slice(&2u16.to_be_bytes()); // 表项字节数
        for i in 0..4 {
            f[base + 26 + i * 2..base + 28 + i * 2].copy_from_slice(&200u16.to_be_bytes());
        }
        let h = mpa::parse_header(&f).unwrap();
        let info = parse(&f, &h).unwrap();
        assert_eq!(info.kind, VbrKind::Vbri);
        assert_eq!(info.frames, Some(20));
        assert_eq!(info.seek_points, vec![0, 2000, 4000, 6000, 8000]);
        assert_eq!(info.offset_for(0.25), Some(2000));
        assert_eq!(info.fraction_for(7000), Some(0.875));
    }

    #[test]
    fn test_无标签() {
        let f = frame(9, 0, false);
        let h = mpa::parse_header(&f).unwrap();
        assert!(parse(&f, &h).is_none());
    }
}
