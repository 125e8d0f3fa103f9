//! 容器格式标识符.

use std::fmt;

/// 容器格式标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FormatId {
    /// Matroska / WebM
    Matroska,
    /// Audio Video Interleave
    Avi,
    /// MPEG 传输流
    MpegTs,
    /// MPEG 节目流 (含 DVD VOB 与 MPEG 视频基本流)
    MpegPs,
    /// MPEG 音频基本流 (MP1/MP2/MP3)
    MpegAudio,
    /// ADTS 封装的 AAC
    AacAdts,
    /// AC-3 / E-AC-3 基本流
    Ac3,
    /// DTS 基本流 (四种字节布局)
    Dts,
}

impl FormatId {
    /// 所有已知格式
    pub const ALL: &[FormatId] = &[
        Self::Matroska,
        Self::Avi,
        Self::MpegTs,
        Self::MpegPs,
        Self::MpegAudio,
        Self::AacAdts,
        Self::Ac3,
        Self::Dts,
    ];

    /// 格式短名
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Matroska => "matroska",
            Self::Avi => "avi",
            Self::MpegTs => "mpegts",
            Self::MpegPs => "mpegps",
            Self::MpegAudio => "mpa",
            Self::AacAdts => "aac",
            Self::Ac3 => "ac3",
            Self::Dts => "dts",
        }
    }

    /// 常用扩展名
    pub const fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Matroska => &["mkv", "mka", "mks", "webm"],
            Self::Avi => &["avi", "divx"],
            Self::MpegTs => &["ts", "m2ts", "mts", "trp"],
            Self::MpegPs => &["mpg", "mpeg", "vob", "m2v", "m1v"],
            Self::MpegAudio => &["mp3", "mp2", "mp1", "mpa"],
            Self::AacAdts => &["aac"],
            Self::Ac3 => &["ac3", "eac3"],
            Self::Dts => &["dts"],
        }
    }

    /// 根据文件扩展名猜测格式
    pub fn from_extension(ext: &str) -> Option<FormatId> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.extensions().contains(&ext.as_str()))
    }

    /// 根据文件名 (或 URL) 猜测格式
    pub fn from_filename(filename: &str) -> Option<FormatId> {
        let (_, ext) = filename.rsplit_once('.')?;
        Self::from_extension(ext)
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
