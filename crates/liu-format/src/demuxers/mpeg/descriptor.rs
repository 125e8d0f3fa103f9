//! MPEG 描述符解析.
//!
//! 描述符统一为 `tag(8) length(8) data[length]` 的 TLV 结构,
//! 只提取判定编码与语言所需的少数几种, 其余跳过.

use log::trace;

/// registration_descriptor
pub const TAG_REGISTRATION: u8 = 0x05;
/// ISO_639_language_descriptor
pub const TAG_LANGUAGE: u8 = 0x0A;
/// stream_identifier_descriptor (DVB)
pub const TAG_STREAM_IDENTIFIER: u8 = 0x52;
/// teletext_descriptor (DVB)
pub const TAG_TELETEXT: u8 = 0x56;
/// subtitling_descriptor (DVB)
pub const TAG_SUBTITLING: u8 = 0x59;
/// AC-3_descriptor (DVB)
pub const TAG_DVB_AC3: u8 = 0x6A;
/// enhanced_AC-3_descriptor (DVB)
pub const TAG_DVB_EAC3: u8 = 0x7A;
/// DTS_descriptor (DVB)
pub const TAG_DVB_DTS: u8 = 0x7B;
/// AAC_descriptor (DVB)
pub const TAG_DVB_AAC: u8 = 0x7C;
/// AC-3 audio descriptor (ATSC)
pub const TAG_ATSC_AC3: u8 = 0x81;
/// E-AC-3 audio descriptor (ATSC)
pub const TAG_ATSC_EAC3: u8 = 0xCC;

/// 从描述符循环中提取的信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EsDescriptors {
    /// ISO 639 语言代码
    pub language: Option<String>,
    /// registration format_identifier
    pub registration: Option<[u8; 4]>,
    pub ac3: bool,
    pub eac3: bool,
    pub dts: bool,
    pub aac: bool,
    pub dvb_subtitle: bool,
    pub teletext: bool,
    /// DVB component_tag
    pub stream_identifier: Option<u8>,
}

/// 解析描述符循环, 截断的尾部描述符被忽略
pub fn parse_descriptors(mut data: &[u8]) -> EsDescriptors {
    let mut out = EsDescriptors::default();
    while data.len() >= 2 {
        let tag = data[0];
        let len = usize::from(data[1]);
        let Some(body) = data.get(2..2 + len) else {
            trace!("描述符 0x{tag:02X} 截断, 声明 {len} 字节");
            break;
        };
        match tag {
            TAG_REGISTRATION if body.len() >= 4 => {
                out.registration = Some([body[0], body[1], body[2], body[3]]);
            }
            TAG_LANGUAGE if body.len() >= 3 => {
                let code: String = body[..3]
                    .iter()
                    .filter(|b| b.is_ascii_alphabetic())
                    .map(|&b| char::from(b).to_ascii_lowercase())
                    .collect();
                if !code.is_empty() {
                    out.language = Some(code);
                }
            }
            TAG_SUBTITLING => {
                out.dvb_subtitle = true;
                // 每条 8 字节, 前 3 字节为语言
                if out.language.is_none() && body.len() >= 3 {
                    out.language = std::str::from_utf8(&body[..3]).ok().map(str::to_string);
                }
            }
            TAG_STREAM_IDENTIFIER if !body.is_empty() => out.stream_identifier = Some(body[0]),
            TAG_TELETEXT => out.teletext = true,
            TAG_DVB_AC3 | TAG_ATSC_AC3 => out.ac3 = true,
            TAG_DVB_EAC3 | TAG_ATSC_EAC3 => out.eac3 = true,
            TAG_DVB_DTS => out.dts = true,
            TAG_DVB_AAC => out.aac = true,
            _ => {}
        }
        data = &data[2 + len..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_解析常见描述符() {
        let data = [
            0x0A, 4, b'E', b'N', b'G', 0, // 语言
            0x05, 4, b'A', b'C', b'-', b'3', // registration
            0x52, 1, 7, // component_tag
            0x6A, 1, 0x00, // DVB AC-3
        ];
        let d = parse_descriptors(&data);
        assert_eq!(d.language.as_deref(), Some("eng"));
        assert_eq!(d.registration, Some(*b"AC-3"));
        assert_eq!(d.stream_identifier, Some(7));
        assert!(d.ac3);
        assert!(!d.eac3);
    }

    #[test]
    fn test_截断描述符不越界() {
        let data = [0x0A, 4, b'd', b'e', b'u', 0, 0x05, 10, b'H', b'E'];
        let d = parse_descriptors(&data);
        assert_eq!(d.language.as_deref(), Some("deu"));
        assert_eq!(d.registration, None);
    }
}
