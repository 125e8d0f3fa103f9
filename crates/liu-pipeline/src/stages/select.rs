//! 按媒体类型或编码选择流.

use std::collections::VecDeque;

use liu_core::{CodecId, DataPacket, LiuError, LiuResult, MediaType, Packet};

use crate::{MediaFormat, ProbeStatus, Stage};

enum Rule {
    Media(Vec<MediaType>),
    Codecs(Vec<CodecId>),
}

/// 选择级: 握手时不在接受列表中的流返回 Fail, 之后原样转交
pub struct MediaSelect {
    rule: Rule,
    format: Option<MediaFormat>,
    queue: VecDeque<Packet>,
}

impl MediaSelect {
    /// 只接受给定媒体类型
    pub fn media(types: &[MediaType]) -> Self {
        Self::with_rule(Rule::Media(types.to_vec()))
    }

    /// 只接受给定编码
    pub fn codecs(codecs: &[CodecId]) -> Self {
        Self::with_rule(Rule::Codecs(codecs.to_vec()))
    }

    fn with_rule(rule: Rule) -> Self {
        Self {
            rule,
            format: None,
            queue: VecDeque::new(),
        }
    }

    fn accepts(&self, format: &MediaFormat) -> bool {
        match &self.rule {
            Rule::Media(types) => types.contains(&format.media_type()),
            Rule::Codecs(codecs) => codecs.contains(&format.codec_id),
        }
    }
}

impl Stage for MediaSelect {
    fn name(&self) -> &str {
        "select"
    }

    fn probe(&mut self, _sample: &DataPacket, hint: &MediaFormat) -> ProbeStatus {
        if !self.accepts(hint) {
            log::debug!("select: 拒绝流 {} ({})", hint.stream_index, hint.codec_id);
            return ProbeStatus::Fail;
        }
        self.format = Some(hint.clone());
        ProbeStatus::Ok
    }

    fn output_format(&self) -> Option<&MediaFormat> {
        self.format.as_ref()
    }

    fn input(&mut self, packet: Packet) -> LiuResult<()> {
        self.queue.push_back(packet);
        Ok(())
    }

    fn output(&mut self) -> LiuResult<Packet> {
        self.queue.pop_front().ok_or(LiuError::NeedMoreData)
    }

    fn flush(&mut self, discard: bool) -> LiuResult<()> {
        if discard {
            self.queue.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liu_format::Stream;

    fn probe(select: &mut MediaSelect, codec: CodecId) -> ProbeStatus {
        let hint = MediaFormat::from(&Stream::new(0, codec));
        select.probe(&DataPacket::new(0, vec![0u8]), &hint)
    }

    #[test]
    fn test_按媒体类型选择() {
        let mut select = MediaSelect::media(&[MediaType::Audio]);
        assert_eq!(probe(&mut select, CodecId::H264), ProbeStatus::Fail);
        assert!(select.output_format().is_none());
        assert_eq!(probe(&mut select, CodecId::Ac3), ProbeStatus::Ok);
        assert_eq!(select.output_format().unwrap().codec_id, CodecId::Ac3);
    }

    #[test]
    fn test_按编码选择() {
        let mut select = MediaSelect::codecs(&[CodecId::Mp2, CodecId::Mp3]);
        assert_eq!(probe(&mut select, CodecId::Aac), ProbeStatus::Fail);
        assert_eq!(probe(&mut select, CodecId::Mp2), ProbeStatus::Ok);
    }

    #[test]
    fn test_丢弃式清空() {
        let mut select = MediaSelect::media(&[MediaType::Video]);
        select.input(Packet::Timer { time: 1 }).unwrap();
        select.flush(true).unwrap();
        assert!(matches!(select.output(), Err(LiuError::NeedMoreData)));
    }
}
