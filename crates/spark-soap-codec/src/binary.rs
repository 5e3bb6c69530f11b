//! 替代二进制编码：以 MessagePack 序列化信息集。
//!
//! # 教案式说明
//! - **意图（Why）**：对端声明可接受二进制编码时，跳过 XML 文本化可显著降低编解码开销；
//! - **逻辑（How）**：把版本、头列表与载荷装入 [`BinaryEnvelope`]，用 `rmp_serde::to_vec_named` 输出带字段名的 MessagePack，
//!   二进制值直接作为字节串保存，无需 base64；消息带附件时以 `multipart/related` 打包，二进制信封作为根部件；
//! - **契约（What）**：媒体类型 [`BINARY_MEDIA_TYPE`]；解码时信封版本与编解码器版本不一致返回 [`CodecError::VersionMismatch`]；
//! - **风险（Trade-offs）**：格式只在本运行时之间互通，不追求与其他 SOAP 栈的二进制 XML 格式兼容。

use serde::{Deserialize, Serialize};
use spark_soap_core::{AttachmentSet, ContentType, Element, MessageParts, Packet, SoapVersion};

use crate::codec::{Codec, EncodedMessage};
use crate::error::CodecError;
use crate::media_type::MediaType;
use crate::mime::{self, MimePackage, MimePart};
use crate::mtom::{MULTIPART_RELATED, attachment_part, leftover};
use crate::soap::{self, EnvelopeContent};

pub const BINARY_MEDIA_TYPE: &str = "application/soap+msgpack";

/// 线上的二进制信封。
#[derive(Debug, Serialize, Deserialize)]
struct BinaryEnvelope {
    version: SoapVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    headers: Vec<Element>,
    body: Option<Element>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    trailing: Vec<Element>,
}

#[derive(Clone, Debug)]
pub struct BinaryCodec {
    version: SoapVersion,
}

impl BinaryCodec {
    pub fn new(version: SoapVersion) -> Self {
        Self { version }
    }

    fn content_type(soap_action: Option<&str>) -> ContentType {
        let content_type = ContentType::new(BINARY_MEDIA_TYPE);
        match soap_action {
            Some(action) => content_type.with_soap_action(format!("\"{action}\"")),
            None => content_type,
        }
    }

    pub(crate) fn encode_parts(
        &self,
        parts: MessageParts,
        soap_action: Option<&str>,
    ) -> Result<EncodedMessage, CodecError> {
        let envelope = BinaryEnvelope {
            version: self.version,
            action: soap_action.map(str::to_owned),
            headers: parts.headers.into_vec(),
            body: parts.payload,
            trailing: parts.trailing,
        };
        let encoded = rmp_serde::to_vec_named(&envelope)
            .map_err(|err| CodecError::Binary(err.to_string()))?;
        if parts.attachments.is_empty() {
            return Ok(EncodedMessage {
                body: encoded.into(),
                content_type: Self::content_type(soap_action),
            });
        }

        let root = MimePart {
            content_id: mime::new_content_id(),
            content_type: BINARY_MEDIA_TYPE.to_owned(),
            body: encoded.into(),
        };
        let attachments: Vec<MimePart> = parts.attachments.iter().map(attachment_part).collect();
        let boundary = mime::new_boundary();
        let body = mime::write_multipart(&boundary, &root, &attachments);
        let media = MediaType::new(MULTIPART_RELATED)
            .with_param("type", BINARY_MEDIA_TYPE)
            .with_param("start", format!("<{}>", root.content_id))
            .with_param("boundary", boundary);
        let mut content_type = ContentType::new(media.to_string());
        if let Some(action) = soap_action {
            content_type = content_type.with_soap_action(format!("\"{action}\""));
        }
        Ok(EncodedMessage { body, content_type })
    }

    fn decode_root(
        &self,
        body: &[u8],
        attachments: AttachmentSet,
        packet: &mut Packet,
    ) -> Result<(), CodecError> {
        let envelope: BinaryEnvelope =
            rmp_serde::from_slice(body).map_err(|err| CodecError::Binary(err.to_string()))?;
        if envelope.version != self.version {
            return Err(CodecError::VersionMismatch {
                expected: self.version,
                found: envelope.version.envelope_namespace().to_owned(),
            });
        }
        if let Some(action) = envelope.action.filter(|action| !action.is_empty()) {
            packet.set_soap_action(action);
        }
        let content = EnvelopeContent {
            headers: envelope.headers.into(),
            payload: envelope.body,
            trailing: envelope.trailing,
        };
        soap::install_message(packet, self.version, content, attachments);
        Ok(())
    }

    pub(crate) fn decode_package(
        &self,
        package: MimePackage,
        packet: &mut Packet,
    ) -> Result<(), CodecError> {
        let root_media = MediaType::parse(&package.root.content_type)?;
        if !root_media.is(BINARY_MEDIA_TYPE) {
            return Err(CodecError::UnsupportedMediaType(
                package.root.content_type.clone(),
            ));
        }
        let root = package.root.body.clone();
        self.decode_root(&root, leftover(package), packet)
    }
}

impl Codec for BinaryCodec {
    fn mime_type(&self) -> &str {
        BINARY_MEDIA_TYPE
    }

    fn static_content_type(&self, packet: &Packet) -> Option<ContentType> {
        let has_attachments = packet
            .message()
            .is_some_and(|message| message.has_attachments());
        (!has_attachments).then(|| Self::content_type(packet.soap_action()))
    }

    fn encode(&mut self, packet: &mut Packet) -> Result<EncodedMessage, CodecError> {
        let parts = soap::take_parts(packet)?;
        self.encode_parts(parts, packet.soap_action())
    }

    fn decode(
        &mut self,
        body: &[u8],
        content_type: &str,
        packet: &mut Packet,
    ) -> Result<(), CodecError> {
        let media = MediaType::parse(content_type)?;
        if media.is(BINARY_MEDIA_TYPE) {
            return self.decode_root(body, AttachmentSet::new(), packet);
        }
        if media.is(MULTIPART_RELATED) {
            let package = mime::parse_multipart(body, &media)?;
            return self.decode_package(package, packet);
        }
        Err(CodecError::UnsupportedMediaType(content_type.to_owned()))
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_soap_core::{BinaryData, Message};

    #[test]
    fn binary_values_are_carried_as_raw_bytes() {
        let mut codec = BinaryCodec::new(SoapVersion::Soap12);
        let payload = Element::ns("urn:t", "blob", "t")
            .with_binary(BinaryData::new(vec![0xffu8; 32]));
        let message = Message::new(SoapVersion::Soap12, payload.clone())
            .with_header(Element::ns("urn:h", "trace", "h").with_text("abc"));
        let mut packet = Packet::with_message(message);
        packet.set_soap_action("urn:t:blob");
        let encoded = codec.encode(&mut packet).expect("编码");
        assert_eq!(encoded.content_type.content_type(), BINARY_MEDIA_TYPE);

        let mut inbound = Packet::new();
        codec
            .decode(&encoded.body, BINARY_MEDIA_TYPE, &mut inbound)
            .expect("解码");
        assert_eq!(inbound.soap_action(), Some("urn:t:blob"));
        let mut message = inbound.take_message().expect("消息");
        assert_eq!(message.headers().len(), 1);
        assert_eq!(message.read_payload().expect("读取"), Some(payload));
    }

    #[test]
    fn version_mismatch_is_reported() {
        let mut soap11 = BinaryCodec::new(SoapVersion::Soap11);
        let mut packet = Packet::with_message(Message::empty(SoapVersion::Soap11));
        let encoded = soap11.encode(&mut packet).expect("编码");
        let mut soap12 = BinaryCodec::new(SoapVersion::Soap12);
        let err = soap12
            .decode(&encoded.body, BINARY_MEDIA_TYPE, &mut Packet::new())
            .expect_err("版本不匹配");
        assert!(matches!(err, CodecError::VersionMismatch { .. }));
    }
}
