//! 纯 SOAP 信封编解码。
//!
//! # 契约说明（What）
//! - SOAP 1.1：`text/xml; charset=utf-8`，动作经由 [`ContentType::soap_action`]（`SOAPAction` 头）携带；
//! - SOAP 1.2：`application/soap+xml; charset=utf-8; action="..."`；
//! - 头部为空时省略 `Header` 元素；空消息体写出空的 `Body`；
//! - 本编解码器不能携带附件，带附件的消息须交给 MTOM 或 SwA。

use spark_soap_core::{ContentType, Element, HeaderList, Message, MessageParts, Node, Packet, SoapVersion};

use crate::codec::{Codec, EncodedMessage};
use crate::error::CodecError;
use crate::media_type::MediaType;
use crate::xml::{BinaryPolicy, XmlWriter, XopPart, parse_document};

/// 信封中解析出的头与载荷。
pub(crate) struct EnvelopeContent {
    pub headers: HeaderList,
    pub payload: Option<Element>,
    pub trailing: Vec<Element>,
}

/// 写出完整信封。
pub(crate) fn write_envelope(
    version: SoapVersion,
    headers: &HeaderList,
    payload: Option<&Element>,
    trailing: &[Element],
    policy: BinaryPolicy,
) -> (String, Vec<XopPart>) {
    let mut writer = XmlWriter::new(policy);
    writer.declaration();
    let envelope = version.qname("Envelope");
    writer.open(&envelope, &[]);
    if !headers.is_empty() {
        let header = version.qname("Header");
        writer.open(&header, &[]);
        for element in headers.iter() {
            writer.element(element);
        }
        writer.close(&header);
    }
    let body = version.qname("Body");
    writer.open(&body, &[]);
    for element in payload.into_iter().chain(trailing) {
        writer.element(element);
    }
    writer.close(&body);
    writer.close(&envelope);
    writer.finish()
}

/// 解析信封并校验版本。
pub(crate) fn read_envelope(
    input: &[u8],
    expected: SoapVersion,
) -> Result<EnvelopeContent, CodecError> {
    let root = parse_document(input)?;
    if root.name().local() != "Envelope" {
        return Err(CodecError::MalformedEnvelope(format!(
            "root element is `{}`, expected `Envelope`",
            root.name()
        )));
    }
    if SoapVersion::from_envelope_namespace(root.name().namespace()) != Some(expected) {
        return Err(CodecError::VersionMismatch {
            expected,
            found: root.name().namespace().to_owned(),
        });
    }

    let namespace = expected.envelope_namespace();
    let mut headers = HeaderList::new();
    let mut body = Vec::new();
    let mut saw_body = false;
    for node in root.into_children() {
        let Node::Element(child) = node else {
            continue;
        };
        if child.name().is(namespace, "Header") && !saw_body {
            for entry in child.into_children() {
                if let Node::Element(header) = entry {
                    headers.add(header);
                }
            }
        } else if child.name().is(namespace, "Body") && !saw_body {
            saw_body = true;
            for entry in child.into_children() {
                match entry {
                    Node::Element(element) => body.push(element),
                    Node::Text(text) if text.trim().is_empty() => {}
                    _ => {
                        return Err(CodecError::MalformedEnvelope(
                            "Body carries character content".to_owned(),
                        ));
                    }
                }
            }
        }
    }
    if !saw_body {
        return Err(CodecError::MalformedEnvelope("envelope has no Body".to_owned()));
    }
    let mut body = body.into_iter();
    Ok(EnvelopeContent {
        headers,
        payload: body.next(),
        trailing: body.collect(),
    })
}

/// 纯 XML 载荷的内容类型。
pub(crate) fn xml_content_type(version: SoapVersion, soap_action: Option<&str>) -> ContentType {
    match version {
        SoapVersion::Soap11 => {
            let content_type = ContentType::new(
                MediaType::new(version.media_type())
                    .with_param("charset", "utf-8")
                    .to_string(),
            );
            content_type.with_soap_action(format!("\"{}\"", soap_action.unwrap_or_default()))
        }
        SoapVersion::Soap12 => {
            let mut media = MediaType::new(version.media_type()).with_param("charset", "utf-8");
            if let Some(action) = soap_action.filter(|action| !action.is_empty()) {
                media = media.with_param("action", action);
            }
            ContentType::new(media.to_string())
        }
    }
}

/// 从消息中取出编码所需部分。
pub(crate) fn take_parts(packet: &mut Packet) -> Result<MessageParts, CodecError> {
    let message = packet.take_message().ok_or(CodecError::NoMessage)?;
    Ok(message.into_parts()?)
}

/// 写回解码得到的消息。
pub(crate) fn install_message(
    packet: &mut Packet,
    version: SoapVersion,
    content: EnvelopeContent,
    attachments: spark_soap_core::AttachmentSet,
) {
    let message = Message::from_parts(MessageParts {
        version,
        headers: content.headers,
        payload: content.payload,
        trailing: content.trailing,
        attachments,
    });
    packet.set_message(Some(message));
}

/// SOAP 1.2 `action` 参数写回 Packet。
pub(crate) fn apply_action_param(media: &MediaType, packet: &mut Packet) {
    if let Some(action) = media.param("action").filter(|action| !action.is_empty()) {
        packet.set_soap_action(action);
    }
}

/// 纯 XML 信封编解码器。
#[derive(Clone, Debug)]
pub struct StreamSoapCodec {
    version: SoapVersion,
}

impl StreamSoapCodec {
    pub fn new(version: SoapVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub(crate) fn encode_parts(
        &self,
        parts: &MessageParts,
        soap_action: Option<&str>,
    ) -> Result<EncodedMessage, CodecError> {
        if !parts.attachments.is_empty() {
            return Err(CodecError::UnexpectedAttachments("plain SOAP encoding"));
        }
        let (text, _) = write_envelope(
            self.version,
            &parts.headers,
            parts.payload.as_ref(),
            &parts.trailing,
            BinaryPolicy::Inline,
        );
        Ok(EncodedMessage {
            body: text.into_bytes().into(),
            content_type: xml_content_type(self.version, soap_action),
        })
    }
}

impl Codec for StreamSoapCodec {
    fn mime_type(&self) -> &str {
        self.version.media_type()
    }

    fn static_content_type(&self, packet: &Packet) -> Option<ContentType> {
        Some(xml_content_type(self.version, packet.soap_action()))
    }

    fn encode(&mut self, packet: &mut Packet) -> Result<EncodedMessage, CodecError> {
        if packet
            .message()
            .is_some_and(|message| message.has_attachments())
        {
            return Err(CodecError::UnexpectedAttachments("plain SOAP encoding"));
        }
        let parts = take_parts(packet)?;
        self.encode_parts(&parts, packet.soap_action())
    }

    fn decode(
        &mut self,
        body: &[u8],
        content_type: &str,
        packet: &mut Packet,
    ) -> Result<(), CodecError> {
        let media = MediaType::parse(content_type)?;
        if SoapVersion::from_media_type(media.essence()).is_none() {
            return Err(CodecError::UnsupportedMediaType(content_type.to_owned()));
        }
        let content = read_envelope(body, self.version)?;
        apply_action_param(&media, packet);
        install_message(packet, self.version, content, Default::default());
        Ok(())
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}
