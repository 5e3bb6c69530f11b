//! MTOM/XOP 编解码。
//!
//! # 设计背景（Why）
//! - 大块二进制值以 base64 内联会膨胀约三分之一，MTOM 把它们抽出为独立 MIME 部件，正文中只留 `xop:Include` 引用；
//! - 小值抽出反而增加分隔符与头部开销，因此以阈值区分：长度达到阈值者抽出，低于阈值者内联。
//!
//! # 核心机制（How）
//! - 编码：以 [`BinaryPolicy::Xop`] 写出信封，收集被抽出的部件；消息自带的附件作为额外部件追加；
//! - 解码：拆包后把每个 `xop:Include` 替换为对应部件的 [`BinaryData`]，未被引用的部件成为消息附件。
//!
//! # 契约说明（What）
//! - 根部件类型 `application/xop+xml; charset=utf-8; type="<SOAP 媒体类型>"`；
//! - 整体类型 `multipart/related; start="<root>"; type="application/xop+xml"; boundary=...; start-info=...`；
//! - 引用的部件不存在时返回 [`CodecError::MissingAttachment`]。

use spark_soap_core::{
    Attachment, AttachmentSet, BinaryData, ContentType, Element, MessageParts, Node, Packet,
    SoapVersion,
};

use crate::codec::{Codec, EncodedMessage};
use crate::error::CodecError;
use crate::media_type::MediaType;
use crate::mime::{self, MimePackage, MimePart};
use crate::soap::{self, EnvelopeContent};
use crate::xml::{BinaryPolicy, XOP_NS};

pub const XOP_MEDIA_TYPE: &str = "application/xop+xml";
pub const MULTIPART_RELATED: &str = "multipart/related";

/// MTOM 编解码器。
#[derive(Clone, Debug)]
pub struct MtomCodec {
    version: SoapVersion,
    threshold: usize,
}

impl MtomCodec {
    pub fn new(version: SoapVersion, threshold: usize) -> Self {
        Self { version, threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub(crate) fn encode_parts(
        &self,
        parts: &MessageParts,
        soap_action: Option<&str>,
    ) -> Result<EncodedMessage, CodecError> {
        let (envelope, xop_parts) = soap::write_envelope(
            self.version,
            &parts.headers,
            parts.payload.as_ref(),
            &parts.trailing,
            BinaryPolicy::Xop {
                threshold: self.threshold,
                parts: Vec::new(),
            },
        );

        let mut root_type =
            MediaType::new(XOP_MEDIA_TYPE).with_param("charset", "utf-8").with_param(
                "type",
                self.version.media_type(),
            );
        if self.version == SoapVersion::Soap12
            && let Some(action) = soap_action.filter(|action| !action.is_empty())
        {
            root_type = root_type.with_param("action", action);
        }
        let root = MimePart {
            content_id: mime::new_content_id(),
            content_type: root_type.to_string(),
            body: envelope.into_bytes().into(),
        };
        let attachments: Vec<MimePart> = xop_parts
            .into_iter()
            .map(|part| MimePart {
                content_id: part.content_id,
                content_type: part.content_type,
                body: part.data,
            })
            .chain(parts.attachments.iter().map(attachment_part))
            .collect();

        let boundary = mime::new_boundary();
        let body = mime::write_multipart(&boundary, &root, &attachments);
        let content_type = MediaType::new(MULTIPART_RELATED)
            .with_param("start", format!("<{}>", root.content_id))
            .with_param("type", XOP_MEDIA_TYPE)
            .with_param("boundary", boundary)
            .with_param("start-info", self.version.media_type());
        let mut content_type = ContentType::new(content_type.to_string());
        if self.version == SoapVersion::Soap11 {
            content_type =
                content_type.with_soap_action(format!("\"{}\"", soap_action.unwrap_or_default()));
        }
        Ok(EncodedMessage { body, content_type })
    }

    /// 解码已拆包的 MTOM 消息。
    pub(crate) fn decode_package(
        &self,
        mut package: MimePackage,
        packet: &mut Packet,
    ) -> Result<(), CodecError> {
        let root_media = MediaType::parse(&package.root.content_type)?;
        if !root_media.is(XOP_MEDIA_TYPE) {
            return Err(CodecError::UnsupportedMediaType(
                package.root.content_type.clone(),
            ));
        }
        let mut content = soap::read_envelope(&package.root.body, self.version)?;
        resolve_content(&mut content, &mut package)?;
        soap::apply_action_param(&root_media, packet);
        soap::install_message(packet, self.version, content, leftover(package));
        Ok(())
    }
}

impl Codec for MtomCodec {
    fn mime_type(&self) -> &str {
        XOP_MEDIA_TYPE
    }

    fn static_content_type(&self, _packet: &Packet) -> Option<ContentType> {
        None
    }

    fn encode(&mut self, packet: &mut Packet) -> Result<EncodedMessage, CodecError> {
        let parts = soap::take_parts(packet)?;
        self.encode_parts(&parts, packet.soap_action())
    }

    fn decode(
        &mut self,
        body: &[u8],
        content_type: &str,
        packet: &mut Packet,
    ) -> Result<(), CodecError> {
        let media = MediaType::parse(content_type)?;
        if !media.is(MULTIPART_RELATED) {
            return Err(CodecError::UnsupportedMediaType(content_type.to_owned()));
        }
        let package = mime::parse_multipart(body, &media)?;
        self.decode_package(package, packet)
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}

pub(crate) fn attachment_part(attachment: &Attachment) -> MimePart {
    MimePart {
        content_id: attachment.content_id().to_owned(),
        content_type: attachment.content_type().to_owned(),
        body: attachment.data().clone(),
    }
}

pub(crate) fn leftover(package: MimePackage) -> AttachmentSet {
    let mut set = AttachmentSet::new();
    for part in package.attachments {
        set.add(Attachment::new(part.content_id, part.content_type, part.body));
    }
    set
}

fn resolve_content(
    content: &mut EnvelopeContent,
    package: &mut MimePackage,
) -> Result<(), CodecError> {
    let mut headers = std::mem::take(&mut content.headers).into_vec();
    for header in &mut headers {
        resolve_includes(header, package)?;
    }
    for header in headers {
        content.headers.add(header);
    }
    for element in content.payload.iter_mut().chain(content.trailing.iter_mut()) {
        resolve_includes(element, package)?;
    }
    Ok(())
}

/// 把 `xop:Include` 子元素替换为对应部件的二进制值。
fn resolve_includes(element: &mut Element, package: &mut MimePackage) -> Result<(), CodecError> {
    for node in element.children_mut() {
        let include = match node {
            Node::Element(child) if child.name().is(XOP_NS, "Include") => {
                let href = child.attribute("", "href").ok_or_else(|| {
                    CodecError::MalformedXml("xop:Include without href".to_owned())
                })?;
                href.strip_prefix("cid:").unwrap_or(href).to_owned()
            }
            Node::Element(child) => {
                resolve_includes(child, package)?;
                continue;
            }
            _ => continue,
        };
        let part = package
            .take_part(&include)
            .ok_or(CodecError::MissingAttachment(include))?;
        *node = Node::Binary(BinaryData::new(part.body).with_content_type(part.content_type));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_soap_core::Message;

    fn payload(size: usize) -> Element {
        Element::ns("urn:t", "upload", "t").with_child(
            Element::ns("urn:t", "data", "t")
                .with_binary(BinaryData::new(vec![7u8; size]).with_content_type("image/png")),
        )
    }

    #[test]
    fn large_values_become_parts_and_come_back_as_binary() {
        let mut codec = MtomCodec::new(SoapVersion::Soap12, 16);
        let mut packet = Packet::with_message(Message::new(SoapVersion::Soap12, payload(64)));
        let encoded = codec.encode(&mut packet).expect("编码");
        let ct = encoded.content_type.content_type().to_owned();
        assert!(ct.starts_with("multipart/related;"));
        assert!(ct.contains("type=\"application/xop+xml\""));
        let text = String::from_utf8_lossy(&encoded.body);
        assert!(text.contains("xop:Include"));

        let mut inbound = Packet::new();
        codec.decode(&encoded.body, &ct, &mut inbound).expect("解码");
        let mut message = inbound.take_message().expect("消息");
        assert!(!message.has_attachments());
        let body = message.read_payload().expect("读取").expect("载荷");
        let data = body.first_child("urn:t", "data").expect("data");
        match &data.children()[0] {
            Node::Binary(binary) => {
                assert_eq!(binary.len(), 64);
                assert_eq!(binary.content_type(), Some("image/png"));
            }
            other => panic!("期望二进制节点，得到 {other:?}"),
        }
    }

    #[test]
    fn dangling_include_is_reported() {
        let codec = MtomCodec::new(SoapVersion::Soap11, 1);
        let envelope = format!(
            "<S:Envelope xmlns:S=\"{}\"><S:Body><x><xop:Include xmlns:xop=\"{XOP_NS}\" href=\"cid:gone@x\"/></x></S:Body></S:Envelope>",
            SoapVersion::Soap11.envelope_namespace()
        );
        let package = MimePackage {
            root: MimePart {
                content_id: "root".into(),
                content_type: "application/xop+xml; type=\"text/xml\"".into(),
                body: envelope.into_bytes().into(),
            },
            attachments: Vec::new(),
        };
        let err = codec
            .decode_package(package, &mut Packet::new())
            .expect_err("缺失部件");
        assert!(matches!(err, CodecError::MissingAttachment(id) if id == "gone@x"));
    }
}
