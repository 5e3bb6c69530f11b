//! SOAP with Attachments：纯 XML 信封作为根部件，附件原样作为后续部件。
//!
//! 与 MTOM 不同，信封中的二进制值始终以 base64 内联；只有消息显式携带的附件才成为独立部件。

use spark_soap_core::{ContentType, MessageParts, Packet, SoapVersion};

use crate::codec::{Codec, EncodedMessage};
use crate::error::CodecError;
use crate::media_type::MediaType;
use crate::mime::{self, MimePackage, MimePart};
use crate::mtom::{MULTIPART_RELATED, attachment_part, leftover};
use crate::soap::{self, StreamSoapCodec};
use crate::xml::BinaryPolicy;

#[derive(Clone, Debug)]
pub struct SwaCodec {
    version: SoapVersion,
}

impl SwaCodec {
    pub fn new(version: SoapVersion) -> Self {
        Self { version }
    }

    pub(crate) fn encode_parts(
        &self,
        parts: &MessageParts,
        soap_action: Option<&str>,
    ) -> Result<EncodedMessage, CodecError> {
        let (envelope, _) = soap::write_envelope(
            self.version,
            &parts.headers,
            parts.payload.as_ref(),
            &parts.trailing,
            BinaryPolicy::Inline,
        );
        let xml_type = soap::xml_content_type(self.version, soap_action);
        let root = MimePart {
            content_id: mime::new_content_id(),
            content_type: xml_type.content_type().to_owned(),
            body: envelope.into_bytes().into(),
        };
        let attachments: Vec<MimePart> = parts.attachments.iter().map(attachment_part).collect();
        let boundary = mime::new_boundary();
        let body = mime::write_multipart(&boundary, &root, &attachments);
        let media = MediaType::new(MULTIPART_RELATED)
            .with_param("type", self.version.media_type())
            .with_param("start", format!("<{}>", root.content_id))
            .with_param("boundary", boundary);
        let mut content_type = ContentType::new(media.to_string());
        if let Some(action) = xml_type.soap_action() {
            content_type = content_type.with_soap_action(action);
        }
        Ok(EncodedMessage { body, content_type })
    }

    pub(crate) fn decode_package(
        &self,
        package: MimePackage,
        packet: &mut Packet,
    ) -> Result<(), CodecError> {
        let root_media = MediaType::parse(&package.root.content_type)?;
        if SoapVersion::from_media_type(root_media.essence()).is_none() {
            return Err(CodecError::UnsupportedMediaType(
                package.root.content_type.clone(),
            ));
        }
        let content = soap::read_envelope(&package.root.body, self.version)?;
        soap::apply_action_param(&root_media, packet);
        soap::install_message(packet, self.version, content, leftover(package));
        Ok(())
    }
}

impl Codec for SwaCodec {
    fn mime_type(&self) -> &str {
        MULTIPART_RELATED
    }

    fn static_content_type(&self, _packet: &Packet) -> Option<ContentType> {
        None
    }

    /// 无附件时退化为纯 XML 编码。
    fn encode(&mut self, packet: &mut Packet) -> Result<EncodedMessage, CodecError> {
        let parts = soap::take_parts(packet)?;
        if parts.attachments.is_empty() {
            return StreamSoapCodec::new(self.version).encode_parts(&parts, packet.soap_action());
        }
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
            return StreamSoapCodec::new(self.version).decode(body, content_type, packet);
        }
        let package = mime::parse_multipart(body, &media)?;
        self.decode_package(package, packet)
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_soap_core::{Attachment, Element, Message};

    #[test]
    fn attachments_survive_a_round_trip() {
        let mut codec = SwaCodec::new(SoapVersion::Soap11);
        let message = Message::new(SoapVersion::Soap11, Element::ns("urn:t", "send", "t"))
            .with_attachment(Attachment::new("doc@x", "application/pdf", &b"%PDF-1.7"[..]));
        let mut packet = Packet::with_message(message);
        packet.set_soap_action("urn:t:send");
        let encoded = codec.encode(&mut packet).expect("编码");
        assert!(encoded.content_type.content_type().starts_with("multipart/related;"));
        assert_eq!(encoded.content_type.soap_action(), Some("\"urn:t:send\""));

        let mut inbound = Packet::new();
        codec
            .decode(&encoded.body, encoded.content_type.content_type(), &mut inbound)
            .expect("解码");
        let message = inbound.message().expect("消息");
        let attachment = message.attachments().get("doc@x").expect("附件");
        assert_eq!(attachment.content_type(), "application/pdf");
        assert_eq!(&attachment.data()[..], b"%PDF-1.7");
    }
}
