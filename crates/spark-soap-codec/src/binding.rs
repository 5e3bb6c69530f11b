//! 绑定级编解码器：按配置、协商模式与附件情况在委托之间分派。
//!
//! # 设计背景（Why）
//! - 传输层只持有一个编解码器，但线格式有五种形态（纯 XML、MTOM、SwA、二进制、带附件的二进制）；
//! - 形态由闭合枚举 [`WireFormat`] 表达，编码与解码各有一个显式的选择函数，避免在调用点散落类型判断。
//!
//! # 核心机制（How）
//! - 编码：[`SoapBindingCodec::select`] 依次考虑二进制编码开关与协商模式、MTOM 开关、附件存在与否；
//! - 解码：[`classify`] 根据声明的内容类型决定形态；`multipart/related` 先拆包，再嗅探根部件的内容类型；
//! - 悲观协商时，纯 XML 编码的结果附带 `Accept` 声明可接受二进制编码；
//!   收到二进制请求（或 `Accept` 中列出二进制类型）的 Packet 被标记为乐观协商，其响应将以二进制编码。
//!
//! # 契约说明（What）
//! - 无法识别的内容类型、以及未启用二进制编码时收到的二进制载荷，均返回 [`CodecError::UnsupportedMediaType`]。

use spark_soap_core::{BindingConfig, ContentNegotiation, ContentType, Packet, SoapVersion};
use tracing::debug;

use crate::binary::{BINARY_MEDIA_TYPE, BinaryCodec};
use crate::codec::{Codec, EncodedMessage};
use crate::error::CodecError;
use crate::media_type::MediaType;
use crate::mime;
use crate::mtom::{MULTIPART_RELATED, MtomCodec, XOP_MEDIA_TYPE};
use crate::soap::{self, StreamSoapCodec};
use crate::swa::SwaCodec;

/// 线格式形态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireFormat {
    /// 纯 XML 信封。
    Xml,
    /// MTOM/XOP 打包。
    Mtom,
    /// SOAP with Attachments。
    SwA,
    /// 替代二进制编码。
    Binary,
    /// 以 `multipart/related` 打包、根部件为二进制编码。
    BinaryMultipart,
}

/// 根据内容类型（及 multipart 根部件的内容类型）分类。
///
/// `root` 仅在 `content_type` 为 `multipart/related` 时参与判断；缺失时返回 `None`。
pub fn classify(content_type: &MediaType, root: Option<&MediaType>) -> Option<WireFormat> {
    if content_type.is(MULTIPART_RELATED) {
        let root = root?;
        return if root.is(XOP_MEDIA_TYPE) {
            Some(WireFormat::Mtom)
        } else if root.is(BINARY_MEDIA_TYPE) {
            Some(WireFormat::BinaryMultipart)
        } else if SoapVersion::from_media_type(root.essence()).is_some() {
            Some(WireFormat::SwA)
        } else {
            None
        };
    }
    if content_type.is(BINARY_MEDIA_TYPE) {
        Some(WireFormat::Binary)
    } else if SoapVersion::from_media_type(content_type.essence()).is_some() {
        Some(WireFormat::Xml)
    } else {
        None
    }
}

fn accepts_binary(accept: Option<&str>) -> bool {
    accept.is_some_and(|accept| {
        accept
            .split(',')
            .filter_map(|entry| entry.split(';').next())
            .any(|entry| entry.trim().eq_ignore_ascii_case(BINARY_MEDIA_TYPE))
    })
}

/// 面向一个端口绑定的组合编解码器。
#[derive(Clone, Debug)]
pub struct SoapBindingCodec {
    config: BindingConfig,
    xml: StreamSoapCodec,
    mtom: MtomCodec,
    swa: SwaCodec,
    binary: BinaryCodec,
}

impl SoapBindingCodec {
    pub fn new(config: BindingConfig) -> Self {
        let version = config.soap_version;
        Self {
            xml: StreamSoapCodec::new(version),
            mtom: MtomCodec::new(version, config.mtom.threshold),
            swa: SwaCodec::new(version),
            binary: BinaryCodec::new(version),
            config,
        }
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    pub fn version(&self) -> SoapVersion {
        self.config.soap_version
    }

    fn negotiation(&self, packet: &Packet) -> ContentNegotiation {
        packet
            .content_negotiation()
            .unwrap_or(self.config.content_negotiation)
    }

    /// 为待编码的 Packet 选择线格式。
    pub fn select(&self, packet: &Packet) -> WireFormat {
        let has_attachments = packet
            .message()
            .is_some_and(|message| message.has_attachments());
        // `None` 协商下对端的 Accept 提示不起作用，始终发送 XML。
        let wants_binary = self.config.binary_encoding
            && match self.negotiation(packet) {
                ContentNegotiation::None => false,
                ContentNegotiation::Pessimistic => accepts_binary(packet.accept_content_type()),
                ContentNegotiation::Optimistic => true,
            };
        if wants_binary {
            if has_attachments {
                WireFormat::BinaryMultipart
            } else {
                WireFormat::Binary
            }
        } else if self.config.mtom.enabled {
            WireFormat::Mtom
        } else if has_attachments {
            WireFormat::SwA
        } else {
            WireFormat::Xml
        }
    }

    fn advertise(&self, packet: &Packet, content_type: ContentType) -> ContentType {
        if self.config.binary_encoding
            && self.negotiation(packet) == ContentNegotiation::Pessimistic
        {
            content_type.with_accept(format!(
                "{BINARY_MEDIA_TYPE}, {}",
                self.config.soap_version.media_type()
            ))
        } else {
            content_type
        }
    }
}

impl Codec for SoapBindingCodec {
    fn mime_type(&self) -> &str {
        self.config.soap_version.media_type()
    }

    fn static_content_type(&self, packet: &Packet) -> Option<ContentType> {
        match self.select(packet) {
            WireFormat::Xml => Some(self.advertise(
                packet,
                soap::xml_content_type(self.config.soap_version, packet.soap_action()),
            )),
            WireFormat::Binary => self.binary.static_content_type(packet),
            WireFormat::Mtom | WireFormat::SwA | WireFormat::BinaryMultipart => None,
        }
    }

    fn encode(&mut self, packet: &mut Packet) -> Result<EncodedMessage, CodecError> {
        let format = self.select(packet);
        debug!(?format, "selected wire format for encoding");
        let parts = soap::take_parts(packet)?;
        let soap_action = packet.soap_action();
        let mut encoded = match format {
            WireFormat::Xml => self.xml.encode_parts(&parts, soap_action)?,
            WireFormat::Mtom => self.mtom.encode_parts(&parts, soap_action)?,
            WireFormat::SwA => self.swa.encode_parts(&parts, soap_action)?,
            WireFormat::Binary | WireFormat::BinaryMultipart => {
                self.binary.encode_parts(parts, soap_action)?
            }
        };
        if !matches!(format, WireFormat::Binary | WireFormat::BinaryMultipart) {
            encoded.content_type = self.advertise(packet, encoded.content_type);
        }
        Ok(encoded)
    }

    fn decode(
        &mut self,
        body: &[u8],
        content_type: &str,
        packet: &mut Packet,
    ) -> Result<(), CodecError> {
        let media = MediaType::parse(content_type)?;
        let (format, package) = if media.is(MULTIPART_RELATED) {
            let package = mime::parse_multipart(body, &media)?;
            let root = MediaType::parse(&package.root.content_type)?;
            (classify(&media, Some(&root)), Some(package))
        } else {
            (classify(&media, None), None)
        };
        let Some(format) = format else {
            return Err(CodecError::UnsupportedMediaType(content_type.to_owned()));
        };
        debug!(?format, content_type, "classified inbound payload");

        match (format, package) {
            (WireFormat::Binary | WireFormat::BinaryMultipart, _)
                if !self.config.binary_encoding =>
            {
                return Err(CodecError::UnsupportedMediaType(content_type.to_owned()));
            }
            (WireFormat::Xml, _) => self.xml.decode(body, content_type, packet)?,
            (WireFormat::Binary, _) => self.binary.decode(body, content_type, packet)?,
            (WireFormat::Mtom, Some(package)) => self.mtom.decode_package(package, packet)?,
            (WireFormat::SwA, Some(package)) => self.swa.decode_package(package, packet)?,
            (WireFormat::BinaryMultipart, Some(package)) => {
                self.binary.decode_package(package, packet)?
            }
            (_, None) => {
                return Err(CodecError::UnsupportedMediaType(content_type.to_owned()));
            }
        }

        let binary_request = matches!(format, WireFormat::Binary | WireFormat::BinaryMultipart);
        if self.config.binary_encoding
            && (binary_request
                || (self.config.content_negotiation != ContentNegotiation::None
                    && accepts_binary(packet.accept_content_type())))
        {
            packet.set_content_negotiation(ContentNegotiation::Optimistic);
        }
        Ok(())
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_every_wire_format() {
        let parse = |text: &str| MediaType::parse(text).expect("媒体类型");
        let multipart = parse("multipart/related; boundary=x");
        assert_eq!(
            classify(&parse("text/xml; charset=utf-8"), None),
            Some(WireFormat::Xml)
        );
        assert_eq!(
            classify(&parse("application/soap+msgpack"), None),
            Some(WireFormat::Binary)
        );
        assert_eq!(
            classify(&multipart, Some(&parse("application/xop+xml; type=\"text/xml\""))),
            Some(WireFormat::Mtom)
        );
        assert_eq!(
            classify(&multipart, Some(&parse("application/soap+xml"))),
            Some(WireFormat::SwA)
        );
        assert_eq!(
            classify(&multipart, Some(&parse("application/soap+msgpack"))),
            Some(WireFormat::BinaryMultipart)
        );
        assert_eq!(classify(&parse("application/json"), None), None);
        assert_eq!(classify(&multipart, Some(&parse("image/png"))), None);
    }

    #[test]
    fn accept_header_matching_ignores_parameters_and_case() {
        assert!(accepts_binary(Some("text/xml, Application/SOAP+msgpack;q=0.9")));
        assert!(!accepts_binary(Some("application/soap+xml")));
        assert!(!accepts_binary(None));
    }
}
