#![deny(unsafe_code)]
//! spark-soap-codec：SOAP 消息的线格式编解码。
//!
//! # 模块划分
//! - [`codec`]：编解码器契约 [`Codec`] 与编码结果 [`EncodedMessage`]；
//! - [`xml`]：元素树与 XML 文本的互转（命名空间作用域、XOP 抽取）；
//! - [`soap`]：纯 XML 信封；[`mtom`]、[`swa`]：`multipart/related` 打包的两种形态；
//! - [`binary`]：以 MessagePack 承载的替代二进制编码；
//! - [`binding`]：按配置与协商模式在上述委托之间分派的 [`SoapBindingCodec`]。
//!
//! # 使用约束
//! - 编解码器实例不可在并发的编解码之间共享，需要并发时通过 [`Codec::copy`] 获得独立实例；
//! - 所有解码失败都以 [`CodecError`] 返回，并可无损转换为带稳定错误码的 [`spark_soap_core::SoapError`]。

pub mod binary;
pub mod binding;
pub mod codec;
pub mod error;
pub mod media_type;
pub mod mime;
pub mod mtom;
pub mod soap;
pub mod swa;
pub mod xml;

pub use binary::{BINARY_MEDIA_TYPE, BinaryCodec};
pub use binding::{SoapBindingCodec, WireFormat, classify};
pub use codec::{Codec, EncodedMessage};
pub use error::CodecError;
pub use media_type::MediaType;
pub use mime::{MimePackage, MimePart};
pub use mtom::{MULTIPART_RELATED, MtomCodec, XOP_MEDIA_TYPE};
pub use soap::StreamSoapCodec;
pub use swa::SwaCodec;
pub use xml::{XOP_NS, element_to_string, parse_document};
