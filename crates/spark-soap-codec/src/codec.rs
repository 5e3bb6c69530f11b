//! 编解码器契约。
//!
//! # 教案式说明
//! - **意图（Why）**：传输层只认识字节与内容类型，管线只认识 [`Packet`]；编解码器是二者之间唯一的翻译点；
//! - **契约（What）**：
//!   - `encode` 从 Packet 取走消息并产出字节与内容类型，Packet 无消息时返回 [`CodecError::NoMessage`]；
//!   - `decode` 按内容类型解析字节，把消息与线格式派生的元数据（如 SOAP 1.2 的 `action` 参数）写回 Packet；
//!   - 实例可能持有可变缓冲，因此不要求 `Sync`；并发使用方需通过 [`Codec::copy`] 获得独立实例；
//! - **风险（Trade-offs）**：编码会消费消息体，调用方若还需保留原消息，须先 [`spark_soap_core::Message::copy`]。

use bytes::Bytes;
use spark_soap_core::{ContentType, Packet};

use crate::error::CodecError;

/// 编码结果。
#[derive(Clone, Debug)]
pub struct EncodedMessage {
    pub body: Bytes,
    pub content_type: ContentType,
}

/// 线格式编解码器。
pub trait Codec: Send {
    /// 编码器主媒体类型（不含参数）。
    fn mime_type(&self) -> &str;

    /// 若内容类型可在编码前确定，返回之；MIME 打包的格式因边界随机生成而返回 `None`。
    fn static_content_type(&self, packet: &Packet) -> Option<ContentType>;

    fn encode(&mut self, packet: &mut Packet) -> Result<EncodedMessage, CodecError>;

    fn decode(
        &mut self,
        body: &[u8],
        content_type: &str,
        packet: &mut Packet,
    ) -> Result<(), CodecError>;

    /// 返回独立实例，供另一条管线克隆使用。
    fn copy(&self) -> Box<dyn Codec>;
}
