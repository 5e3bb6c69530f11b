//! Message：一个 SOAP 信封的内存模型（头列表 + 消息体 + 附件集合）。
//!
//! # 教案式说明
//! - **意图（Why）**：流式消息体只能被消费一次；需要“只看不拿”的阶段（例如查找 Fault 对应的 Action）
//!   必须显式调用 [`Message::copy`]，否则会破坏下游阶段看到的内容；
//! - **逻辑（How）**：消息体以三态 `Payload` 表示：空、未读元素、已消费；[`Message::read_payload`] 把元素移出并
//!   转为已消费，之后的读取与复制均返回 [`SoapError::MessageConsumed`]；
//! - **契约（What）**：Message 归持有它的 Packet 独占，直到交给编解码器或应用代码；
//!   头部与附件不受“只读一次”约束，可随时检查与修改；
//!   载荷之后的其余 Body 子元素作为尾随元素原样保留，编码时写回载荷之后；
//! - **权衡（Trade-offs）**：`payload_name`/`is_fault` 只看根元素名，不触发消费，
//!   与“头部可窥探、正文需复制”的流式模型保持一致。

mod attachments;
mod fault;
mod headers;

pub use attachments::{Attachment, AttachmentSet};
pub use fault::SoapFault;
pub use headers::HeaderList;

use crate::error::{Result, SoapError};
use crate::infoset::{Element, QName};
use crate::version::SoapVersion;

#[derive(Debug, PartialEq)]
enum Payload {
    Empty,
    Element(Element),
    Consumed,
}

/// SOAP 消息。
///
/// 不实现 `Clone`：复制必须经由 [`Message::copy`]，以便在消息体已消费时显式失败。
#[derive(Debug, PartialEq)]
pub struct Message {
    version: SoapVersion,
    headers: HeaderList,
    payload: Payload,
    /// Body 中载荷之后的元素。
    trailing: Vec<Element>,
    attachments: AttachmentSet,
}

/// 编码器拆解 Message 得到的组成部分。
#[derive(Debug)]
pub struct MessageParts {
    pub version: SoapVersion,
    pub headers: HeaderList,
    pub payload: Option<Element>,
    pub trailing: Vec<Element>,
    pub attachments: AttachmentSet,
}

impl Message {
    /// 以载荷元素构造消息。
    pub fn new(version: SoapVersion, payload: Element) -> Self {
        Self {
            version,
            headers: HeaderList::new(),
            payload: Payload::Element(payload),
            trailing: Vec::new(),
            attachments: AttachmentSet::new(),
        }
    }

    /// 构造空消息体的消息（Body 存在但无子元素）。
    pub fn empty(version: SoapVersion) -> Self {
        Self {
            version,
            headers: HeaderList::new(),
            payload: Payload::Empty,
            trailing: Vec::new(),
            attachments: AttachmentSet::new(),
        }
    }

    pub fn from_parts(parts: MessageParts) -> Self {
        Self {
            version: parts.version,
            headers: parts.headers,
            payload: match parts.payload {
                Some(element) => Payload::Element(element),
                None => Payload::Empty,
            },
            trailing: parts.trailing,
            attachments: parts.attachments,
        }
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderList {
        &mut self.headers
    }

    pub fn with_header(mut self, header: Element) -> Self {
        self.headers.add(header);
        self
    }

    /// 载荷之后的 Body 元素，不消费消息体。
    pub fn trailing_body(&self) -> &[Element] {
        &self.trailing
    }

    pub fn with_trailing_body(mut self, element: Element) -> Self {
        self.trailing.push(element);
        self
    }

    pub fn attachments(&self) -> &AttachmentSet {
        &self.attachments
    }

    pub fn attachments_mut(&mut self) -> &mut AttachmentSet {
        &mut self.attachments
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.add(attachment);
        self
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// 消息体是否仍有未读元素。
    pub fn has_payload(&self) -> bool {
        matches!(self.payload, Payload::Element(_))
    }

    pub fn is_consumed(&self) -> bool {
        matches!(self.payload, Payload::Consumed)
    }

    /// 消息体根元素名，不消费消息体。
    pub fn payload_name(&self) -> Option<&QName> {
        match &self.payload {
            Payload::Element(element) => Some(element.name()),
            _ => None,
        }
    }

    /// 消息体是否为当前版本的 Fault。
    pub fn is_fault(&self) -> bool {
        self.payload_name()
            .is_some_and(|name| name.is(self.version.envelope_namespace(), "Fault"))
    }

    /// 读取并消费消息体。空消息体返回 `Ok(None)`，已消费返回错误。
    pub fn read_payload(&mut self) -> Result<Option<Element>> {
        match std::mem::replace(&mut self.payload, Payload::Consumed) {
            Payload::Element(element) => Ok(Some(element)),
            Payload::Empty => Ok(None),
            Payload::Consumed => Err(SoapError::MessageConsumed),
        }
    }

    /// 深复制消息；原消息保持可读。
    pub fn copy(&self) -> Result<Message> {
        let payload = match &self.payload {
            Payload::Element(element) => Payload::Element(element.clone()),
            Payload::Empty => Payload::Empty,
            Payload::Consumed => return Err(SoapError::MessageConsumed),
        };
        Ok(Self {
            version: self.version,
            headers: self.headers.clone(),
            payload,
            trailing: self.trailing.clone(),
            attachments: self.attachments.clone(),
        })
    }

    /// 拆解为组成部分（消费消息体）。
    pub fn into_parts(mut self) -> Result<MessageParts> {
        let payload = self.read_payload()?;
        Ok(MessageParts {
            version: self.version,
            headers: self.headers,
            payload,
            trailing: self.trailing,
            attachments: self.attachments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Element {
        Element::ns("urn:echo", "echo", "e").with_text("hi")
    }

    #[test]
    fn payload_reads_at_most_once() {
        let mut message = Message::new(SoapVersion::Soap11, echo());
        assert!(message.has_payload());
        assert_eq!(message.read_payload().expect("首次读取"), Some(echo()));
        assert!(message.is_consumed());
        assert!(matches!(
            message.read_payload(),
            Err(SoapError::MessageConsumed)
        ));
        assert!(matches!(message.copy(), Err(SoapError::MessageConsumed)));
    }

    #[test]
    fn copy_leaves_original_readable() {
        let message = Message::new(SoapVersion::Soap12, echo())
            .with_header(Element::ns("urn:h", "trace", "h").with_text("1"));
        let mut copy = message.copy().expect("复制消息");
        assert_eq!(copy.read_payload().expect("读取副本"), Some(echo()));
        assert!(message.has_payload());
        assert_eq!(message.headers().len(), 1);
    }

    #[test]
    fn trailing_body_elements_follow_copies_and_parts() {
        let extra = Element::ns("urn:echo", "extra", "e");
        let message = Message::new(SoapVersion::Soap11, echo()).with_trailing_body(extra.clone());
        let copy = message.copy().expect("复制消息");
        assert_eq!(copy.trailing_body(), std::slice::from_ref(&extra));
        let parts = message.into_parts().expect("拆解");
        assert_eq!(parts.payload, Some(echo()));
        assert_eq!(parts.trailing, vec![extra]);
    }

    #[test]
    fn peeking_payload_name_does_not_consume() {
        let message = Message::new(SoapVersion::Soap11, echo());
        assert!(message.payload_name().is_some_and(|n| n.is("urn:echo", "echo")));
        assert!(!message.is_fault());
        assert!(message.has_payload());
    }
}
