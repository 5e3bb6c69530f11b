//! 寻址头的解析与写出。
//!
//! # 契约说明（What）
//! - 单值头（To、From、Action、MessageID、ReplyTo、FaultTo）重复出现时报告 InvalidCardinality；
//! - `RelatesTo` 可以出现多次，只保留回复关系（未标注关系类型或标注为 Reply）的第一个；
//! - 写出前先移除同名旧头，重复写出不会累积。

use spark_soap_core::{Element, HeaderList};

use crate::epr::EndpointReference;
use crate::fault::{AddressingFault, AddressingFaultKind};
use crate::version::Vocabulary;

const TO: &str = "To";
const FROM: &str = "From";
const ACTION: &str = "Action";
const MESSAGE_ID: &str = "MessageID";
const RELATES_TO: &str = "RelatesTo";
const REPLY_TO: &str = "ReplyTo";
const FAULT_TO: &str = "FaultTo";

/// 一条消息上的寻址属性。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AddressingHeaders {
    pub to: Option<String>,
    pub from: Option<EndpointReference>,
    pub action: Option<String>,
    pub message_id: Option<String>,
    pub relates_to: Option<String>,
    pub reply_to: Option<EndpointReference>,
    pub fault_to: Option<EndpointReference>,
}

/// 生成 `urn:uuid:` 形式的消息标识。
pub fn new_message_id() -> String {
    format!("urn:uuid:{}", uuid::Uuid::new_v4())
}

impl AddressingHeaders {
    /// 头列表中是否存在本版本的任意寻址头。
    pub fn present(vocabulary: &Vocabulary, headers: &HeaderList) -> bool {
        headers.has_namespace(vocabulary.namespace)
    }

    pub fn parse(vocabulary: &Vocabulary, headers: &HeaderList) -> Result<Self, AddressingFault> {
        let text = |local: &str| -> Result<Option<String>, AddressingFault> {
            Ok(single(vocabulary, headers, local)?
                .map(Element::trimmed_text)
                .filter(|value| !value.is_empty()))
        };
        let epr = |local: &str| -> Result<Option<EndpointReference>, AddressingFault> {
            single(vocabulary, headers, local)?
                .map(|element| {
                    EndpointReference::from_element(vocabulary, element, &vocabulary.qname(local))
                })
                .transpose()
        };

        let relates_to = headers
            .get_all(vocabulary.namespace, RELATES_TO)
            .find(|element| {
                element
                    .attribute("", "RelationshipType")
                    .is_none_or(|kind| kind.ends_with("/reply") || kind.ends_with(":Reply"))
            })
            .map(Element::trimmed_text);

        Ok(Self {
            to: text(TO)?,
            from: epr(FROM)?,
            action: text(ACTION)?,
            message_id: text(MESSAGE_ID)?,
            relates_to,
            reply_to: epr(REPLY_TO)?,
            fault_to: epr(FAULT_TO)?,
        })
    }

    /// 写入头列表，替换已有的同名寻址头。
    pub fn write(&self, vocabulary: &Vocabulary, headers: &mut HeaderList) {
        for local in [TO, FROM, REPLY_TO, FAULT_TO, ACTION, MESSAGE_ID, RELATES_TO] {
            headers.remove(vocabulary.namespace, local);
        }
        let text = |local: &str, value: &str| Element::new(vocabulary.qname(local)).with_text(value);
        if let Some(to) = &self.to {
            headers.add(text(TO, to));
        }
        if let Some(from) = &self.from {
            headers.add(from.to_element(vocabulary, FROM));
        }
        if let Some(reply_to) = &self.reply_to {
            headers.add(reply_to.to_element(vocabulary, REPLY_TO));
        }
        if let Some(fault_to) = &self.fault_to {
            headers.add(fault_to.to_element(vocabulary, FAULT_TO));
        }
        if let Some(action) = &self.action {
            headers.add(text(ACTION, action));
        }
        if let Some(message_id) = &self.message_id {
            headers.add(text(MESSAGE_ID, message_id));
        }
        if let Some(relates_to) = &self.relates_to {
            headers.add(text(RELATES_TO, relates_to));
        }
    }
}

/// 把目标 EPR 的引用参数回显为头；W3C 版本附加 `IsReferenceParameter="true"`。
pub fn write_reference_parameters(
    vocabulary: &Vocabulary,
    target: &EndpointReference,
    headers: &mut HeaderList,
) {
    for parameter in target.reference_parameters() {
        let mut header = parameter.clone();
        if vocabulary.marks_reference_parameters {
            header.set_attribute(vocabulary.qname("IsReferenceParameter"), "true");
        }
        headers.add(header);
    }
}

fn single<'a>(
    vocabulary: &Vocabulary,
    headers: &'a HeaderList,
    local: &str,
) -> Result<Option<&'a Element>, AddressingFault> {
    let name = vocabulary.qname(local);
    match headers.count(&name) {
        0 => Ok(None),
        1 => Ok(headers.get(vocabulary.namespace, local)),
        _ => Err(AddressingFault::for_header(
            AddressingFaultKind::InvalidCardinality,
            name,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{MEMBER, W3C};
    use spark_soap_core::QName;

    fn sample() -> AddressingHeaders {
        AddressingHeaders {
            to: Some("http://service.example/echo".to_owned()),
            action: Some("urn:echo".to_owned()),
            message_id: Some("urn:uuid:1".to_owned()),
            reply_to: Some(EndpointReference::new("http://client.example/reply")),
            fault_to: Some(EndpointReference::anonymous(&W3C)),
            ..AddressingHeaders::default()
        }
    }

    #[test]
    fn written_headers_parse_back() {
        let mut headers = HeaderList::new();
        sample().write(&W3C, &mut headers);
        sample().write(&W3C, &mut headers);
        assert_eq!(headers.len(), 5, "重复写出不会累积");
        assert_eq!(AddressingHeaders::parse(&W3C, &headers).expect("解析"), sample());
        assert!(AddressingHeaders::present(&W3C, &headers));
        assert!(!AddressingHeaders::present(&MEMBER, &headers));
    }

    #[test]
    fn duplicate_action_is_a_cardinality_fault() {
        let mut headers = HeaderList::new();
        headers.add(Element::new(W3C.qname("Action")).with_text("urn:a"));
        headers.add(Element::new(W3C.qname("Action")).with_text("urn:b"));
        let fault = AddressingHeaders::parse(&W3C, &headers).unwrap_err();
        assert_eq!(fault.kind(), AddressingFaultKind::InvalidCardinality);
        assert_eq!(fault.header().map(QName::local), Some("Action"));
    }

    #[test]
    fn reference_parameters_are_marked_for_w3c_only() {
        let target = EndpointReference::new("http://client.example/reply")
            .with_reference_parameter(Element::ns("urn:app", "session", "a").with_text("7"));
        let mut w3c = HeaderList::new();
        write_reference_parameters(&W3C, &target, &mut w3c);
        assert_eq!(
            w3c.get("urn:app", "session")
                .and_then(|h| h.attribute(W3C.namespace, "IsReferenceParameter")),
            Some("true")
        );
        let mut member = HeaderList::new();
        write_reference_parameters(&MEMBER, &target, &mut member);
        assert!(member.get("urn:app", "session").expect("回显").attributes().is_empty());
    }
}
