//! 寻址故障。
//!
//! # 教案式说明
//! - **意图（Why）**：寻址头的解析与匿名性校验失败属于“协议头错误”，必须以 Fault 报文作为正常响应返回，
//!   而不是以 `Err` 穿出管线；
//! - **逻辑（How）**：[`AddressingFault`] 只记录故障种类、出问题的头与 Action，渲染时再结合寻址版本与 SOAP
//!   版本生成 [`SoapFault`]：
//!   - W3C：`Sender` / `wsa:InvalidAddressingHeader` / 具体子代码，细节为 `wsa:ProblemHeaderQName`；
//!   - Member Submission：`Sender` / `wsa:InvalidMessageInformationHeader`，细节相同；
//!   - 必需头缺失与 Action 不受支持各自只有一级子代码；
//! - **契约（What）**：[`AddressingFault::code`] 提供稳定错误码，供日志与测试断言使用。

use spark_soap_core::{AddressingVersion, Element, FaultKind, QName, SoapFault};
use thiserror::Error;

use crate::version::{Vocabulary, WSA_PREFIX};

/// 寻址故障种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressingFaultKind {
    /// 地址缺失或无法识别。
    InvalidAddress,
    /// 单值头出现多次。
    InvalidCardinality,
    /// 操作要求匿名回复目标。
    OnlyAnonymousAddressSupported,
    /// 操作禁止匿名回复目标。
    OnlyNonAnonymousAddressSupported,
    /// 要求寻址但必需头缺失。
    MessageAddressingHeaderRequired,
    /// 服务不认识请求的 Action。
    ActionNotSupported,
}

impl AddressingFaultKind {
    pub fn local_name(self) -> &'static str {
        match self {
            Self::InvalidAddress => "InvalidAddress",
            Self::InvalidCardinality => "InvalidCardinality",
            Self::OnlyAnonymousAddressSupported => "OnlyAnonymousAddressSupported",
            Self::OnlyNonAnonymousAddressSupported => "OnlyNonAnonymousAddressSupported",
            Self::MessageAddressingHeaderRequired => "MessageAddressingHeaderRequired",
            Self::ActionNotSupported => "ActionNotSupported",
        }
    }

    fn is_invalid_header(self) -> bool {
        matches!(
            self,
            Self::InvalidAddress
                | Self::InvalidCardinality
                | Self::OnlyAnonymousAddressSupported
                | Self::OnlyNonAnonymousAddressSupported
        )
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
#[error("{}: {reason}", .kind.local_name())]
pub struct AddressingFault {
    kind: AddressingFaultKind,
    header: Option<QName>,
    action: Option<String>,
    reason: String,
}

impl AddressingFault {
    pub fn new(kind: AddressingFaultKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            header: None,
            action: None,
            reason: reason.into(),
        }
    }

    /// 头部无效或缺失时，指明出问题的头。
    pub fn for_header(kind: AddressingFaultKind, header: QName) -> Self {
        let reason = match kind {
            AddressingFaultKind::InvalidAddress => "a header representing an address is not valid",
            AddressingFaultKind::InvalidCardinality => {
                "a header was expected once but appears more than once"
            }
            AddressingFaultKind::OnlyAnonymousAddressSupported => {
                "the operation only supports the anonymous address"
            }
            AddressingFaultKind::OnlyNonAnonymousAddressSupported => {
                "the operation does not support the anonymous address"
            }
            AddressingFaultKind::MessageAddressingHeaderRequired => {
                "a required addressing header is not present"
            }
            AddressingFaultKind::ActionNotSupported => "the action cannot be processed",
        };
        Self {
            kind,
            reason: format!("{reason} ({})", header.lexical()),
            header: Some(header),
            action: None,
        }
    }

    pub fn action_not_supported(action: impl Into<String>) -> Self {
        let action = action.into();
        Self {
            kind: AddressingFaultKind::ActionNotSupported,
            header: None,
            reason: format!("the action `{action}` cannot be processed at the receiver"),
            action: Some(action),
        }
    }

    pub fn kind(&self) -> AddressingFaultKind {
        self.kind
    }

    /// 出问题的头。
    pub fn header(&self) -> Option<&QName> {
        self.header.as_ref()
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn code(&self) -> &'static str {
        match self.kind {
            AddressingFaultKind::InvalidAddress => "spark.soap.addressing.invalid_address",
            AddressingFaultKind::InvalidCardinality => "spark.soap.addressing.invalid_cardinality",
            AddressingFaultKind::OnlyAnonymousAddressSupported => {
                "spark.soap.addressing.only_anonymous"
            }
            AddressingFaultKind::OnlyNonAnonymousAddressSupported => {
                "spark.soap.addressing.only_non_anonymous"
            }
            AddressingFaultKind::MessageAddressingHeaderRequired => {
                "spark.soap.addressing.header_required"
            }
            AddressingFaultKind::ActionNotSupported => "spark.soap.addressing.action_not_supported",
        }
    }

    /// 按寻址版本渲染为 SOAP Fault。
    pub fn to_soap_fault(&self, vocabulary: &Vocabulary) -> SoapFault {
        let mut fault = SoapFault::new(FaultKind::Sender, self.reason.clone());
        fault = if self.kind.is_invalid_header() {
            let fault = fault.with_subcode(vocabulary.qname(vocabulary.invalid_header_code));
            match vocabulary.version {
                AddressingVersion::W3c => {
                    fault.with_subcode(vocabulary.qname(self.kind.local_name()))
                }
                AddressingVersion::Member => fault,
            }
        } else if self.kind == AddressingFaultKind::MessageAddressingHeaderRequired {
            fault.with_subcode(vocabulary.qname(vocabulary.header_required_code))
        } else {
            fault.with_subcode(vocabulary.qname(self.kind.local_name()))
        };

        if let Some(header) = &self.header {
            let prefix = header.prefix().unwrap_or(WSA_PREFIX);
            let lexical = QName::with_prefix(header.namespace(), header.local(), prefix);
            fault = fault.with_detail(
                Element::new(vocabulary.qname("ProblemHeaderQName"))
                    .with_namespace_hint(prefix, header.namespace())
                    .with_text(lexical.lexical()),
            );
        }
        if let Some(action) = &self.action {
            fault = fault.with_detail(
                Element::new(vocabulary.qname("ProblemAction"))
                    .with_child(Element::new(vocabulary.qname("Action")).with_text(action)),
            );
        }
        fault
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{MEMBER, W3C};

    #[test]
    fn w3c_invalid_header_nests_two_subcodes() {
        let fault = AddressingFault::for_header(
            AddressingFaultKind::OnlyAnonymousAddressSupported,
            W3C.qname("ReplyTo"),
        );
        let soap = fault.to_soap_fault(&W3C);
        assert_eq!(soap.kind(), FaultKind::Sender);
        let locals: Vec<_> = soap.subcodes().iter().map(QName::local).collect();
        assert_eq!(
            locals,
            vec!["InvalidAddressingHeader", "OnlyAnonymousAddressSupported"]
        );
        assert_eq!(soap.detail()[0].trimmed_text(), "wsa:ReplyTo");
        assert!(fault.reason().ends_with("(wsa:ReplyTo)"));
    }

    #[test]
    fn member_invalid_header_uses_single_subcode() {
        let fault = AddressingFault::for_header(
            AddressingFaultKind::InvalidCardinality,
            MEMBER.qname("MessageID"),
        );
        let soap = fault.to_soap_fault(&MEMBER);
        let locals: Vec<_> = soap.subcodes().iter().map(QName::local).collect();
        assert_eq!(locals, vec!["InvalidMessageInformationHeader"]);
        assert_eq!(fault.code(), "spark.soap.addressing.invalid_cardinality");
    }

    #[test]
    fn unsupported_action_is_reported_in_detail() {
        let fault = AddressingFault::action_not_supported("urn:unknown");
        let soap = fault.to_soap_fault(&W3C);
        assert_eq!(soap.subcodes()[0].local(), "ActionNotSupported");
        assert_eq!(soap.detail()[0].name().local(), "ProblemAction");
        assert!(fault.to_string().contains("urn:unknown"));
    }
}
