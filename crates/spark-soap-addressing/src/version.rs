//! WS-Addressing 两个版本的词汇表。

use spark_soap_core::{AddressingVersion, QName};

/// 头元素与故障元素统一使用的前缀。
pub const WSA_PREFIX: &str = "wsa";

/// 一个寻址版本的命名空间与众所周知的地址。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    pub version: AddressingVersion,
    pub namespace: &'static str,
    /// 匿名地址：沿用原传输回传通道。
    pub anonymous: &'static str,
    /// “不回复”地址；Member Submission 没有对应概念。
    pub none: Option<&'static str>,
    /// 缺省 Fault Action。
    pub fault_action: &'static str,
    /// 引用参数回显为头时是否标注 `IsReferenceParameter`。
    pub marks_reference_parameters: bool,
    /// 头部无效时的顶层子代码本地名。
    pub invalid_header_code: &'static str,
    /// 必需头缺失时的子代码本地名。
    pub header_required_code: &'static str,
}

pub const W3C: Vocabulary = Vocabulary {
    version: AddressingVersion::W3c,
    namespace: "http://www.w3.org/2005/08/addressing",
    anonymous: "http://www.w3.org/2005/08/addressing/anonymous",
    none: Some("http://www.w3.org/2005/08/addressing/none"),
    fault_action: "http://www.w3.org/2005/08/addressing/fault",
    marks_reference_parameters: true,
    invalid_header_code: "InvalidAddressingHeader",
    header_required_code: "MessageAddressingHeaderRequired",
};

pub const MEMBER: Vocabulary = Vocabulary {
    version: AddressingVersion::Member,
    namespace: "http://schemas.xmlsoap.org/ws/2004/08/addressing",
    anonymous: "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous",
    none: None,
    fault_action: "http://schemas.xmlsoap.org/ws/2004/08/addressing/fault",
    marks_reference_parameters: false,
    invalid_header_code: "InvalidMessageInformationHeader",
    header_required_code: "MessageInformationHeaderRequired",
};

impl Vocabulary {
    pub const fn of(version: AddressingVersion) -> &'static Vocabulary {
        match version {
            AddressingVersion::W3c => &W3C,
            AddressingVersion::Member => &MEMBER,
        }
    }

    /// 本版本命名空间下的限定名。
    pub fn qname(&self, local: &str) -> QName {
        QName::with_prefix(self.namespace, local, WSA_PREFIX)
    }

    pub fn is_anonymous(&self, address: &str) -> bool {
        address.trim() == self.anonymous
    }

    pub fn is_none(&self, address: &str) -> bool {
        self.none.is_some_and(|none| address.trim() == none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_submission_has_no_none_address() {
        assert!(MEMBER.none.is_none());
        assert!(!MEMBER.is_none("http://www.w3.org/2005/08/addressing/none"));
        assert!(W3C.is_none("http://www.w3.org/2005/08/addressing/none"));
    }

    #[test]
    fn anonymous_addresses_do_not_cross_versions() {
        assert!(W3C.is_anonymous(W3C.anonymous));
        assert!(!W3C.is_anonymous(MEMBER.anonymous));
        assert!(MEMBER.is_anonymous(" http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous "));
    }
}
