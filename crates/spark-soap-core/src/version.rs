//! SOAP 协议版本常量。
//!
//! # 教案式说明
//! - **意图（Why）**：信封命名空间、媒体类型、Fault 代码名称在 SOAP 1.1 与 1.2 之间都不同，
//!   集中在一个枚举上可以让编解码器与 Fault 构造器用同一处真相；
//! - **契约（What）**：所有常量均为线格式定义的原值，不得本地化或修改大小写；
//! - **风险（Trade-offs）**：只覆盖 1.1/1.2 两个版本，若未来出现新版本需同步修改匹配分支。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::infoset::QName;

/// SOAP 版本。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SoapVersion {
    /// SOAP 1.1。
    #[serde(rename = "soap11", alias = "1.1")]
    Soap11,
    /// SOAP 1.2。
    #[default]
    #[serde(rename = "soap12", alias = "1.2")]
    Soap12,
}

pub const SOAP11_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP12_ENVELOPE_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Fault 代码的版本无关分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// 1.1 `Client` / 1.2 `Sender`。
    Sender,
    /// 1.1 `Server` / 1.2 `Receiver`。
    Receiver,
    /// 信封版本不匹配。
    VersionMismatch,
    /// 必须理解的头未被理解。
    MustUnderstand,
}

impl SoapVersion {
    /// 信封命名空间。
    pub const fn envelope_namespace(self) -> &'static str {
        match self {
            Self::Soap11 => SOAP11_ENVELOPE_NS,
            Self::Soap12 => SOAP12_ENVELOPE_NS,
        }
    }

    /// 纯 XML 载荷使用的媒体类型（不含参数）。
    pub const fn media_type(self) -> &'static str {
        match self {
            Self::Soap11 => "text/xml",
            Self::Soap12 => "application/soap+xml",
        }
    }

    /// 绑定标识符。
    pub const fn binding_id(self) -> &'static str {
        match self {
            Self::Soap11 => "http://schemas.xmlsoap.org/wsdl/soap/http",
            Self::Soap12 => "http://www.w3.org/2003/05/soap/bindings/HTTP/",
        }
    }

    /// 信封元素前缀，编码时使用。
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Soap11 => "S",
            Self::Soap12 => "env",
        }
    }

    /// 根据信封命名空间识别版本。
    pub fn from_envelope_namespace(ns: &str) -> Option<Self> {
        match ns {
            SOAP11_ENVELOPE_NS => Some(Self::Soap11),
            SOAP12_ENVELOPE_NS => Some(Self::Soap12),
            _ => None,
        }
    }

    /// 根据媒体类型（不含参数，忽略大小写）识别版本。
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        if media_type.eq_ignore_ascii_case("text/xml") {
            Some(Self::Soap11)
        } else if media_type.eq_ignore_ascii_case("application/soap+xml") {
            Some(Self::Soap12)
        } else {
            None
        }
    }

    /// 构造信封命名空间下的限定名。
    pub fn qname(self, local: &str) -> QName {
        QName::with_prefix(self.envelope_namespace(), local, self.prefix())
    }

    /// 返回 Fault 代码对应的限定名。
    pub fn fault_code(self, kind: FaultKind) -> QName {
        let local = match (self, kind) {
            (Self::Soap11, FaultKind::Sender) => "Client",
            (Self::Soap11, FaultKind::Receiver) => "Server",
            (Self::Soap12, FaultKind::Sender) => "Sender",
            (Self::Soap12, FaultKind::Receiver) => "Receiver",
            (_, FaultKind::VersionMismatch) => "VersionMismatch",
            (_, FaultKind::MustUnderstand) => "MustUnderstand",
        };
        self.qname(local)
    }

    /// Fault 代码限定名反查分类。
    pub fn fault_kind(self, code: &QName) -> Option<FaultKind> {
        if code.namespace() != self.envelope_namespace() {
            return None;
        }
        match code.local() {
            "Client" | "Sender" => Some(FaultKind::Sender),
            "Server" | "Receiver" => Some(FaultKind::Receiver),
            "VersionMismatch" => Some(FaultKind::VersionMismatch),
            "MustUnderstand" => Some(FaultKind::MustUnderstand),
            _ => None,
        }
    }
}

impl fmt::Display for SoapVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Soap11 => f.write_str("SOAP 1.1"),
            Self::Soap12 => f.write_str("SOAP 1.2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_and_media_types_round_trip() {
        for version in [SoapVersion::Soap11, SoapVersion::Soap12] {
            assert_eq!(
                SoapVersion::from_envelope_namespace(version.envelope_namespace()),
                Some(version)
            );
            assert_eq!(SoapVersion::from_media_type(version.media_type()), Some(version));
        }
        assert_eq!(SoapVersion::from_media_type("TEXT/XML"), Some(SoapVersion::Soap11));
        assert_eq!(SoapVersion::from_media_type("application/json"), None);
    }

    #[test]
    fn fault_codes_follow_version_naming() {
        let code = SoapVersion::Soap11.fault_code(FaultKind::Sender);
        assert_eq!(code.local(), "Client");
        let code = SoapVersion::Soap12.fault_code(FaultKind::Receiver);
        assert_eq!(code.local(), "Receiver");
        assert_eq!(
            SoapVersion::Soap12.fault_kind(&code),
            Some(FaultKind::Receiver)
        );
    }
}
