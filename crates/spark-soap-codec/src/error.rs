use spark_soap_core::{SoapError, SoapVersion, codes};
use thiserror::Error;

/// 编解码失败。
///
/// # 教案式说明
/// - **意图（Why）**：解码失败必须以可区分、可上报的形式交还传输层，而不是被静默吞掉；
/// - **契约（What）**：每个变体对应 `spark.soap.wire.*` 下的一个稳定错误码，
///   通过 `From` 转换为 [`SoapError::WireFormat`]；消息体已被消费时保留原始的 [`SoapError`]。
#[derive(Debug, Error)]
pub enum CodecError {
    /// 根元素不是 `Envelope`，或缺少 `Body`。
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// 信封命名空间与期望的 SOAP 版本不一致。
    #[error("expected a {expected} envelope but found namespace `{found}`")]
    VersionMismatch {
        expected: SoapVersion,
        found: String,
    },

    /// 声明的内容类型无法由任何委托编解码器处理。
    #[error("unsupported content type `{0}`")]
    UnsupportedMediaType(String),

    #[error("malformed XML: {0}")]
    MalformedXml(String),

    #[error("malformed MIME package: {0}")]
    MalformedMime(String),

    /// 找不到被引用的 MIME 部件。
    #[error("no MIME part with content-id `{0}`")]
    MissingAttachment(String),

    #[error("binary encoding failure: {0}")]
    Binary(String),

    /// 当前编解码器不能携带附件。
    #[error("{0} cannot carry attachments")]
    UnexpectedAttachments(&'static str),

    #[error("packet carries no message to encode")]
    NoMessage,

    #[error(transparent)]
    Message(#[from] SoapError),
}

impl CodecError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope(_) => codes::WIRE_MALFORMED_ENVELOPE,
            Self::VersionMismatch { .. } => codes::WIRE_VERSION_MISMATCH,
            Self::UnsupportedMediaType(_) => codes::WIRE_UNSUPPORTED_MEDIA_TYPE,
            Self::MalformedXml(_) => codes::WIRE_MALFORMED_XML,
            Self::MalformedMime(_) => codes::WIRE_MALFORMED_MIME,
            Self::MissingAttachment(_) => codes::WIRE_MISSING_ATTACHMENT,
            Self::Binary(_) => codes::WIRE_BINARY_ENCODING,
            Self::UnexpectedAttachments(_) => codes::WIRE_UNEXPECTED_ATTACHMENTS,
            Self::NoMessage => codes::WIRE_NO_MESSAGE,
            Self::Message(inner) => inner.code(),
        }
    }
}

impl From<CodecError> for SoapError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Message(inner) => inner,
            other => SoapError::wire(other.code(), other.to_string()),
        }
    }
}

impl From<quick_xml::Error> for CodecError {
    fn from(error: quick_xml::Error) -> Self {
        Self::MalformedXml(error.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for CodecError {
    fn from(error: quick_xml::events::attributes::AttrError) -> Self {
        Self::MalformedXml(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_errors_keep_their_codes_across_conversion() {
        let err: SoapError = CodecError::VersionMismatch {
            expected: SoapVersion::Soap11,
            found: "urn:x".into(),
        }
        .into();
        assert_eq!(err.code(), codes::WIRE_VERSION_MISMATCH);
        assert!(err.is_wire_format());

        let consumed: SoapError = CodecError::Message(SoapError::MessageConsumed).into();
        assert!(matches!(consumed, SoapError::MessageConsumed));
    }
}
