//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为 SOAP 运行时跨层共享的失败语义提供单一出口：线格式解析、阶段内部故障、传输失败、资源关闭等；
//! - 每个变体都映射到稳定的 `<域>.<语义>` 错误码，日志与告警可以按码聚合，而不必解析自然语言消息。
//!
//! ## 分类（What）
//! - **线格式错误**（[`SoapError::WireFormat`]）：信封畸形、版本命名空间不匹配、无法处理的媒体类型，
//!   由编解码层产生，解码立即失败并交还传输层报告；
//! - **阶段内部故障**（[`SoapError::Stage`]）：Tube 执行中的意外失败（包括被捕获的 panic），
//!   在服务端 Engine 边界被转换为协议 Fault 报文；
//! - **资源耗尽**（[`SoapError::ShutDown`]）：资源池或管线已被释放后的访问；
//! - 协议头错误（WS-Addressing）不经由本类型返回，而是直接构造 Fault 报文，见 `spark-soap-addressing`。

use std::borrow::Cow;

use thiserror::Error;

/// 稳定错误码常量表。
///
/// 码值一经发布不得修改语义；新增码值需同时补充 [`SoapError::code`] 的映射。
pub mod codes {
    pub const WIRE_MALFORMED_ENVELOPE: &str = "spark.soap.wire.malformed_envelope";
    pub const WIRE_VERSION_MISMATCH: &str = "spark.soap.wire.version_mismatch";
    pub const WIRE_UNSUPPORTED_MEDIA_TYPE: &str = "spark.soap.wire.unsupported_media_type";
    pub const WIRE_MALFORMED_XML: &str = "spark.soap.wire.malformed_xml";
    pub const WIRE_MALFORMED_MIME: &str = "spark.soap.wire.malformed_mime";
    pub const WIRE_MISSING_ATTACHMENT: &str = "spark.soap.wire.missing_attachment";
    pub const WIRE_BINARY_ENCODING: &str = "spark.soap.wire.binary_encoding";
    pub const WIRE_UNEXPECTED_ATTACHMENTS: &str = "spark.soap.wire.unexpected_attachments";
    pub const WIRE_NO_MESSAGE: &str = "spark.soap.wire.no_message";
    pub const MESSAGE_CONSUMED: &str = "spark.soap.message.consumed";
    pub const STAGE_FAILED: &str = "spark.soap.stage.failed";
    pub const STAGE_ILLEGAL_ACTION: &str = "spark.soap.stage.illegal_action";
    pub const TRANSPORT_FAILED: &str = "spark.soap.transport.failed";
    pub const POOL_SHUT_DOWN: &str = "spark.soap.pool.shut_down";
    pub const CONFIGURATION_INVALID: &str = "spark.soap.configuration.invalid";
    pub const CHAIN_INCOMPLETE: &str = "spark.soap.chain.incomplete";
}

/// SOAP 运行时统一错误类型。
///
/// # 教案式说明
/// - **意图 (Why)**：把分散在编解码、管线、传输各层的失败合流为一个可 `?` 传播的枚举，
///   并通过 [`code`](Self::code) 暴露稳定错误码；
/// - **契约 (What)**：所有变体 `Send + Sync + 'static`，可以跨 Fiber 挂起点与执行器线程移动；
/// - **权衡 (Trade-offs)**：消息字段使用 `String` 保存，牺牲少量分配换取排障时的可读性。
#[derive(Debug, Error)]
pub enum SoapError {
    /// 线格式错误，`code` 取自 [`codes`] 中的 `WIRE_*` 常量。
    #[error("wire format error [{code}]: {message}")]
    WireFormat { code: &'static str, message: String },

    /// 流式消息体已被读取，无法再次消费。
    #[error("message payload has already been consumed")]
    MessageConsumed,

    /// 阶段执行失败；`stage` 为触发失败的 Tube 名称。
    #[error("stage `{stage}` failed: {message}")]
    Stage {
        stage: Cow<'static, str>,
        message: String,
    },

    /// Tube 返回了当前阶段不允许的下一步动作。
    #[error("stage `{stage}` returned an illegal action: {detail}")]
    IllegalAction {
        stage: Cow<'static, str>,
        detail: &'static str,
    },

    /// 传输层失败（建连、写出、读回）。
    #[error("transport failure while talking to `{address}`: {message}")]
    Transport { address: String, message: String },

    /// 资源池或管线已经释放。
    #[error("`{0}` has already been shut down")]
    ShutDown(Cow<'static, str>),

    /// 配置非法。
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// 管线装配未完成（预留的节点未被填充或头节点缺失）。
    #[error("tube chain is incomplete: {0}")]
    IncompleteChain(String),
}

impl SoapError {
    /// 构造阶段失败。
    pub fn stage(stage: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// 构造线格式错误。
    pub fn wire(code: &'static str, message: impl Into<String>) -> Self {
        Self::WireFormat {
            code,
            message: message.into(),
        }
    }

    /// 构造传输失败。
    pub fn transport(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            address: address.into(),
            message: message.into(),
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::WireFormat { code, .. } => code,
            Self::MessageConsumed => codes::MESSAGE_CONSUMED,
            Self::Stage { .. } => codes::STAGE_FAILED,
            Self::IllegalAction { .. } => codes::STAGE_ILLEGAL_ACTION,
            Self::Transport { .. } => codes::TRANSPORT_FAILED,
            Self::ShutDown(_) => codes::POOL_SHUT_DOWN,
            Self::Configuration(_) => codes::CONFIGURATION_INVALID,
            Self::IncompleteChain(_) => codes::CHAIN_INCOMPLETE,
        }
    }

    /// 是否属于线格式错误（分类 1）。
    pub fn is_wire_format(&self) -> bool {
        matches!(self, Self::WireFormat { .. })
    }

    /// 是否属于“已关闭”错误（分类 5）。
    pub fn is_shut_down(&self) -> bool {
        matches!(self, Self::ShutDown(_))
    }
}

/// 运行时统一的 `Result` 别名。
pub type Result<T, E = SoapError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_per_variant() {
        assert_eq!(
            SoapError::wire(codes::WIRE_VERSION_MISMATCH, "x").code(),
            codes::WIRE_VERSION_MISMATCH
        );
        assert_eq!(SoapError::MessageConsumed.code(), codes::MESSAGE_CONSUMED);
        assert_eq!(SoapError::ShutDown("pool".into()).code(), codes::POOL_SHUT_DOWN);
        assert!(SoapError::ShutDown("pool".into()).is_shut_down());
        assert!(!SoapError::stage("wsa", "boom").is_wire_format());
    }

    #[test]
    fn display_names_the_stage() {
        let err = SoapError::stage("wsa-server", "reply target missing");
        assert_eq!(
            err.to_string(),
            "stage `wsa-server` failed: reply target missing"
        );
    }
}
