//! 传输协作者契约。
//!
//! # 设计背景（Why）
//! - 监听器、HTTP 分帧、连接池都在核心之外；核心只需要三件事：把编码好的字节发出去并拿回响应、
//!   在入站交换上提前释放回传通道、以及描述载荷的内容类型；
//! - 契约以同步 trait 表达：Fiber 的挂起点只存在于 Tube 的显式 Suspend 与带外投递，传输调用本身在线程上完成。
//!
//! # 契约说明（What）
//! - [`TransportBackChannel::close`] 允许重复调用，第二次及之后为空操作；
//! - [`OutboundConnection::send`] 在单向交换（无需回复）时返回 `Ok(None)`；
//! - 实现需满足 `Send`，以便连接随 Fiber 在执行器线程之间移动。

use std::fmt;

use bytes::Bytes;

use crate::error::Result;

/// 编码结果携带的内容类型描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    content_type: String,
    soap_action: Option<String>,
    accept: Option<String>,
}

impl ContentType {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            soap_action: None,
            accept: None,
        }
    }

    /// `SOAPAction` 传输头的取值（仅 SOAP 1.1 使用）。
    pub fn with_soap_action(mut self, soap_action: impl Into<String>) -> Self {
        self.soap_action = Some(soap_action.into());
        self
    }

    /// `Accept` 传输头的取值（悲观协商时声明可接受的替代编码）。
    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn soap_action(&self) -> Option<&str> {
        self.soap_action.as_deref()
    }

    pub fn accept(&self) -> Option<&str> {
        self.accept.as_deref()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content_type)
    }
}

/// 入站交换的回传通道。
pub trait TransportBackChannel: Send {
    /// 提前释放回传通道，告知传输层本次交换不会再经由原通道回复。
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// 发往对端的一次请求。
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub body: Bytes,
    pub content_type: ContentType,
    /// 调用方是否等待回复。
    pub expect_reply: bool,
}

/// 对端返回的原始响应。
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub body: Bytes,
    pub content_type: String,
}

/// 已建立的出站连接。
pub trait OutboundConnection: Send {
    fn send(&mut self, request: TransportRequest) -> Result<Option<TransportResponse>>;
}

/// 出站连接工厂，按目标地址建连。
pub trait TransportFactory: Send + Sync {
    fn connect(&self, address: &str) -> Result<Box<dyn OutboundConnection>>;
}
