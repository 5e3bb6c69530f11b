//! Packet：在管线中流动的“消息 + 带外属性”载体。
//!
//! # 教案式说明
//! - **意图（Why）**：Tube 之间除了消息本身还需要传递调用上下文（属性、回传通道、端点模型、协商提示），
//!   Packet 把这两类数据装在同一个可变记录里，每次交换独占一份；
//! - **逻辑（How）**：
//!   - 调用级属性（`invocation_properties`）在 [`Packet::create_response`] 时复制到响应，
//!     但登记为“处理器作用域”的键会被排除；
//!   - 传输回传通道、主体、端点模型、内容协商提示等瞬态字段只属于当前 Packet，不随响应传播；
//!   - [`Packet::set_message`] 传入 `None` 表示“丢弃消息体”，此后任何重新挂载都会被拒绝；
//! - **契约（What）**：所有操作都是全函数，不返回错误；拒绝重新挂载以 `false` 返回值表达；
//! - **权衡（Trade-offs）**：属性值使用 `serde_json::Value`，牺牲静态类型以换取与外部响应上下文的互通。

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::config::ContentNegotiation;
use crate::message::Message;
use crate::model::ServiceModel;
use crate::transport::TransportBackChannel;

/// 透传的安全主体，核心不解释其内容。
pub type Principal = Arc<dyn Any + Send + Sync>;

/// 管线中的数据单元。
#[derive(Default)]
pub struct Packet {
    message: Option<Message>,
    message_dropped: bool,
    invocation_properties: BTreeMap<String, Value>,
    handler_scoped: BTreeSet<String>,
    back_channel: Option<Box<dyn TransportBackChannel>>,
    principal: Option<Principal>,
    endpoint: Option<Arc<ServiceModel>>,
    endpoint_address: Option<String>,
    soap_action: Option<String>,
    accept_content_type: Option<String>,
    content_negotiation: Option<ContentNegotiation>,
    expect_reply: Option<bool>,
}

impl Packet {
    /// 空 Packet，不携带消息。
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(message: Message) -> Self {
        Self {
            message: Some(message),
            ..Self::default()
        }
    }

    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    pub fn message_mut(&mut self) -> Option<&mut Message> {
        self.message.as_mut()
    }

    pub fn has_message(&self) -> bool {
        self.message.is_some()
    }

    /// 取走消息交给编解码器或应用代码；不视为丢弃。
    pub fn take_message(&mut self) -> Option<Message> {
        self.message.take()
    }

    /// 设置或丢弃消息体。
    ///
    /// 传入 `None` 会把 Packet 转为“无消息体”载体并永久锁定；锁定后传入 `Some` 返回 `false`，
    /// 消息被丢弃且 Packet 保持无消息体。
    pub fn set_message(&mut self, message: Option<Message>) -> bool {
        match message {
            None => {
                self.message = None;
                self.message_dropped = true;
                true
            }
            Some(_) if self.message_dropped => {
                tracing::debug!("refusing to re-attach a message after it was dropped");
                false
            }
            Some(message) => {
                self.message = Some(message);
                true
            }
        }
    }

    /// 等价于 `set_message(None)`。
    pub fn drop_message(&mut self) {
        self.set_message(None);
    }

    pub fn is_message_dropped(&self) -> bool {
        self.message_dropped
    }

    /// 由请求派生响应：复制调用级属性（排除处理器作用域键），瞬态字段一律不复制。
    pub fn create_response(&self, message: Option<Message>) -> Packet {
        let invocation_properties = self
            .invocation_properties
            .iter()
            .filter(|(key, _)| !self.handler_scoped.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Packet {
            message,
            invocation_properties,
            ..Packet::default()
        }
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.invocation_properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.invocation_properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.handler_scoped.remove(key);
        self.invocation_properties.remove(key)
    }

    /// 写入只对处理器可见的属性，派生响应时不会复制。
    pub fn set_handler_scoped_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        self.handler_scoped.insert(key.clone());
        self.invocation_properties.insert(key, value.into());
    }

    pub fn is_handler_scoped(&self, key: &str) -> bool {
        self.handler_scoped.contains(key)
    }

    /// 全部调用级属性（含处理器作用域）。
    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.invocation_properties
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }

    /// 对外部响应上下文可见的属性视图。
    pub fn response_context(&self) -> BTreeMap<String, Value> {
        self.invocation_properties
            .iter()
            .filter(|(key, _)| !self.handler_scoped.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn set_back_channel(&mut self, channel: Box<dyn TransportBackChannel>) {
        self.back_channel = Some(channel);
    }

    pub fn back_channel_mut(&mut self) -> Option<&mut (dyn TransportBackChannel + 'static)> {
        self.back_channel.as_deref_mut()
    }

    pub fn take_back_channel(&mut self) -> Option<Box<dyn TransportBackChannel>> {
        self.back_channel.take()
    }

    /// 提前关闭回传通道；没有通道时为空操作。
    pub fn close_back_channel(&mut self) {
        if let Some(channel) = self.back_channel.as_mut() {
            channel.close();
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    pub fn endpoint(&self) -> Option<&Arc<ServiceModel>> {
        self.endpoint.as_ref()
    }

    pub fn set_endpoint(&mut self, endpoint: Arc<ServiceModel>) {
        self.endpoint = Some(endpoint);
    }

    pub fn endpoint_address(&self) -> Option<&str> {
        self.endpoint_address.as_deref()
    }

    pub fn set_endpoint_address(&mut self, address: impl Into<String>) {
        self.endpoint_address = Some(address.into());
    }

    pub fn soap_action(&self) -> Option<&str> {
        self.soap_action.as_deref()
    }

    pub fn set_soap_action(&mut self, action: impl Into<String>) {
        self.soap_action = Some(action.into());
    }

    pub fn accept_content_type(&self) -> Option<&str> {
        self.accept_content_type.as_deref()
    }

    pub fn set_accept_content_type(&mut self, accept: impl Into<String>) {
        self.accept_content_type = Some(accept.into());
    }

    /// 本次交换的内容协商覆盖值；`None` 表示沿用绑定配置。
    pub fn content_negotiation(&self) -> Option<ContentNegotiation> {
        self.content_negotiation
    }

    pub fn set_content_negotiation(&mut self, mode: ContentNegotiation) {
        self.content_negotiation = Some(mode);
    }

    /// 调用方是否等待回复；未设置时按双向处理。
    pub fn expects_reply(&self) -> bool {
        self.expect_reply.unwrap_or(true)
    }

    pub fn set_expect_reply(&mut self, expect: bool) {
        self.expect_reply = Some(expect);
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("message", &self.message)
            .field("message_dropped", &self.message_dropped)
            .field("invocation_properties", &self.invocation_properties)
            .field("handler_scoped", &self.handler_scoped)
            .field("has_back_channel", &self.back_channel.is_some())
            .field("endpoint_address", &self.endpoint_address)
            .field("soap_action", &self.soap_action)
            .field("content_negotiation", &self.content_negotiation)
            .finish_non_exhaustive()
    }
}
