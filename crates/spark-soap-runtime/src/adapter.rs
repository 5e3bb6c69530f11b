//! 服务端适配器：传输层与服务端管线之间的入口。
//!
//! # 教案式说明
//! - **意图（Why）**：监听器只交付字节、内容类型与回传通道；适配器负责解码、驱动 Fiber、编码响应，
//!   并保证每个并发请求独占一份管线克隆与编解码器副本；
//! - **逻辑（How）**：
//!   1. 从 [`ResourcePool`] 租借一个 [`PipeHead`]（管线克隆 + 编解码器副本）；
//!   2. 把传输元数据（SOAPAction、Accept、回传通道）写入新 Packet 后解码；
//!   3. 在服务端 Engine 上同步执行管线，内部故障已在 Engine 边界转换为 Fault；
//!   4. 响应带消息时沿用请求的协商结果编码，否则返回 `None`（单向或已经带外投递）；
//! - **契约（What）**：
//!   - 线格式错误以 [`SoapError::WireFormat`] 返回给传输层，由其决定如何上报；
//!   - [`ServerAdapter::close`] 之后的请求返回 [`SoapError::ShutDown`]；
//! - **风险（Trade-offs）**：适配器不做并发限流，资源池在突发并发下会临时新建 `PipeHead`。

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use spark_soap_codec::{Codec, EncodedMessage, SoapBindingCodec};
use spark_soap_core::{
    Engine, MasterChain, ResourcePool, Result, ServiceModel, SoapError, TransportBackChannel,
    TubeChain,
};
use tracing::debug;

use crate::assembler::TubelineAssembler;
use crate::endpoint::Endpoint;
use crate::stub::DEFAULT_POOL_CAPACITY;

/// 传输层交付的一次入站请求。
pub struct IncomingRequest {
    pub body: Bytes,
    pub content_type: String,
    /// `SOAPAction` 传输头（可带引号）。
    pub soap_action: Option<String>,
    /// `Accept` 传输头。
    pub accept: Option<String>,
    pub back_channel: Option<Box<dyn TransportBackChannel>>,
}

impl IncomingRequest {
    pub fn new(body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
            soap_action: None,
            accept: None,
            back_channel: None,
        }
    }

    pub fn with_soap_action(mut self, soap_action: impl Into<String>) -> Self {
        self.soap_action = Some(soap_action.into());
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn with_back_channel(mut self, channel: Box<dyn TransportBackChannel>) -> Self {
        self.back_channel = Some(channel);
        self
    }
}

impl fmt::Debug for IncomingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingRequest")
            .field("len", &self.body.len())
            .field("content_type", &self.content_type)
            .field("soap_action", &self.soap_action)
            .field("accept", &self.accept)
            .field("has_back_channel", &self.back_channel.is_some())
            .finish()
    }
}

/// 单个工作者独占的管线入口。
pub struct PipeHead {
    chain: TubeChain,
    codec: Box<dyn Codec>,
}

pub struct ServerAdapter {
    model: Arc<ServiceModel>,
    engine: Engine,
    heads: ResourcePool<PipeHead>,
}

impl ServerAdapter {
    pub fn new(
        model: Arc<ServiceModel>,
        master: Arc<MasterChain>,
        codec: Box<dyn Codec>,
        engine: Engine,
    ) -> Self {
        Self::with_capacity(model, master, codec, engine, DEFAULT_POOL_CAPACITY)
    }

    pub fn with_capacity(
        model: Arc<ServiceModel>,
        master: Arc<MasterChain>,
        codec: Box<dyn Codec>,
        engine: Engine,
        capacity: usize,
    ) -> Self {
        let prototype = Mutex::new(codec);
        let pool_name = format!("pipe-head:{}", model.service_name());
        let heads = ResourcePool::new(pool_name, capacity, move || {
            Ok(PipeHead {
                chain: master.clone_chain()?,
                codec: prototype.lock().copy(),
            })
        });
        Self {
            model,
            engine,
            heads,
        }
    }

    /// 用装配器装配服务端主管线，编解码器与 Engine 按模型的绑定配置生成。
    pub fn assemble(
        assembler: &TubelineAssembler,
        model: Arc<ServiceModel>,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<Self> {
        let master = assembler.assemble_server(Arc::clone(&model), endpoint)?;
        let binding = model.binding().clone();
        let engine = Engine::server(
            format!("server:{}", model.service_name()),
            binding.soap_version,
        );
        Ok(Self::new(
            model,
            Arc::new(master),
            Box::new(SoapBindingCodec::new(binding)),
            engine,
        ))
    }

    pub fn model(&self) -> &Arc<ServiceModel> {
        &self.model
    }

    pub fn pool(&self) -> &ResourcePool<PipeHead> {
        &self.heads
    }

    /// 处理一次入站请求；返回需经原通道发回的响应。
    pub fn handle(&self, request: IncomingRequest) -> Result<Option<EncodedMessage>> {
        let mut lease = self.heads.take()?;
        let head = &mut *lease;

        let mut packet = spark_soap_core::Packet::new();
        packet.set_endpoint(Arc::clone(&self.model));
        if !self.model.address().is_empty() {
            packet.set_endpoint_address(self.model.address());
        }
        if let Some(action) = request.soap_action.as_deref().map(unquote) {
            if !action.is_empty() {
                packet.set_soap_action(action);
            }
        }
        if let Some(accept) = request.accept {
            packet.set_accept_content_type(accept);
        }
        if let Some(channel) = request.back_channel {
            packet.set_back_channel(channel);
        }

        head.codec
            .decode(&request.body, &request.content_type, &mut packet)
            .map_err(SoapError::from)?;
        let negotiation = packet.content_negotiation();
        let accept = packet.accept_content_type().map(str::to_owned);

        let fiber = self.engine.create_fiber();
        debug!(fiber.id = fiber.id(), service = self.model.service_name(), "dispatching request");
        let mut response = fiber.run_sync(&mut head.chain, packet)?;
        if !response.has_message() {
            return Ok(None);
        }
        if let Some(mode) = negotiation {
            response.set_content_negotiation(mode);
        }
        if let Some(accept) = accept {
            response.set_accept_content_type(accept);
        }
        let encoded = head.codec.encode(&mut response)?;
        Ok(Some(encoded))
    }

    /// 关闭适配器，释放空闲的 `PipeHead`。
    pub fn close(&self) {
        self.heads.dispose();
    }
}

impl fmt::Debug for ServerAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerAdapter")
            .field("service", &self.model.service_name())
            .field("engine", &self.engine.name())
            .field("pool", &self.heads.statistics())
            .finish()
    }
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::unquote;
    use proptest::prelude::*;

    #[test]
    fn strips_one_pair_of_quotes() {
        assert_eq!(unquote("\"urn:echo\""), "urn:echo");
        assert_eq!(unquote("  urn:echo "), "urn:echo");
        assert_eq!(unquote("\"unbalanced"), "\"unbalanced");
        assert_eq!(unquote("\"\""), "");
    }

    proptest! {
        #[test]
        fn quoted_actions_unquote_to_themselves(action in "[a-z:/.]{0,24}") {
            let quoted = format!("\"{action}\"");
            prop_assert_eq!(unquote(&quoted), action.as_str());
        }
    }
}
