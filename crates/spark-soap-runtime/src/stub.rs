//! 客户端 Stub：以池化的管线克隆发起调用。
//!
//! # 设计背景（Why）
//! - 管线克隆只能被一个 Fiber 独占，而深复制成本不低；Stub 以 [`ResourcePool`] 保存空闲克隆，
//!   每次调用租借一份，调用结束后归还；
//! - 同步、异步、单向三种调用方式共享同一套 Packet 准备逻辑，差别只在 Fiber 的驱动方式。
//!
//! # 契约说明（What）
//! - 同步调用在调用线程上执行，异步调用的回调恰好执行一次，且在回调执行前克隆已归还资源池；
//! - [`Stub::close`] 之后的任何调用都返回 [`SoapError::ShutDown`]，空闲克隆立即释放；
//! - 单向调用不等待回复，对端若返回内容则被忽略。

use std::fmt;
use std::sync::Arc;

use spark_soap_core::{
    Element, Engine, MasterChain, Message, OperationModel, Packet, Pooled, ResourcePool, Result,
    ServiceModel, SoapError, TubeChain,
};
use tracing::debug;

use crate::assembler::TubelineAssembler;

/// 默认保留的空闲克隆数。
pub const DEFAULT_POOL_CAPACITY: usize = 8;

pub struct Stub {
    model: Arc<ServiceModel>,
    engine: Engine,
    chains: ResourcePool<TubeChain>,
}

impl Stub {
    /// 以已装配的主管线构造。
    pub fn new(model: Arc<ServiceModel>, master: Arc<MasterChain>, engine: Engine) -> Self {
        Self::with_capacity(model, master, engine, DEFAULT_POOL_CAPACITY)
    }

    pub fn with_capacity(
        model: Arc<ServiceModel>,
        master: Arc<MasterChain>,
        engine: Engine,
        capacity: usize,
    ) -> Self {
        let pool_name = format!("stub:{}", model.service_name());
        let chains = ResourcePool::new(pool_name, capacity, move || master.clone_chain());
        Self {
            model,
            engine,
            chains,
        }
    }

    /// 用装配器装配客户端主管线并构造 Stub。
    pub fn assemble(
        assembler: &TubelineAssembler,
        model: Arc<ServiceModel>,
        engine: Engine,
    ) -> Result<Self> {
        let master = assembler.assemble_client(Arc::clone(&model))?;
        Ok(Self::new(model, Arc::new(master), engine))
    }

    pub fn model(&self) -> &Arc<ServiceModel> {
        &self.model
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn pool(&self) -> &ResourcePool<TubeChain> {
        &self.chains
    }

    /// 为操作准备请求 Packet：目标地址、SOAP action、是否等待回复与端点模型。
    pub fn request_packet(&self, operation: &str, payload: Element) -> Result<Packet> {
        let op = self.operation(operation)?;
        let message = Message::new(self.model.binding().soap_version, payload);
        let mut packet = Packet::with_message(message);
        packet.set_endpoint(Arc::clone(&self.model));
        if !self.model.address().is_empty() {
            packet.set_endpoint_address(self.model.address());
        }
        if let Some(action) = op.soap_action().or(op.input_action()) {
            packet.set_soap_action(action);
        }
        packet.set_expect_reply(!op.is_one_way());
        Ok(packet)
    }

    /// 同步请求-响应调用。
    pub fn call(&self, operation: &str, payload: Element) -> Result<Message> {
        let packet = self.request_packet(operation, payload)?;
        let mut response = self.process(packet)?;
        response.take_message().ok_or_else(|| {
            SoapError::transport(self.model.address(), "the peer returned no response message")
        })
    }

    /// 单向调用：发送后不等待回复。
    pub fn call_one_way(&self, operation: &str, payload: Element) -> Result<()> {
        let mut packet = self.request_packet(operation, payload)?;
        packet.set_expect_reply(false);
        self.process(packet).map(|_| ())
    }

    /// 异步请求-响应调用，回调恰好执行一次。
    pub fn call_async<F>(&self, operation: &str, payload: Element, callback: F)
    where
        F: FnOnce(Result<Message>) + Send + 'static,
    {
        let packet = match self.request_packet(operation, payload) {
            Ok(packet) => packet,
            Err(error) => {
                callback(Err(error));
                return;
            }
        };
        let address = self.model.address().to_owned();
        self.process_async(packet, move |result| {
            callback(result.and_then(|mut response| {
                response.take_message().ok_or_else(|| {
                    SoapError::transport(address, "the peer returned no response message")
                })
            }))
        });
    }

    /// 以调用方准备好的 Packet 同步执行管线。
    pub fn process(&self, packet: Packet) -> Result<Packet> {
        let mut chain = self.chains.take()?;
        let fiber = self.engine.create_fiber();
        debug!(fiber.id = fiber.id(), service = self.model.service_name(), "stub call");
        fiber.run_sync(&mut chain, packet)
    }

    /// 以调用方准备好的 Packet 异步执行管线。
    pub fn process_async<F>(&self, packet: Packet, callback: F)
    where
        F: FnOnce(Result<Packet>) + Send + 'static,
    {
        let chain: Pooled<TubeChain> = match self.chains.take() {
            Ok(chain) => chain,
            Err(error) => {
                callback(Err(error));
                return;
            }
        };
        let fiber = self.engine.create_fiber();
        debug!(fiber.id = fiber.id(), service = self.model.service_name(), "stub async call");
        fiber.start(chain, packet, callback);
    }

    /// 关闭 Stub，释放空闲克隆。
    pub fn close(&self) {
        self.chains.dispose();
    }

    pub fn is_closed(&self) -> bool {
        self.chains.is_disposed()
    }

    fn operation(&self, name: &str) -> Result<&OperationModel> {
        self.model.operation(name).ok_or_else(|| {
            SoapError::Configuration(format!(
                "service `{}` has no operation `{name}`",
                self.model.service_name()
            ))
        })
    }
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("service", &self.model.service_name())
            .field("engine", &self.engine.name())
            .field("pool", &self.chains.statistics())
            .finish()
    }
}
