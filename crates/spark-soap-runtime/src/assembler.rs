//! 管线装配。
//!
//! # 教案式说明
//! - **意图（Why）**：客户端与服务端的管线由同一组可插拔工厂产生，协议特性（寻址、处理器等）
//!   只需实现 [`TubeFactory`] 即可参与装配，无需改动装配器；
//! - **逻辑（How）**：
//!   1. 先加入终端阶段：客户端为 [`TransportTube`]，服务端为 [`EndpointTube`]；
//!   2. 按注册顺序的**逆序**调用工厂，每个工厂拿到下游入口并返回新的入口，使第一个注册的工厂位于最上游；
//!   3. 以最终入口冻结为 [`MasterChain`]；
//! - **契约（What）**：
//!   - 工厂可以不插入任何阶段（原样返回 `next`）；
//!   - 需要表亲关系的工厂通过 [`AssemblyContext::reserve`]/[`AssemblyContext::fill`] 构造环；
//!   - 客户端装配要求已配置传输工厂，否则返回 [`SoapError::Configuration`]；
//! - **风险（Trade-offs）**：主管线只应装配一次，运行期通过克隆获得可执行实例。

use std::fmt;
use std::sync::Arc;

use spark_soap_codec::{Codec, SoapBindingCodec};
use spark_soap_core::{
    BindingConfig, ChainBuilder, MasterChain, Result, ServiceModel, SoapError, TransportFactory,
    Tube, TubeId,
};
use tracing::debug;

use crate::endpoint::{Endpoint, EndpointTube};
use crate::transport_tube::TransportTube;

/// 管线所在的一侧。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// 工厂在装配期间可见的上下文。
pub struct AssemblyContext {
    side: Side,
    model: Arc<ServiceModel>,
    builder: ChainBuilder,
    transport: Option<Arc<dyn TransportFactory>>,
}

impl AssemblyContext {
    pub fn side(&self) -> Side {
        self.side
    }

    pub fn model(&self) -> &Arc<ServiceModel> {
        &self.model
    }

    pub fn binding(&self) -> &BindingConfig {
        self.model.binding()
    }

    /// 出站传输工厂；服务端的带外投递也经由它建连。
    pub fn transport(&self) -> Option<&Arc<dyn TransportFactory>> {
        self.transport.as_ref()
    }

    /// 按绑定配置构造新的编解码器。
    pub fn codec(&self) -> Box<dyn Codec> {
        Box::new(SoapBindingCodec::new(self.binding().clone()))
    }

    pub fn add(&mut self, tube: Box<dyn Tube>) -> TubeId {
        self.builder.add(tube)
    }

    pub fn reserve(&mut self) -> TubeId {
        self.builder.reserve()
    }

    pub fn fill(&mut self, id: TubeId, tube: Box<dyn Tube>) -> Result<()> {
        self.builder.fill(id, tube)
    }
}

/// 协议特性的阶段工厂。
pub trait TubeFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// 在客户端管线中插入阶段，返回新的入口。
    fn create_client(&self, _ctx: &mut AssemblyContext, next: TubeId) -> Result<TubeId> {
        Ok(next)
    }

    /// 在服务端管线中插入阶段，返回新的入口。
    fn create_server(&self, _ctx: &mut AssemblyContext, next: TubeId) -> Result<TubeId> {
        Ok(next)
    }
}

/// 以注册的工厂装配客户端与服务端主管线。
#[derive(Clone, Default)]
pub struct TubelineAssembler {
    factories: Vec<Arc<dyn TubeFactory>>,
    transport: Option<Arc<dyn TransportFactory>>,
}

impl TubelineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工厂；先注册者位于更上游。
    pub fn with_factory(mut self, factory: impl TubeFactory + 'static) -> Self {
        self.factories.push(Arc::new(factory));
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn TransportFactory>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn transport(&self) -> Option<&Arc<dyn TransportFactory>> {
        self.transport.as_ref()
    }

    pub fn factory_names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|factory| factory.name()).collect()
    }

    fn context(&self, side: Side, model: Arc<ServiceModel>) -> AssemblyContext {
        AssemblyContext {
            side,
            model,
            builder: ChainBuilder::new(),
            transport: self.transport.clone(),
        }
    }

    /// 装配客户端主管线，终端为 [`TransportTube`]。
    pub fn assemble_client(&self, model: Arc<ServiceModel>) -> Result<MasterChain> {
        let transport = self.transport.clone().ok_or_else(|| {
            SoapError::Configuration("client assembly requires a transport factory".to_owned())
        })?;
        let mut ctx = self.context(Side::Client, model);
        let address = Some(ctx.model().address().to_owned()).filter(|a| !a.is_empty());
        let terminal = TransportTube::new(ctx.codec(), transport, address);
        let mut head = ctx.add(Box::new(terminal));
        for factory in self.factories.iter().rev() {
            head = factory.create_client(&mut ctx, head)?;
            debug!(factory = factory.name(), head = %head, "client factory applied");
        }
        ctx.builder.build(head)
    }

    /// 装配服务端主管线，终端为 [`EndpointTube`]。
    pub fn assemble_server(
        &self,
        model: Arc<ServiceModel>,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<MasterChain> {
        let mut ctx = self.context(Side::Server, model);
        let mut head = ctx.add(Box::new(EndpointTube::new(endpoint)));
        for factory in self.factories.iter().rev() {
            head = factory.create_server(&mut ctx, head)?;
            debug!(factory = factory.name(), head = %head, "server factory applied");
        }
        ctx.builder.build(head)
    }
}

impl fmt::Debug for TubelineAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TubelineAssembler")
            .field("factories", &self.factory_names())
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}
