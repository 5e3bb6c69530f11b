#![deny(unsafe_code)]

//! `spark-soap-core` 提供 SOAP 消息管线的核心契约与执行引擎。
//!
//! # 模块定位（Why）
//! - 把“一次 SOAP 交换”拆成数据（[`Packet`]、[`Message`]）、处理阶段（[`Tube`]）与执行体（[`Fiber`]）三层，
//!   编解码、传输与协议阶段都以这些契约为边界协作；
//! - 装配期只构建一次的主管线（[`MasterChain`]）通过 [`TubeCloner`] 复制为每个并发交换独占的克隆，
//!   克隆与编解码器副本由 [`ResourcePool`] 复用。
//!
//! # 设计概要（How）
//! - `infoset`/`message`：元素树、头列表、附件集合与版本无关的 Fault 模型；消息体只读一次，复制需显式调用；
//! - `tube`：Arena + 索引表达可能带环的节点图，`TubeContext` 在回调中显式传递执行上下文；
//! - `fiber`：同步/异步两种驱动方式、挂起与恢复、上下文切换拦截器，以及服务端 Engine 的故障转换；
//! - `config`/`model`：serde 可反序列化的部署配置与只读服务模型；
//! - `transport`：出站连接与回传通道契约，由外部传输实现；
//! - `test_stubs`：记录型测试桩，供各 crate 测试复用。
//!
//! # 命名约定（Consistency）
//! - 错误统一为 [`SoapError`]，每个变体对应 `spark.soap.<域>.<语义>` 形式的稳定错误码。

pub mod config;
pub mod error;
pub mod fiber;
pub mod infoset;
pub mod message;
pub mod model;
pub mod packet;
pub mod pool;
pub mod test_stubs;
pub mod transport;
pub mod tube;
pub mod version;

pub use config::{
    AddressingConfig, AddressingVersion, Anonymity, BindingConfig, ContentNegotiation,
    MtomConfig, OperationConfig, OutOfBandPolicy, ServiceConfig,
};
pub use error::{Result, SoapError, codes};
pub use fiber::{
    Engine, EngineRole, Executor, Fiber, FiberContextSwitchInterceptor, FiberHandle,
    InlineExecutor, ThreadPerTaskExecutor,
};
pub use infoset::{Attribute, BinaryData, Element, Node, QName};
pub use message::{Attachment, AttachmentSet, HeaderList, Message, MessageParts, SoapFault};
pub use model::{OperationModel, ServiceModel};
pub use packet::{Packet, Principal};
pub use pool::{PoolStats, Pooled, ResourcePool};
pub use transport::{
    ContentType, OutboundConnection, TransportBackChannel, TransportFactory, TransportRequest,
    TransportResponse,
};
pub use tube::{ChainBuilder, MasterChain, NextAction, Tube, TubeChain, TubeCloner, TubeContext, TubeId};
pub use version::{FaultKind, SoapVersion};
