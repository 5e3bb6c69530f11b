#![deny(unsafe_code)]

//! `spark-soap-runtime` 把核心契约与编解码器组装成可调用的客户端与可部署的服务端。
//!
//! # 模块定位（Why）
//! - 核心只定义 Tube、Fiber 与资源池；本 crate 负责“用哪些 Tube、按什么顺序、在哪一端”；
//! - 客户端 [`Stub`] 与服务端 [`ServerAdapter`] 都以池化的管线克隆承载并发交换，协议特性经由
//!   [`TubeFactory`] 插入，不需要改动装配器本身。
//!
//! # 设计概要（How）
//! - `assembler`：装配上下文与工厂契约；
//! - `transport_tube`/`endpoint`：两端的终端阶段；
//! - `handler`：逻辑/协议处理器阶段对，互为表亲；
//! - `stub`/`adapter`：客户端调用入口与服务端请求入口；
//! - `logging`：全局 `tracing` Subscriber 安装。

pub mod adapter;
pub mod assembler;
pub mod endpoint;
pub mod handler;
pub mod logging;
pub mod stub;
pub mod transport_tube;

/// 寻址阶段解析出的请求 Action，仅在本次请求内可见。
pub const ACTION_PROPERTY: &str = "spark.soap.addressing.action";

pub use adapter::{IncomingRequest, PipeHead, ServerAdapter};
pub use assembler::{AssemblyContext, Side, TubeFactory, TubelineAssembler};
pub use endpoint::{Endpoint, EndpointTube};
pub use handler::{Direction, Handler, HandlerKind, HandlerTube, HandlerTubeFactory};
pub use logging::{LoggingError, install_tracing};
pub use stub::{DEFAULT_POOL_CAPACITY, Stub};
pub use transport_tube::TransportTube;
