#![deny(unsafe_code)]

//! `spark-soap-addressing` 在 SOAP 管线上实现 WS-Addressing。
//!
//! # 模块定位（Why）
//! - 服务端需要按请求的 `ReplyTo`/`FaultTo` 决定响应走向，并在进入端点之前拒绝违反寻址规范或
//!   绑定匿名性约束的请求；客户端需要为请求写入 `To`/`Action`/`MessageID`/`ReplyTo`；
//! - 两者都以 [`AddressingTubeFactory`] 插入管线，未启用寻址的绑定不受任何影响。
//!
//! # 设计概要（How）
//! - `version`：W3C 1.0 与 2004/08 Member Submission 两套词汇；
//! - `epr`/`headers`：端点引用与寻址头的解析、写出；
//! - `fault`：寻址故障及其 SOAP Fault 渲染；
//! - `server`/`client`：两端的寻址阶段；
//! - `delivery`：非匿名回复目标的带外投递，支持每次新建或池化复用出站管线。
//!
//! # 契约说明（What）
//! - 协议头错误与匿名性约束冲突总是以 Fault 报文作为正常响应返回，单向操作上则被抑制；
//! - 带外投递失败只记录日志，不影响原交换。

pub mod client;
pub mod delivery;
pub mod epr;
pub mod factory;
pub mod fault;
pub mod headers;
pub mod server;
pub mod version;

pub use client::WsaClientTube;
pub use delivery::OutOfBandDelivery;
pub use epr::EndpointReference;
pub use factory::AddressingTubeFactory;
pub use fault::{AddressingFault, AddressingFaultKind};
pub use headers::{AddressingHeaders, new_message_id, write_reference_parameters};
pub use server::WsaServerTube;
pub use version::{MEMBER, Vocabulary, W3C, WSA_PREFIX};
