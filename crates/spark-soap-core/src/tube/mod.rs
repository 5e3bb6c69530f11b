//! Tube：双阶段协议处理单元及其图结构。
//!
//! # 设计背景（Why）
//! - 每个协议阶段都需要“请求向下 / 响应向上”两个入口，并能决定下一步是继续向下、直接返回、
//!   抛出错误还是挂起等待外部事件；
//! - 协作阶段（例如一对处理器 Tube）需要互相引用，对象图因此可能带环。Rust 中以
//!   **Arena + 索引** 表达：节点保存在 [`TubeChain`] 的槽位中，相互引用只保存 [`TubeId`]。
//!
//! # 核心机制（How）
//! - [`ChainBuilder`] 在装配期构建 [`MasterChain`]，`reserve`/`fill` 支持先占位后填充，以便表达“表亲”环；
//! - 主管线不可执行，只能经由 [`TubeCloner`] 深复制为 [`TubeChain`]；复制期间维护“原节点 → 新节点”的身份表，
//!   保证共享引用在复制后仍指向同一个新节点；
//! - Fiber 执行节点时把节点暂时移出槽位，再以 [`TubeContext`] 暴露其余节点，
//!   因此节点可以在回调中安全地访问表亲节点。
//!
//! # 契约说明（What）
//! - [`Tube::copy`] 必须返回**全新实例**，不得携带任何每次调用的暂存状态；
//! - `pre_destroy` 对每个执行实例恰好调用一次，由 [`TubeChain::dispose`] 或析构保证。

mod chain;
mod cloner;

use std::any::Any;
use std::fmt;

pub use chain::{ChainBuilder, MasterChain, TubeChain};
pub use cloner::TubeCloner;

use crate::error::SoapError;
use crate::fiber::FiberHandle;
use crate::packet::Packet;

/// 管线中节点的索引。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TubeId(pub(crate) usize);

impl TubeId {
    /// 由原始索引构造；索引只在所属管线内有意义。
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TubeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 挂起回调：在 Fiber 登记挂起后执行，可在其中（或之后的任意线程上）恢复 Fiber。
pub type OnExit = Box<dyn FnOnce(FiberHandle) + Send>;

/// Tube 处理一个 Packet 之后的下一步。
pub enum NextAction {
    /// 把 Packet 交给 `next` 的请求入口；响应回来时再调用本节点的响应入口。
    Invoke { next: TubeId, packet: Packet },
    /// 交给 `next`，但本节点不再参与响应阶段。
    InvokeAndForget { next: TubeId, packet: Packet },
    /// 立即转入响应阶段，只回访已经进入过的上游节点。
    Return(Packet),
    /// 以错误进入异常阶段，上游节点的 `process_exception` 依次被回访。
    ThrowError(SoapError),
    /// 挂起 Fiber，等待外部以 Packet（或错误）恢复。
    ///
    /// `next` 为 `Some` 时，恢复的 Packet 交给该节点的请求入口，且本节点会在响应阶段被回访；
    /// 为 `None` 时，恢复的 Packet 直接进入响应阶段。
    Suspend {
        next: Option<TubeId>,
        on_exit: Option<OnExit>,
    },
}

impl NextAction {
    pub fn invoke(next: TubeId, packet: Packet) -> Self {
        Self::Invoke { next, packet }
    }

    pub fn suspend(on_exit: impl FnOnce(FiberHandle) + Send + 'static) -> Self {
        Self::Suspend {
            next: None,
            on_exit: Some(Box::new(on_exit)),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Invoke { .. } => "invoke",
            Self::InvokeAndForget { .. } => "invoke_and_forget",
            Self::Return(_) => "return",
            Self::ThrowError(_) => "throw",
            Self::Suspend { .. } => "suspend",
        }
    }
}

impl fmt::Debug for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invoke { next, .. } => f.debug_struct("Invoke").field("next", next).finish(),
            Self::InvokeAndForget { next, .. } => f
                .debug_struct("InvokeAndForget")
                .field("next", next)
                .finish(),
            Self::Return(packet) => f.debug_tuple("Return").field(packet).finish(),
            Self::ThrowError(error) => f.debug_tuple("ThrowError").field(error).finish(),
            Self::Suspend { next, on_exit } => f
                .debug_struct("Suspend")
                .field("next", next)
                .field("has_on_exit", &on_exit.is_some())
                .finish(),
        }
    }
}

/// 协议处理阶段。
///
/// # 教案式说明
/// - **意图（Why）**：把每个协议关注点（寻址头、处理器、传输、端点调用）封装为独立阶段，按链式顺序组合；
/// - **逻辑（How）**：Fiber 自上而下调用 `process_request`，自下而上调用 `process_response`；
///   出错时自下而上调用 `process_exception`；
/// - **契约（What）**：
///   - 同一实例只会被一个 Fiber 使用，可以在实例上保存“请求 → 响应”之间的暂存状态；
///   - `copy` 必须构造不带暂存状态的新实例，并通过 `cloner` 复制自己引用的其他节点；
///   - 回调中发生 panic 会被 Fiber 捕获并视为内部阶段故障；
/// - **风险（Trade-offs）**：`name` 只用于日志与错误码上下文，不要求唯一。
pub trait Tube: Send + Any {
    /// 日志与错误上下文使用的名称。
    fn name(&self) -> &'static str;

    /// 请求向下经过本阶段。
    fn process_request(&mut self, ctx: &mut TubeContext<'_>, packet: Packet) -> NextAction;

    /// 响应向上经过本阶段，默认原样返回。
    fn process_response(&mut self, _ctx: &mut TubeContext<'_>, packet: Packet) -> NextAction {
        NextAction::Return(packet)
    }

    /// 异常向上经过本阶段，默认继续抛出。
    fn process_exception(&mut self, _ctx: &mut TubeContext<'_>, error: SoapError) -> NextAction {
        NextAction::ThrowError(error)
    }

    /// 释放资源；对每个执行实例恰好调用一次。
    fn pre_destroy(&mut self) {}

    /// 为新克隆构造全新实例。
    fn copy(&self, cloner: &mut TubeCloner<'_>) -> Box<dyn Tube>;
}

/// 节点回调期间可见的执行上下文。
///
/// 取代“线程局部当前 Packet”的隐式查找：Fiber 把自身句柄与所在管线显式传给每次回调。
pub struct TubeContext<'a> {
    chain: &'a mut TubeChain,
    fiber: &'a FiberHandle,
    current: TubeId,
}

impl<'a> TubeContext<'a> {
    pub(crate) fn new(chain: &'a mut TubeChain, fiber: &'a FiberHandle, current: TubeId) -> Self {
        Self {
            chain,
            fiber,
            current,
        }
    }

    /// 正在执行本节点的 Fiber。
    pub fn fiber(&self) -> &FiberHandle {
        self.fiber
    }

    /// 当前节点自身的索引。
    pub fn current(&self) -> TubeId {
        self.current
    }

    /// 访问同一管线中的另一个节点；当前正在执行的节点不可见。
    pub fn peer<T: Tube>(&self, id: TubeId) -> Option<&T> {
        self.chain.tube::<T>(id)
    }

    pub fn peer_mut<T: Tube>(&mut self, id: TubeId) -> Option<&mut T> {
        self.chain.tube_mut::<T>(id)
    }
}
