//! 处理器阶段：逻辑处理器与协议处理器两条列表，各占一个 Tube，互为表亲。
//!
//! # 设计背景（Why）
//! - 应用注册的处理器分两类：逻辑处理器只关心载荷，协议处理器还关心头部；
//!   出站方向先逻辑后协议，入站方向先协议后逻辑，因此两类处理器分别落在两个相邻阶段；
//! - 每次交换结束时，两条列表上的处理器都要恰好收到一次 `close`，而且与哪一个阶段先看到响应无关。
//!
//! # 核心机制（How）
//! - 两个 [`HandlerTube`] 互相持有对方的 [`TubeId`]（装配时经 `reserve`/`fill` 构成环，复制时由
//!   [`TubeCloner`] 保持对应关系）；
//! - 位于上游的“外层”阶段在响应或异常回到自己时，先关闭表亲（经由 [`TubeContext::peer_mut`]），再关闭自身；
//! - 内层阶段从不主动关闭，每个实例以 `closed` 标记保证一次交换内只关闭一次。
//!
//! # 契约说明（What）
//! - `handle_message` 返回 `Ok(false)` 表示截断：请求不再向下传递，当前 Packet 直接进入响应阶段；
//! - 处理器错误以 `ThrowError` 上抛，外层阶段在异常路径上同样完成关闭。

use std::sync::Arc;

use spark_soap_core::{
    NextAction, Packet, Result, SoapError, Tube, TubeCloner, TubeContext, TubeId,
};
use tracing::{debug, warn};

use crate::assembler::{AssemblyContext, Side, TubeFactory};

/// 消息流向。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// 从本端发往对端。
    Outbound,
    /// 从对端到达本端。
    Inbound,
}

/// 处理器类别。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
    Logical,
    Protocol,
}

/// 应用注册的消息处理器。
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> HandlerKind;

    /// 处理一条消息；返回 `Ok(false)` 截断后续处理。
    fn handle_message(&self, packet: &mut Packet, direction: Direction) -> Result<bool>;

    /// 一次交换结束。
    fn close(&self) {}
}

/// 承载一类处理器的阶段。
pub struct HandlerTube {
    kind: HandlerKind,
    side: Side,
    handlers: Vec<Arc<dyn Handler>>,
    next: TubeId,
    cousin: TubeId,
    outer: bool,
    closed: bool,
}

impl HandlerTube {
    pub fn new(
        kind: HandlerKind,
        side: Side,
        handlers: Vec<Arc<dyn Handler>>,
        next: TubeId,
        cousin: TubeId,
        outer: bool,
    ) -> Self {
        Self {
            kind,
            side,
            handlers,
            next,
            cousin,
            outer,
            closed: false,
        }
    }

    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    pub fn cousin(&self) -> TubeId {
        self.cousin
    }

    pub fn is_outer(&self) -> bool {
        self.outer
    }

    /// 本次交换中是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn request_direction(&self) -> Direction {
        match self.side {
            Side::Client => Direction::Outbound,
            Side::Server => Direction::Inbound,
        }
    }

    fn response_direction(&self) -> Direction {
        match self.request_direction() {
            Direction::Outbound => Direction::Inbound,
            Direction::Inbound => Direction::Outbound,
        }
    }

    fn run(&self, packet: &mut Packet, direction: Direction) -> Result<bool> {
        let ordered: Box<dyn Iterator<Item = &Arc<dyn Handler>>> = match direction {
            d if d == self.request_direction() => Box::new(self.handlers.iter()),
            _ => Box::new(self.handlers.iter().rev()),
        };
        for handler in ordered {
            if !handler.handle_message(packet, direction)? {
                debug!(handler = handler.name(), ?direction, "handler stopped processing");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// 关闭本阶段的处理器；同一次交换内重复调用为空操作。
    pub fn close_handlers(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for handler in self.handlers.iter().rev() {
            handler.close();
        }
    }

    /// 外层阶段收尾：关闭表亲与自身，并为下一次交换复位。
    fn finish_exchange(&mut self, ctx: &mut TubeContext<'_>) {
        if !self.outer {
            return;
        }
        match ctx.peer_mut::<HandlerTube>(self.cousin) {
            Some(cousin) => {
                cousin.close_handlers();
                cousin.closed = false;
            }
            None => warn!(cousin = %self.cousin, "handler cousin is not reachable"),
        }
        self.close_handlers();
        self.closed = false;
    }
}

impl Tube for HandlerTube {
    fn name(&self) -> &'static str {
        match self.kind {
            HandlerKind::Logical => "handler.logical",
            HandlerKind::Protocol => "handler.protocol",
        }
    }

    fn process_request(&mut self, ctx: &mut TubeContext<'_>, mut packet: Packet) -> NextAction {
        match self.run(&mut packet, self.request_direction()) {
            Ok(true) => NextAction::invoke(self.next, packet),
            Ok(false) => {
                self.finish_exchange(ctx);
                NextAction::Return(packet)
            }
            Err(error) => {
                self.finish_exchange(ctx);
                NextAction::ThrowError(error)
            }
        }
    }

    fn process_response(&mut self, ctx: &mut TubeContext<'_>, mut packet: Packet) -> NextAction {
        let outcome = self.run(&mut packet, self.response_direction());
        self.finish_exchange(ctx);
        match outcome {
            Ok(_) => NextAction::Return(packet),
            Err(error) => NextAction::ThrowError(error),
        }
    }

    fn process_exception(&mut self, ctx: &mut TubeContext<'_>, error: SoapError) -> NextAction {
        self.finish_exchange(ctx);
        NextAction::ThrowError(error)
    }

    fn copy(&self, cloner: &mut TubeCloner<'_>) -> Box<dyn Tube> {
        let next = cloner.copy(self.next);
        let cousin = cloner.copy(self.cousin);
        Box::new(Self {
            kind: self.kind,
            side: self.side,
            handlers: self.handlers.clone(),
            next,
            cousin,
            outer: self.outer,
            closed: false,
        })
    }
}

/// 装配处理器阶段对；没有任何处理器时不插入阶段。
#[derive(Default)]
pub struct HandlerTubeFactory {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerTubeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    fn of_kind(&self, kind: HandlerKind) -> Vec<Arc<dyn Handler>> {
        self.handlers
            .iter()
            .filter(|handler| handler.kind() == kind)
            .cloned()
            .collect()
    }

    fn assemble(&self, ctx: &mut AssemblyContext, next: TubeId, side: Side) -> Result<TubeId> {
        if self.handlers.is_empty() {
            return Ok(next);
        }
        // 客户端出站先逻辑后协议；服务端入站先协议后逻辑。
        let (outer_kind, inner_kind) = match side {
            Side::Client => (HandlerKind::Logical, HandlerKind::Protocol),
            Side::Server => (HandlerKind::Protocol, HandlerKind::Logical),
        };
        let outer = ctx.reserve();
        let inner = ctx.add(Box::new(HandlerTube::new(
            inner_kind,
            side,
            self.of_kind(inner_kind),
            next,
            outer,
            false,
        )));
        ctx.fill(
            outer,
            Box::new(HandlerTube::new(
                outer_kind,
                side,
                self.of_kind(outer_kind),
                inner,
                inner,
                true,
            )),
        )?;
        Ok(outer)
    }
}

impl TubeFactory for HandlerTubeFactory {
    fn name(&self) -> &'static str {
        "handlers"
    }

    fn create_client(&self, ctx: &mut AssemblyContext, next: TubeId) -> Result<TubeId> {
        self.assemble(ctx, next, Side::Client)
    }

    fn create_server(&self, ctx: &mut AssemblyContext, next: TubeId) -> Result<TubeId> {
        self.assemble(ctx, next, Side::Server)
    }
}
