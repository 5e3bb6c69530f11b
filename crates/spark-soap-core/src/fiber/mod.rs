//! Fiber / Engine：驱动一个 Packet 穿过管线的执行核心。
//!
//! # 设计背景（Why）
//! - 一次交换需要在“请求向下、响应向上”的两段遍历中保持严格顺序，并允许任意阶段挂起等待外部事件；
//! - 同步调用不应为此付出线程切换；异步调用则需要保证完成回调恰好执行一次。
//!
//! # 核心机制（How）
//! - 运行状态只有两项：待进入的下一个节点 `next`，以及已进入、等待响应回访的节点栈 `conts`；
//! - 每个执行段（启动或恢复直到完成或挂起）在 `debug_span!("fiber")` 中运行，并被已注册的拦截器按序包裹；
//! - 节点回调以 `catch_unwind` 包裹，panic 视为内部阶段故障；
//! - 挂起时，同步模式在条件变量上等待恢复；异步模式把运行状态停放在 [`FiberHandle`] 中，
//!   恢复方取走状态并交给 Engine 的执行器继续。
//!
//! # 契约说明（What）
//! - 对单个 Fiber：请求阶段自上而下每个节点恰好一次，随后响应阶段自下而上恰好一次；
//!   中途 `Return` 之后只回访已进入过的节点；
//! - 服务端 Engine 上，内部故障被转换为 Fault 报文，Fiber 正常完成；
//! - 状态机：`created -> running -> {completed, faulted, suspended -> running -> ...}`。

mod engine;
mod executor;
mod interceptor;

use std::any::Any;
use std::fmt;
use std::ops::DerefMut;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

pub use engine::{Engine, EngineRole};
pub use executor::{Executor, InlineExecutor, Task, ThreadPerTaskExecutor};
pub use interceptor::FiberContextSwitchInterceptor;

use crate::error::{Result, SoapError};
use crate::message::SoapFault;
use crate::packet::Packet;
use crate::tube::{NextAction, OnExit, TubeChain, TubeContext, TubeId};
use crate::version::FaultKind;

/// 异步完成回调。
pub type Completion = Box<dyn FnOnce(Result<Packet>) + Send + 'static>;

/// 一次交换的执行体，不跨调用复用。
pub struct Fiber {
    engine: Engine,
    handle: FiberHandle,
    interceptors: Vec<Arc<dyn FiberContextSwitchInterceptor>>,
}

impl Fiber {
    fn new(engine: Engine, id: u64) -> Self {
        let handle = FiberHandle {
            shared: Arc::new(FiberShared {
                id,
                engine_name: Arc::from(engine.name()),
                resumption: Mutex::new(Resumption::Idle),
                resumed: Condvar::new(),
            }),
        };
        Self {
            engine,
            handle,
            interceptors: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    /// 可交给外部协作者、用于恢复本 Fiber 的句柄。
    pub fn handle(&self) -> FiberHandle {
        self.handle.clone()
    }

    /// 注册上下文切换拦截器；先注册者位于最外层。
    pub fn add_interceptor(&mut self, interceptor: Arc<dyn FiberContextSwitchInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn FiberContextSwitchInterceptor>) -> Self {
        self.add_interceptor(interceptor);
        self
    }

    /// 在调用线程上同步执行整条管线。
    ///
    /// 节点挂起时阻塞调用线程，直到有人通过 [`FiberHandle`] 恢复。
    /// 已释放的管线返回 [`SoapError::ShutDown`]。
    pub fn run_sync(self, chain: &mut TubeChain, packet: Packet) -> Result<Packet> {
        if chain.is_disposed() {
            return Err(SoapError::ShutDown("tube chain".into()));
        }
        let mut state = RunState::new(chain.head());
        let mut pending = Pending::Packet(packet);
        loop {
            let outcome = run_segment(
                &self.engine,
                &self.handle,
                &self.interceptors,
                chain,
                &mut state,
                pending,
            );
            match outcome {
                Outcome::Completed(result) => {
                    return finish(&self.engine, &self.handle, result);
                }
                Outcome::Suspended(on_exit) => {
                    tracing::debug!(fiber.id = self.handle.id(), "fiber suspended");
                    if let Some(hook) = on_exit {
                        hook(self.handle.clone());
                    }
                    pending = self.handle.wait_resumed();
                    tracing::debug!(fiber.id = self.handle.id(), "fiber resumed");
                }
            }
        }
    }

    /// 异步执行：交给 Engine 的执行器，完成后以结果调用 `completion`，回调恰好执行一次。
    ///
    /// 管线以所有权形式移入 Fiber（例如 `Box<TubeChain>` 或资源池的租借守卫），在回调执行前随 Fiber 一起释放。
    pub fn start<C, F>(self, chain: C, packet: Packet, completion: F)
    where
        C: DerefMut<Target = TubeChain> + Send + 'static,
        F: FnOnce(Result<Packet>) + Send + 'static,
    {
        let Fiber {
            engine,
            handle,
            interceptors,
        } = self;
        if chain.is_disposed() {
            completion(Err(SoapError::ShutDown("tube chain".into())));
            return;
        }
        let run = Box::new(AsyncRun {
            state: RunState::new(chain.head()),
            chain: Box::new(chain),
            engine: engine.clone(),
            interceptors,
            completion: Some(Box::new(completion)),
        });
        engine.schedule(Box::new(move || run.drive(handle, Pending::Packet(packet))));
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.handle.id())
            .field("engine", &self.engine.name())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// Fiber 的共享句柄：标识 Fiber，并允许在任意线程上恢复挂起的 Fiber。
#[derive(Clone)]
pub struct FiberHandle {
    shared: Arc<FiberShared>,
}

struct FiberShared {
    id: u64,
    engine_name: Arc<str>,
    resumption: Mutex<Resumption>,
    resumed: Condvar,
}

enum Resumption {
    Idle,
    /// 恢复先于挂起到达，下一次挂起立即继续。
    Ready(Pending),
    Parked(Box<AsyncRun>),
}

impl FiberHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn engine_name(&self) -> &str {
        &self.shared.engine_name
    }

    /// 以 Packet 恢复：进入挂起时指定的下一个节点，或直接进入响应阶段。
    pub fn resume(&self, packet: Packet) {
        self.deliver(Pending::Packet(packet));
    }

    /// 以错误恢复：从挂起点向上进入异常阶段。
    pub fn resume_with_error(&self, error: SoapError) {
        self.deliver(Pending::Error(error));
    }

    fn deliver(&self, pending: Pending) {
        let mut slot = self.shared.resumption.lock();
        match std::mem::replace(&mut *slot, Resumption::Idle) {
            Resumption::Idle => {
                *slot = Resumption::Ready(pending);
                self.shared.resumed.notify_all();
            }
            Resumption::Ready(earlier) => {
                *slot = Resumption::Ready(earlier);
                tracing::warn!(fiber.id = self.id(), "fiber resumed twice; ignoring the later resume");
            }
            Resumption::Parked(run) => {
                drop(slot);
                let handle = self.clone();
                let engine = run.engine.clone();
                engine.schedule(Box::new(move || run.drive(handle, pending)));
            }
        }
    }

    /// 同步模式：阻塞直到恢复。
    fn wait_resumed(&self) -> Pending {
        let mut slot = self.shared.resumption.lock();
        loop {
            match std::mem::replace(&mut *slot, Resumption::Idle) {
                Resumption::Ready(pending) => return pending,
                other => {
                    *slot = other;
                    self.shared.resumed.wait(&mut slot);
                }
            }
        }
    }

    /// 异步模式：若恢复已经到达则取回运行状态继续，否则停放运行状态。
    fn park(&self, run: Box<AsyncRun>) -> Option<(Box<AsyncRun>, Pending)> {
        let mut slot = self.shared.resumption.lock();
        match std::mem::replace(&mut *slot, Resumption::Idle) {
            Resumption::Ready(pending) => Some((run, pending)),
            Resumption::Idle | Resumption::Parked(_) => {
                *slot = Resumption::Parked(run);
                None
            }
        }
    }
}

impl fmt::Debug for FiberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("id", &self.shared.id)
            .field("engine", &self.shared.engine_name)
            .finish()
    }
}

enum Pending {
    Packet(Packet),
    Error(SoapError),
}

enum Outcome {
    Completed(Result<Packet>),
    Suspended(Option<OnExit>),
}

struct RunState {
    next: Option<TubeId>,
    conts: Vec<TubeId>,
}

impl RunState {
    fn new(head: TubeId) -> Self {
        Self {
            next: Some(head),
            conts: Vec::new(),
        }
    }
}

/// 异步模式下随 Fiber 移动的运行状态。
struct AsyncRun {
    engine: Engine,
    chain: Box<dyn DerefMut<Target = TubeChain> + Send>,
    state: RunState,
    interceptors: Vec<Arc<dyn FiberContextSwitchInterceptor>>,
    completion: Option<Completion>,
}

impl AsyncRun {
    fn drive(mut self: Box<Self>, handle: FiberHandle, mut pending: Pending) {
        loop {
            let run = &mut *self;
            let outcome = run_segment(
                &run.engine,
                &handle,
                &run.interceptors,
                &mut **run.chain,
                &mut run.state,
                pending,
            );
            match outcome {
                Outcome::Completed(result) => {
                    let result = finish(&self.engine, &handle, result);
                    let completion = self.completion.take();
                    // 回调前释放管线，调用方在回调中即可复用其租借的资源。
                    drop(self);
                    if let Some(completion) = completion {
                        completion(result);
                    }
                    return;
                }
                Outcome::Suspended(on_exit) => {
                    tracing::debug!(fiber.id = handle.id(), "fiber suspended");
                    if let Some(hook) = on_exit {
                        hook(handle.clone());
                    }
                    match handle.park(self) {
                        Some((run, resumed)) => {
                            self = run;
                            pending = resumed;
                        }
                        None => return,
                    }
                }
            }
        }
    }
}

/// 服务端 Engine 边界：内部故障转换为 Fault 报文。
fn finish(engine: &Engine, fiber: &FiberHandle, result: Result<Packet>) -> Result<Packet> {
    match (result, engine.role()) {
        (Err(error), EngineRole::Server(version)) => {
            tracing::error!(
                engine = %engine.name(),
                fiber.id = fiber.id(),
                code = error.code(),
                %error,
                "internal failure converted into a SOAP fault"
            );
            let fault = SoapFault::new(FaultKind::Receiver, error.to_string());
            Ok(Packet::with_message(fault.to_message(version)))
        }
        (result, _) => result,
    }
}

fn run_segment(
    engine: &Engine,
    fiber: &FiberHandle,
    interceptors: &[Arc<dyn FiberContextSwitchInterceptor>],
    chain: &mut TubeChain,
    state: &mut RunState,
    pending: Pending,
) -> Outcome {
    let span = tracing::debug_span!("fiber", fiber.id = fiber.id(), engine = %engine.name());
    let _entered = span.enter();

    let mut input = Some(pending);
    let mut output = None;
    let mut work = || {
        if let Some(pending) = input.take() {
            output = Some(run_steps(chain, state, fiber, pending));
        }
    };
    interceptor::run_intercepted(interceptors, fiber, &mut work);
    output.unwrap_or_else(|| {
        Outcome::Completed(Err(SoapError::stage(
            "fiber",
            "a context switch interceptor did not run the fiber",
        )))
    })
}

enum Call {
    Request(Packet),
    Response(Packet),
    Exception(SoapError),
}

impl Call {
    fn phase(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Response(_) => "response",
            Self::Exception(_) => "exception",
        }
    }
}

fn run_steps(
    chain: &mut TubeChain,
    state: &mut RunState,
    fiber: &FiberHandle,
    mut pending: Pending,
) -> Outcome {
    loop {
        let (id, call) = match pending {
            Pending::Packet(packet) => match state.next.take() {
                Some(next) => (next, Call::Request(packet)),
                None => match state.conts.pop() {
                    Some(cont) => (cont, Call::Response(packet)),
                    None => return Outcome::Completed(Ok(packet)),
                },
            },
            Pending::Error(error) => {
                state.next = None;
                match state.conts.pop() {
                    Some(cont) => (cont, Call::Exception(error)),
                    None => return Outcome::Completed(Err(error)),
                }
            }
        };

        pending = match invoke(chain, fiber, id, call) {
            NextAction::Invoke { next, packet } => {
                state.conts.push(id);
                state.next = Some(next);
                Pending::Packet(packet)
            }
            NextAction::InvokeAndForget { next, packet } => {
                state.next = Some(next);
                Pending::Packet(packet)
            }
            NextAction::Return(packet) => {
                state.next = None;
                Pending::Packet(packet)
            }
            NextAction::ThrowError(error) => Pending::Error(error),
            NextAction::Suspend { next, on_exit } => {
                if next.is_some() {
                    state.conts.push(id);
                }
                state.next = next;
                return Outcome::Suspended(on_exit);
            }
        };
    }
}

fn invoke(chain: &mut TubeChain, fiber: &FiberHandle, id: TubeId, call: Call) -> NextAction {
    let Some(mut tube) = chain.take(id) else {
        return NextAction::ThrowError(SoapError::IncompleteChain(format!(
            "tube {id} is not available"
        )));
    };
    let name = tube.name();
    let phase = call.phase();
    tracing::trace!(tube = name, phase, "entering tube");

    let result = {
        let mut ctx = TubeContext::new(chain, fiber, id);
        catch_unwind(AssertUnwindSafe(|| match call {
            Call::Request(packet) => tube.process_request(&mut ctx, packet),
            Call::Response(packet) => tube.process_response(&mut ctx, packet),
            Call::Exception(error) => tube.process_exception(&mut ctx, error),
        }))
    };
    chain.put_back(id, tube);

    match result {
        Ok(action) => {
            tracing::trace!(tube = name, phase, action = action.kind(), "tube returned");
            action
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(tube = name, phase, %message, "tube panicked");
            NextAction::ThrowError(SoapError::stage(name, format!("panicked: {message}")))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&'static str>() {
        (*text).to_owned()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
