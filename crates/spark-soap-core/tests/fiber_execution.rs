//! Fiber 执行语义。
//!
//! # 测试目标（Why）
//! - 请求阶段自上而下、响应阶段自下而上各恰好一次；中途返回只回访已进入节点；
//! - 服务端 Engine 把内部故障（含 panic）转换为 Fault 报文，客户端 Engine 原样返回错误；
//! - 挂起/恢复在同步与异步模式下都成立，异步完成回调恰好执行一次；
//! - 拦截器按注册顺序嵌套，管线释放时每个节点的 `pre_destroy` 恰好一次。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;
use spark_soap_core::test_stubs::{EchoTube, EventLog, RecordingTube};
use spark_soap_core::{
    ChainBuilder, Element, Engine, FiberContextSwitchInterceptor, FiberHandle, Message,
    NextAction, Packet, SoapError, SoapVersion, ThreadPerTaskExecutor, Tube, TubeChain,
    TubeCloner, TubeContext, TubeId,
};
use tracing_test::traced_test;

fn request() -> Packet {
    let mut packet = Packet::with_message(Message::new(
        SoapVersion::Soap12,
        Element::ns("urn:spark:test", "ping", "t"),
    ));
    packet.set_property("trace.id", "t-1");
    packet
}

/// 按给定的中间节点构造 `a -> middle -> echo` 管线。
fn chain_with(log: &EventLog, middle: impl FnOnce(TubeId) -> Box<dyn Tube>) -> TubeChain {
    let mut builder = ChainBuilder::new();
    let echo = builder.add(Box::new(EchoTube::new(log.clone())));
    let mid = builder.add(middle(echo));
    let head = builder.add(Box::new(RecordingTube::new("a", mid, log.clone())));
    builder
        .build(head)
        .expect("构建主管线")
        .clone_chain()
        .expect("复制管线")
}

struct ShortCircuitTube;

impl Tube for ShortCircuitTube {
    fn name(&self) -> &'static str {
        "short"
    }

    fn process_request(&mut self, _ctx: &mut TubeContext<'_>, packet: Packet) -> NextAction {
        NextAction::Return(packet.create_response(None))
    }

    fn copy(&self, _cloner: &mut TubeCloner<'_>) -> Box<dyn Tube> {
        Box::new(ShortCircuitTube)
    }
}

struct PanicTube;

impl Tube for PanicTube {
    fn name(&self) -> &'static str {
        "panic"
    }

    fn process_request(&mut self, _ctx: &mut TubeContext<'_>, _packet: Packet) -> NextAction {
        panic!("stage exploded");
    }

    fn copy(&self, _cloner: &mut TubeCloner<'_>) -> Box<dyn Tube> {
        Box::new(PanicTube)
    }
}

/// 挂起节点：`forward` 为真时恢复后进入下一节点，否则直接进入响应阶段。
struct SuspendTube {
    next: TubeId,
    forward: bool,
    parked: Arc<Mutex<Option<(FiberHandle, Packet)>>>,
    resume_inline: bool,
}

impl Tube for SuspendTube {
    fn name(&self) -> &'static str {
        "suspend"
    }

    fn process_request(&mut self, _ctx: &mut TubeContext<'_>, packet: Packet) -> NextAction {
        let parked = Arc::clone(&self.parked);
        let inline = self.resume_inline;
        let resumed = if self.forward {
            packet
        } else {
            packet.create_response(None)
        };
        NextAction::Suspend {
            next: self.forward.then_some(self.next),
            on_exit: Some(Box::new(move |handle: FiberHandle| {
                if inline {
                    handle.resume(resumed);
                } else {
                    *parked.lock() = Some((handle, resumed));
                }
            })),
        }
    }

    fn process_response(&mut self, _ctx: &mut TubeContext<'_>, mut packet: Packet) -> NextAction {
        packet.set_property("suspend.visited", true);
        NextAction::Return(packet)
    }

    fn copy(&self, cloner: &mut TubeCloner<'_>) -> Box<dyn Tube> {
        Box::new(SuspendTube {
            next: cloner.copy(self.next),
            forward: self.forward,
            parked: Arc::clone(&self.parked),
            resume_inline: self.resume_inline,
        })
    }
}

/// 请求阶段自上而下、响应阶段自下而上，各恰好一次。
#[test]
fn request_and_response_phases_are_strictly_ordered() {
    let log = EventLog::new();
    let mut chain = chain_with(&log, |echo| {
        Box::new(RecordingTube::new("b", echo, log.clone()))
    });
    let response = Engine::client("order")
        .create_fiber()
        .run_sync(&mut chain, request())
        .expect("同步执行");

    assert_eq!(
        log.events(),
        vec!["a:request", "b:request", "echo:request", "b:response", "a:response"]
    );
    assert_eq!(response.property("trace.id"), Some(&"t-1".into()));
    assert!(
        response
            .message()
            .and_then(Message::payload_name)
            .is_some_and(|name| name.local() == "echoResponse")
    );
}

/// 中途返回只回访已进入的节点。
#[test]
fn short_circuit_only_revisits_entered_tubes() {
    let log = EventLog::new();
    let mut chain = chain_with(&log, |_| Box::new(ShortCircuitTube));
    let response = Engine::client("short")
        .create_fiber()
        .run_sync(&mut chain, request())
        .expect("同步执行");
    assert_eq!(log.events(), vec!["a:request", "a:response"]);
    assert!(!response.has_message());
}

/// 服务端 Engine：panic 被转换为 Receiver Fault，Fiber 正常完成并记录错误日志。
#[traced_test]
#[test]
fn server_engine_turns_internal_faults_into_fault_packets() {
    let log = EventLog::new();
    let mut chain = chain_with(&log, |_| Box::new(PanicTube));
    let response = Engine::server("server", SoapVersion::Soap12)
        .create_fiber()
        .run_sync(&mut chain, request())
        .expect("服务端不向外抛出内部故障");

    let message = response.message().expect("Fault 报文");
    assert!(message.is_fault());
    assert_eq!(log.events(), vec!["a:request", "a:exception"]);
    assert!(logs_contain("internal failure converted into a SOAP fault"));
}

/// 客户端 Engine：内部故障以错误返回。
#[test]
fn client_engine_propagates_internal_faults() {
    let log = EventLog::new();
    let mut chain = chain_with(&log, |_| Box::new(PanicTube));
    let err = Engine::client("client")
        .create_fiber()
        .run_sync(&mut chain, request())
        .expect_err("客户端返回错误");
    assert!(matches!(err, SoapError::Stage { ref stage, .. } if stage == "panic"));
}

/// 同步模式：挂起后由其他线程恢复，恢复的 Packet 直接进入响应阶段。
#[test]
fn sync_fiber_blocks_until_resumed_from_another_thread() {
    let log = EventLog::new();
    let parked = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&parked);
    let resumer = std::thread::spawn(move || {
        loop {
            if let Some((handle, packet)) = slot.lock().take() {
                let handle: FiberHandle = handle;
                handle.resume(packet);
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    });

    let mut chain = chain_with(&log, |echo| {
        Box::new(SuspendTube {
            next: echo,
            forward: false,
            parked: Arc::clone(&parked),
            resume_inline: false,
        })
    });
    let response = Engine::client("sync-suspend")
        .create_fiber()
        .run_sync(&mut chain, request())
        .expect("恢复后完成");
    resumer.join().expect("恢复线程");

    assert_eq!(log.events(), vec!["a:request", "a:response"]);
    assert!(response.property("suspend.visited").is_none());
    assert_eq!(response.property("trace.id"), Some(&"t-1".into()));
}

/// 挂起时指定下一节点：恢复后进入该节点，且挂起节点在响应阶段被回访；钩子内同步恢复也成立。
#[test]
fn suspend_with_next_resumes_into_the_next_tube() {
    let log = EventLog::new();
    let mut chain = chain_with(&log, |echo| {
        Box::new(SuspendTube {
            next: echo,
            forward: true,
            parked: Arc::new(Mutex::new(None)),
            resume_inline: true,
        })
    });
    let response = Engine::client("forward")
        .create_fiber()
        .run_sync(&mut chain, request())
        .expect("同步执行");
    assert_eq!(log.events(), vec!["a:request", "echo:request", "a:response"]);
    assert_eq!(response.property("suspend.visited"), Some(&true.into()));
}

/// 异步模式：挂起时 `start` 立即返回，恢复后回调恰好执行一次。
#[test]
fn async_fiber_parks_and_completes_once_after_resume() {
    let log = EventLog::new();
    let parked = Arc::new(Mutex::new(None));
    let chain = chain_with(&log, |echo| {
        Box::new(SuspendTube {
            next: echo,
            forward: true,
            parked: Arc::clone(&parked),
            resume_inline: false,
        })
    });

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let counter = Arc::clone(&calls);
    Engine::client("async")
        .create_fiber()
        .start(Box::new(chain), request(), move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result.map(|p| p.property("suspend.visited").cloned()));
        });

    assert_eq!(calls.load(Ordering::SeqCst), 0, "挂起期间回调未执行");
    let (handle, packet) = parked.lock().take().expect("Fiber 已停放");
    handle.resume(packet);

    let visited = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("回调已执行")
        .expect("执行成功");
    assert_eq!(visited, Some(true.into()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(log.events(), vec!["a:request", "echo:request", "a:response"]);
}

/// 执行器上的异步执行同样把结果交给回调。
#[test]
fn async_fiber_runs_on_the_supplied_executor() {
    let log = EventLog::new();
    let chain = chain_with(&log, |echo| {
        Box::new(RecordingTube::new("b", echo, log.clone()))
    });
    let engine = Engine::client("pooled").with_executor(Arc::new(ThreadPerTaskExecutor::new(
        "fiber-test",
    )));
    let (tx, rx) = mpsc::channel();
    engine
        .create_fiber()
        .start(Box::new(chain), request(), move |result| {
            let thread = std::thread::current().name().map(str::to_owned);
            let _ = tx.send((result.is_ok(), thread));
        });
    let (ok, thread) = rx.recv_timeout(Duration::from_secs(5)).expect("回调已执行");
    assert!(ok);
    assert_eq!(thread.as_deref(), Some("fiber-test"));
}

struct Tracer {
    label: &'static str,
    log: EventLog,
}

impl FiberContextSwitchInterceptor for Tracer {
    fn execute(&self, _fiber: &FiberHandle, work: &mut dyn FnMut()) {
        self.log.push(format!("{}:enter", self.label));
        work();
        self.log.push(format!("{}:exit", self.label));
    }
}

/// 拦截器按注册顺序嵌套。
#[test]
fn interceptors_compose_in_registration_order() {
    let log = EventLog::new();
    let mut chain = chain_with(&log, |_| Box::new(ShortCircuitTube));
    Engine::client("intercepted")
        .create_fiber()
        .with_interceptor(Arc::new(Tracer {
            label: "first",
            log: log.clone(),
        }))
        .with_interceptor(Arc::new(Tracer {
            label: "second",
            log: log.clone(),
        }))
        .run_sync(&mut chain, request())
        .expect("同步执行");
    assert_eq!(
        log.events(),
        vec![
            "first:enter",
            "second:enter",
            "a:request",
            "a:response",
            "second:exit",
            "first:exit"
        ]
    );
}

/// 释放：`pre_destroy` 每个节点恰好一次，已释放的管线拒绝执行。
#[test]
fn dispose_runs_pre_destroy_once_and_blocks_execution() {
    let log = EventLog::new();
    let mut chain = chain_with(&log, |echo| {
        Box::new(RecordingTube::new("b", echo, log.clone()))
    });
    chain.dispose();
    chain.dispose();
    let mut destroyed = log.events();
    destroyed.sort();
    assert_eq!(destroyed, vec!["a:destroy", "b:destroy", "echo:destroy"]);

    let err = Engine::client("disposed")
        .create_fiber()
        .run_sync(&mut chain, request())
        .expect_err("已释放");
    assert!(err.is_shut_down());
    drop(chain);
    assert_eq!(log.events().len(), 3);
}
