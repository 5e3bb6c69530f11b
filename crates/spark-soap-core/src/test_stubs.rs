//! 管线与传输契约的测试桩集合。
//!
//! # 设计定位（Why）
//! - 各 crate 的测试都需要“可观察”的回传通道、出站传输与简单节点；集中提供可以避免在每个测试文件里重复定义；
//! - 桩对象全部是记录型实现：它们不仅满足契约，还把调用痕迹暴露给断言。
//!
//! # 使用方式（How）
//! - `use spark_soap_core::test_stubs::transport::*;` 获取回传通道与内存传输；
//! - `use spark_soap_core::test_stubs::tubes::*;` 获取记录节点与终端回显节点。
//!
//! # 契约说明（What）
//! - 桩对象只用于测试与示例，行为以“最少惊讶”为准，不做任何网络或 IO。

pub mod transport {
    //! 传输侧记录桩。

    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use crate::error::{Result, SoapError};
    use crate::transport::{
        OutboundConnection, TransportBackChannel, TransportFactory, TransportRequest,
        TransportResponse,
    };

    /// 记录关闭次数的回传通道。
    #[derive(Debug)]
    pub struct RecordingBackChannel {
        closes: Arc<AtomicUsize>,
    }

    /// 与 [`RecordingBackChannel`] 共享计数的观察端。
    #[derive(Clone, Debug)]
    pub struct BackChannelProbe {
        closes: Arc<AtomicUsize>,
    }

    impl RecordingBackChannel {
        pub fn new() -> (Self, BackChannelProbe) {
            let closes = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    closes: Arc::clone(&closes),
                },
                BackChannelProbe { closes },
            )
        }
    }

    impl TransportBackChannel for RecordingBackChannel {
        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closes.load(Ordering::SeqCst) > 0
        }
    }

    impl BackChannelProbe {
        pub fn is_closed(&self) -> bool {
            self.close_count() > 0
        }

        pub fn close_count(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    type Route = Arc<dyn Fn(&TransportRequest) -> Result<Option<TransportResponse>> + Send + Sync>;

    /// 内存出站传输：按地址路由到脚本化的处理函数，并记录每一次发送。
    ///
    /// 未登记的地址在建连时失败，返回 [`SoapError::Transport`]。
    #[derive(Clone, Default)]
    pub struct InMemoryTransport {
        routes: Arc<Mutex<HashMap<String, Route>>>,
        sent: Arc<Mutex<Vec<(String, TransportRequest)>>>,
    }

    impl InMemoryTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// 为地址登记处理函数。
        pub fn route(
            &self,
            address: impl Into<String>,
            handler: impl Fn(&TransportRequest) -> Result<Option<TransportResponse>>
            + Send
            + Sync
            + 'static,
        ) {
            self.routes.lock().insert(address.into(), Arc::new(handler));
        }

        /// 为地址登记“只接收不回复”的处理函数。
        pub fn sink(&self, address: impl Into<String>) {
            self.route(address, |_| Ok(None));
        }

        /// 已发送的请求，按发送顺序排列。
        pub fn sent(&self) -> Vec<(String, TransportRequest)> {
            self.sent.lock().clone()
        }

        pub fn sent_to(&self, address: &str) -> Vec<TransportRequest> {
            self.sent
                .lock()
                .iter()
                .filter(|(to, _)| to == address)
                .map(|(_, request)| request.clone())
                .collect()
        }
    }

    impl TransportFactory for InMemoryTransport {
        fn connect(&self, address: &str) -> Result<Box<dyn OutboundConnection>> {
            let route = self
                .routes
                .lock()
                .get(address)
                .cloned()
                .ok_or_else(|| SoapError::transport(address, "no route registered"))?;
            Ok(Box::new(InMemoryConnection {
                address: address.to_owned(),
                route,
                sent: Arc::clone(&self.sent),
            }))
        }
    }

    struct InMemoryConnection {
        address: String,
        route: Route,
        sent: Arc<Mutex<Vec<(String, TransportRequest)>>>,
    }

    impl OutboundConnection for InMemoryConnection {
        fn send(&mut self, request: TransportRequest) -> Result<Option<TransportResponse>> {
            self.sent
                .lock()
                .push((self.address.clone(), request.clone()));
            let response = (self.route)(&request)?;
            Ok(if request.expect_reply { response } else { None })
        }
    }
}

pub mod tubes {
    //! 记录型节点。

    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::infoset::Element;
    use crate::message::Message;
    use crate::packet::Packet;
    use crate::tube::{NextAction, Tube, TubeCloner, TubeContext, TubeId};

    /// 共享的事件日志。
    #[derive(Clone, Debug, Default)]
    pub struct EventLog {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl EventLog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, event: impl Into<String>) {
            self.events.lock().push(event.into());
        }

        pub fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }

        pub fn clear(&self) {
            self.events.lock().clear();
        }
    }

    /// 透传节点，记录 `<label>:request` / `<label>:response` / `<label>:exception` / `<label>:destroy`。
    pub struct RecordingTube {
        label: &'static str,
        next: TubeId,
        log: EventLog,
    }

    impl RecordingTube {
        pub fn new(label: &'static str, next: TubeId, log: EventLog) -> Self {
            Self { label, next, log }
        }

        pub fn next(&self) -> TubeId {
            self.next
        }
    }

    impl Tube for RecordingTube {
        fn name(&self) -> &'static str {
            self.label
        }

        fn process_request(&mut self, _ctx: &mut TubeContext<'_>, packet: Packet) -> NextAction {
            self.log.push(format!("{}:request", self.label));
            NextAction::invoke(self.next, packet)
        }

        fn process_response(&mut self, _ctx: &mut TubeContext<'_>, packet: Packet) -> NextAction {
            self.log.push(format!("{}:response", self.label));
            NextAction::Return(packet)
        }

        fn process_exception(
            &mut self,
            _ctx: &mut TubeContext<'_>,
            error: crate::error::SoapError,
        ) -> NextAction {
            self.log.push(format!("{}:exception", self.label));
            NextAction::ThrowError(error)
        }

        fn pre_destroy(&mut self) {
            self.log.push(format!("{}:destroy", self.label));
        }

        fn copy(&self, cloner: &mut TubeCloner<'_>) -> Box<dyn Tube> {
            Box::new(Self {
                label: self.label,
                next: cloner.copy(self.next),
                log: self.log.clone(),
            })
        }
    }

    /// 终端节点：把请求消息体包进 `<label>Response` 元素返回，保留请求的调用级属性。
    pub struct EchoTube {
        log: EventLog,
    }

    impl EchoTube {
        pub fn new(log: EventLog) -> Self {
            Self { log }
        }
    }

    impl Tube for EchoTube {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn process_request(&mut self, _ctx: &mut TubeContext<'_>, mut packet: Packet) -> NextAction {
            self.log.push("echo:request");
            let response = match packet.take_message() {
                Some(mut message) => {
                    let version = message.version();
                    let mut body = Element::ns("urn:spark:test", "echoResponse", "t");
                    match message.read_payload() {
                        Ok(Some(payload)) => body.push_element(payload),
                        Ok(None) => {}
                        Err(error) => return NextAction::ThrowError(error),
                    }
                    Some(Message::new(version, body))
                }
                None => None,
            };
            NextAction::Return(packet.create_response(response))
        }

        fn pre_destroy(&mut self) {
            self.log.push("echo:destroy");
        }

        fn copy(&self, _cloner: &mut TubeCloner<'_>) -> Box<dyn Tube> {
            Box::new(Self {
                log: self.log.clone(),
            })
        }
    }
}

pub use transport::{BackChannelProbe, InMemoryTransport, RecordingBackChannel};
pub use tubes::{EchoTube, EventLog, RecordingTube};
