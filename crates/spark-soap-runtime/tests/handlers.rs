//! 处理器阶段对的顺序与关闭语义。
//!
//! # 测试目标（Why）
//! - 客户端出站先逻辑后协议、入站先协议后逻辑；服务端方向相反；
//! - 每次交换结束时两类处理器都恰好关闭一次，与截断、失败无关；
//! - 管线克隆后表亲关系仍然成立，关闭不会串到其他克隆。

use std::sync::Arc;

use spark_soap_core::test_stubs::{EventLog, InMemoryTransport};
use spark_soap_core::{
    BindingConfig, Element, Engine, Message, OperationModel, Packet, Result, ServiceModel,
    SoapError, SoapVersion, TransportResponse,
};
use spark_soap_runtime::{
    Direction, Handler, HandlerKind, HandlerTubeFactory, IncomingRequest, ServerAdapter, Stub,
    TubelineAssembler,
};
use tracing_test::traced_test;

const ADDRESS: &str = "mem://handlers";

#[derive(Clone, Copy, PartialEq)]
enum Behaviour {
    Pass,
    StopOutbound,
    FailOutbound,
}

struct Recording {
    label: &'static str,
    kind: HandlerKind,
    behaviour: Behaviour,
    log: EventLog,
}

impl Recording {
    fn arc(
        label: &'static str,
        kind: HandlerKind,
        behaviour: Behaviour,
        log: &EventLog,
    ) -> Arc<dyn Handler> {
        Arc::new(Self {
            label,
            kind,
            behaviour,
            log: log.clone(),
        })
    }
}

impl Handler for Recording {
    fn name(&self) -> &str {
        self.label
    }

    fn kind(&self) -> HandlerKind {
        self.kind
    }

    fn handle_message(&self, _packet: &mut Packet, direction: Direction) -> Result<bool> {
        self.log.push(format!("{}:{direction:?}", self.label));
        match (self.behaviour, direction) {
            (Behaviour::StopOutbound, Direction::Outbound) => Ok(false),
            (Behaviour::FailOutbound, Direction::Outbound) => {
                Err(SoapError::stage("handler", "rejected by policy"))
            }
            _ => Ok(true),
        }
    }

    fn close(&self) {
        self.log.push(format!("{}:close", self.label));
    }
}

fn model() -> Arc<ServiceModel> {
    Arc::new(
        ServiceModel::new("Handlers", BindingConfig::default())
            .with_address(ADDRESS)
            .with_operation(OperationModel::new("ping").with_soap_action("urn:ping")),
    )
}

fn canned_reply() -> TransportResponse {
    TransportResponse {
        body: bytes::Bytes::from_static(
            b"<S:Envelope xmlns:S=\"http://schemas.xmlsoap.org/soap/envelope/\">\
              <S:Body><p:pong xmlns:p=\"urn:ping\"/></S:Body></S:Envelope>",
        ),
        content_type: "text/xml; charset=utf-8".to_owned(),
    }
}

fn client(factory: HandlerTubeFactory) -> (Stub, InMemoryTransport) {
    let transport = InMemoryTransport::new();
    transport.route(ADDRESS, |_| Ok(Some(canned_reply())));
    let assembler = TubelineAssembler::new()
        .with_factory(factory)
        .with_transport(Arc::new(transport.clone()));
    let stub = Stub::assemble(&assembler, model(), Engine::client("handlers")).expect("装配客户端");
    (stub, transport)
}

fn ping() -> Element {
    Element::ns("urn:ping", "ping", "p")
}

#[test]
fn client_orders_handlers_and_closes_both_lists_once() {
    let log = EventLog::new();
    let factory = HandlerTubeFactory::new()
        .with_handler(Recording::arc("P", HandlerKind::Protocol, Behaviour::Pass, &log))
        .with_handler(Recording::arc("L", HandlerKind::Logical, Behaviour::Pass, &log));
    let (stub, _transport) = client(factory);

    let response = stub.call("ping", ping()).expect("调用成功");
    assert_eq!(
        response.payload_name().map(|name| name.local()),
        Some("pong")
    );
    assert_eq!(
        log.events(),
        vec![
            "L:Outbound",
            "P:Outbound",
            "P:Inbound",
            "L:Inbound",
            "P:close",
            "L:close"
        ]
    );

    log.clear();
    stub.call("ping", ping()).expect("第二次调用");
    let closes = log
        .events()
        .into_iter()
        .filter(|event| event.ends_with(":close"))
        .count();
    assert_eq!(closes, 2, "每次交换各关闭一次");
}

#[test]
fn short_circuit_skips_transport_but_still_closes() {
    let log = EventLog::new();
    let factory = HandlerTubeFactory::new()
        .with_handler(Recording::arc("L", HandlerKind::Logical, Behaviour::StopOutbound, &log))
        .with_handler(Recording::arc("P", HandlerKind::Protocol, Behaviour::Pass, &log));
    let (stub, transport) = client(factory);

    let packet = stub.request_packet("ping", ping()).expect("准备请求");
    stub.process(packet).expect("截断后直接返回");
    assert!(transport.sent().is_empty());
    assert_eq!(log.events(), vec!["L:Outbound", "P:close", "L:close"]);
}

#[test]
fn failing_handler_propagates_error_after_closing() {
    let log = EventLog::new();
    let factory = HandlerTubeFactory::new()
        .with_handler(Recording::arc("L", HandlerKind::Logical, Behaviour::Pass, &log))
        .with_handler(Recording::arc("P", HandlerKind::Protocol, Behaviour::FailOutbound, &log));
    let (stub, transport) = client(factory);

    let error = stub.call("ping", ping()).unwrap_err();
    assert!(matches!(error, SoapError::Stage { .. }));
    assert!(transport.sent().is_empty());
    assert_eq!(
        log.events(),
        vec!["L:Outbound", "P:Outbound", "P:close", "L:close"]
    );
}

#[test]
fn server_runs_protocol_handlers_first_on_the_way_in() {
    let log = EventLog::new();
    let factory = HandlerTubeFactory::new()
        .with_handler(Recording::arc("L", HandlerKind::Logical, Behaviour::Pass, &log))
        .with_handler(Recording::arc("P", HandlerKind::Protocol, Behaviour::Pass, &log));
    let endpoint = |_: Option<&OperationModel>, _: Message, _: &Packet| -> Result<Option<Message>> {
        Ok(Some(Message::new(
            SoapVersion::Soap11,
            Element::ns("urn:ping", "pong", "p"),
        )))
    };
    let adapter = ServerAdapter::assemble(
        &TubelineAssembler::new().with_factory(factory),
        model(),
        Arc::new(endpoint),
    )
    .expect("装配服务端");

    let request = IncomingRequest::new(
        &b"<S:Envelope xmlns:S=\"http://schemas.xmlsoap.org/soap/envelope/\">\
            <S:Body><p:ping xmlns:p=\"urn:ping\"/></S:Body></S:Envelope>"[..],
        "text/xml; charset=utf-8",
    )
    .with_soap_action("\"urn:ping\"");
    let encoded = adapter.handle(request).expect("处理成功").expect("有响应");
    assert!(encoded.content_type.content_type().starts_with("text/xml"));
    assert_eq!(
        log.events(),
        vec![
            "P:Inbound",
            "L:Inbound",
            "L:Outbound",
            "P:Outbound",
            "L:close",
            "P:close"
        ]
    );
}

#[test]
#[traced_test]
fn assembly_is_traced() {
    let log = EventLog::new();
    let factory = HandlerTubeFactory::new()
        .with_handler(Recording::arc("L", HandlerKind::Logical, Behaviour::Pass, &log));
    let (stub, _transport) = client(factory);
    stub.call("ping", ping()).expect("调用成功");
    assert!(logs_contain("client factory applied"));
    assert!(logs_contain("sending request"));
}
