//! 服务端寻址阶段的路由、校验与带外投递。
//!
//! # 测试目标（Why）
//! - 匿名回复沿原通道返回并保留调用级属性；非匿名回复带外投递，原交换以空消息体结束；
//! - 匿名性约束冲突返回点名 `ReplyTo` 的 Fault，校验 Fault 同样按 `FaultTo` 路由；单向操作上的头错误被抑制；
//! - `none` 目标丢弃响应；Fault 响应按 `FaultTo` 路由并使用操作声明的 Fault Action；
//! - 带外投递失败只记录日志；池化策略复用出站管线。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use spark_soap_addressing::{
    AddressingHeaders, AddressingTubeFactory, EndpointReference, OutOfBandDelivery, W3C,
};
use spark_soap_core::test_stubs::{InMemoryTransport, RecordingBackChannel};
use spark_soap_core::test_stubs::transport::BackChannelProbe;
use spark_soap_core::{
    AddressingConfig, Anonymity, BindingConfig, Element, Engine, FaultKind, Message,
    OperationModel, OutOfBandPolicy, Packet, QName, Result, ServiceModel, SoapFault, SoapVersion,
    TubeChain,
};
use spark_soap_runtime::{ACTION_PROPERTY, TubelineAssembler};
use tracing_test::traced_test;

const VERSION: SoapVersion = SoapVersion::Soap12;
const APP: &str = "urn:spark:bank";
const CALLBACK: &str = "http://client.example/callback";

fn binding(policy: OutOfBandPolicy) -> BindingConfig {
    BindingConfig {
        soap_version: VERSION,
        addressing: AddressingConfig {
            enabled: true,
            out_of_band: policy,
            ..AddressingConfig::default()
        },
        ..BindingConfig::default()
    }
}

fn model(binding: BindingConfig) -> Arc<ServiceModel> {
    Arc::new(
        ServiceModel::new("Bank", binding)
            .with_address("http://bank.example/service")
            .with_operation(
                OperationModel::new("balance")
                    .with_input_action("urn:bank:balance")
                    .with_output_action("urn:bank:balanceResponse"),
            )
            .with_operation(
                OperationModel::new("withdraw")
                    .with_input_action("urn:bank:withdraw")
                    .with_fault_action(QName::new(APP, "Overdraft"), "urn:bank:overdraft"),
            )
            .with_operation(
                OperationModel::new("audit")
                    .with_input_action("urn:bank:audit")
                    .one_way(),
            )
            .with_operation(
                OperationModel::new("sync")
                    .with_input_action("urn:bank:sync")
                    .with_anonymity(Anonymity::Required),
            )
            .with_operation(
                OperationModel::new("notify")
                    .with_input_action("urn:bank:notify")
                    .with_anonymity(Anonymity::Prohibited),
            ),
    )
}

struct Server {
    chain: TubeChain,
    engine: Engine,
    model: Arc<ServiceModel>,
    transport: InMemoryTransport,
    invocations: Arc<AtomicUsize>,
}

fn server_with(binding: BindingConfig) -> Server {
    let transport = InMemoryTransport::new();
    transport.sink(CALLBACK);
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invocations);
    let endpoint = move |operation: Option<&OperationModel>,
                         _request: Message,
                         packet: &Packet|
          -> Result<Option<Message>> {
        counter.fetch_add(1, Ordering::SeqCst);
        let action = packet
            .property(ACTION_PROPERTY)
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_owned();
        match operation.map(OperationModel::name) {
            Some("withdraw") => Ok(Some(
                SoapFault::new(FaultKind::Sender, "insufficient funds")
                    .with_detail(Element::ns(APP, "Overdraft", "b").with_text("120"))
                    .to_message(VERSION),
            )),
            Some("audit") => Ok(None),
            _ => Ok(Some(Message::new(
                VERSION,
                Element::ns(APP, "balanceResponse", "b").with_text(action),
            ))),
        }
    };
    let model = model(binding);
    let master = TubelineAssembler::new()
        .with_factory(AddressingTubeFactory::new())
        .with_transport(Arc::new(transport.clone()))
        .assemble_server(Arc::clone(&model), Arc::new(endpoint))
        .expect("装配服务端");
    Server {
        chain: master.clone_chain().expect("复制管线"),
        engine: Engine::server("bank", VERSION),
        model,
        transport,
        invocations,
    }
}

fn server() -> Server {
    server_with(binding(OutOfBandPolicy::Fresh))
}

impl Server {
    fn request(&self, headers: AddressingHeaders) -> (Packet, BackChannelProbe) {
        let mut message = Message::new(VERSION, Element::ns(APP, "request", "b"));
        headers.write(&W3C, message.headers_mut());
        let mut packet = Packet::with_message(message);
        packet.set_endpoint(Arc::clone(&self.model));
        packet.set_property("trace.id", "t-42");
        let (channel, probe) = RecordingBackChannel::new();
        packet.set_back_channel(Box::new(channel));
        (packet, probe)
    }

    fn run(&mut self, packet: Packet) -> Packet {
        self.engine
            .create_fiber()
            .run_sync(&mut self.chain, packet)
            .expect("服务端交换正常结束")
    }
}

fn headers(action: &str) -> AddressingHeaders {
    AddressingHeaders {
        action: Some(action.to_owned()),
        message_id: Some("urn:uuid:request-1".to_owned()),
        ..AddressingHeaders::default()
    }
}

fn reply_to(action: &str, address: &str) -> AddressingHeaders {
    AddressingHeaders {
        reply_to: Some(EndpointReference::new(address)),
        ..headers(action)
    }
}

fn fault_of(response: &mut Packet) -> SoapFault {
    let message = response.message_mut().expect("Fault 响应");
    assert!(message.is_fault());
    let body = message.read_payload().expect("读取").expect("Fault 体");
    SoapFault::from_element(VERSION, &body).expect("解析 Fault")
}

#[test]
fn anonymous_reply_returns_through_original_channel() {
    let mut server = server();
    let (packet, probe) = server.request(headers("urn:bank:balance"));
    let response = server.run(packet);

    assert!(!probe.is_closed());
    assert!(server.transport.sent().is_empty());
    assert_eq!(
        response.property("trace.id").and_then(|value| value.as_str()),
        Some("t-42")
    );
    assert!(response.property(ACTION_PROPERTY).is_none(), "Action 只在请求内可见");

    let message = response.message().expect("沿原通道返回");
    let stamped = AddressingHeaders::parse(&W3C, message.headers()).expect("响应寻址头");
    assert_eq!(stamped.relates_to.as_deref(), Some("urn:uuid:request-1"));
    assert_eq!(stamped.action.as_deref(), Some("urn:bank:balanceResponse"));
    assert!(stamped.to.is_none());

    let mut message = response.message().expect("消息").copy().expect("复制");
    let body = message.read_payload().expect("读取").expect("消息体");
    assert_eq!(body.trimmed_text(), "urn:bank:balance", "端点可见请求 Action");
}

#[test]
fn non_anonymous_reply_is_delivered_out_of_band() {
    let mut server = server();
    let (packet, probe) = server.request(reply_to("urn:bank:balance", CALLBACK));
    let response = server.run(packet);

    assert!(!response.has_message(), "原交换以空消息体结束");
    assert!(probe.is_closed(), "回传通道已释放");
    let delivered = server.transport.sent_to(CALLBACK);
    assert_eq!(delivered.len(), 1);
    assert!(!delivered[0].expect_reply);
    let body = String::from_utf8_lossy(&delivered[0].body);
    assert!(body.contains("urn:uuid:request-1"));
    assert!(body.contains("balanceResponse"));
}

#[test]
fn required_anonymity_rejects_concrete_reply_to() {
    let mut server = server();
    let (packet, _probe) = server.request(reply_to("urn:bank:sync", CALLBACK));
    let mut response = server.run(packet);

    let fault = fault_of(&mut response);
    assert_eq!(fault.subcodes()[1].local(), "OnlyAnonymousAddressSupported");
    assert_eq!(fault.detail()[0].trimmed_text(), "wsa:ReplyTo");
    assert_eq!(server.invocations.load(Ordering::SeqCst), 0);
    assert!(server.transport.sent().is_empty());
}

#[test]
fn required_anonymity_rejects_none() {
    let mut server = server();
    let none = W3C.none.expect("W3C 定义了 none 地址");
    let (packet, probe) = server.request(reply_to("urn:bank:sync", none));
    let mut response = server.run(packet);

    let fault = fault_of(&mut response);
    assert_eq!(fault.subcodes()[1].local(), "OnlyAnonymousAddressSupported");
    assert_eq!(fault.detail()[0].trimmed_text(), "wsa:ReplyTo");
    assert_eq!(server.invocations.load(Ordering::SeqCst), 0);
    assert!(!probe.is_closed(), "Fault 沿原通道返回");
    assert!(server.transport.sent().is_empty());
}

#[test]
fn prohibited_anonymity_rejects_default_reply_to() {
    let mut server = server();
    let (packet, _probe) = server.request(headers("urn:bank:notify"));
    let mut response = server.run(packet);

    let fault = fault_of(&mut response);
    assert_eq!(fault.subcodes()[1].local(), "OnlyNonAnonymousAddressSupported");
    assert_eq!(fault.detail()[0].trimmed_text(), "wsa:ReplyTo");
}

#[test]
fn validation_faults_follow_fault_to() {
    let mut server = server();
    let request = AddressingHeaders {
        fault_to: Some(EndpointReference::new(CALLBACK)),
        ..headers("urn:bank:notify")
    };
    let (packet, probe) = server.request(request);
    let response = server.run(packet);

    assert!(!response.has_message(), "原交换以空消息体结束");
    assert!(probe.is_closed(), "FaultTo 非匿名时释放回传通道");
    assert_eq!(server.invocations.load(Ordering::SeqCst), 0);
    let delivered = server.transport.sent_to(CALLBACK);
    assert_eq!(delivered.len(), 1);
    let body = String::from_utf8_lossy(&delivered[0].body);
    assert!(body.contains("OnlyNonAnonymousAddressSupported"));
    assert!(body.contains(W3C.fault_action));
    assert!(body.contains("urn:uuid:request-1"));
}

#[test]
fn validation_faults_stay_in_band_when_anonymity_is_required() {
    let mut server = server();
    let request = AddressingHeaders {
        fault_to: Some(EndpointReference::new(CALLBACK)),
        ..headers("urn:bank:sync")
    };
    let (packet, probe) = server.request(request);
    let mut response = server.run(packet);

    let fault = fault_of(&mut response);
    assert_eq!(fault.detail()[0].trimmed_text(), "wsa:FaultTo");
    assert!(!probe.is_closed());
    assert!(server.transport.sent().is_empty());
}

#[test]
#[traced_test]
fn one_way_header_errors_are_suppressed() {
    let mut server = server();
    let (mut packet, _probe) = server.request(headers("urn:bank:audit"));
    packet
        .message_mut()
        .expect("请求消息")
        .headers_mut()
        .add(Element::new(W3C.qname("MessageID")).with_text("urn:uuid:duplicate"));
    let response = server.run(packet);

    assert!(!response.has_message(), "单向操作不回复 Fault");
    assert_eq!(server.invocations.load(Ordering::SeqCst), 0);
    assert!(logs_contain("addressing fault suppressed for one-way request"));
}

#[test]
fn duplicate_header_on_two_way_request_faults() {
    let mut server = server();
    let (mut packet, _probe) = server.request(headers("urn:bank:balance"));
    packet
        .message_mut()
        .expect("请求消息")
        .headers_mut()
        .add(Element::new(W3C.qname("Action")).with_text("urn:bank:balance"));
    let mut response = server.run(packet);

    let message = response.message().expect("Fault 响应");
    let stamped = AddressingHeaders::parse(&W3C, message.headers()).expect("Fault 寻址头");
    assert_eq!(stamped.action.as_deref(), Some(W3C.fault_action));
    let fault = fault_of(&mut response);
    assert_eq!(fault.subcodes()[1].local(), "InvalidCardinality");
}

#[test]
fn missing_action_faults_when_addressing_is_required() {
    let mut config = binding(OutOfBandPolicy::Fresh);
    config.addressing.required = true;
    let mut server = server_with(config);
    let (packet, _probe) = server.request(AddressingHeaders::default());
    let mut response = server.run(packet);

    let fault = fault_of(&mut response);
    assert_eq!(fault.subcodes()[0].local(), "MessageAddressingHeaderRequired");
    assert_eq!(fault.detail()[0].trimmed_text(), "wsa:Action");
}

#[test]
fn unknown_action_is_not_supported() {
    let mut server = server();
    let (packet, _probe) = server.request(headers("urn:bank:close-account"));
    let mut response = server.run(packet);
    let fault = fault_of(&mut response);
    assert_eq!(fault.subcodes()[0].local(), "ActionNotSupported");
}

#[test]
fn unknown_action_is_not_rescued_by_soap_action() {
    let mut server = server();
    let (mut packet, _probe) = server.request(headers("urn:bank:close-account"));
    packet.set_soap_action("urn:bank:balance");
    let mut response = server.run(packet);
    let fault = fault_of(&mut response);
    assert_eq!(fault.subcodes()[0].local(), "ActionNotSupported");
    assert_eq!(server.invocations.load(Ordering::SeqCst), 0);
}

#[test]
fn faults_follow_fault_to_with_declared_action() {
    let mut server = server();
    let request = AddressingHeaders {
        fault_to: Some(EndpointReference::new(CALLBACK)),
        ..headers("urn:bank:withdraw")
    };
    let (packet, probe) = server.request(request);
    let response = server.run(packet);

    assert!(!probe.is_closed(), "ReplyTo 仍为匿名，回传通道保留到响应阶段");
    assert!(!response.has_message());
    let delivered = server.transport.sent_to(CALLBACK);
    assert_eq!(delivered.len(), 1);
    let body = String::from_utf8_lossy(&delivered[0].body);
    assert!(body.contains("urn:bank:overdraft"));
    assert!(body.contains("insufficient funds"));
}

#[test]
fn requests_without_addressing_pass_through() {
    let mut server = server();
    let mut packet = Packet::with_message(Message::new(VERSION, Element::ns(APP, "request", "b")));
    packet.set_endpoint(Arc::clone(&server.model));
    packet.set_soap_action("urn:bank:balance");
    let response = server.run(packet);
    let message = response.message().expect("响应");
    assert!(!AddressingHeaders::present(&W3C, message.headers()));
}

#[test]
#[traced_test]
fn failed_out_of_band_delivery_is_logged() {
    let mut server = server();
    let (packet, _probe) = server.request(reply_to("urn:bank:balance", "http://unreachable.example/"));
    let response = server.run(packet);
    assert!(!response.has_message());
    assert!(logs_contain("out-of-band delivery failed"));
}

#[test]
fn pooled_policy_reuses_outbound_chains() {
    let transport = InMemoryTransport::new();
    transport.sink(CALLBACK);
    let delivery = OutOfBandDelivery::new(
        "bank",
        binding(OutOfBandPolicy::Pooled { capacity: 2 }),
        Some(Arc::new(transport.clone())),
    )
    .expect("构造投递器");
    for _ in 0..3 {
        let message = Message::new(VERSION, Element::ns(APP, "balanceResponse", "b"));
        delivery.deliver(CALLBACK, message).expect("投递成功");
    }
    assert_eq!(transport.sent_to(CALLBACK).len(), 3);
    let stats = delivery.pool().expect("池化策略").statistics();
    assert_eq!(stats.created, 1);

    delivery.close();
    let message = Message::new(VERSION, Element::ns(APP, "balanceResponse", "b"));
    assert!(delivery.deliver(CALLBACK, message).unwrap_err().is_shut_down());
}

#[test]
fn fresh_policy_has_no_pool() {
    let delivery = OutOfBandDelivery::new("bank", binding(OutOfBandPolicy::Fresh), None)
        .expect("构造投递器");
    assert!(delivery.pool().is_none());
    let message = Message::new(VERSION, Element::ns(APP, "balanceResponse", "b"));
    let error = delivery.deliver(CALLBACK, message).unwrap_err();
    assert_eq!(error.code(), spark_soap_core::codes::TRANSPORT_FAILED);
}
