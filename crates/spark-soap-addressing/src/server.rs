//! 服务端寻址阶段。
//!
//! # 教案式说明
//! - **意图（Why）**：请求携带的 `ReplyTo`/`FaultTo` 决定响应走向：匿名地址沿原回传通道返回，`none`
//!   丢弃响应，其余地址需要带外投递；同时要在进入端点之前拦下违反寻址规范或绑定约束的请求；
//! - **逻辑（How）**：
//!   1. 请求路径依次执行“解析头 → 补默认值 → 校验匿名性约束”，任一步失败都立即生成 Fault 响应，
//!      该响应按 `FaultTo`（缺省为 `ReplyTo`）路由；操作要求匿名地址时 Fault 总是沿原通道返回；
//!      单向操作不回复 Fault，记录告警后以空响应结束交换；
//!   2. 两个回复目标都不是匿名地址时，提前释放回传通道；
//!   3. 响应路径按响应是否为 Fault 选择 `FaultTo` 或 `ReplyTo`，写入响应寻址头后决定原样返回、丢弃或带外投递；
//! - **契约（What）**：
//!   - 每次交换的回复目标保存在阶段实例上，实例只属于一个管线克隆，复制时总是得到空状态的新实例；
//!   - 带外投递失败只记录日志，原交换以无消息体的响应结束；
//! - **风险（Trade-offs）**：Engine 边界转换出的内部故障不会经过本阶段的响应路径，因而总是沿原通道返回。

use std::sync::Arc;

use spark_soap_core::{
    Anonymity, Element, Message, NextAction, OperationModel, Packet, ServiceModel, SoapError,
    SoapFault, Tube, TubeCloner, TubeContext, TubeId,
};
use spark_soap_runtime::ACTION_PROPERTY;
use tracing::{debug, warn};

use crate::delivery::OutOfBandDelivery;
use crate::epr::EndpointReference;
use crate::fault::{AddressingFault, AddressingFaultKind};
use crate::headers::{AddressingHeaders, new_message_id, write_reference_parameters};
use crate::version::Vocabulary;

/// 一次交换解析出的寻址状态。
#[derive(Debug)]
struct Exchange {
    reply_to: EndpointReference,
    fault_to: EndpointReference,
    message_id: Option<String>,
    action: Option<String>,
    operation: Option<OperationModel>,
}

pub struct WsaServerTube {
    vocabulary: &'static Vocabulary,
    required: bool,
    delivery: Arc<OutOfBandDelivery>,
    next: TubeId,
    exchange: Option<Exchange>,
}

impl WsaServerTube {
    pub fn new(
        vocabulary: &'static Vocabulary,
        required: bool,
        delivery: Arc<OutOfBandDelivery>,
        next: TubeId,
    ) -> Self {
        Self {
            vocabulary,
            required,
            delivery,
            next,
            exchange: None,
        }
    }

    pub fn delivery(&self) -> &Arc<OutOfBandDelivery> {
        &self.delivery
    }

    fn validate(
        &self,
        headers: AddressingHeaders,
        operation: Option<OperationModel>,
        model: Option<&ServiceModel>,
    ) -> Result<Exchange, AddressingFault> {
        let vocabulary = self.vocabulary;
        if self.required && headers.action.is_none() {
            return Err(AddressingFault::for_header(
                AddressingFaultKind::MessageAddressingHeaderRequired,
                vocabulary.qname("Action"),
            ));
        }
        // Action 必须对应某个操作的输入 Action，不以 SOAPAction 或载荷名兜底。
        if let (Some(action), Some(model)) = (&headers.action, model)
            && !model.operations().is_empty()
            && model.operation_by_action(action).is_none()
        {
            return Err(AddressingFault::action_not_supported(action.clone()));
        }

        let reply_to = headers
            .reply_to
            .unwrap_or_else(|| EndpointReference::anonymous(vocabulary));
        let fault_to = headers.fault_to.unwrap_or_else(|| reply_to.clone());

        let anonymity = operation
            .as_ref()
            .map_or(Anonymity::Optional, OperationModel::anonymity);
        for (target, local) in [(&reply_to, "ReplyTo"), (&fault_to, "FaultTo")] {
            let anonymous = target.is_anonymous(vocabulary);
            let kind = match anonymity {
                Anonymity::Required if !anonymous => {
                    AddressingFaultKind::OnlyAnonymousAddressSupported
                }
                Anonymity::Prohibited if anonymous => {
                    AddressingFaultKind::OnlyNonAnonymousAddressSupported
                }
                _ => continue,
            };
            return Err(AddressingFault::for_header(kind, vocabulary.qname(local)));
        }

        Ok(Exchange {
            reply_to,
            fault_to,
            message_id: headers.message_id,
            action: headers.action,
            operation,
        })
    }

    /// 把寻址故障渲染为发往 `target` 的 Fault 响应；`target` 为空时沿原通道返回。
    fn fault_response(
        &self,
        packet: &Packet,
        fault: &AddressingFault,
        relates_to: Option<String>,
        target: Option<&EndpointReference>,
    ) -> Packet {
        let version = packet
            .message()
            .map(Message::version)
            .or_else(|| packet.endpoint().map(|model| model.binding().soap_version))
            .unwrap_or_default();
        let mut message = fault.to_soap_fault(self.vocabulary).to_message(version);
        let to = target
            .filter(|target| !target.is_anonymous(self.vocabulary))
            .map(|target| target.address().to_owned());
        AddressingHeaders {
            to,
            action: Some(self.vocabulary.fault_action.to_owned()),
            message_id: Some(new_message_id()),
            relates_to,
            ..AddressingHeaders::default()
        }
        .write(self.vocabulary, message.headers_mut());
        if let Some(target) = target {
            write_reference_parameters(self.vocabulary, target, message.headers_mut());
        }
        packet.create_response(Some(message))
    }

    fn inbound(&mut self, mut packet: Packet) -> NextAction {
        self.exchange = None;
        let Some(message) = packet.message() else {
            return NextAction::invoke(self.next, packet);
        };
        let vocabulary = self.vocabulary;
        if !self.required && !AddressingHeaders::present(vocabulary, message.headers()) {
            return NextAction::invoke(self.next, packet);
        }

        let parsed = AddressingHeaders::parse(vocabulary, message.headers());
        // 头部无效时仍按首个 Action 解析操作，以便识别单向请求。
        let action = match &parsed {
            Ok(headers) => headers.action.clone(),
            Err(_) => message
                .headers()
                .get(vocabulary.namespace, "Action")
                .map(Element::trimmed_text),
        };
        let relates_to = parsed
            .as_ref()
            .ok()
            .and_then(|headers| headers.message_id.clone());
        let fault_target = parsed
            .as_ref()
            .ok()
            .and_then(|headers| headers.fault_to.clone().or_else(|| headers.reply_to.clone()));
        let model = packet.endpoint().cloned();
        let operation = model
            .as_deref()
            .and_then(|model| {
                model.resolve(
                    action.as_deref(),
                    packet.soap_action(),
                    message.payload_name(),
                )
            })
            .cloned();
        let one_way = operation.as_ref().is_some_and(OperationModel::is_one_way);
        let pinned = operation
            .as_ref()
            .is_some_and(|op| op.anonymity() == Anonymity::Required);

        let validated = parsed
            .and_then(|headers| self.validate(headers, operation, model.as_deref()));
        let exchange = match validated {
            Ok(exchange) => exchange,
            Err(fault) if one_way => {
                warn!(code = fault.code(), %fault, "addressing fault suppressed for one-way request");
                return NextAction::Return(packet.create_response(None));
            }
            Err(fault) => {
                let target = fault_target.filter(|_| !pinned);
                let Some(target) = target.filter(|target| !target.is_anonymous(vocabulary))
                else {
                    debug!(code = fault.code(), %fault, "addressing fault returned to sender");
                    return NextAction::Return(self.fault_response(&packet, &fault, relates_to, None));
                };
                debug!(
                    code = fault.code(),
                    %fault,
                    fault_to = target.address(),
                    "addressing fault routed to FaultTo"
                );
                packet.close_back_channel();
                let response = self.fault_response(&packet, &fault, relates_to, Some(&target));
                return NextAction::Return(self.route(response, &target));
            }
        };

        if let Some(action) = &exchange.action {
            packet.set_handler_scoped_property(ACTION_PROPERTY, action.as_str());
        }
        if !exchange.reply_to.is_anonymous(vocabulary) && !exchange.fault_to.is_anonymous(vocabulary)
        {
            debug!(
                reply_to = exchange.reply_to.address(),
                fault_to = exchange.fault_to.address(),
                "releasing transport back-channel early"
            );
            packet.close_back_channel();
        }
        self.exchange = Some(exchange);
        NextAction::invoke(self.next, packet)
    }

    /// 响应的 Action：Fault 按细节元素查找操作声明的 Fault Action，否则取输出 Action。
    fn response_action(&self, exchange: &Exchange, message: &Message) -> Option<String> {
        let operation = exchange.operation.as_ref();
        if message.is_fault() {
            let detail_name = message
                .copy()
                .and_then(|mut copy| copy.read_payload())
                .ok()
                .flatten()
                .and_then(|payload| SoapFault::from_element(message.version(), &payload))
                .and_then(|fault| fault.detail().first().map(|entry| entry.name().clone()));
            let declared = detail_name
                .as_ref()
                .and_then(|name| operation.and_then(|op| op.fault_action(name)));
            return Some(declared.unwrap_or(self.vocabulary.fault_action).to_owned());
        }
        operation
            .and_then(OperationModel::output_action)
            .map(str::to_owned)
            .or_else(|| exchange.action.as_ref().map(|action| format!("{action}Response")))
    }

    fn outbound(&mut self, mut packet: Packet) -> NextAction {
        let Some(exchange) = self.exchange.take() else {
            return NextAction::Return(packet);
        };
        let vocabulary = self.vocabulary;
        let Some(message) = packet.message_mut() else {
            return NextAction::Return(packet);
        };
        let target = if message.is_fault() {
            &exchange.fault_to
        } else {
            &exchange.reply_to
        };
        let anonymous = target.is_anonymous(vocabulary);
        AddressingHeaders {
            to: (!anonymous).then(|| target.address().to_owned()),
            action: self.response_action(&exchange, message),
            message_id: Some(new_message_id()),
            relates_to: exchange.message_id.clone(),
            ..AddressingHeaders::default()
        }
        .write(vocabulary, message.headers_mut());
        write_reference_parameters(vocabulary, target, message.headers_mut());

        NextAction::Return(self.route(packet, target))
    }

    /// 按回复目标处理响应：匿名地址原样返回，`none` 丢弃，其余地址带外投递。
    fn route(&self, mut packet: Packet, target: &EndpointReference) -> Packet {
        let vocabulary = self.vocabulary;
        if target.is_anonymous(vocabulary) {
            return packet;
        }
        if target.is_none(vocabulary) {
            debug!("reply target is `none`, dropping the response");
            packet.drop_message();
            return packet;
        }
        if let Some(message) = packet.take_message() {
            match self.delivery.deliver(target.address(), message) {
                Ok(()) => debug!(address = target.address(), "response delivered out of band"),
                Err(error) => warn!(
                    address = target.address(),
                    code = error.code(),
                    %error,
                    "out-of-band delivery failed"
                ),
            }
        }
        packet.drop_message();
        packet.close_back_channel();
        packet
    }
}

impl Tube for WsaServerTube {
    fn name(&self) -> &'static str {
        "wsa.server"
    }

    fn process_request(&mut self, _ctx: &mut TubeContext<'_>, packet: Packet) -> NextAction {
        self.inbound(packet)
    }

    fn process_response(&mut self, _ctx: &mut TubeContext<'_>, packet: Packet) -> NextAction {
        self.outbound(packet)
    }

    fn process_exception(&mut self, _ctx: &mut TubeContext<'_>, error: SoapError) -> NextAction {
        self.exchange = None;
        NextAction::ThrowError(error)
    }

    fn copy(&self, cloner: &mut TubeCloner<'_>) -> Box<dyn Tube> {
        Box::new(Self::new(
            self.vocabulary,
            self.required,
            Arc::clone(&self.delivery),
            cloner.copy(self.next),
        ))
    }
}
