//! 客户端寻址阶段：为出站请求写入寻址头，并核对响应的 `RelatesTo`。

use spark_soap_core::{
    NextAction, OperationModel, Packet, Result, SoapError, Tube, TubeCloner, TubeContext, TubeId,
};
use tracing::warn;

use crate::epr::EndpointReference;
use crate::headers::{AddressingHeaders, new_message_id};
use crate::version::Vocabulary;

pub struct WsaClientTube {
    vocabulary: &'static Vocabulary,
    next: TubeId,
    /// 本次交换发出的 MessageID。
    sent: Option<String>,
}

impl WsaClientTube {
    pub fn new(vocabulary: &'static Vocabulary, next: TubeId) -> Self {
        Self {
            vocabulary,
            next,
            sent: None,
        }
    }

    fn stamp(&mut self, packet: &mut Packet) -> Result<()> {
        let operation = packet.endpoint().and_then(|model| {
            let payload = packet.message().and_then(|message| message.payload_name());
            model.resolve(None, packet.soap_action(), payload).cloned()
        });
        let action = operation
            .as_ref()
            .and_then(OperationModel::input_action)
            .or(packet.soap_action())
            .map(str::to_owned)
            .ok_or_else(|| SoapError::stage("wsa.client", "outbound request has no action"))?;
        let message_id = new_message_id();
        let headers = AddressingHeaders {
            to: packet.endpoint_address().map(str::to_owned),
            action: Some(action),
            message_id: Some(message_id.clone()),
            reply_to: packet
                .expects_reply()
                .then(|| EndpointReference::anonymous(self.vocabulary)),
            ..AddressingHeaders::default()
        };
        let message = packet
            .message_mut()
            .ok_or_else(|| SoapError::stage("wsa.client", "outbound request has no message"))?;
        headers.write(self.vocabulary, message.headers_mut());
        self.sent = Some(message_id);
        Ok(())
    }

    fn check_reply(&self, packet: &Packet, sent: Option<&str>) -> Result<()> {
        let Some(message) = packet.message() else {
            return Ok(());
        };
        if !AddressingHeaders::present(self.vocabulary, message.headers()) {
            return Ok(());
        }
        let headers = AddressingHeaders::parse(self.vocabulary, message.headers())
            .map_err(|fault| SoapError::stage("wsa.client", fault.to_string()))?;
        if let (Some(relates_to), Some(sent)) = (headers.relates_to.as_deref(), sent) {
            if relates_to != sent {
                warn!(relates_to, sent, "response does not relate to the request");
            }
        }
        Ok(())
    }
}

impl Tube for WsaClientTube {
    fn name(&self) -> &'static str {
        "wsa.client"
    }

    fn process_request(&mut self, _ctx: &mut TubeContext<'_>, mut packet: Packet) -> NextAction {
        self.sent = None;
        match self.stamp(&mut packet) {
            Ok(()) => NextAction::invoke(self.next, packet),
            Err(error) => NextAction::ThrowError(error),
        }
    }

    fn process_response(&mut self, _ctx: &mut TubeContext<'_>, packet: Packet) -> NextAction {
        let sent = self.sent.take();
        match self.check_reply(&packet, sent.as_deref()) {
            Ok(()) => NextAction::Return(packet),
            Err(error) => NextAction::ThrowError(error),
        }
    }

    fn process_exception(&mut self, _ctx: &mut TubeContext<'_>, error: SoapError) -> NextAction {
        self.sent = None;
        NextAction::ThrowError(error)
    }

    fn copy(&self, cloner: &mut TubeCloner<'_>) -> Box<dyn Tube> {
        Box::new(Self::new(self.vocabulary, cloner.copy(self.next)))
    }
}
