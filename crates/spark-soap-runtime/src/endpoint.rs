//! 服务端终端阶段：调用应用端点。

use std::sync::Arc;

use spark_soap_core::{
    Message, NextAction, OperationModel, Packet, Result, SoapError, Tube, TubeCloner, TubeContext,
};
use tracing::debug;

/// 应用端点。
///
/// 返回 `Ok(None)` 表示本次交换没有响应消息（单向操作）；返回 `Err` 时由服务端 Engine 转换为 Fault。
pub trait Endpoint: Send + Sync {
    fn invoke(
        &self,
        operation: Option<&OperationModel>,
        request: Message,
        packet: &Packet,
    ) -> Result<Option<Message>>;
}

impl<F> Endpoint for F
where
    F: Fn(Option<&OperationModel>, Message, &Packet) -> Result<Option<Message>> + Send + Sync,
{
    fn invoke(
        &self,
        operation: Option<&OperationModel>,
        request: Message,
        packet: &Packet,
    ) -> Result<Option<Message>> {
        self(operation, request, packet)
    }
}

/// 把请求消息交给 [`Endpoint`]，并以其返回值构造响应 Packet。
///
/// 操作按 Action、SOAPAction、载荷元素名依次解析；解析失败时以 `None` 传给端点。
pub struct EndpointTube {
    endpoint: Arc<dyn Endpoint>,
}

impl EndpointTube {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self { endpoint }
    }

    fn dispatch(&self, mut packet: Packet) -> Result<Packet> {
        let message = packet
            .take_message()
            .ok_or_else(|| SoapError::stage("endpoint", "request packet carries no message"))?;
        let model = packet.endpoint().cloned();
        let operation = model.as_deref().and_then(|model| {
            model.resolve(
                packet
                    .property(crate::ACTION_PROPERTY)
                    .and_then(|value| value.as_str()),
                packet.soap_action(),
                message.payload_name(),
            )
        });
        debug!(
            operation = operation.map(OperationModel::name),
            "dispatching to endpoint"
        );
        let one_way = operation.is_some_and(OperationModel::is_one_way);
        let response = self.endpoint.invoke(operation, message, &packet)?;
        let response = if one_way { None } else { response };
        Ok(packet.create_response(response))
    }
}

impl Tube for EndpointTube {
    fn name(&self) -> &'static str {
        "endpoint"
    }

    fn process_request(&mut self, _ctx: &mut TubeContext<'_>, packet: Packet) -> NextAction {
        match self.dispatch(packet) {
            Ok(response) => NextAction::Return(response),
            Err(error) => NextAction::ThrowError(error),
        }
    }

    fn copy(&self, _cloner: &mut TubeCloner<'_>) -> Box<dyn Tube> {
        Box::new(Self {
            endpoint: Arc::clone(&self.endpoint),
        })
    }
}
