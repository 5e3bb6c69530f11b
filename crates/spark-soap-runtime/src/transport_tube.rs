//! 客户端终端阶段：编码、发送、解码响应。
//!
//! # 教案式说明
//! - **意图（Why）**：管线最底层需要一个把 Packet 变成字节并交给传输层的阶段，其余阶段只面对 Packet；
//! - **逻辑（How）**：
//!   1. 目标地址取 `Packet::endpoint_address`，缺省为装配时给定的默认地址；
//!   2. 用本实例私有的编解码器副本编码，经 [`TransportFactory`] 建连发送；
//!   3. 有响应时在派生的响应 Packet 上解码，无响应（单向）时返回不带消息的响应 Packet；
//! - **契约（What）**：编解码器按克隆复制，不在并发 Fiber 之间共享；任何失败以 `ThrowError` 交给上游；
//! - **风险（Trade-offs）**：每次请求新建连接，连接复用属于传输实现的职责。

use std::sync::Arc;

use spark_soap_codec::Codec;
use spark_soap_core::{
    NextAction, Packet, Result, SoapError, TransportFactory, TransportRequest, Tube, TubeCloner,
    TubeContext,
};
use tracing::debug;

pub struct TransportTube {
    codec: Box<dyn Codec>,
    transport: Arc<dyn TransportFactory>,
    default_address: Option<String>,
}

impl TransportTube {
    pub fn new(
        codec: Box<dyn Codec>,
        transport: Arc<dyn TransportFactory>,
        default_address: Option<String>,
    ) -> Self {
        Self {
            codec,
            transport,
            default_address,
        }
    }

    fn exchange(&mut self, mut packet: Packet) -> Result<Packet> {
        let address = packet
            .endpoint_address()
            .or(self.default_address.as_deref())
            .filter(|address| !address.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| SoapError::transport("", "packet has no endpoint address"))?;
        let expect_reply = packet.expects_reply();
        let encoded = self.codec.encode(&mut packet)?;
        debug!(
            %address,
            content_type = encoded.content_type.content_type(),
            expect_reply,
            "sending request"
        );

        let mut connection = self.transport.connect(&address)?;
        let response = connection.send(TransportRequest {
            body: encoded.body,
            content_type: encoded.content_type,
            expect_reply,
        })?;

        let mut reply = packet.create_response(None);
        if let Some(response) = response {
            debug!(%address, content_type = %response.content_type, "decoding response");
            self.codec
                .decode(&response.body, &response.content_type, &mut reply)?;
        }
        Ok(reply)
    }
}

impl Tube for TransportTube {
    fn name(&self) -> &'static str {
        "transport"
    }

    fn process_request(&mut self, _ctx: &mut TubeContext<'_>, packet: Packet) -> NextAction {
        match self.exchange(packet) {
            Ok(reply) => NextAction::Return(reply),
            Err(error) => NextAction::ThrowError(error),
        }
    }

    fn copy(&self, _cloner: &mut TubeCloner<'_>) -> Box<dyn Tube> {
        Box::new(Self {
            codec: self.codec.copy(),
            transport: Arc::clone(&self.transport),
            default_address: self.default_address.clone(),
        })
    }
}
