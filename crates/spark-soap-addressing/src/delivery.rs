//! 带外响应投递。
//!
//! # 教案式说明
//! - **意图（Why）**：`ReplyTo`/`FaultTo` 指向非匿名地址时，响应不能经原回传通道返回，需要另开出站连接，
//!   用一条独立的出站管线把响应送达目标地址；
//! - **逻辑（How）**：
//!   1. 以目标地址构造不等待回复的出站 Packet；
//!   2. 按 [`OutOfBandPolicy`] 取得出站管线：`Fresh` 每次装配新管线，`Pooled` 从资源池租借克隆；
//!   3. 在独立的客户端 Engine 上同步执行，嵌套于当前服务端 Fiber 之内；
//! - **契约（What）**：[`OutOfBandDelivery::deliver`] 返回投递结果，服务端阶段只记录失败，不影响原交换；
//! - **风险（Trade-offs）**：同步嵌套执行会占用当前工作线程直至投递完成，超时由传输实现负责。

use std::fmt;
use std::sync::Arc;

use spark_soap_codec::SoapBindingCodec;
use spark_soap_core::{
    BindingConfig, ChainBuilder, Engine, MasterChain, Message, OutOfBandPolicy, Packet,
    ResourcePool, Result, SoapError, TransportFactory, TubeChain,
};
use spark_soap_runtime::TransportTube;
use tracing::debug;

pub struct OutOfBandDelivery {
    engine: Engine,
    binding: BindingConfig,
    transport: Option<Arc<dyn TransportFactory>>,
    pool: Option<ResourcePool<TubeChain>>,
}

impl OutOfBandDelivery {
    /// 构造投递器；`Pooled` 策略下立即装配出站主管线。
    pub fn new(
        name: &str,
        binding: BindingConfig,
        transport: Option<Arc<dyn TransportFactory>>,
    ) -> Result<Self> {
        let pool = match (binding.addressing.out_of_band, &transport) {
            (OutOfBandPolicy::Pooled { capacity }, Some(transport)) => {
                let master = outbound_master(&binding, Arc::clone(transport))?;
                Some(ResourcePool::new(format!("oob:{name}"), capacity, move || {
                    master.clone_chain()
                }))
            }
            _ => None,
        };
        Ok(Self {
            engine: Engine::client(format!("oob:{name}")),
            binding,
            transport,
            pool,
        })
    }

    pub fn policy(&self) -> OutOfBandPolicy {
        self.binding.addressing.out_of_band
    }

    pub fn pool(&self) -> Option<&ResourcePool<TubeChain>> {
        self.pool.as_ref()
    }

    /// 把响应消息送往 `address`。
    pub fn deliver(&self, address: &str, message: Message) -> Result<()> {
        let mut packet = Packet::with_message(message);
        packet.set_endpoint_address(address);
        packet.set_expect_reply(false);
        let fiber = self.engine.create_fiber();
        debug!(fiber.id = fiber.id(), %address, policy = ?self.policy(), "out-of-band delivery");
        match &self.pool {
            Some(pool) => {
                let mut chain = pool.take()?;
                fiber.run_sync(&mut chain, packet)?;
            }
            None => {
                let transport = self.transport.clone().ok_or_else(|| {
                    SoapError::transport(address, "no outbound transport is configured")
                })?;
                let mut chain = outbound_master(&self.binding, transport)?.clone_chain()?;
                let outcome = fiber.run_sync(&mut chain, packet);
                chain.dispose();
                outcome?;
            }
        }
        Ok(())
    }

    /// 释放池化的出站管线。
    pub fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.dispose();
        }
    }
}

impl fmt::Debug for OutOfBandDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutOfBandDelivery")
            .field("engine", &self.engine.name())
            .field("policy", &self.policy())
            .field("pool", &self.pool.as_ref().map(ResourcePool::statistics))
            .finish()
    }
}

fn outbound_master(
    binding: &BindingConfig,
    transport: Arc<dyn TransportFactory>,
) -> Result<MasterChain> {
    let mut builder = ChainBuilder::new();
    let head = builder.add(Box::new(TransportTube::new(
        Box::new(SoapBindingCodec::new(binding.clone())),
        transport,
        None,
    )));
    builder.build(head)
}
