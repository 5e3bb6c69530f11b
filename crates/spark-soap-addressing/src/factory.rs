//! 寻址阶段工厂：绑定启用寻址时在两端各插入一个阶段。

use std::sync::Arc;

use spark_soap_core::{Result, TubeId};
use spark_soap_runtime::{AssemblyContext, TubeFactory};
use tracing::debug;

use crate::client::WsaClientTube;
use crate::delivery::OutOfBandDelivery;
use crate::server::WsaServerTube;
use crate::version::Vocabulary;

#[derive(Clone, Copy, Debug, Default)]
pub struct AddressingTubeFactory;

impl AddressingTubeFactory {
    pub fn new() -> Self {
        Self
    }
}

impl TubeFactory for AddressingTubeFactory {
    fn name(&self) -> &'static str {
        "wsa"
    }

    fn create_client(&self, ctx: &mut AssemblyContext, next: TubeId) -> Result<TubeId> {
        let config = &ctx.binding().addressing;
        if !config.enabled {
            return Ok(next);
        }
        let vocabulary = Vocabulary::of(config.version);
        Ok(ctx.add(Box::new(WsaClientTube::new(vocabulary, next))))
    }

    fn create_server(&self, ctx: &mut AssemblyContext, next: TubeId) -> Result<TubeId> {
        let config = ctx.binding().addressing.clone();
        if !config.enabled {
            return Ok(next);
        }
        let delivery = OutOfBandDelivery::new(
            ctx.model().service_name(),
            ctx.binding().clone(),
            ctx.transport().cloned(),
        )?;
        debug!(
            version = ?config.version,
            required = config.required,
            policy = ?config.out_of_band,
            "addressing enabled on server"
        );
        Ok(ctx.add(Box::new(WsaServerTube::new(
            Vocabulary::of(config.version),
            config.required,
            Arc::new(delivery),
            next,
        ))))
    }
}
