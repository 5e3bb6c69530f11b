//! 部署配置：绑定特性开关与服务/操作描述。
//!
//! # 设计背景（Why）
//! - 描述符解析、WSDL 解析都属于外部协作者，它们最终产出的只是“绑定开什么特性、每个操作长什么样”；
//!   本模块把这份产出固定为 serde 可反序列化的结构，核心只消费这一种形态；
//! - 以 TOML 作为落地格式，便于测试与示例直接内嵌配置片段。
//!
//! # 契约说明（What）
//! - 所有结构都带 `#[serde(default)]`，缺省字段取线格式的惯用默认值；
//! - [`ServiceConfig::from_toml_str`] 在反序列化之后执行校验，失败统一映射为 [`SoapError::Configuration`]。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SoapError};
use crate::version::SoapVersion;

/// MTOM 默认阈值（字节）：小于该值的二进制内联为 base64。
pub const DEFAULT_MTOM_THRESHOLD: usize = 1000;

/// 内容协商模式。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentNegotiation {
    /// 始终发送纯 XML。
    #[default]
    None,
    /// 发送纯 XML，同时声明可接受替代二进制编码。
    Pessimistic,
    /// 直接发送替代二进制编码。
    Optimistic,
}

/// 操作对地址匿名性的约束。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anonymity {
    /// 回复目标必须是匿名地址。
    Required,
    /// 回复目标不得是匿名地址。
    Prohibited,
    /// 不做约束。
    Optional,
}

/// WS-Addressing 版本标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AddressingVersion {
    /// W3C WS-Addressing 1.0。
    #[default]
    W3c,
    /// 2004/08 Member Submission。
    Member,
}

/// 非匿名回复的带外投递策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OutOfBandPolicy {
    /// 每次投递装配一条全新的出站管线。
    #[default]
    Fresh,
    /// 复用池化的出站管线克隆，`capacity` 为池内最多保留的空闲克隆数。
    Pooled { capacity: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MtomConfig {
    pub enabled: bool,
    pub threshold: usize,
}

impl Default for MtomConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: DEFAULT_MTOM_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AddressingConfig {
    pub enabled: bool,
    /// 是否要求每条请求都携带寻址头。
    pub required: bool,
    pub version: AddressingVersion,
    pub out_of_band: OutOfBandPolicy,
}

/// 绑定级特性开关。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BindingConfig {
    pub soap_version: SoapVersion,
    pub mtom: MtomConfig,
    pub content_negotiation: ContentNegotiation,
    /// 是否启用替代二进制编码。
    pub binary_encoding: bool,
    pub addressing: AddressingConfig,
}

/// Fault 细节元素到 Action 的映射；`detail` 使用 Clark 记法 `{ns}local`。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaultActionConfig {
    pub detail: String,
    pub action: String,
}

/// 单个操作的描述。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct OperationConfig {
    pub name: String,
    pub soap_action: Option<String>,
    pub input_action: Option<String>,
    pub output_action: Option<String>,
    /// 请求载荷根元素，Clark 记法。
    pub input_element: Option<String>,
    pub fault_actions: Vec<FaultActionConfig>,
    pub one_way: bool,
    pub anonymity: Option<Anonymity>,
}

/// 服务端点部署描述。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub service_name: String,
    pub port_name: String,
    pub address: String,
    pub binding: BindingConfig,
    pub operations: Vec<OperationConfig>,
}

impl ServiceConfig {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| SoapError::Configuration(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置的内部一致性。
    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for operation in &self.operations {
            if operation.name.is_empty() {
                return Err(SoapError::Configuration(
                    "operation name must not be empty".to_owned(),
                ));
            }
            if !names.insert(operation.name.as_str()) {
                return Err(SoapError::Configuration(format!(
                    "operation `{}` is declared more than once",
                    operation.name
                )));
            }
        }
        if let OutOfBandPolicy::Pooled { capacity: 0 } = self.binding.addressing.out_of_band {
            return Err(SoapError::Configuration(
                "pooled out-of-band delivery needs a non-zero capacity".to_owned(),
            ));
        }
        if self.binding.mtom.enabled && self.binding.mtom.threshold == 0 {
            tracing::debug!(
                service = %self.service_name,
                "MTOM threshold is zero; every binary value becomes a separate part"
            );
        }
        Ok(())
    }
}
