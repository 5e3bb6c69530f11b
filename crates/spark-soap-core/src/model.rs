//! 运行时服务模型：由 [`ServiceConfig`] 构建的只读视图。
//!
//! 模型在装配期构建一次，随后以 `Arc<ServiceModel>` 在主管线、所有克隆与每个 Packet 之间共享；
//! 查询接口只读，不持有任何每次调用的可变状态。

use crate::config::{Anonymity, BindingConfig, ServiceConfig};
use crate::infoset::QName;

/// 单个操作的运行时描述。
#[derive(Clone, Debug, PartialEq)]
pub struct OperationModel {
    name: String,
    soap_action: Option<String>,
    input_action: Option<String>,
    output_action: Option<String>,
    input_element: Option<QName>,
    fault_actions: Vec<(QName, String)>,
    one_way: bool,
    anonymity: Anonymity,
}

impl OperationModel {
    /// 构造最小操作描述，其余字段通过 `with_*` 补充。
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            soap_action: None,
            input_action: None,
            output_action: None,
            input_element: None,
            fault_actions: Vec::new(),
            one_way: false,
            anonymity: Anonymity::Optional,
        }
    }

    pub fn with_soap_action(mut self, action: impl Into<String>) -> Self {
        self.soap_action = Some(action.into());
        self
    }

    pub fn with_input_action(mut self, action: impl Into<String>) -> Self {
        self.input_action = Some(action.into());
        self
    }

    pub fn with_output_action(mut self, action: impl Into<String>) -> Self {
        self.output_action = Some(action.into());
        self
    }

    pub fn with_input_element(mut self, element: QName) -> Self {
        self.input_element = Some(element);
        self
    }

    pub fn with_fault_action(mut self, detail: QName, action: impl Into<String>) -> Self {
        self.fault_actions.push((detail, action.into()));
        self
    }

    pub fn one_way(mut self) -> Self {
        self.one_way = true;
        self
    }

    pub fn with_anonymity(mut self, anonymity: Anonymity) -> Self {
        self.anonymity = anonymity;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn soap_action(&self) -> Option<&str> {
        self.soap_action.as_deref()
    }

    /// 请求 Action；未显式配置时退回 SOAP action。
    pub fn input_action(&self) -> Option<&str> {
        self.input_action.as_deref().or(self.soap_action.as_deref())
    }

    pub fn output_action(&self) -> Option<&str> {
        self.output_action.as_deref()
    }

    pub fn input_element(&self) -> Option<&QName> {
        self.input_element.as_ref()
    }

    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    pub fn anonymity(&self) -> Anonymity {
        self.anonymity
    }

    /// 按 Fault 细节元素名查找 Action。
    pub fn fault_action(&self, detail: &QName) -> Option<&str> {
        self.fault_actions
            .iter()
            .find(|(name, _)| name == detail)
            .map(|(_, action)| action.as_str())
    }
}

/// 服务端点模型。
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ServiceModel {
    service_name: String,
    port_name: String,
    address: String,
    binding: BindingConfig,
    operations: Vec<OperationModel>,
}

impl ServiceModel {
    pub fn new(service_name: impl Into<String>, binding: BindingConfig) -> Self {
        Self {
            service_name: service_name.into(),
            binding,
            ..Self::default()
        }
    }

    /// 从部署配置构建。配置应已通过校验。
    pub fn from_config(config: &ServiceConfig) -> Self {
        let operations = config
            .operations
            .iter()
            .map(|op| OperationModel {
                name: op.name.clone(),
                soap_action: op.soap_action.clone(),
                input_action: op.input_action.clone(),
                output_action: op.output_action.clone(),
                input_element: op.input_element.as_deref().map(QName::from_clark),
                fault_actions: op
                    .fault_actions
                    .iter()
                    .map(|fa| (QName::from_clark(&fa.detail), fa.action.clone()))
                    .collect(),
                one_way: op.one_way,
                anonymity: op.anonymity.unwrap_or(Anonymity::Optional),
            })
            .collect();
        Self {
            service_name: config.service_name.clone(),
            port_name: config.port_name.clone(),
            address: config.address.clone(),
            binding: config.binding.clone(),
            operations,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_operation(mut self, operation: OperationModel) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn binding(&self) -> &BindingConfig {
        &self.binding
    }

    pub fn operations(&self) -> &[OperationModel] {
        &self.operations
    }

    pub fn operation(&self, name: &str) -> Option<&OperationModel> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn operation_by_action(&self, action: &str) -> Option<&OperationModel> {
        self.operations
            .iter()
            .find(|op| op.input_action() == Some(action))
    }

    pub fn operation_by_soap_action(&self, soap_action: &str) -> Option<&OperationModel> {
        self.operations
            .iter()
            .find(|op| op.soap_action() == Some(soap_action))
    }

    pub fn operation_by_payload(&self, payload: &QName) -> Option<&OperationModel> {
        self.operations
            .iter()
            .find(|op| op.input_element.as_ref() == Some(payload))
    }

    /// 依次按寻址 Action、SOAP action、载荷根元素解析操作。
    pub fn resolve(
        &self,
        action: Option<&str>,
        soap_action: Option<&str>,
        payload: Option<&QName>,
    ) -> Option<&OperationModel> {
        action
            .and_then(|a| self.operation_by_action(a))
            .or_else(|| soap_action.and_then(|a| self.operation_by_soap_action(a)))
            .or_else(|| payload.and_then(|p| self.operation_by_payload(p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ServiceModel {
        ServiceModel::new("Echo", BindingConfig::default())
            .with_operation(
                OperationModel::new("echo")
                    .with_input_action("urn:echo:in")
                    .with_input_element(QName::new("urn:echo", "echo"))
                    .with_fault_action(QName::new("urn:echo", "EchoFault"), "urn:echo:fault"),
            )
            .with_operation(OperationModel::new("ping").with_soap_action("urn:ping").one_way())
    }

    #[test]
    fn resolves_in_priority_order() {
        let model = model();
        assert_eq!(
            model.resolve(Some("urn:echo:in"), None, None).map(OperationModel::name),
            Some("echo")
        );
        assert_eq!(
            model.resolve(None, Some("urn:ping"), None).map(OperationModel::name),
            Some("ping")
        );
        assert_eq!(
            model
                .resolve(Some("urn:unknown"), None, Some(&QName::new("urn:echo", "echo")))
                .map(OperationModel::name),
            Some("echo")
        );
        assert!(model.resolve(Some("urn:unknown"), None, None).is_none());
    }

    #[test]
    fn input_action_falls_back_to_soap_action() {
        let model = model();
        let ping = model.operation("ping").expect("ping");
        assert_eq!(ping.input_action(), Some("urn:ping"));
        assert!(ping.is_one_way());
        assert_eq!(ping.anonymity(), Anonymity::Optional);
    }

    #[test]
    fn fault_action_matches_detail_name() {
        let model = model();
        let echo = model.operation("echo").expect("echo");
        assert_eq!(
            echo.fault_action(&QName::new("urn:echo", "EchoFault")),
            Some("urn:echo:fault")
        );
        assert_eq!(echo.fault_action(&QName::new("urn:echo", "Other")), None);
    }
}
