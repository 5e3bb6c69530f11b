//! 端点引用（EPR）。

use spark_soap_core::{Element, QName};

use crate::fault::{AddressingFault, AddressingFaultKind};
use crate::version::Vocabulary;

/// `ReplyTo`/`FaultTo`/`From` 头承载的端点引用。
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointReference {
    address: String,
    reference_parameters: Vec<Element>,
}

impl EndpointReference {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reference_parameters: Vec::new(),
        }
    }

    /// 本版本的匿名端点引用。
    pub fn anonymous(vocabulary: &Vocabulary) -> Self {
        Self::new(vocabulary.anonymous)
    }

    pub fn with_reference_parameter(mut self, parameter: Element) -> Self {
        self.reference_parameters.push(parameter);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn reference_parameters(&self) -> &[Element] {
        &self.reference_parameters
    }

    pub fn is_anonymous(&self, vocabulary: &Vocabulary) -> bool {
        vocabulary.is_anonymous(&self.address)
    }

    pub fn is_none(&self, vocabulary: &Vocabulary) -> bool {
        vocabulary.is_none(&self.address)
    }

    /// 从 EPR 元素解析；缺少 `Address` 或地址为空时以 `header` 报告 InvalidAddress。
    pub fn from_element(
        vocabulary: &Vocabulary,
        element: &Element,
        header: &QName,
    ) -> Result<Self, AddressingFault> {
        let invalid =
            || AddressingFault::for_header(AddressingFaultKind::InvalidAddress, header.clone());
        let mut addresses = element
            .child_elements()
            .filter(|child| child.name().is(vocabulary.namespace, "Address"));
        let address = addresses.next().ok_or_else(invalid)?.trimmed_text();
        if address.is_empty() || addresses.next().is_some() {
            return Err(invalid());
        }
        let reference_parameters = element
            .first_child(vocabulary.namespace, "ReferenceParameters")
            .map(|params| params.child_elements().cloned().collect())
            .unwrap_or_default();
        Ok(Self {
            address,
            reference_parameters,
        })
    }

    /// 渲染为名为 `local` 的 EPR 头元素。
    pub fn to_element(&self, vocabulary: &Vocabulary, local: &str) -> Element {
        let mut element = Element::new(vocabulary.qname(local))
            .with_child(Element::new(vocabulary.qname("Address")).with_text(&self.address));
        if !self.reference_parameters.is_empty() {
            let mut params = Element::new(vocabulary.qname("ReferenceParameters"));
            for parameter in &self.reference_parameters {
                params.push_element(parameter.clone());
            }
            element.push_element(params);
        }
        element
    }
}
