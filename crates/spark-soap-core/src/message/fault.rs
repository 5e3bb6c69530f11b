use crate::infoset::{Element, QName, XML_NS};
use crate::message::Message;
use crate::version::{FaultKind, SoapVersion};

/// 版本无关的 SOAP Fault 模型。
///
/// # 教案式说明
/// - **意图（Why）**：协议阶段（WS-Addressing）与 Engine 边界都需要生成 Fault，调用方只关心“谁的错 +
///   子代码 + 原因 + 细节”，不应该关心 1.1 与 1.2 的元素结构差异；
/// - **逻辑（How）**：[`to_element`](Self::to_element) 按版本渲染：1.1 以首个子代码（若有）作为 `faultcode`，
///   1.2 渲染嵌套的 `Code/Subcode` 链；QName 取值的文本会在所在元素上挂命名空间提示，保证序列化后可解析；
/// - **契约（What）**：[`from_element`](Self::from_element) 能解析本类型渲染的两种形态；无法识别的代码回退为
///   `Receiver`。
#[derive(Clone, Debug, PartialEq)]
pub struct SoapFault {
    kind: FaultKind,
    subcodes: Vec<QName>,
    reason: String,
    detail: Vec<Element>,
}

impl SoapFault {
    pub fn new(kind: FaultKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            subcodes: Vec::new(),
            reason: reason.into(),
            detail: Vec::new(),
        }
    }

    /// 追加一级子代码，按追加顺序嵌套。
    pub fn with_subcode(mut self, subcode: QName) -> Self {
        self.subcodes.push(subcode);
        self
    }

    pub fn with_detail(mut self, entry: Element) -> Self {
        self.detail.push(entry);
        self
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn subcodes(&self) -> &[QName] {
        &self.subcodes
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn detail(&self) -> &[Element] {
        &self.detail
    }

    /// 渲染为 Fault 消息。
    pub fn to_message(&self, version: SoapVersion) -> Message {
        Message::new(version, self.to_element(version))
    }

    /// 渲染为 `Fault` 元素。
    pub fn to_element(&self, version: SoapVersion) -> Element {
        match version {
            SoapVersion::Soap11 => self.render_soap11(),
            SoapVersion::Soap12 => self.render_soap12(),
        }
    }

    fn render_soap11(&self) -> Element {
        let version = SoapVersion::Soap11;
        let code = self
            .subcodes
            .first()
            .cloned()
            .unwrap_or_else(|| version.fault_code(self.kind));
        let mut fault = Element::new(version.qname("Fault"));
        fault.push_element(qname_valued(QName::local_only("faultcode"), &code, 0));
        fault.push_element(Element::new(QName::local_only("faultstring")).with_text(&self.reason));
        if !self.detail.is_empty() {
            let mut detail = Element::new(QName::local_only("detail"));
            for entry in &self.detail {
                detail.push_element(entry.clone());
            }
            fault.push_element(detail);
        }
        fault
    }

    fn render_soap12(&self) -> Element {
        let version = SoapVersion::Soap12;
        let mut codes = Vec::with_capacity(self.subcodes.len() + 1);
        codes.push(version.fault_code(self.kind));
        codes.extend(self.subcodes.iter().cloned());

        // 从最内层子代码开始向外包裹。
        let mut nested: Option<Element> = None;
        for (depth, code) in codes.iter().enumerate().rev() {
            let tag = if depth == 0 { "Code" } else { "Subcode" };
            let mut level = Element::new(version.qname(tag));
            level.push_element(qname_valued(version.qname("Value"), code, depth));
            if let Some(inner) = nested.take() {
                level.push_element(inner);
            }
            nested = Some(level);
        }

        let mut fault = Element::new(version.qname("Fault"));
        if let Some(code) = nested {
            fault.push_element(code);
        }
        let text = Element::new(version.qname("Text"))
            .with_attribute(QName::with_prefix(XML_NS, "lang", "xml"), "en")
            .with_text(&self.reason);
        fault.push_element(Element::new(version.qname("Reason")).with_child(text));
        if !self.detail.is_empty() {
            let mut detail = Element::new(version.qname("Detail"));
            for entry in &self.detail {
                detail.push_element(entry.clone());
            }
            fault.push_element(detail);
        }
        fault
    }

    /// 从 `Fault` 元素解析；非 Fault 元素返回 `None`。
    pub fn from_element(version: SoapVersion, element: &Element) -> Option<Self> {
        if !element.name().is(version.envelope_namespace(), "Fault") {
            return None;
        }
        match version {
            SoapVersion::Soap11 => Some(Self::parse_soap11(element)),
            SoapVersion::Soap12 => Some(Self::parse_soap12(element)),
        }
    }

    fn parse_soap11(element: &Element) -> Self {
        let version = SoapVersion::Soap11;
        let (kind, subcodes) = match element.first_child("", "faultcode") {
            Some(code_el) => {
                let code = code_el.resolve_qname_text(&code_el.text());
                match kind_of(version, &code) {
                    Some(kind) => (kind, Vec::new()),
                    // 子代码作为 faultcode 出现时，按发送方错误处理。
                    None if !code.namespace().is_empty() => (FaultKind::Sender, vec![code]),
                    None => (FaultKind::Receiver, Vec::new()),
                }
            }
            None => (FaultKind::Receiver, Vec::new()),
        };
        let reason = element
            .first_child("", "faultstring")
            .map(Element::trimmed_text)
            .unwrap_or_default();
        let detail = element
            .first_child("", "detail")
            .map(|d| d.child_elements().cloned().collect())
            .unwrap_or_default();
        Self {
            kind,
            subcodes,
            reason,
            detail,
        }
    }

    fn parse_soap12(element: &Element) -> Self {
        let version = SoapVersion::Soap12;
        let ns = version.envelope_namespace();
        let mut kind = FaultKind::Receiver;
        let mut subcodes = Vec::new();
        let mut level = element.first_child(ns, "Code");
        let mut depth = 0usize;
        while let Some(current) = level {
            if let Some(value) = current.first_child(ns, "Value") {
                let code = value.resolve_qname_text(&value.text());
                if depth == 0 {
                    kind = kind_of(version, &code).unwrap_or(FaultKind::Receiver);
                } else {
                    subcodes.push(code);
                }
            }
            level = current.first_child(ns, "Subcode");
            depth += 1;
        }
        let reason = element
            .first_child(ns, "Reason")
            .and_then(|r| r.first_child(ns, "Text"))
            .map(Element::trimmed_text)
            .unwrap_or_default();
        let detail = element
            .first_child(ns, "Detail")
            .map(|d| d.child_elements().cloned().collect())
            .unwrap_or_default();
        Self {
            kind,
            subcodes,
            reason,
            detail,
        }
    }
}

/// 文本内容为 QName 的元素，并在元素上声明该 QName 的前缀。
fn qname_valued(name: QName, value: &QName, ordinal: usize) -> Element {
    let prefix = match value.prefix() {
        Some(prefix) if !prefix.is_empty() => prefix.to_owned(),
        _ => format!("fc{ordinal}"),
    };
    let mut element = Element::new(name);
    if !value.namespace().is_empty() {
        element.declare_namespace(prefix.clone(), value.namespace());
        element.push(crate::infoset::Node::Text(format!("{prefix}:{}", value.local())));
    } else {
        element.push(crate::infoset::Node::Text(value.local().to_owned()));
    }
    element
}

/// 识别 Fault 代码；命名空间未解析时按本地名兜底。
fn kind_of(version: SoapVersion, code: &QName) -> Option<FaultKind> {
    version.fault_kind(code).or_else(|| {
        if !code.namespace().is_empty() {
            return None;
        }
        match code.local() {
            "Client" | "Sender" => Some(FaultKind::Sender),
            "Server" | "Receiver" => Some(FaultKind::Receiver),
            "VersionMismatch" => Some(FaultKind::VersionMismatch),
            "MustUnderstand" => Some(FaultKind::MustUnderstand),
            _ => None,
        }
    })
}
