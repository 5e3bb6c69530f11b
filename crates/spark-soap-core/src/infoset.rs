//! XML 信息集（infoset）的内存表示。
//!
//! # 设计背景（Why）
//! - Message 的头、体与附件引用都以元素树表达，编解码器在此之上实现 XML、MTOM 与二进制三种线格式；
//! - 二进制值（`base64Binary`）以 [`Node::Binary`] 独立建模，MTOM 才能在编码时决定内联还是抽出为 MIME 部件。
//!
//! # 契约说明（What）
//! - [`QName`] 的相等性只比较命名空间与本地名，前缀属于词法细节；
//! - [`Element`] 的相等性忽略命名空间声明提示（`namespace_hints`），声明只影响序列化形态；
//! - 所有类型均可通过 serde 序列化，供二进制编码直接复用。

use std::hash::{Hash, Hasher};
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// `xml` 前缀绑定的固定命名空间。
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// 限定名。
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QName {
    namespace: String,
    local: String,
    prefix: Option<String>,
}

impl QName {
    /// 构造不带前缀偏好的限定名。
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
            prefix: None,
        }
    }

    /// 构造带前缀偏好的限定名。
    pub fn with_prefix(
        namespace: impl Into<String>,
        local: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
            prefix: Some(prefix.into()),
        }
    }

    /// 无命名空间的本地名。
    pub fn local_only(local: impl Into<String>) -> Self {
        Self::new(String::new(), local)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// 判断是否为给定命名空间与本地名。
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.namespace == namespace && self.local == local
    }

    /// 前缀化的词法形式，例如 `wsa:ReplyTo`；无前缀时只返回本地名。
    pub fn lexical(&self) -> String {
        match &self.prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{}", self.local),
            _ => self.local.clone(),
        }
    }

    /// 解析 Clark 记法 `{ns}local`；不带花括号时视为无命名空间。
    pub fn from_clark(text: &str) -> Self {
        match text.strip_prefix('{').and_then(|rest| rest.split_once('}')) {
            Some((ns, local)) => Self::new(ns, local),
            None => Self::local_only(text),
        }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.local == other.local
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.local.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

/// 元素属性。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

/// 二进制值，对应 `xs:base64Binary` 内容。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryData {
    data: Bytes,
    content_type: Option<String>,
}

impl BinaryData {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            content_type: None,
        }
    }

    /// 附带 MIME 类型（编码为独立部件时使用）。
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 内联形式。
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

/// 元素的子节点。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Element(Element),
    Text(String),
    Binary(BinaryData),
}

/// XML 元素。
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Element {
    name: QName,
    attributes: Vec<Attribute>,
    children: Vec<Node>,
    namespace_hints: Vec<(String, String)>,
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.attributes == other.attributes
            && self.children == other.children
    }
}

impl Element {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// 便捷构造：带前缀的命名空间元素。
    pub fn ns(namespace: &str, local: &str, prefix: &str) -> Self {
        Self::new(QName::with_prefix(namespace, local, prefix))
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    pub fn into_children(self) -> Vec<Node> {
        self.children
    }

    /// 序列化时需额外声明的 `(prefix, namespace)` 对；用于 QName 取值的文本内容。
    pub fn namespace_hints(&self) -> &[(String, String)] {
        &self.namespace_hints
    }

    pub fn declare_namespace(&mut self, prefix: impl Into<String>, namespace: impl Into<String>) {
        let prefix = prefix.into();
        let namespace = namespace.into();
        if !self
            .namespace_hints
            .iter()
            .any(|(p, ns)| *p == prefix && *ns == namespace)
        {
            self.namespace_hints.push((prefix, namespace));
        }
    }

    pub fn with_namespace_hint(mut self, prefix: &str, namespace: &str) -> Self {
        self.declare_namespace(prefix, namespace);
        self
    }

    pub fn set_attribute(&mut self, name: QName, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|attr| attr.name == name) {
            Some(existing) => existing.value = value,
            None => self.attributes.push(Attribute { name, value }),
        }
    }

    pub fn with_attribute(mut self, name: QName, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// 按命名空间与本地名查找属性值。
    pub fn attribute(&self, namespace: &str, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name.is(namespace, local))
            .map(|attr| attr.value.as_str())
    }

    pub fn push(&mut self, node: Node) {
        self.children.push(node);
    }

    pub fn push_element(&mut self, element: Element) {
        self.children.push(Node::Element(element));
    }

    pub fn with_child(mut self, element: Element) -> Self {
        self.push_element(element);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn with_binary(mut self, data: BinaryData) -> Self {
        self.children.push(Node::Binary(data));
        self
    }

    /// 子元素迭代器（跳过文本与二进制节点）。
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn first_child(&self, namespace: &str, local: &str) -> Option<&Element> {
        self.child_elements()
            .find(|child| child.name.is(namespace, local))
    }

    pub fn first_child_element(&self) -> Option<&Element> {
        self.child_elements().next()
    }

    /// 文本内容：拼接直接子文本节点，二进制节点以 base64 形式计入。
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Binary(binary) => out.push_str(&binary.to_base64()),
                Node::Element(_) => {}
            }
        }
        out
    }

    /// 文本内容去除首尾空白。
    pub fn trimmed_text(&self) -> String {
        self.text().trim().to_owned()
    }

    /// 深度优先访问所有二进制节点。
    pub fn visit_binaries<'a>(&'a self, visit: &mut dyn FnMut(&'a BinaryData)) {
        for node in &self.children {
            match node {
                Node::Binary(binary) => visit(binary),
                Node::Element(child) => child.visit_binaries(visit),
                Node::Text(_) => {}
            }
        }
    }

    /// 在当前元素声明与提示中解析文本形式的 QName（如 `wsa:Action`）。
    ///
    /// 仅查找本元素的命名空间提示与元素名自身的前缀绑定；解析失败时返回无命名空间的本地名。
    pub fn resolve_qname_text(&self, text: &str) -> QName {
        let text = text.trim();
        match text.split_once(':') {
            Some((prefix, local)) => {
                let namespace = self
                    .namespace_hints
                    .iter()
                    .find(|(p, _)| p == prefix)
                    .map(|(_, ns)| ns.clone())
                    .or_else(|| {
                        (self.name.prefix() == Some(prefix))
                            .then(|| self.name.namespace().to_owned())
                    });
                match namespace {
                    Some(ns) => QName::with_prefix(ns, local, prefix),
                    None => QName::local_only(local),
                }
            }
            None => QName::local_only(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qname_equality_ignores_prefix() {
        let a = QName::with_prefix("urn:a", "x", "p");
        let b = QName::with_prefix("urn:a", "x", "q");
        assert_eq!(a, b);
        assert_eq!(a.lexical(), "p:x");
        assert_eq!(a.to_string(), "{urn:a}x");
        assert_eq!(QName::from_clark("{urn:a}x"), a);
    }

    #[test]
    fn element_equality_ignores_namespace_hints() {
        let plain = Element::ns("urn:a", "x", "p").with_text("v");
        let hinted = plain.clone().with_namespace_hint("q", "urn:q");
        assert_eq!(plain, hinted);
    }

    #[test]
    fn text_includes_binary_as_base64() {
        let element = Element::new(QName::local_only("data"))
            .with_text("a")
            .with_binary(BinaryData::new(vec![1u8, 2, 3]));
        assert_eq!(element.text(), "aAQID");
    }

    #[test]
    fn resolve_qname_text_uses_hints() {
        let element = Element::ns("urn:env", "Value", "env").with_namespace_hint("wsa", "urn:wsa");
        let resolved = element.resolve_qname_text(" wsa:InvalidAddress ");
        assert!(resolved.is("urn:wsa", "InvalidAddress"));
        let own = element.resolve_qname_text("env:Sender");
        assert!(own.is("urn:env", "Sender"));
    }
}
