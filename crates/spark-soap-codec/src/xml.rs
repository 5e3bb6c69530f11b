//! 元素树与 XML 文本之间的转换。
//!
//! # 设计背景（Why）
//! - 纯 SOAP、MTOM 与 SwA 共用同一套信封序列化；差别只在二进制节点的处理方式（内联 base64 或抽出为 XOP 部件）；
//! - 解析器需要把前缀还原为命名空间，并保留 QName 取值文本（如 Fault 代码）所依赖的前缀绑定。
//!
//! # 核心机制（How）
//! - 写出：维护命名空间作用域栈，元素或属性的命名空间不在作用域内时就地声明；优先使用限定名自带的前缀，
//!   前缀冲突或缺失时生成 `ns{n}`；
//! - 读取：基于 `quick_xml::Reader` 的事件流，自行维护作用域栈解析前缀；
//!   叶子元素的文本形如 `p:local` 且 `p` 在作用域内时，把该绑定记录为元素的命名空间提示；
//! - 仅含空白的文本节点被视为可忽略空白而丢弃；`DOCTYPE` 一律拒绝。

use bytes::Bytes;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use spark_soap_core::infoset::XML_NS;
use spark_soap_core::{BinaryData, Element, Node, QName};

use crate::error::CodecError;

/// XOP 包含元素的命名空间。
pub const XOP_NS: &str = "http://www.w3.org/2004/08/xop/include";

const XMLNS_NS: &str = "http://www.w3.org/2000/xmlns/";

/// 被抽出为独立 MIME 部件的二进制值。
#[derive(Clone, Debug)]
pub(crate) struct XopPart {
    pub content_id: String,
    pub content_type: String,
    pub data: Bytes,
}

/// 二进制节点的写出策略。
pub(crate) enum BinaryPolicy {
    /// 全部内联为 base64 文本。
    Inline,
    /// 长度达到阈值的值抽出为 XOP 部件。
    Xop {
        threshold: usize,
        parts: Vec<XopPart>,
    },
}

/// 带命名空间作用域的 XML 写出器。
pub(crate) struct XmlWriter {
    out: String,
    scopes: Vec<Vec<(String, String)>>,
    generated: usize,
    policy: BinaryPolicy,
}

impl XmlWriter {
    pub(crate) fn new(policy: BinaryPolicy) -> Self {
        Self {
            out: String::with_capacity(512),
            scopes: Vec::new(),
            generated: 0,
            policy,
        }
    }

    pub(crate) fn declaration(&mut self) {
        self.out
            .push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    }

    /// 打开元素，附带额外的命名空间声明。
    pub(crate) fn open(&mut self, name: &QName, extra: &[(String, String)]) {
        self.open_with(name, &[], extra);
    }

    pub(crate) fn close(&mut self, name: &QName) {
        let lexical = self.lexical_in_scope(name);
        self.out.push_str("</");
        self.out.push_str(&lexical);
        self.out.push('>');
        self.scopes.pop();
    }

    pub(crate) fn element(&mut self, element: &Element) {
        self.open_with(element.name(), element.attributes(), element.namespace_hints());
        if element.children().is_empty() {
            // 自闭合：替换刚写出的 `>`。
            self.out.pop();
            self.out.push_str("/>");
            self.scopes.pop();
            return;
        }
        for child in element.children() {
            match child {
                Node::Element(inner) => self.element(inner),
                Node::Text(text) => self.out.push_str(&escape(text.as_str())),
                Node::Binary(binary) => self.binary(binary),
            }
        }
        self.close(element.name());
    }

    pub(crate) fn finish(self) -> (String, Vec<XopPart>) {
        let parts = match self.policy {
            BinaryPolicy::Inline => Vec::new(),
            BinaryPolicy::Xop { parts, .. } => parts,
        };
        (self.out, parts)
    }

    fn binary(&mut self, binary: &BinaryData) {
        let extract = match &self.policy {
            BinaryPolicy::Xop { threshold, .. } => binary.len() >= *threshold,
            BinaryPolicy::Inline => false,
        };
        if !extract {
            self.out.push_str(&binary.to_base64());
            return;
        }
        let content_id = format!("{}@spark.soap", uuid::Uuid::new_v4());
        let include = Element::new(QName::with_prefix(XOP_NS, "Include", "xop"))
            .with_attribute(QName::local_only("href"), format!("cid:{content_id}"));
        if let BinaryPolicy::Xop { parts, .. } = &mut self.policy {
            parts.push(XopPart {
                content_id,
                content_type: binary
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_owned(),
                data: binary.data().clone(),
            });
        }
        self.element(&include);
    }

    fn open_with(
        &mut self,
        name: &QName,
        attributes: &[spark_soap_core::Attribute],
        hints: &[(String, String)],
    ) {
        let mut declared: Vec<(String, String)> = Vec::new();
        for (prefix, namespace) in hints {
            if self.lookup_prefix(prefix, &declared) != Some(namespace.as_str()) {
                declared.push((prefix.clone(), namespace.clone()));
            }
        }

        let element_prefix = self.prefix_for(name, true, &mut declared);
        let mut rendered_attrs = Vec::with_capacity(attributes.len());
        for attr in attributes {
            let prefix = self.prefix_for(&attr.name, false, &mut declared);
            rendered_attrs.push((qualified(prefix.as_deref(), attr.name.local()), &attr.value));
        }

        self.out.push('<');
        self.out
            .push_str(&qualified(element_prefix.as_deref(), name.local()));
        for (prefix, namespace) in &declared {
            if prefix.is_empty() {
                self.out.push_str(" xmlns=\"");
            } else {
                self.out.push_str(" xmlns:");
                self.out.push_str(prefix);
                self.out.push_str("=\"");
            }
            self.out.push_str(&escape(namespace.as_str()));
            self.out.push('"');
        }
        for (key, value) in rendered_attrs {
            self.out.push(' ');
            self.out.push_str(&key);
            self.out.push_str("=\"");
            self.out.push_str(&escape(value.as_str()));
            self.out.push('"');
        }
        self.out.push('>');
        self.scopes.push(declared);
    }

    /// 为名字选择前缀，必要时登记新声明。元素可用默认命名空间，属性不可。
    fn prefix_for(
        &mut self,
        name: &QName,
        is_element: bool,
        declared: &mut Vec<(String, String)>,
    ) -> Option<String> {
        let namespace = name.namespace();
        if namespace.is_empty() {
            if is_element && self.lookup_prefix("", declared).is_some_and(|ns| !ns.is_empty()) {
                declared.push((String::new(), String::new()));
            }
            return None;
        }
        if namespace == XML_NS {
            return Some("xml".to_owned());
        }
        if let Some(preferred) = name.prefix() {
            if preferred.is_empty() && !is_element {
                // 属性不能落在默认命名空间上，改用生成前缀。
            } else if self.lookup_prefix(preferred, declared) == Some(namespace) {
                return non_empty(preferred);
            } else if !declared.iter().any(|(p, _)| p == preferred) {
                declared.push((preferred.to_owned(), namespace.to_owned()));
                return non_empty(preferred);
            }
        }
        if let Some(existing) = self.prefix_bound_to(namespace, is_element, declared) {
            return non_empty(&existing);
        }
        let generated = loop {
            self.generated += 1;
            let candidate = format!("ns{}", self.generated);
            if self.lookup_prefix(&candidate, declared).is_none() {
                break candidate;
            }
        };
        declared.push((generated.clone(), namespace.to_owned()));
        Some(generated)
    }

    fn lookup_prefix<'s>(&'s self, prefix: &str, pending: &'s [(String, String)]) -> Option<&'s str> {
        if prefix == "xml" {
            return Some(XML_NS);
        }
        pending
            .iter()
            .rev()
            .chain(self.scopes.iter().rev().flat_map(|scope| scope.iter().rev()))
            .find(|(p, _)| p == prefix)
            .map(|(_, ns)| ns.as_str())
    }

    /// 作用域内绑定到该命名空间、且未被内层遮蔽的前缀。
    fn prefix_bound_to(
        &self,
        namespace: &str,
        allow_default: bool,
        pending: &[(String, String)],
    ) -> Option<String> {
        let candidates = pending
            .iter()
            .rev()
            .chain(self.scopes.iter().rev().flat_map(|scope| scope.iter().rev()));
        for (prefix, bound) in candidates {
            if bound == namespace
                && (allow_default || !prefix.is_empty())
                && self.lookup_prefix(prefix, pending) == Some(namespace)
            {
                return Some(prefix.clone());
            }
        }
        None
    }

    fn lexical_in_scope(&self, name: &QName) -> String {
        if name.namespace().is_empty() {
            return name.local().to_owned();
        }
        let prefix = match name.prefix() {
            Some(preferred) if self.lookup_prefix(preferred, &[]) == Some(name.namespace()) => {
                Some(preferred.to_owned())
            }
            _ => self.prefix_bound_to(name.namespace(), true, &[]),
        };
        qualified(prefix.as_deref().and_then(non_empty_ref), name.local())
    }
}

fn non_empty(prefix: &str) -> Option<String> {
    (!prefix.is_empty()).then(|| prefix.to_owned())
}

fn non_empty_ref(prefix: &str) -> Option<&str> {
    (!prefix.is_empty()).then_some(prefix)
}

fn qualified(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{local}"),
        None => local.to_owned(),
    }
}

/// 把单个元素序列化为独立的 XML 片段（不含声明）。
pub fn element_to_string(element: &Element) -> String {
    let mut writer = XmlWriter::new(BinaryPolicy::Inline);
    writer.element(element);
    writer.finish().0
}

/// 解析 XML 文档，返回根元素。
pub fn parse_document(input: &[u8]) -> Result<Element, CodecError> {
    let mut reader = Reader::from_reader(input);
    let mut scopes: Vec<Vec<(String, String)>> = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let element = open_element(&start, &mut scopes)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&start, &mut scopes)?;
                scopes.pop();
                attach(finish_element(element, &scopes), &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| CodecError::MalformedXml("unbalanced end tag".to_owned()))?;
                scopes.pop();
                attach(finish_element(element, &scopes), &mut stack, &mut root)?;
            }
            Event::Text(text) => {
                let text = text.unescape()?;
                push_text(&mut stack, &text)?;
            }
            Event::CData(data) => {
                let raw = data.into_inner();
                let text = std::str::from_utf8(&raw)
                    .map_err(|err| CodecError::MalformedXml(err.to_string()))?;
                push_text(&mut stack, text)?;
            }
            Event::DocType(_) => {
                return Err(CodecError::MalformedXml(
                    "document type declarations are not allowed".to_owned(),
                ));
            }
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) => {}
            Event::Eof => break,
        }
    }

    if !stack.is_empty() {
        return Err(CodecError::MalformedXml("unexpected end of document".to_owned()));
    }
    root.ok_or_else(|| CodecError::MalformedXml("document has no root element".to_owned()))
}

fn open_element(
    start: &BytesStart<'_>,
    scopes: &mut Vec<Vec<(String, String)>>,
) -> Result<Element, CodecError> {
    let mut declarations = Vec::new();
    let mut raw_attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr?;
        let key = utf8(attr.key.as_ref())?.to_owned();
        let value = attr.unescape_value()?.into_owned();
        if key == "xmlns" {
            declarations.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declarations.push((prefix.to_owned(), value));
        } else {
            raw_attrs.push((key, value));
        }
    }
    scopes.push(declarations.clone());

    let raw_name = utf8(start.name().as_ref())?.to_owned();
    let name = resolve(&raw_name, true, scopes)?;
    let mut element = Element::new(name);
    for (prefix, namespace) in declarations {
        if !prefix.is_empty() {
            element.declare_namespace(prefix, namespace);
        }
    }
    for (key, value) in raw_attrs {
        let attr_name = resolve(&key, false, scopes)?;
        if attr_name.namespace() == XMLNS_NS {
            continue;
        }
        element.set_attribute(attr_name, value);
    }
    Ok(element)
}

/// 叶子元素的 QName 形式文本：把所用前缀的绑定记录为提示。
///
/// 含子元素时，元素之间的纯空白文本视为排版并丢弃；叶子元素的空白文本原样保留。
fn finish_element(mut element: Element, scopes: &[Vec<(String, String)>]) -> Element {
    if element.first_child_element().is_some() {
        element
            .children_mut()
            .retain(|node| !matches!(node, Node::Text(text) if text.trim().is_empty()));
        return element;
    }
    let text = element.trimmed_text();
    if let Some((prefix, local)) = text.split_once(':') {
        let looks_like_qname = !prefix.is_empty()
            && !local.is_empty()
            && !local.contains(':')
            && !prefix.contains(char::is_whitespace)
            && !local.contains(char::is_whitespace)
            && !prefix.contains('/');
        if looks_like_qname
            && !element.namespace_hints().iter().any(|(p, _)| p == prefix)
            && let Some(namespace) = lookup(prefix, scopes)
        {
            let namespace = namespace.to_owned();
            element.declare_namespace(prefix, namespace);
        }
    }
    element
}

fn attach(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<(), CodecError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push_element(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(CodecError::MalformedXml(
            "document has more than one root element".to_owned(),
        )),
    }
}

fn push_text(stack: &mut [Element], text: &str) -> Result<(), CodecError> {
    match stack.last_mut() {
        Some(parent) => {
            // 相邻文本（例如 CDATA 与普通文本）合并为一个节点。
            if let Some(Node::Text(existing)) = parent.children_mut().last_mut() {
                existing.push_str(text);
            } else {
                parent.push(Node::Text(text.to_owned()));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(CodecError::MalformedXml(
            "text outside of the root element".to_owned(),
        )),
    }
}

fn resolve(
    raw: &str,
    is_element: bool,
    scopes: &[Vec<(String, String)>],
) -> Result<QName, CodecError> {
    match raw.split_once(':') {
        Some(("xmlns", local)) => Ok(QName::new(XMLNS_NS, local)),
        Some((prefix, local)) => {
            let namespace = lookup(prefix, scopes).ok_or_else(|| {
                CodecError::MalformedXml(format!("prefix `{prefix}` is not bound"))
            })?;
            Ok(QName::with_prefix(namespace, local, prefix))
        }
        None if is_element => {
            let namespace = lookup("", scopes).unwrap_or_default();
            if namespace.is_empty() {
                Ok(QName::local_only(raw))
            } else {
                Ok(QName::with_prefix(namespace, raw, ""))
            }
        }
        None => Ok(QName::local_only(raw)),
    }
}

fn lookup<'s>(prefix: &str, scopes: &'s [Vec<(String, String)>]) -> Option<&'s str> {
    if prefix == "xml" {
        return Some(XML_NS);
    }
    scopes
        .iter()
        .rev()
        .flat_map(|scope| scope.iter().rev())
        .find(|(p, _)| p == prefix)
        .map(|(_, ns)| ns.as_str())
}

fn utf8(raw: &[u8]) -> Result<&str, CodecError> {
    std::str::from_utf8(raw).map_err(|err| CodecError::MalformedXml(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_reads_namespaced_tree() {
        let element = Element::ns("urn:a", "root", "a")
            .with_attribute(QName::with_prefix("urn:b", "flag", "b"), "1")
            .with_child(Element::ns("urn:a", "child", "a").with_text("x < y & z"))
            .with_child(Element::new(QName::local_only("plain")).with_text("p"));
        let text = element_to_string(&element);
        assert!(text.starts_with("<a:root xmlns:a=\"urn:a\" xmlns:b=\"urn:b\" b:flag=\"1\">"));
        let parsed = parse_document(text.as_bytes()).expect("解析");
        assert_eq!(parsed, element);
    }

    #[test]
    fn default_namespace_and_prefix_conflicts_are_resolved() {
        let text = r#"<root xmlns="urn:d"><p:x xmlns:p="urn:p1"><p:y xmlns:p="urn:p2"/></p:x></root>"#;
        let parsed = parse_document(text.as_bytes()).expect("解析");
        assert!(parsed.name().is("urn:d", "root"));
        let x = parsed.first_child_element().expect("x");
        assert!(x.name().is("urn:p1", "x"));
        let y = x.first_child_element().expect("y");
        assert!(y.name().is("urn:p2", "y"));

        let again = parse_document(element_to_string(&parsed).as_bytes()).expect("重新解析");
        assert_eq!(again, parsed);
    }

    #[test]
    fn qname_text_keeps_binding_from_ancestor() {
        let text = r#"<e:Fault xmlns:e="urn:env" xmlns:w="urn:wsa"><code>w:InvalidAddress</code></e:Fault>"#;
        let parsed = parse_document(text.as_bytes()).expect("解析");
        let code = parsed.first_child("", "code").expect("code");
        assert!(code.resolve_qname_text(&code.text()).is("urn:wsa", "InvalidAddress"));
    }

    #[test]
    fn rejects_doctype_and_unbound_prefixes() {
        assert!(parse_document(b"<!DOCTYPE x><x/>").is_err());
        assert!(matches!(
            parse_document(b"<p:x/>"),
            Err(CodecError::MalformedXml(_))
        ));
    }

    #[test]
    fn leaf_whitespace_survives_while_indentation_is_dropped() {
        let text = "<a:root xmlns:a=\"urn:a\">\n  <a:say>   </a:say>\n  <a:empty/>\n</a:root>";
        let parsed = parse_document(text.as_bytes()).expect("解析");
        assert_eq!(parsed.children().len(), 2, "元素之间的缩进不成为节点");
        let say = parsed.first_child("urn:a", "say").expect("say");
        assert_eq!(say.children(), &[Node::Text("   ".to_owned())]);

        let leaf = Element::ns("urn:t", "say", "t").with_text("   ");
        let again = parse_document(element_to_string(&leaf).as_bytes()).expect("重新解析");
        assert_eq!(again, leaf);
    }

    #[test]
    fn inline_binary_is_base64_text() {
        let element = Element::new(QName::local_only("data"))
            .with_binary(BinaryData::new(vec![0u8, 1, 2]));
        assert_eq!(element_to_string(&element), "<data>AAEC</data>");
    }
}
