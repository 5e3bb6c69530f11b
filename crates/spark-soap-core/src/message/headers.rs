use crate::infoset::{Element, QName};

/// SOAP 头列表，保持线上的出现顺序。
///
/// 头部始终可访问，不受消息体“只读一次”语义约束。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeaderList {
    items: Vec<Element>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.items.iter()
    }

    pub fn add(&mut self, header: Element) {
        self.items.push(header);
    }

    /// 第一个匹配的头。
    pub fn get(&self, namespace: &str, local: &str) -> Option<&Element> {
        self.items.iter().find(|h| h.name().is(namespace, local))
    }

    /// 所有匹配的头。
    pub fn get_all<'a>(
        &'a self,
        namespace: &'a str,
        local: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.items
            .iter()
            .filter(move |h| h.name().is(namespace, local))
    }

    pub fn count(&self, name: &QName) -> usize {
        self.items.iter().filter(|h| h.name() == name).count()
    }

    /// 是否存在给定命名空间下的任意头。
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.items.iter().any(|h| h.name().namespace() == namespace)
    }

    /// 删除所有匹配的头，返回删除数量。
    pub fn remove(&mut self, namespace: &str, local: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|h| !h.name().is(namespace, local));
        before - self.items.len()
    }

    /// 删除并替换同名头。
    pub fn replace(&mut self, header: Element) {
        let name = header.name().clone();
        self.items.retain(|h| h.name() != &name);
        self.items.push(header);
    }

    pub fn into_vec(self) -> Vec<Element> {
        self.items
    }
}

impl From<Vec<Element>> for HeaderList {
    fn from(items: Vec<Element>) -> Self {
        Self { items }
    }
}

impl IntoIterator for HeaderList {
    type Item = Element;
    type IntoIter = std::vec::IntoIter<Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
