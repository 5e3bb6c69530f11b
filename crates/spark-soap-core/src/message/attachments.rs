use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// 随消息携带的二进制附件（SwA 部件或 MTOM 未被引用的部件）。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    content_id: String,
    content_type: String,
    data: Bytes,
}

impl Attachment {
    /// `content_id` 不带尖括号。
    pub fn new(
        content_id: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// 附件集合，按加入顺序保存。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSet {
    items: Vec<Attachment>,
}

impl AttachmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入附件；同一 content-id 后加入者覆盖先加入者。
    pub fn add(&mut self, attachment: Attachment) {
        self.items
            .retain(|existing| existing.content_id != attachment.content_id);
        self.items.push(attachment);
    }

    pub fn get(&self, content_id: &str) -> Option<&Attachment> {
        self.items.iter().find(|a| a.content_id == content_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attachment> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Attachment> {
        self.items
    }
}

impl From<Vec<Attachment>> for AttachmentSet {
    fn from(items: Vec<Attachment>) -> Self {
        let mut set = Self::new();
        for item in items {
            set.add(item);
        }
        set
    }
}
