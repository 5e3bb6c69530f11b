use std::collections::HashMap;

use super::{MasterChain, Tube, TubeChain, TubeId};
use crate::error::{Result, SoapError};

/// 管线深复制器。
///
/// # 教案式说明
/// - **意图（Why）**：表亲节点在复制后仍须互相指向对方的新实例；若按引用逐个复制，
///   共享节点会被复制多份，环会导致无限递归；
/// - **逻辑（How）**：单次深度优先遍历，维护“原索引 → 新索引”的身份表。[`copy`](Self::copy)
///   先在目标 Arena 预留槽位并登记身份，再递归调用原节点的 [`Tube::copy`]，
///   因此环上回到已登记节点时直接返回其新索引；
/// - **契约（What）**：头节点之外不可达的节点同样会被复制，保证克隆与主管线节点数一致；
///   节点引用了越界索引时复制失败并返回 [`SoapError::IncompleteChain`]。
pub struct TubeCloner<'a> {
    source: &'a [Box<dyn Tube>],
    target: Vec<Option<Box<dyn Tube>>>,
    identity: HashMap<TubeId, TubeId>,
    dangling: Vec<TubeId>,
}

impl<'a> TubeCloner<'a> {
    /// 复制主管线。
    pub fn clone_chain(master: &MasterChain) -> Result<TubeChain> {
        master.clone_chain()
    }

    pub(crate) fn clone_nodes(source: &'a [Box<dyn Tube>], head: TubeId) -> Result<TubeChain> {
        let mut cloner = Self {
            source,
            target: Vec::with_capacity(source.len()),
            identity: HashMap::with_capacity(source.len()),
            dangling: Vec::new(),
        };
        let new_head = cloner.copy(head);
        for index in 0..source.len() {
            cloner.copy(TubeId(index));
        }
        if let Some(first) = cloner.dangling.first() {
            return Err(SoapError::IncompleteChain(format!(
                "a tube references {first}, which is outside of the chain"
            )));
        }
        Ok(TubeChain::from_nodes(cloner.target, new_head))
    }

    /// 返回原节点在克隆中的索引，必要时先复制该节点。
    pub fn copy(&mut self, original: TubeId) -> TubeId {
        if let Some(&copied) = self.identity.get(&original) {
            return copied;
        }
        let source = self.source;
        let Some(tube) = source.get(original.0) else {
            self.dangling.push(original);
            return original;
        };
        let id = TubeId(self.target.len());
        self.target.push(None);
        self.identity.insert(original, id);
        let copy = tube.copy(self);
        self.target[id.0] = Some(copy);
        id
    }

    /// 查询已复制节点的新索引，不触发复制。
    pub fn copied(&self, original: TubeId) -> Option<TubeId> {
        self.identity.get(&original).copied()
    }
}
