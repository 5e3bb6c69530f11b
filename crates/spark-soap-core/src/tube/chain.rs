use std::any::Any;
use std::fmt;

use parking_lot::Mutex;

use super::{Tube, TubeCloner, TubeId};
use crate::error::{Result, SoapError};

/// 主管线装配器。
///
/// 典型用法是自底向上装配：先加入终端节点，再加入持有其 [`TubeId`] 的上游节点。
/// 需要互相引用的节点先 [`reserve`](Self::reserve) 占位，待另一方加入后再 [`fill`](Self::fill)。
#[derive(Default)]
pub struct ChainBuilder {
    nodes: Vec<Option<Box<dyn Tube>>>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入节点并返回其索引。
    pub fn add(&mut self, tube: Box<dyn Tube>) -> TubeId {
        self.nodes.push(Some(tube));
        TubeId(self.nodes.len() - 1)
    }

    /// 预留一个尚未填充的槽位。
    pub fn reserve(&mut self) -> TubeId {
        self.nodes.push(None);
        TubeId(self.nodes.len() - 1)
    }

    /// 填充预留槽位。
    pub fn fill(&mut self, id: TubeId, tube: Box<dyn Tube>) -> Result<()> {
        match self.nodes.get_mut(id.0) {
            Some(slot @ None) => {
                *slot = Some(tube);
                Ok(())
            }
            Some(Some(_)) => Err(SoapError::IncompleteChain(format!(
                "slot {id} is already filled"
            ))),
            None => Err(SoapError::IncompleteChain(format!("slot {id} does not exist"))),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 以 `head` 为入口冻结为主管线；所有预留槽位都必须已填充。
    pub fn build(self, head: TubeId) -> Result<MasterChain> {
        if head.0 >= self.nodes.len() {
            return Err(SoapError::IncompleteChain(format!(
                "head {head} is outside of the chain"
            )));
        }
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for (index, slot) in self.nodes.into_iter().enumerate() {
            match slot {
                Some(tube) => nodes.push(tube),
                None => {
                    return Err(SoapError::IncompleteChain(format!(
                        "reserved slot #{index} was never filled"
                    )));
                }
            }
        }
        Ok(MasterChain {
            nodes: Mutex::new(nodes),
            head,
        })
    }
}

/// 装配期构建一次的主管线。
///
/// 主管线不提供执行入口，也不会被修改；每个并发交换通过 [`clone_chain`](Self::clone_chain)
/// 得到独立的 [`TubeChain`]。节点只要求 `Send`，复制时在内部锁下读取，使主管线可以跨线程共享。
pub struct MasterChain {
    nodes: Mutex<Vec<Box<dyn Tube>>>,
    head: TubeId,
}

impl MasterChain {
    pub fn head(&self) -> TubeId {
        self.head
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 复制出一条可执行管线。
    pub fn clone_chain(&self) -> Result<TubeChain> {
        let nodes = self.nodes.lock();
        TubeCloner::clone_nodes(&nodes, self.head)
    }
}

impl fmt::Debug for MasterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&'static str> = self.nodes.lock().iter().map(|t| t.name()).collect();
        f.debug_struct("MasterChain")
            .field("head", &self.head)
            .field("tubes", &names)
            .finish()
    }
}

/// 可执行的管线克隆，同一时刻只归一个 Fiber 使用。
pub struct TubeChain {
    nodes: Vec<Option<Box<dyn Tube>>>,
    head: TubeId,
    disposed: bool,
}

impl TubeChain {
    pub(crate) fn from_nodes(nodes: Vec<Option<Box<dyn Tube>>>, head: TubeId) -> Self {
        Self {
            nodes,
            head,
            disposed: false,
        }
    }

    pub fn head(&self) -> TubeId {
        self.head
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// 按具体类型读取节点；节点正被执行或类型不符时返回 `None`。
    pub fn tube<T: Tube>(&self, id: TubeId) -> Option<&T> {
        let tube: &dyn Tube = self.nodes.get(id.0)?.as_deref()?;
        let any: &dyn Any = tube;
        any.downcast_ref::<T>()
    }

    pub fn tube_mut<T: Tube>(&mut self, id: TubeId) -> Option<&mut T> {
        let tube: &mut dyn Tube = self.nodes.get_mut(id.0)?.as_deref_mut()?;
        let any: &mut dyn Any = tube;
        any.downcast_mut::<T>()
    }

    /// 节点名称列表，按索引排列。
    pub fn names(&self) -> Vec<&'static str> {
        self.nodes
            .iter()
            .map(|slot| slot.as_ref().map_or("<running>", |tube| tube.name()))
            .collect()
    }

    /// 执行期间暂时移出节点。
    pub(crate) fn take(&mut self, id: TubeId) -> Option<Box<dyn Tube>> {
        self.nodes.get_mut(id.0)?.take()
    }

    pub(crate) fn put_back(&mut self, id: TubeId, tube: Box<dyn Tube>) {
        if let Some(slot) = self.nodes.get_mut(id.0) {
            *slot = Some(tube);
        }
    }

    /// 释放管线：每个节点的 `pre_destroy` 恰好调用一次，重复调用为空操作。
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for tube in self.nodes.iter_mut().flatten() {
            tube.pre_destroy();
        }
        tracing::trace!(tubes = self.nodes.len(), "tube chain disposed");
    }
}

impl Drop for TubeChain {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for TubeChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TubeChain")
            .field("head", &self.head)
            .field("tubes", &self.names())
            .field("disposed", &self.disposed)
            .finish()
    }
}
