use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::Fiber;
use super::executor::{Executor, Task};
use crate::version::SoapVersion;

/// Engine 所在的一侧，决定内部故障如何越过 Engine 边界。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineRole {
    /// 客户端：内部故障以 `Err` 交还调用方。
    Client,
    /// 服务端：内部故障转换为给定版本的 `Receiver` Fault 报文，Fiber 正常完成。
    Server(SoapVersion),
}

/// Fiber 工厂。
///
/// 可廉价克隆，所有克隆共享同一个 Fiber 计数器与执行器。
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    name: String,
    role: EngineRole,
    executor: Option<Arc<dyn Executor>>,
    next_fiber: AtomicU64,
}

impl Engine {
    fn with_role(name: String, role: EngineRole, executor: Option<Arc<dyn Executor>>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                name,
                role,
                executor,
                next_fiber: AtomicU64::new(1),
            }),
        }
    }

    pub fn client(name: impl Into<String>) -> Self {
        Self::with_role(name.into(), EngineRole::Client, None)
    }

    pub fn server(name: impl Into<String>, version: SoapVersion) -> Self {
        Self::with_role(name.into(), EngineRole::Server(version), None)
    }

    /// 指定异步执行段使用的执行器；未指定时在启动或恢复线程上直接执行。
    pub fn with_executor(self, executor: Arc<dyn Executor>) -> Self {
        Self::with_role(self.inner.name.clone(), self.inner.role, Some(executor))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn role(&self) -> EngineRole {
        self.inner.role
    }

    pub fn create_fiber(&self) -> Fiber {
        let id = self.inner.next_fiber.fetch_add(1, Ordering::Relaxed);
        Fiber::new(self.clone(), id)
    }

    pub(crate) fn schedule(&self, task: Task) {
        match &self.inner.executor {
            Some(executor) => executor.execute(task),
            None => task(),
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.inner.name)
            .field("role", &self.inner.role)
            .field("has_executor", &self.inner.executor.is_some())
            .finish()
    }
}
