use std::sync::Arc;

use super::FiberHandle;

/// 包裹 Fiber 每个执行段的拦截器。
///
/// # 教案式说明
/// - **意图（Why）**：Fiber 可能在挂起后于另一个线程上恢复，依赖线程局部状态的协作者
///   （日志 MDC、安全上下文）需要在每次“上线程”时重新建立上下文；
/// - **逻辑（How）**：每个执行段（启动或恢复直到完成或下一次挂起）都会调用 `execute`，
///   实现者在调用 `work` 前后完成上下文的建立与撤销；
/// - **契约（What）**：
///   - 多个拦截器按注册顺序嵌套，先注册者在最外层；
///   - 实现必须恰好调用一次 `work`；未调用时该执行段以内部阶段故障结束。
pub trait FiberContextSwitchInterceptor: Send + Sync {
    fn execute(&self, fiber: &FiberHandle, work: &mut dyn FnMut());
}

pub(crate) fn run_intercepted(
    interceptors: &[Arc<dyn FiberContextSwitchInterceptor>],
    fiber: &FiberHandle,
    work: &mut dyn FnMut(),
) {
    match interceptors.split_first() {
        Some((outer, rest)) => {
            outer.execute(fiber, &mut || run_intercepted(rest, fiber, &mut *work));
        }
        None => work(),
    }
}
