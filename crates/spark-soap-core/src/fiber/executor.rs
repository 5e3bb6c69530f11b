use std::sync::Arc;

use parking_lot::Mutex;

/// 交给执行器的任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 外部提供的任务执行器。
///
/// 核心不内置线程池：Engine 只在异步启动与恢复时把后续执行段交给执行器，同步调用始终在调用线程上完成。
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// 在提交线程上立即执行。
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// 每个任务一个命名线程；线程创建失败时退回提交线程执行。
#[derive(Clone, Debug)]
pub struct ThreadPerTaskExecutor {
    thread_name: String,
}

impl ThreadPerTaskExecutor {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
        }
    }
}

impl Default for ThreadPerTaskExecutor {
    fn default() -> Self {
        Self::new("spark-soap-fiber")
    }
}

impl Executor for ThreadPerTaskExecutor {
    fn execute(&self, task: Task) {
        let slot = Arc::new(Mutex::new(Some(task)));
        let remote = Arc::clone(&slot);
        let spawned = std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                if let Some(task) = remote.lock().take() {
                    task();
                }
            });
        if let Err(error) = spawned {
            tracing::warn!(
                thread = %self.thread_name,
                %error,
                "failed to spawn executor thread; running task inline"
            );
            if let Some(task) = slot.lock().take() {
                task();
            }
        }
    }
}
