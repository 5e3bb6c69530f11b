use std::borrow::Cow;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use crate::error::{Result, SoapError};

type Factory<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

/// `ResourcePool` 为“构造昂贵、非线程安全”的资源（管线克隆、编解码器副本）提供自由链表复用。
///
/// # 模块角色（Why）
/// - 每个并发交换都必须独占一份管线克隆与编解码器副本；逐次构造会把深复制成本放进热路径；
/// - 租借守卫 [`Pooled`] 在 `Drop` 时自动归还，调用方无需关注回收细节。
///
/// # 核心机制（How）
/// - 内部维护 `spin::Mutex<Vec<T>>` 作为自由链表，租借时优先弹出空闲实例，为空时调用工厂新建；
/// - 归还时若池已释放或空闲数达到 `capacity`，实例被直接丢弃；
/// - 原子计数跟踪新建、丢弃与在借数量，支撑 [`statistics`](Self::statistics) 快照。
///
/// # 契约说明（What）
/// - **线程安全**：池本身 `Send + Sync`，每个被租借的实例同一时刻只归一个持有者；
/// - **释放语义**：[`dispose`](Self::dispose) 之后的租借返回 [`SoapError::ShutDown`]，已借出的实例在归还时被丢弃；
/// - **工厂失败**：工厂错误原样返回调用方，不影响池状态。
///
/// # 设计权衡（Trade-offs）
/// - 使用自旋锁而非阻塞锁：临界区只有一次 `push`/`pop`；
/// - 不限制在借总数，只限制空闲保留数，突发并发下会临时新建实例。
pub struct ResourcePool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner<T> {
    name: Cow<'static, str>,
    free_list: Mutex<Vec<T>>,
    factory: Factory<T>,
    capacity: usize,
    shut_down: AtomicBool,
    metrics: PoolMetrics,
}

#[derive(Default)]
struct PoolMetrics {
    created: AtomicUsize,
    discarded: AtomicUsize,
    active_leases: AtomicUsize,
}

/// 资源池统计快照。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub created: usize,
    pub idle: usize,
    pub active_leases: usize,
    pub discarded: usize,
}

impl<T: Send + 'static> ResourcePool<T> {
    /// 创建资源池；`capacity` 为最多保留的空闲实例数。
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        capacity: usize,
        factory: impl Fn() -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                free_list: Mutex::new(Vec::new()),
                factory: Box::new(factory),
                capacity,
                shut_down: AtomicBool::new(false),
                metrics: PoolMetrics::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 租借一个实例。
    pub fn take(&self) -> Result<Pooled<T>> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(SoapError::ShutDown(self.inner.name.clone()));
        }
        let reused = self.inner.free_list.lock().pop();
        let value = match reused {
            Some(value) => value,
            None => {
                let value = (self.inner.factory)()?;
                self.inner.metrics.created.fetch_add(1, Ordering::Relaxed);
                value
            }
        };
        self.inner
            .metrics
            .active_leases
            .fetch_add(1, Ordering::Relaxed);
        Ok(Pooled {
            value: Some(value),
            pool: Arc::clone(&self.inner),
        })
    }

    /// 释放资源池：清空空闲实例，此后租借失败。重复调用为空操作。
    pub fn dispose(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<T> = std::mem::take(&mut *self.inner.free_list.lock());
        self.inner
            .metrics
            .discarded
            .fetch_add(drained.len(), Ordering::Relaxed);
        tracing::debug!(pool = %self.inner.name, released = drained.len(), "resource pool disposed");
        drop(drained);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    pub fn statistics(&self) -> PoolStats {
        PoolStats {
            created: self.inner.metrics.created.load(Ordering::Relaxed),
            idle: self.inner.free_list.lock().len(),
            active_leases: self.inner.metrics.active_leases.load(Ordering::Relaxed),
            discarded: self.inner.metrics.discarded.load(Ordering::Relaxed),
        }
    }
}

impl<T> PoolInner<T> {
    fn recycle(&self, value: T) {
        self.metrics.active_leases.fetch_sub(1, Ordering::Relaxed);
        if self.shut_down.load(Ordering::Acquire) {
            self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let rejected = {
            let mut list = self.free_list.lock();
            if list.len() < self.capacity {
                list.push(value);
                None
            } else {
                Some(value)
            }
        };
        if rejected.is_some() {
            self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<T: Send + 'static> fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("stats", &self.statistics())
            .finish()
    }
}

/// 租借守卫，析构时归还实例。
pub struct Pooled<T: Send + 'static> {
    value: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Pooled<T> {
    /// 脱离资源池并取得所有权；实例不会再被归还。
    pub fn detach(mut self) -> Option<T> {
        self.pool
            .metrics
            .active_leases
            .fetch_sub(1, Ordering::Relaxed);
        self.value.take()
    }
}

impl<T: Send + 'static> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("pooled value is only taken on detach or drop"),
        }
    }
}

impl<T: Send + 'static> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("pooled value is only taken on detach or drop"),
        }
    }
}

impl<T: Send + 'static> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.recycle(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_pool(capacity: usize) -> ResourcePool<Vec<u8>> {
        ResourcePool::new("test", capacity, || Ok(Vec::with_capacity(8)))
    }

    #[test]
    fn returned_instances_are_reused() {
        let pool = counting_pool(2);
        {
            let mut lease = pool.take().expect("租借");
            lease.push(1);
        }
        let lease = pool.take().expect("再次租借");
        assert_eq!(lease.as_slice(), &[1]);
        assert_eq!(pool.statistics().created, 1);
    }

    #[test]
    fn idle_instances_beyond_capacity_are_discarded() {
        let pool = counting_pool(1);
        let first = pool.take().expect("租借");
        let second = pool.take().expect("租借");
        drop(first);
        drop(second);
        let stats = pool.statistics();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.active_leases, 0);
    }

    #[test]
    fn disposed_pool_reports_shut_down() {
        let pool = counting_pool(1);
        let lease = pool.take().expect("租借");
        pool.dispose();
        assert!(matches!(pool.take(), Err(err) if err.is_shut_down()));
        drop(lease);
        assert_eq!(pool.statistics().idle, 0);
    }

    #[test]
    fn factory_errors_propagate() {
        let pool: ResourcePool<u8> =
            ResourcePool::new("broken", 1, || Err(SoapError::Configuration("no".into())));
        assert!(matches!(pool.take(), Err(SoapError::Configuration(_))));
        assert_eq!(pool.statistics().active_leases, 0);
    }
}
