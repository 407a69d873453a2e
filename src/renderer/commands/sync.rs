//! 命令列表完成与新工作到达的同步信号
//!
//! 两个信号互相独立，各自持有一把锁和一个条件变量：
//!
//! - [`CompletionSignal`]：消费者在某个命令列表真正执行完毕后发出，
//!   生产者可以等待特定的列表完成（回读等同步操作依赖它）
//! - [`NotificationSignal`]：每次有新命令列表入队时广播，用于低延迟地唤醒辅助等待者
//!
//! 所有等待都会观察关闭标志，关闭后立即返回，不会在拆除阶段永久阻塞。

use parking_lot::{Condvar, Mutex};
use std::collections::BTreeSet;

/// Fence 值
///
/// 通道为每个入队的命令列表分配的单调递增提交序号，从 1 开始。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    /// 创建新的Fence值
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// 获取内部值
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个Fence值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

struct CompletionInner {
    /// 该值及之前的所有列表都已完成
    watermark: FenceValue,
    /// 超前于水位线完成的列表（多个消费者时可能乱序完成）
    ahead: BTreeSet<FenceValue>,
    closed: bool,
}

/// 命令列表完成信号（单写者、多等待者）
pub struct CompletionSignal {
    inner: Mutex<CompletionInner>,
    cond: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CompletionInner {
                watermark: FenceValue::default(),
                ahead: BTreeSet::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// 标记列表 `value` 已执行完毕并唤醒所有等待者
    pub fn signal(&self, value: FenceValue) {
        let mut inner = self.inner.lock();
        if value > inner.watermark {
            inner.ahead.insert(value);
            loop {
                let next = inner.watermark.next();
                if !inner.ahead.remove(&next) {
                    break;
                }
                inner.watermark = next;
            }
            if inner.closed {
                inner.ahead.clear();
            }
        }
        drop(inner);
        self.cond.notify_all();
    }

    /// 检查列表 `value` 是否已完成
    pub fn is_completed(&self, value: FenceValue) -> bool {
        let inner = self.inner.lock();
        Self::completed_locked(&inner, value)
    }

    /// 所有列表都已完成的最高序号
    pub fn completed_value(&self) -> FenceValue {
        self.inner.lock().watermark
    }

    /// 阻塞直到列表 `value` 完成
    ///
    /// 返回 `false` 表示在完成之前信号已被关闭。
    pub fn wait(&self, value: FenceValue) -> bool {
        let mut inner = self.inner.lock();
        loop {
            if Self::completed_locked(&inner, value) {
                return true;
            }
            if inner.closed {
                return false;
            }
            self.cond.wait(&mut inner);
        }
    }

    /// 关闭信号，唤醒所有等待者
    ///
    /// 关闭后只有水位线以内的列表算作完成，超前完成的记录被丢弃
    /// （水位线之前有列表在关闭时被取出但不会再执行）。
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.ahead.clear();
        drop(inner);
        self.cond.notify_all();
    }

    fn completed_locked(inner: &CompletionInner, value: FenceValue) -> bool {
        value <= inner.watermark || inner.ahead.contains(&value)
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

struct NotificationInner {
    generation: u64,
    closed: bool,
}

/// 新工作到达的广播信号
///
/// 与命令队列自身的阻塞 `pop` 分开，等待者只关心“有新东西来了”，
/// 不会从队列中取走任何命令列表。
pub struct NotificationSignal {
    inner: Mutex<NotificationInner>,
    cond: Condvar,
}

impl NotificationSignal {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(NotificationInner {
                generation: 0,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// 当前代数，每次 `notify` 加一
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn notify(&self) {
        self.inner.lock().generation += 1;
        self.cond.notify_all();
    }

    /// 阻塞直到代数不同于 `seen`
    ///
    /// 返回新的代数；信号关闭时返回 `None`。
    pub fn wait_for_change(&self, seen: u64) -> Option<u64> {
        let mut inner = self.inner.lock();
        loop {
            if inner.generation != seen {
                return Some(inner.generation);
            }
            if inner.closed {
                return None;
            }
            self.cond.wait(&mut inner);
        }
    }

    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.cond.notify_all();
    }
}

impl Default for NotificationSignal {
    fn default() -> Self {
        Self::new()
    }
}
