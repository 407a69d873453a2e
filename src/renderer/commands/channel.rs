//! 生产者与消费者之间的命令通道
//!
//! 有界 FIFO 队列：队列满时 `push` 阻塞（反压，不丢弃也不重排），
//! 队列空时 `pop` 阻塞。提交序号在持锁期间分配，因此序号顺序就是执行顺序。
//!
//! 关闭是协作式的：生产者停止推送并调用 [`CommandChannel::shutdown`]，
//! 消费者继续取出剩余的列表，取空之后 `pop` 返回 `None`。

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;

use super::command::CommandList;
use super::sync::{CompletionSignal, FenceValue, NotificationSignal};

/// 默认允许挂起的命令列表数量
pub const DEFAULT_MAX_PENDING_LISTS: usize = 30;

/// 通道已关闭，原样退回未入队的命令列表
pub struct ChannelClosed(pub CommandList);

impl fmt::Debug for ChannelClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelClosed({} commands)", self.0.len())
    }
}

impl fmt::Display for ChannelClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command channel is shut down")
    }
}

impl std::error::Error for ChannelClosed {}

struct QueueInner {
    lists: VecDeque<CommandList>,
    max_pending: usize,
    last_id: FenceValue,
    closed: bool,
}

/// 命令通道
pub struct CommandChannel {
    queue: Mutex<QueueInner>,
    not_empty: Condvar,
    not_full: Condvar,
    completion: CompletionSignal,
    notification: NotificationSignal,
}

impl CommandChannel {
    /// 创建新的通道，`max_pending` 为 0 时视为 1
    pub fn new(max_pending: usize) -> Self {
        Self {
            queue: Mutex::new(QueueInner {
                lists: VecDeque::new(),
                max_pending: max_pending.max(1),
                last_id: FenceValue::default(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            completion: CompletionSignal::new(),
            notification: NotificationSignal::new(),
        }
    }

    /// 调整容量；正在阻塞的生产者会重新检查
    pub fn set_max_pending(&self, max_pending: usize) {
        self.queue.lock().max_pending = max_pending.max(1);
        self.not_full.notify_all();
    }

    pub fn max_pending(&self) -> usize {
        self.queue.lock().max_pending
    }

    /// 入队一个命令列表，返回其提交序号
    ///
    /// 队列满时阻塞；通道关闭后返回 [`ChannelClosed`]。
    pub fn push(&self, mut list: CommandList) -> Result<FenceValue, ChannelClosed> {
        let mut queue = self.queue.lock();
        while !queue.closed && queue.lists.len() >= queue.max_pending {
            self.not_full.wait(&mut queue);
        }
        if queue.closed {
            return Err(ChannelClosed(list));
        }

        let id = queue.last_id.next();
        queue.last_id = id;
        list.assign_id(id);
        queue.lists.push_back(list);
        drop(queue);

        self.not_empty.notify_one();
        self.notification.notify();
        Ok(id)
    }

    /// 出队下一个命令列表
    ///
    /// 队列空时阻塞；关闭且取空后返回 `None`。
    pub fn pop(&self) -> Option<CommandList> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(list) = queue.lists.pop_front() {
                drop(queue);
                self.not_full.notify_one();
                return Some(list);
            }
            if queue.closed {
                return None;
            }
            self.not_empty.wait(&mut queue);
        }
    }

    /// 非阻塞出队
    pub fn try_pop(&self) -> Option<CommandList> {
        let list = self.queue.lock().lists.pop_front();
        if list.is_some() {
            self.not_full.notify_one();
        }
        list
    }

    /// 依次取出当前所有挂起的列表
    pub fn drain<F: FnMut(CommandList)>(&self, mut f: F) -> usize {
        let mut count = 0;
        while let Some(list) = self.try_pop() {
            f(list);
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.queue.lock().lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 已分配的最后一个提交序号
    pub fn submitted(&self) -> FenceValue {
        self.queue.lock().last_id
    }

    /// 生产者等待列表 `id` 在主机上执行完毕
    pub fn wait_for_completion(&self, id: FenceValue) -> bool {
        self.completion.wait(id)
    }

    /// 等待所有已提交的列表完成
    pub fn flush(&self) -> bool {
        let last = self.submitted();
        last == FenceValue::default() || self.completion.wait(last)
    }

    pub fn completion(&self) -> &CompletionSignal {
        &self.completion
    }

    pub fn notification(&self) -> &NotificationSignal {
        &self.notification
    }

    pub fn is_shut_down(&self) -> bool {
        self.queue.lock().closed
    }

    /// 关闭通道并唤醒所有等待者（包括两个信号上的等待者）
    pub fn shutdown(&self) {
        self.queue.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.completion.close();
        self.notification.close();
    }
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_LISTS)
    }
}
