//! 消费者侧的命令列表执行循环
//!
//! 按 FIFO 顺序取出命令列表，逐条交给后端执行，整个列表执行完毕后
//! 才在完成信号上发布它的序号。单条命令失败只记录日志，不会打乱后续列表的顺序。

use tracing::trace;

use super::backend_trait::RenderBackend;
use super::commands::CommandList;
use super::guest::GuestMemory;

/// 执行一个命令列表并发布完成信号
pub fn process_batch<B: RenderBackend + ?Sized>(
    backend: &mut B,
    list: CommandList,
    guest_memory: &dyn GuestMemory,
) {
    let channel = backend.state().channel();

    for command in list.commands() {
        if let Err(e) = backend.execute(command, guest_memory) {
            crate::renderer_error!(command = command.name(), "Command failed: {}", e);
        }
    }

    if let Some(id) = list.id() {
        trace!(id = id.value(), commands = list.len(), "Command list completed");
        channel.completion().signal(id);
    }
}

/// 消费者线程主循环
///
/// 一直阻塞取命令列表，直到通道关闭且取空。返回执行的列表数量。
pub fn process_batches<B: RenderBackend + ?Sized>(backend: &mut B, guest_memory: &dyn GuestMemory) -> usize {
    let channel = backend.state().channel();
    let mut processed = 0;

    while let Some(list) = channel.pop() {
        process_batch(backend, list, guest_memory);
        processed += 1;
    }

    crate::renderer_info!(processed, "Command channel drained, render loop exiting");
    processed
}

/// 非阻塞地执行当前所有挂起的列表（`dump_frame` 和 `preclose_action` 用）
pub fn drain_pending<B: RenderBackend + ?Sized>(backend: &mut B, guest_memory: &dyn GuestMemory) -> usize {
    let channel = backend.state().channel();
    let mut processed = 0;

    while let Some(list) = channel.try_pop() {
        process_batch(backend, list, guest_memory);
        processed += 1;
    }
    processed
}
