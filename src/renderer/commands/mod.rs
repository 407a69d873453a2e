//! 渲染命令和同步模块
//!
//! 包含生产者与消费者之间命令交接相关的所有类型：
//! - 命令列表
//! - 有界 FIFO 命令通道
//! - 完成信号与新工作通知信号

pub mod channel;
pub mod command;
pub mod sync;

// 重新导出常用类型
pub use channel::{ChannelClosed, CommandChannel, DEFAULT_MAX_PENDING_LISTS};
pub use command::{Command, CommandList};
pub use sync::{CompletionSignal, FenceValue, NotificationSignal};
