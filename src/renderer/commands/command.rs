//! 命令列表
//!
//! 生产者（客户机 GPU 命令编码器）把一批 GPU 操作打包成 [`CommandList`]，
//! 入队时所有权转移给通道，出队时再转移给消费者，任何时刻只有一个所有者。

use super::sync::FenceValue;
use crate::renderer::guest::GuestAddress;

/// 单条 GPU 操作
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 创建主机渲染上下文
    CreateContext,

    /// 销毁主机渲染上下文
    DestroyContext,

    /// 创建渲染目标（客户机尺寸，后端按分辨率倍数放大）
    CreateRenderTarget { id: u32, width: u32, height: u32 },

    /// 销毁渲染目标
    DestroyRenderTarget { id: u32 },

    /// 将客户机内存区域映射到主机 GPU
    MemoryMap { address: GuestAddress, size: u32 },

    /// 解除映射
    MemoryUnmap { address: GuestAddress },

    /// 绑定着色器程序；`state` 是影响生成着色器文本的 GPU 状态
    UseProgram { source: Vec<u8>, state: Vec<u8> },

    /// 用一个颜色清空渲染目标（RGBA8 打包）
    Clear { target: u32, color: u32 },

    /// 在渲染目标上填充矩形；`blend` 为真时需要读取帧缓冲（可编程混合）
    FillRect {
        target: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        color: u32,
        blend: bool,
    },

    /// 空操作，只用于同步
    Nop,
}

impl Command {
    /// 日志中使用的命令名
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateContext => "create_context",
            Command::DestroyContext => "destroy_context",
            Command::CreateRenderTarget { .. } => "create_render_target",
            Command::DestroyRenderTarget { .. } => "destroy_render_target",
            Command::MemoryMap { .. } => "memory_map",
            Command::MemoryUnmap { .. } => "memory_unmap",
            Command::UseProgram { .. } => "use_program",
            Command::Clear { .. } => "clear",
            Command::FillRect { .. } => "fill_rect",
            Command::Nop => "nop",
        }
    }
}

/// 作为一个整体提交的有序命令批次
#[derive(Debug, Clone, Default)]
pub struct CommandList {
    id: Option<FenceValue>,
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条命令（建造者风格）
    pub fn with(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// 通道分配的提交序号，入队前为 `None`
    pub fn id(&self) -> Option<FenceValue> {
        self.id
    }

    pub(crate) fn assign_id(&mut self, id: FenceValue) {
        self.id = Some(id);
    }
}

impl From<Vec<Command>> for CommandList {
    fn from(commands: Vec<Command>) -> Self {
        Self { id: None, commands }
    }
}
