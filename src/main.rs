//! gxm_render - 渲染后端演示程序
//!
//! 选择一个可用的后端，模拟一个标题的启动、几帧命令提交和关闭，
//! 并把最后一帧保存为 PNG。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 强制使用无头后端，分辨率放大两倍
//! cargo run -- --headless --res-multiplier 2
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

use gxm_render::core::config::GraphicsBackend;
use gxm_render::core::{log, Config};
use gxm_render::renderer::{
    self, executor, Command, CommandList, DisplayState, GpuState, GuestAddress, GuestMemory, Vec2, VecGuestMemory,
};

const GUEST_MEMORY_SIZE: usize = 16 << 20;
const TITLE_ID: &str = "PCSE00000";
const SELF_NAME: &str = "eboot.bin";
const SCREEN_WIDTH: u32 = 960;
const SCREEN_HEIGHT: u32 = 544;
const FRAMES: u32 = 8;

fn main() -> Result<()> {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");
    config.apply_args(std::env::args());
    config.validate().context("invalid configuration")?;

    // 2. 初始化日志系统
    let log_file = config
        .paths
        .root_paths()
        .get_log_path()
        .join(&config.logging.log_file);
    let log_file = log_file.to_string_lossy();
    log::init_logger(
        config.logging.level,
        config.logging.file_output,
        config.logging.file_output.then_some(&*log_file),
    );
    info!(version = env!("CARGO_PKG_VERSION"), "gxm_render starting");

    // 3. 选择后端
    let root_paths = config.paths.root_paths();
    let mut backend = renderer::init_with_fallback(config.graphics.backend, &[GraphicsBackend::Headless], &root_paths)
        .context("no render backend available")?;

    let guest_memory: Arc<dyn GuestMemory> = Arc::new(VecGuestMemory::new(GUEST_MEMORY_SIZE));
    backend.late_init(&config, TITLE_ID, Arc::clone(&guest_memory));
    backend.game_start("/ux0/app/PCSE00000", TITLE_ID, SELF_NAME);

    info!(
        gpu = backend.get_gpu_name(),
        features_mask = %format!("{:#x}", backend.get_features_mask()),
        max_texture_width = backend.get_max_2d_texture_width(),
        "Backend ready"
    );

    // 4. 模拟线程提交命令，渲染线程执行
    let channel = backend.state().channel();
    let frame_buffer = GuestAddress(0x0010_0000);

    thread::scope(|scope| -> Result<()> {
        let producer = thread::Builder::new()
            .name("emulator".to_string())
            .spawn_scoped(scope, || -> Result<()> {
                channel
                    .push(
                        CommandList::new()
                            .with(Command::CreateContext)
                            .with(Command::MemoryMap { address: frame_buffer, size: SCREEN_WIDTH * SCREEN_HEIGHT * 4 })
                            .with(Command::CreateRenderTarget { id: 0, width: SCREEN_WIDTH, height: SCREEN_HEIGHT })
                            .with(Command::UseProgram {
                                source: b"void main() { o_color = u_color; }".to_vec(),
                                state: b"blend=over".to_vec(),
                            }),
                    )?;

                for frame in 0..FRAMES {
                    let shade = (frame * 255 / FRAMES) as u8;
                    let id = channel
                        .push(
                            CommandList::new()
                                .with(Command::Clear { target: 0, color: renderer::types::pack_rgba(shade, 32, 96, 255) })
                                .with(Command::FillRect {
                                    target: 0,
                                    x: 64 + frame * 16,
                                    y: 64,
                                    width: 256,
                                    height: 160,
                                    color: renderer::types::pack_rgba(255, 200, 0, 160),
                                    blend: true,
                                }),
                        )?;
                    channel.wait_for_completion(id);
                }

                channel.push(CommandList::new().with(Command::MemoryUnmap { address: frame_buffer }))?;
                channel.flush();
                channel.shutdown();
                Ok(())
            })?;

        let processed = executor::process_batches(backend.as_mut(), guest_memory.as_ref());
        info!(processed, "Render thread finished");

        producer
            .join()
            .map_err(|_| anyhow::anyhow!("emulator thread panicked"))?
    })?;

    // 5. 显示最后一帧并保存
    let display = DisplayState {
        base: frame_buffer,
        pitch: SCREEN_WIDTH,
        width: SCREEN_WIDTH,
        height: SCREEN_HEIGHT,
        frame_count: u64::from(FRAMES),
    };
    let gpu = GpuState { color_surface: Some(0) };
    let viewport = Vec2::new(SCREEN_WIDTH as f32, SCREEN_HEIGHT as f32);
    backend.render_frame(&Vec2::default(), &viewport, &display, &gpu, guest_memory.as_ref());

    match backend.dump_frame(&display) {
        Some(frame) => {
            frame.save_png("frame.png").context("failed to save frame")?;
            info!(width = frame.width, height = frame.height, "Saved frame.png");
        }
        None => warn!("No frame was rendered"),
    }

    let cache = backend.state().shader_cache();
    info!(
        compiled = cache.shaders_count_compiled(),
        precompiled = cache.programs_count_pre_compiled(),
        "Shader cache statistics"
    );

    // 6. 关闭
    backend.preclose_action();
    info!("gxm_render exiting");
    Ok(())
}
