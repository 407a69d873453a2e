//! 无头渲染器
//!
//! 在 CPU 上执行命令列表的参考后端。渲染目标是按分辨率倍数放大的 RGBA8 像素数组，
//! 可编程混合直接读取目标像素完成（对应三种主机模拟手段中选中的那一种）。
//! 它让后端契约、命令通道和着色器缓存在没有主机 GPU 的环境里也能完整运行。

use raw_window_handle::HasWindowHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::context::{HeadlessContext, HeadlessDeviceDesc};
use crate::core::config::Config;
use crate::core::error::{RendererError, Result};
use crate::gfx::HostDevice;
use crate::renderer::backend_trait::{default_game_start, BackendState, RenderBackend};
use crate::renderer::commands::Command;
use crate::renderer::executor;
use crate::renderer::features::ProgrammableBlending;
use crate::renderer::guest::{GuestAddress, GuestMemory};
use crate::renderer::shaders::ShaderHash;
use crate::renderer::types::{
    pack_rgba, unpack_rgba, DisplayState, Filter, FrameDump, GpuState, TextureCache, Vec2,
};

/// 渲染目标
#[derive(Debug, Clone)]
struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Surface {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    fn to_dump(&self) -> FrameDump {
        FrameDump {
            pixels: self.pixels.clone(),
            width: self.width,
            height: self.height,
        }
    }
}

/// 无头后端的纹理缓存句柄
#[derive(Debug, Default)]
pub struct HeadlessTextureCache {
    cached: usize,
    replacement: bool,
}

impl TextureCache for HeadlessTextureCache {
    fn cached_texture_count(&self) -> usize {
        self.cached
    }

    fn is_replacement_enabled(&self) -> bool {
        self.replacement
    }
}

/// 无头渲染器
pub struct HeadlessRenderer {
    state: BackendState,
    desc: HeadlessDeviceDesc,
    context: Option<HeadlessContext>,

    guest_contexts: u32,
    surfaces: HashMap<u32, Surface>,
    texture_cache: HeadlessTextureCache,
    current_program: Option<ShaderHash>,

    screen_filter: Filter,
    anisotropic_filtering: i32,
    /// `get_gpu_list()` 中的下标，0 为自动选择
    gpu_idx: usize,

    presented: Option<FrameDump>,
    last_viewport: (Vec2, Vec2),
    last_blending: Option<ProgrammableBlending>,
    frames_rendered: u64,
    frames_swapped: u64,
}

impl HeadlessRenderer {
    pub fn new(desc: HeadlessDeviceDesc) -> Self {
        Self {
            state: BackendState::new(),
            desc,
            context: None,
            guest_contexts: 0,
            surfaces: HashMap::new(),
            texture_cache: HeadlessTextureCache::default(),
            current_program: None,
            screen_filter: Filter::Bilinear,
            anisotropic_filtering: 1,
            gpu_idx: 0,
            presented: None,
            last_viewport: (Vec2::default(), Vec2::default()),
            last_blending: None,
            frames_rendered: 0,
            frames_swapped: 0,
        }
    }

    pub fn screen_filter(&self) -> Filter {
        self.screen_filter
    }

    pub fn anisotropic_filtering(&self) -> i32 {
        self.anisotropic_filtering
    }

    pub fn selected_gpu(&self) -> usize {
        self.gpu_idx
    }

    pub fn current_program(&self) -> Option<ShaderHash> {
        self.current_program
    }

    /// 最近一次可编程混合使用的模拟手段
    pub fn last_blending(&self) -> Option<ProgrammableBlending> {
        self.last_blending
    }

    pub fn last_viewport(&self) -> (Vec2, Vec2) {
        self.last_viewport
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn frames_swapped(&self) -> u64 {
        self.frames_swapped
    }

    /// 读取渲染目标的一个像素（放大后的坐标）
    pub fn surface_pixel(&self, id: u32, x: u32, y: u32) -> Option<u32> {
        let surface = self.surfaces.get(&id)?;
        if x >= surface.width || y >= surface.height {
            return None;
        }
        surface.pixels.get(y as usize * surface.width as usize + x as usize).copied()
    }

    /// 放大后的表面尺寸，至少为 1
    fn scaled(&self, value: u32) -> u32 {
        self.scaled_coord(value).max(1)
    }

    /// 放大后的坐标，可以为 0
    fn scaled_coord(&self, value: u32) -> u32 {
        (value as f32 * self.state.res_multiplier).round() as u32
    }

    fn surface_mut(&mut self, id: u32) -> Result<&mut Surface> {
        self.surfaces
            .get_mut(&id)
            .ok_or_else(|| RendererError::Runtime(format!("render target {} does not exist", id)))
    }

    fn use_program(&mut self, source: &[u8], gpu_state: &[u8]) {
        let features_mask = self.get_features_mask();
        let hash = ShaderHash::compute(source, features_mask, gpu_state);
        let cache = self.state.shader_cache();

        if !cache.contains(&hash) {
            cache.mark_compiled(hash);
            debug!(%hash, "Compiled shader");

            if !self.state.shaders_log_path.as_os_str().is_empty() {
                let text = format!(
                    "// blending: {:?}\n// features: {:#x}\n{}",
                    self.state.features.programmable_blending(),
                    features_mask,
                    String::from_utf8_lossy(source)
                );
                cache.log_shader(&self.state.shaders_log_path, &hash, &text);
            }
        }

        self.current_program = Some(hash);
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_rect(&mut self, target: u32, x: u32, y: u32, width: u32, height: u32, color: u32, blend: bool) -> Result<()> {
        let blending = if blend {
            let technique = self.state.features.programmable_blending();
            if technique == ProgrammableBlending::Unsupported {
                crate::renderer_warn!("Programmable blending is not supported by the host, drawing without blending");
            }
            self.last_blending = Some(technique);
            technique != ProgrammableBlending::Unsupported
        } else {
            false
        };

        let (x0, y0) = (self.scaled_coord(x), self.scaled_coord(y));
        let (x1, y1) = (
            self.scaled_coord(x.saturating_add(width)),
            self.scaled_coord(y.saturating_add(height)),
        );
        let surface = self.surface_mut(target)?;
        let (x1, y1) = (x1.min(surface.width), y1.min(surface.height));

        for row in y0.min(y1)..y1 {
            for col in x0.min(x1)..x1 {
                let index = row as usize * surface.width as usize + col as usize;
                surface.pixels[index] = if blending {
                    blend_over(color, surface.pixels[index])
                } else {
                    color
                };
            }
        }
        Ok(())
    }

    /// 从客户机内存读取显示帧缓冲
    fn read_display(&self, display: &DisplayState, guest_memory: &dyn GuestMemory) -> Option<Surface> {
        let Some(pitch_bytes) = display_pitch(display, guest_memory) else {
            let base = display.base;
            warn!(%base, "Display buffer is not readable");
            return None;
        };

        let row_bytes = display.width * 4;
        let mut surface = Surface::new(display.width, display.height);
        let mut row = vec![0u8; row_bytes as usize];
        for y in 0..display.height {
            let address = display.base.offset(y * pitch_bytes)?;
            guest_memory.read(address, &mut row).ok()?;
            let start = y as usize * display.width as usize;
            for (dst, chunk) in surface.pixels[start..start + display.width as usize]
                .iter_mut()
                .zip(row.chunks_exact(4))
            {
                *dst = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
        }
        Some(surface)
    }

    /// 表面同步：把渲染结果按客户机分辨率写回显示帧缓冲
    fn write_back(&self, surface: &Surface, display: &DisplayState, guest_memory: &dyn GuestMemory) {
        let Some(pitch_bytes) = display_pitch(display, guest_memory) else {
            let base = display.base;
            warn!(%base, "Display buffer is not writable, skipping surface sync");
            return;
        };

        let native = scale_nearest(surface, display.width, display.height);
        for y in 0..native.height {
            let Some(address) = display.base.offset(y * pitch_bytes) else {
                return;
            };
            let start = y as usize * native.width as usize;
            let row: &[u8] = bytemuck::cast_slice(&native.pixels[start..start + native.width as usize]);
            if let Err(e) = guest_memory.write(address, row) {
                warn!("Surface sync failed: {}", e);
                return;
            }
        }
    }
}

impl Drop for HeadlessRenderer {
    fn drop(&mut self) {
        // 拆除后任何等待都不能继续阻塞
        self.state.channel().shutdown();
    }
}

impl RenderBackend for HeadlessRenderer {
    fn state(&self) -> &BackendState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut BackendState {
        &mut self.state
    }

    fn init(&mut self) -> bool {
        match HeadlessContext::create(&self.desc) {
            Ok(context) => {
                self.state.features = context.query_features();
                info!(
                    blending = ?self.state.features.programmable_blending(),
                    "Headless backend initialized"
                );
                self.context = Some(context);
                true
            }
            Err(e) => {
                crate::renderer_error!("Failed to initialize headless backend: {}", e);
                false
            }
        }
    }

    fn late_init(&mut self, config: &Config, game_id: &str, guest_memory: Arc<dyn GuestMemory>) {
        self.state.bind_config(&config.graphics, guest_memory);
        self.set_screen_filter(&config.graphics.screen_filter);
        self.set_anisotropic_filtering(config.graphics.anisotropic_filtering);
        self.set_async_compilation(config.graphics.async_pipeline_compilation);
        self.gpu_idx = config.graphics.gpu_idx;
        if self.gpu_idx >= self.get_gpu_list().len() {
            warn!(gpu_idx = self.gpu_idx, "GPU index out of range, using automatic selection");
            self.gpu_idx = 0;
        }
        self.texture_cache.replacement = self.state.texture_folder().is_dir();

        info!(
            game_id,
            filter = %self.screen_filter,
            gpu_idx = self.gpu_idx,
            res_multiplier = self.state.res_multiplier,
            "Late init finished"
        );
    }

    fn game_start(&mut self, base_path: &str, title_id: &str, self_name: &str) {
        self.surfaces.clear();
        self.texture_cache.cached = 0;
        self.current_program = None;
        default_game_start(self, base_path, title_id, self_name);
    }

    fn get_texture_cache(&self) -> &dyn TextureCache {
        &self.texture_cache
    }

    fn render_frame(
        &mut self,
        viewport_pos: &Vec2,
        viewport_size: &Vec2,
        display: &DisplayState,
        gpu: &GpuState,
        guest_memory: &dyn GuestMemory,
    ) {
        self.frames_rendered += 1;
        self.last_viewport = (*viewport_pos, *viewport_size);

        let frame = match gpu.color_surface.and_then(|id| self.surfaces.get(&id)) {
            Some(surface) => {
                if !self.state.disable_surface_sync() {
                    self.write_back(surface, display, guest_memory);
                }
                surface.to_dump()
            }
            None => match self.read_display(display, guest_memory) {
                Some(native) => {
                    let upscaled = scale_nearest(&native, self.scaled(native.width), self.scaled(native.height));
                    upscaled.to_dump()
                }
                None => return,
            },
        };

        trace!(width = frame.width, height = frame.height, "Frame rendered");
        self.presented = Some(frame);
    }

    fn swap_window(&mut self, window: &dyn HasWindowHandle) {
        self.frames_swapped += 1;
        if window.window_handle().is_err() {
            trace!("No native window handle, presenting offscreen");
        }
    }

    fn dump_frame(&mut self, _display: &DisplayState) -> Option<FrameDump> {
        // 先把挂起的命令列表执行完，保证快照一致
        if let Some(guest_memory) = self.state.guest_memory() {
            executor::drain_pending(self, guest_memory.as_ref());
        }
        self.presented.clone()
    }

    fn get_features_mask(&self) -> u32 {
        self.state.features.shader_mask()
    }

    fn get_supported_filters(&self) -> u32 {
        Filter::Nearest.bit() | Filter::Bilinear.bit() | Filter::Fxaa.bit()
    }

    fn set_screen_filter(&mut self, filter: &str) {
        match Filter::from_name(filter) {
            Some(f) if self.get_supported_filters() & f.bit() != 0 => {
                self.screen_filter = f;
            }
            _ => {
                warn!(filter, current = %self.screen_filter, "Unsupported screen filter, keeping current");
            }
        }
    }

    fn get_max_anisotropic_filtering(&self) -> i32 {
        self.context
            .as_ref()
            .map_or(self.desc.max_anisotropy, |context| context.max_anisotropy())
    }

    fn set_anisotropic_filtering(&mut self, anisotropic_filtering: i32) {
        self.anisotropic_filtering = anisotropic_filtering.clamp(1, self.get_max_anisotropic_filtering().max(1));
    }

    fn get_max_2d_texture_width(&self) -> i32 {
        self.context
            .as_ref()
            .map_or(self.desc.max_texture_width, |context| context.max_2d_texture_width())
    }

    fn map_memory(&mut self, guest_memory: &dyn GuestMemory, address: GuestAddress, size: u32) -> bool {
        if !self.state.features.support_memory_mapping || !guest_memory.is_valid(address, size) {
            return false;
        }
        match self.state.mappings_mut().map(address, size) {
            Ok(()) => {
                trace!(%address, size, "Mapped guest memory");
                true
            }
            Err(e) => {
                warn!("Failed to map guest memory: {}", e);
                false
            }
        }
    }

    fn unmap_memory(&mut self, _guest_memory: &dyn GuestMemory, address: GuestAddress) {
        if let Err(e) = self.state.mappings_mut().unmap(address) {
            crate::renderer_error!("Rejected unmap: {}", e);
        }
    }

    fn get_gpu_list(&self) -> Vec<String> {
        vec!["Automatic".to_string(), self.desc.name.clone()]
    }

    fn get_gpu_name(&self) -> &str {
        self.context
            .as_ref()
            .map_or(self.desc.name.as_str(), |context| context.device_name())
    }

    fn precompile_shader(&mut self, hash: &ShaderHash) {
        if self.state.shader_cache().mark_precompiled(*hash) {
            trace!(%hash, "Precompiled shader");
        }
    }

    fn preclose_action(&mut self) {
        if let Some(guest_memory) = self.state.guest_memory() {
            let drained = executor::drain_pending(self, guest_memory.as_ref());
            debug!(drained, "Drained pending command lists before close");
        }

        if self.state.has_title() {
            let features_mask = self.get_features_mask();
            if let Err(e) = self.state.shader_cache().save(&self.state.shaders_path, features_mask) {
                warn!("Could not persist shader cache: {}", e);
            }
        }
    }

    fn execute(&mut self, command: &Command, guest_memory: &dyn GuestMemory) -> Result<()> {
        match command {
            Command::CreateContext => {
                self.guest_contexts += 1;
            }
            Command::DestroyContext => {
                if self.guest_contexts == 0 {
                    return Err(RendererError::Runtime("no context to destroy".to_string()));
                }
                self.guest_contexts -= 1;
            }
            Command::CreateRenderTarget { id, width, height } => {
                if self.surfaces.contains_key(id) {
                    return Err(RendererError::Runtime(format!("render target {} already exists", id)));
                }
                let (scaled_width, scaled_height) = (self.scaled(*width), self.scaled(*height));
                let limit = u32::try_from(self.get_max_2d_texture_width()).unwrap_or(0);
                if scaled_width > limit || scaled_height > limit {
                    return Err(RendererError::Runtime(format!(
                        "render target {} is {}x{}, device limit is {}",
                        id, scaled_width, scaled_height, limit
                    )));
                }
                self.surfaces.insert(*id, Surface::new(scaled_width, scaled_height));
                self.texture_cache.cached = self.surfaces.len();
            }
            Command::DestroyRenderTarget { id } => {
                if self.surfaces.remove(id).is_none() {
                    return Err(RendererError::Runtime(format!("render target {} does not exist", id)));
                }
                self.texture_cache.cached = self.surfaces.len();
            }
            Command::MemoryMap { address, size } => {
                if !self.map_memory(guest_memory, *address, *size) {
                    debug!(%address, size, "Memory mapping unavailable, using copy path");
                }
            }
            Command::MemoryUnmap { address } => {
                self.unmap_memory(guest_memory, *address);
            }
            Command::UseProgram { source, state } => {
                self.use_program(source, state);
            }
            Command::Clear { target, color } => {
                self.surface_mut(*target)?.pixels.fill(*color);
            }
            Command::FillRect { target, x, y, width, height, color, blend } => {
                self.fill_rect(*target, *x, *y, *width, *height, *color, *blend)?;
            }
            Command::Nop => {}
        }
        Ok(())
    }
}

/// 显示帧缓冲的行跨度（字节）
///
/// 区域为空、超出 32 位地址空间或不完全落在客户机内存中时返回 `None`。
fn display_pitch(display: &DisplayState, guest_memory: &dyn GuestMemory) -> Option<u32> {
    if display.width == 0 || display.height == 0 {
        return None;
    }
    let row_bytes = display.width.checked_mul(4)?;
    let pitch_bytes = display.pitch.max(display.width).checked_mul(4)?;
    let total = pitch_bytes
        .checked_mul(display.height - 1)?
        .checked_add(row_bytes)?;
    guest_memory.is_valid(display.base, total).then_some(pitch_bytes)
}

/// 源颜色按 alpha 覆盖到目标颜色上
fn blend_over(src: u32, dst: u32) -> u32 {
    let [sr, sg, sb, sa] = unpack_rgba(src);
    let [dr, dg, db, da] = unpack_rgba(dst);
    let a = u32::from(sa);
    let mix = |s: u8, d: u8| ((u32::from(s) * a + u32::from(d) * (255 - a)) / 255) as u8;
    let out_a = (a + u32::from(da) * (255 - a) / 255) as u8;
    pack_rgba(mix(sr, dr), mix(sg, dg), mix(sb, db), out_a)
}

/// 最近邻缩放
fn scale_nearest(surface: &Surface, width: u32, height: u32) -> Surface {
    if surface.width == width && surface.height == height {
        return surface.clone();
    }

    let mut scaled = Surface::new(width, height);
    if surface.width == 0 || surface.height == 0 {
        return scaled;
    }
    for y in 0..height {
        let src_y = (u64::from(y) * u64::from(surface.height) / u64::from(height)) as u32;
        for x in 0..width {
            let src_x = (u64::from(x) * u64::from(surface.width) / u64::from(width)) as u32;
            scaled.pixels[y as usize * width as usize + x as usize] =
                surface.pixels[src_y as usize * surface.width as usize + src_x as usize];
        }
    }
    scaled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::paths::RootPaths;
    use crate::renderer::commands::CommandList;
    use crate::renderer::features::FeatureState;
    use crate::renderer::guest::VecGuestMemory;
    use raw_window_handle::{HandleError, WindowHandle};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    const RED: u32 = 0xff00_00ff;
    const BLUE: u32 = 0xffff_0000;

    struct NoWindow;

    impl HasWindowHandle for NoWindow {
        fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
            Err(HandleError::Unavailable)
        }
    }

    fn memory() -> Arc<dyn GuestMemory> {
        Arc::new(VecGuestMemory::new(1 << 20))
    }

    fn backend_with(desc: HeadlessDeviceDesc, root: &std::path::Path) -> (HeadlessRenderer, Arc<dyn GuestMemory>) {
        let mut backend = HeadlessRenderer::new(desc);
        backend.state_mut().init_paths(&RootPaths::from_base(root));
        assert!(backend.init());

        let mem = memory();
        backend.late_init(&Config::default(), "PCSE00000", Arc::clone(&mem));
        (backend, mem)
    }

    fn new_backend(root: &std::path::Path) -> (HeadlessRenderer, Arc<dyn GuestMemory>) {
        backend_with(HeadlessDeviceDesc::default(), root)
    }

    #[test]
    fn test_init_fails_without_device() {
        let mut backend = HeadlessRenderer::new(HeadlessDeviceDesc { available: false, ..Default::default() });
        assert!(!backend.init());
    }

    #[test]
    fn test_game_start_derives_paths() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, _mem) = new_backend(dir.path());
        backend.game_start("/base", "TITLE01", "eboot.bin");

        let state = backend.state();
        assert_eq!(state.shaders_path, state.cache_path.join("shaders").join("TITLE01").join("eboot.bin"));
        assert_eq!(state.shaders_log_path, state.log_path.join("shaderlog").join("TITLE01").join("eboot.bin"));
    }

    #[test]
    fn test_fullscreen_visible_without_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, _mem) = new_backend(dir.path());
        backend.state_mut().set_fullscreen(true);
        assert!(backend.state().fullscreen());
        assert_eq!(backend.frames_rendered(), 0);
    }

    #[test]
    fn test_late_init_applies_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = HeadlessRenderer::new(HeadlessDeviceDesc::default());
        backend.state_mut().init_paths(&RootPaths::from_base(dir.path()));
        assert!(backend.init());

        let mut config = Config::default();
        config.graphics.screen_filter = "FXAA".to_string();
        config.graphics.anisotropic_filtering = 64;
        config.graphics.disable_surface_sync = false;
        config.graphics.stretch_the_display_area = true;
        backend.late_init(&config, "PCSE00000", memory());

        assert_eq!(backend.screen_filter(), Filter::Fxaa);
        assert_eq!(backend.anisotropic_filtering(), 16);
        assert!(!backend.state().disable_surface_sync());
        assert!(backend.state().stretch_the_display_area());
    }

    #[test]
    fn test_unsupported_filter_keeps_current() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, _mem) = new_backend(dir.path());
        backend.set_screen_filter("FSR");
        assert_eq!(backend.screen_filter(), Filter::Bilinear);
        assert_eq!(backend.get_supported_filters() & Filter::Fsr.bit(), 0);
    }

    #[test]
    fn test_capability_queries() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, _mem) = new_backend(dir.path());
        assert_eq!(
            backend.get_gpu_list(),
            vec!["Automatic".to_string(), "Headless Software Device".to_string()]
        );
        assert_eq!(backend.selected_gpu(), 0);
        assert_eq!(backend.get_gpu_name(), "Headless Software Device");
        assert_eq!(backend.get_max_2d_texture_width(), 4096);
        assert_eq!(backend.get_features_mask(), backend.state().features.shader_mask());
    }

    #[test]
    fn test_map_unmap_balance() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, mem) = new_backend(dir.path());

        for i in 1..=8u32 {
            let address = GuestAddress(i * 0x1000);
            assert!(backend.map_memory(mem.as_ref(), address, 0x100));
            backend.unmap_memory(mem.as_ref(), address);
        }
        assert_eq!(backend.state().mappings().outstanding(), 0);

        // 未映射过的地址：拒绝，不影响计数
        backend.unmap_memory(mem.as_ref(), GuestAddress(0x9000));
        assert_eq!(backend.state().mappings().outstanding(), 0);

        // 超出地址空间：映射失败，调用方走拷贝路径
        assert!(!backend.map_memory(mem.as_ref(), GuestAddress(0xfff0_0000), 0x100));
    }

    #[test]
    fn test_map_without_feature_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let desc = HeadlessDeviceDesc {
            features: FeatureState { support_memory_mapping: false, ..Default::default() },
            ..Default::default()
        };
        let (mut backend, mem) = backend_with(desc, dir.path());
        assert!(!backend.map_memory(mem.as_ref(), GuestAddress(0x1000), 0x100));
        assert_eq!(backend.state().mappings().outstanding(), 0);
    }

    #[test]
    fn test_shader_cache_compiles_once_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, mem) = new_backend(dir.path());
        backend.game_start("/base", "PCSE00001", "eboot.bin");

        let program = Command::UseProgram { source: b"frag".to_vec(), state: b"blend".to_vec() };
        backend.execute(&program, mem.as_ref()).unwrap();
        backend.execute(&program, mem.as_ref()).unwrap();

        let cache = backend.state().shader_cache();
        assert_eq!(cache.shaders_count_compiled(), 1);
        let hash = backend.current_program().unwrap();
        assert!(backend.state().shaders_log_path.join(format!("{}.txt", hash)).exists());

        backend.preclose_action();
        drop(backend);

        // 同一标题再次启动：从磁盘预热
        let (mut backend, _mem) = new_backend(dir.path());
        backend.game_start("/base", "PCSE00001", "eboot.bin");
        let cache = backend.state().shader_cache();
        assert_eq!(cache.programs_count_pre_compiled(), 1);
        assert!(cache.contains(&hash));
        assert_eq!(cache.shaders_count_compiled(), 0);
    }

    #[test]
    fn test_feature_mask_changes_shader_hash() {
        let dir = tempfile::tempdir().unwrap();
        let (mut interlock, mem) = new_backend(dir.path());
        let barrier_only = HeadlessDeviceDesc {
            features: FeatureState { support_texture_barrier: true, ..Default::default() },
            ..Default::default()
        };
        let (mut barrier, _) = backend_with(barrier_only, dir.path());

        let program = Command::UseProgram { source: b"frag".to_vec(), state: Vec::new() };
        interlock.execute(&program, mem.as_ref()).unwrap();
        barrier.execute(&program, mem.as_ref()).unwrap();

        assert_ne!(interlock.current_program(), barrier.current_program());
    }

    #[test]
    fn test_blending_uses_selected_technique() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, mem) = new_backend(dir.path());

        let commands = [
            Command::CreateRenderTarget { id: 1, width: 4, height: 4 },
            Command::Clear { target: 1, color: BLUE },
            Command::FillRect { target: 1, x: 0, y: 0, width: 2, height: 2, color: pack_rgba(255, 0, 0, 128), blend: true },
        ];
        for command in &commands {
            backend.execute(command, mem.as_ref()).unwrap();
        }

        assert_eq!(backend.last_blending(), Some(ProgrammableBlending::ShaderInterlock));
        let [r, _, b, _] = unpack_rgba(backend.surface_pixel(1, 0, 0).unwrap());
        assert!(r > 100 && b > 100);
        assert_eq!(backend.surface_pixel(1, 3, 3), Some(BLUE));
    }

    #[test]
    fn test_blending_unsupported_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let desc = HeadlessDeviceDesc { features: FeatureState::default(), ..Default::default() };
        let (mut backend, mem) = backend_with(desc, dir.path());

        backend.execute(&Command::CreateRenderTarget { id: 1, width: 2, height: 2 }, mem.as_ref()).unwrap();
        let half_red = pack_rgba(255, 0, 0, 128);
        backend
            .execute(&Command::FillRect { target: 1, x: 0, y: 0, width: 1, height: 1, color: half_red, blend: true }, mem.as_ref())
            .unwrap();

        assert_eq!(backend.last_blending(), Some(ProgrammableBlending::Unsupported));
        assert_eq!(backend.surface_pixel(1, 0, 0), Some(half_red));
    }

    #[test]
    fn test_execute_errors_do_not_break_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, mem) = new_backend(dir.path());
        let channel = backend.state().channel();

        let list = CommandList::new()
            .with(Command::Clear { target: 9, color: RED })
            .with(Command::CreateRenderTarget { id: 2, width: 1, height: 1 })
            .with(Command::Clear { target: 2, color: RED });
        let id = channel.push(list).unwrap();

        let list = channel.pop().unwrap();
        executor::process_batch(&mut backend, list, mem.as_ref());

        assert!(channel.completion().is_completed(id));
        assert_eq!(backend.surface_pixel(2, 0, 0), Some(RED));
        assert_eq!(backend.get_texture_cache().cached_texture_count(), 1);
    }

    #[test]
    fn test_render_and_dump_upscaled_surface() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = HeadlessRenderer::new(HeadlessDeviceDesc::default());
        backend.state_mut().init_paths(&RootPaths::from_base(dir.path()));
        assert!(backend.init());

        let mut config = Config::default();
        config.graphics.resolution_multiplier = 2.0;
        config.graphics.disable_surface_sync = false;
        let mem = memory();
        backend.late_init(&config, "PCSE00000", Arc::clone(&mem));

        let display = DisplayState { base: GuestAddress(0x1000), pitch: 4, width: 4, height: 2, frame_count: 0 };
        assert!(backend.dump_frame(&display).is_none());

        let channel = backend.state().channel();
        channel
            .push(
                CommandList::new()
                    .with(Command::CreateRenderTarget { id: 1, width: 4, height: 2 })
                    .with(Command::Clear { target: 1, color: RED }),
            )
            .unwrap();
        // dump_frame 会先执行挂起的列表
        assert!(backend.dump_frame(&display).is_none());
        assert!(channel.is_empty());

        let gpu = GpuState { color_surface: Some(1) };
        backend.render_frame(&Vec2::new(0.0, 0.0), &Vec2::new(960.0, 544.0), &display, &gpu, mem.as_ref());
        backend.swap_window(&NoWindow);

        let dump = backend.dump_frame(&display).unwrap();
        assert_eq!((dump.width, dump.height), (8, 4));
        assert!(dump.pixels.iter().all(|p| *p == RED));
        assert_eq!(backend.frames_swapped(), 1);

        // 表面同步把原始分辨率的帧写回了客户机内存
        let mut bytes = [0u8; 4];
        mem.read(GuestAddress(0x1000 + 4 * 7), &mut bytes).unwrap();
        assert_eq!(u32::from_le_bytes(bytes), RED);
    }

    #[test]
    fn test_render_from_guest_framebuffer() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, mem) = new_backend(dir.path());

        let display = DisplayState { base: GuestAddress(0x2000), pitch: 8, width: 2, height: 2, frame_count: 1 };
        let pixels = [RED, BLUE];
        mem.write(GuestAddress(0x2000), bytemuck::cast_slice(&pixels)).unwrap();

        backend.render_frame(&Vec2::default(), &Vec2::new(2.0, 2.0), &display, &GpuState::default(), mem.as_ref());
        let dump = backend.dump_frame(&display).unwrap();
        assert_eq!(&dump.pixels[..2], &[RED, BLUE]);
        assert_eq!(dump.pixels[2], 0);
    }

    #[test]
    fn test_completion_waits_for_execution() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, mem) = new_backend(dir.path());
        let channel = backend.state().channel();

        let first = channel.push(CommandList::new().with(Command::Nop)).unwrap();
        let second = channel
            .push(CommandList::new().with(Command::CreateRenderTarget { id: 1, width: 1, height: 1 }))
            .unwrap();

        let unblocked = Arc::new(AtomicBool::new(false));
        let producer = {
            let channel = Arc::clone(&channel);
            let unblocked = Arc::clone(&unblocked);
            thread::spawn(move || {
                let completed = channel.wait_for_completion(second);
                unblocked.store(true, Ordering::SeqCst);
                completed
            })
        };

        // 执行第一个列表不能唤醒等待第二个列表的生产者
        let list = channel.pop().unwrap();
        assert_eq!(list.id(), Some(first));
        executor::process_batch(&mut backend, list, mem.as_ref());
        thread::sleep(Duration::from_millis(50));
        assert!(!unblocked.load(Ordering::SeqCst));

        let list = channel.pop().unwrap();
        executor::process_batch(&mut backend, list, mem.as_ref());
        assert!(producer.join().unwrap());
        assert!(backend.surface_pixel(1, 0, 0).is_some());
    }

    #[test]
    fn test_consumer_thread_drains_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, mem) = new_backend(dir.path());
        let channel = backend.state().channel();

        let consumer = thread::spawn(move || {
            let processed = executor::process_batches(&mut backend, mem.as_ref());
            (processed, backend)
        });

        channel.push(CommandList::new().with(Command::CreateRenderTarget { id: 1, width: 1, height: 1 })).unwrap();
        for color in [RED, BLUE, RED, BLUE] {
            channel.push(CommandList::new().with(Command::Clear { target: 1, color })).unwrap();
        }
        let last = channel.push(CommandList::new().with(Command::Nop)).unwrap();
        assert!(channel.wait_for_completion(last));
        channel.shutdown();

        let (processed, backend) = consumer.join().unwrap();
        assert_eq!(processed, 6);
        assert_eq!(backend.surface_pixel(1, 0, 0), Some(BLUE));
    }

    #[test]
    fn test_fill_rect_covers_origin() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, mem) = new_backend(dir.path());

        backend.execute(&Command::CreateRenderTarget { id: 1, width: 3, height: 3 }, mem.as_ref()).unwrap();
        backend
            .execute(&Command::FillRect { target: 1, x: 0, y: 0, width: 1, height: 1, color: RED, blend: false }, mem.as_ref())
            .unwrap();

        assert_eq!(backend.surface_pixel(1, 0, 0), Some(RED));
        assert_eq!(backend.surface_pixel(1, 1, 0), Some(0));
        assert_eq!(backend.surface_pixel(1, 0, 1), Some(0));
    }

    #[test]
    fn test_fill_rect_origin_upscaled() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = HeadlessRenderer::new(HeadlessDeviceDesc::default());
        backend.state_mut().init_paths(&RootPaths::from_base(dir.path()));
        assert!(backend.init());

        let mut config = Config::default();
        config.graphics.resolution_multiplier = 2.0;
        let mem = memory();
        backend.late_init(&config, "PCSE00000", Arc::clone(&mem));

        backend.execute(&Command::CreateRenderTarget { id: 1, width: 3, height: 3 }, mem.as_ref()).unwrap();
        backend
            .execute(&Command::FillRect { target: 1, x: 0, y: 0, width: 1, height: 1, color: RED, blend: false }, mem.as_ref())
            .unwrap();

        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            assert_eq!(backend.surface_pixel(1, x, y), Some(RED));
        }
        assert_eq!(backend.surface_pixel(1, 2, 2), Some(0));
    }

    #[test]
    fn test_fill_rect_offscreen_is_clipped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, mem) = new_backend(dir.path());

        backend.execute(&Command::CreateRenderTarget { id: 1, width: 2, height: 2 }, mem.as_ref()).unwrap();
        let offscreen = [
            Command::FillRect { target: 1, x: u32::MAX - 1, y: 0, width: 4, height: 1, color: RED, blend: false },
            Command::FillRect { target: 1, x: 0, y: u32::MAX, width: 1, height: u32::MAX, color: RED, blend: true },
        ];
        for command in &offscreen {
            backend.execute(command, mem.as_ref()).unwrap();
        }

        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            assert_eq!(backend.surface_pixel(1, x, y), Some(0));
        }
    }

    #[test]
    fn test_surface_sync_skips_invalid_display() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = HeadlessRenderer::new(HeadlessDeviceDesc::default());
        backend.state_mut().init_paths(&RootPaths::from_base(dir.path()));
        assert!(backend.init());

        let mut config = Config::default();
        config.graphics.disable_surface_sync = false;
        let mem = memory();
        backend.late_init(&config, "PCSE00000", Arc::clone(&mem));

        let list = [
            Command::CreateRenderTarget { id: 1, width: 4, height: 2 },
            Command::Clear { target: 1, color: RED },
        ];
        for command in &list {
            backend.execute(command, mem.as_ref()).unwrap();
        }

        let gpu = GpuState { color_surface: Some(1) };
        let overflowing = DisplayState { base: GuestAddress(0x1000), pitch: 0x4000_0001, width: 4, height: 2, frame_count: 0 };
        let outside = DisplayState { base: GuestAddress(0x000f_fffc), pitch: 4, width: 4, height: 2, frame_count: 0 };
        for display in [&overflowing, &outside] {
            backend.render_frame(&Vec2::default(), &Vec2::new(4.0, 2.0), display, &gpu, mem.as_ref());
        }

        // 帧本身照常呈现，只是不写回客户机内存
        let dump = backend.dump_frame(&overflowing).unwrap();
        assert!(dump.pixels.iter().all(|p| *p == RED));
        let mut bytes = [0u8; 4];
        mem.read(GuestAddress(0x1000), &mut bytes).unwrap();
        assert_eq!(u32::from_le_bytes(bytes), 0);
        mem.read(GuestAddress(0x000f_fffc), &mut bytes).unwrap();
        assert_eq!(u32::from_le_bytes(bytes), 0);
    }

    #[test]
    fn test_render_target_over_device_limit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, mem) = new_backend(dir.path());
        let limit = backend.get_max_2d_texture_width() as u32;

        let too_large = [
            Command::CreateRenderTarget { id: 1, width: 100_000, height: 100_000 },
            Command::CreateRenderTarget { id: 2, width: limit + 1, height: 1 },
            Command::CreateRenderTarget { id: 3, width: 1, height: limit + 1 },
        ];
        for command in &too_large {
            assert!(matches!(backend.execute(command, mem.as_ref()), Err(RendererError::Runtime(_))));
        }
        assert_eq!(backend.get_texture_cache().cached_texture_count(), 0);

        backend.execute(&Command::CreateRenderTarget { id: 4, width: limit, height: 1 }, mem.as_ref()).unwrap();
        assert!(backend.surface_pixel(4, limit - 1, 0).is_some());
    }

    #[test]
    fn test_gpu_index_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = HeadlessRenderer::new(HeadlessDeviceDesc::default());
        backend.state_mut().init_paths(&RootPaths::from_base(dir.path()));
        assert!(backend.init());

        let mut config = Config::default();
        config.graphics.gpu_idx = 1;
        backend.late_init(&config, "PCSE00000", memory());
        assert_eq!(backend.selected_gpu(), 1);
        assert_eq!(backend.get_gpu_list()[backend.selected_gpu()], backend.get_gpu_name());

        config.graphics.gpu_idx = 7;
        backend.late_init(&config, "PCSE00000", memory());
        assert_eq!(backend.selected_gpu(), 0);
    }
}
