//! 统一的渲染后端接口
//!
//! 本模块定义了所有具体渲染后端都必须实现的 [`RenderBackend`] trait，
//! 以及所有后端共享的基础状态 [`BackendState`]。
//!
//! # 生命周期
//!
//! ```text
//! 选择后端 -> init() -> late_init() -> game_start() -> render_frame()* -> preclose_action() -> drop
//! ```
//!
//! 只有 `init()` 允许通过返回值失败。在 `init()` 成功之前调用其他任何方法，
//! 或破坏 `map_memory`/`unmap_memory` 的对称性，都是编程错误。
//!
//! # 示例
//!
//! ```ignore
//! let mut backend: Box<dyn RenderBackend> = renderer::init(GraphicsBackend::Headless, &root)?;
//! backend.late_init(&config, "PCSE00000", memory.clone());
//! backend.game_start("/ux0/app/PCSE00000", "PCSE00000", "eboot.bin");
//! backend.render_frame(&pos, &size, &display, &gpu, memory.as_ref());
//! ```

use raw_window_handle::HasWindowHandle;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::commands::{Command, CommandChannel, DEFAULT_MAX_PENDING_LISTS};
use super::features::FeatureState;
use super::guest::{GuestAddress, GuestMemory, MappingTracker};
use super::shaders::{ShaderCache, ShaderHash};
use super::types::{DisplayState, FrameDump, GpuState, TextureCache, Vec2};
use crate::core::config::{Config, GraphicsBackend, GraphicsConfig};
use crate::core::error::Result;
use crate::core::paths::RootPaths;

/// 需要用 RGBA16 模拟 tile 渲染器内部存储的标题（Tearaway 的各地区版本）
const TEARAWAY_TITLES: [&str; 11] = [
    "PCSC00048",
    "PCSC00064",
    "PCSF00214",
    "PCSF00476",
    "PCSF00463",
    "PCSD00072",
    "PCSD00077",
    "PCSA00099",
    "PCSA00141",
    "PCSA00142",
    "PCSA00144",
];

/// 所有后端共享的基础状态
///
/// 每个模拟会话一个实例。特性标志和路径在初始化/标题启动时写入一次，
/// 之后只读；命令通道和着色器缓存通过 `Arc` 与生产者线程共享。
pub struct BackendState {
    pub cache_path: PathBuf,
    pub log_path: PathBuf,
    pub shared_path: PathBuf,
    pub static_assets: PathBuf,
    pub shaders_path: PathBuf,
    pub shaders_log_path: PathBuf,

    base_path: String,
    title_id: String,
    self_name: String,

    pub current_backend: Option<GraphicsBackend>,
    pub features: FeatureState,
    pub res_multiplier: f32,

    disable_surface_sync: bool,
    stretch_the_display_area: bool,
    fullscreen_hd_res_pixel_perfect: bool,
    fullscreen: bool,

    channel: Arc<CommandChannel>,
    shader_cache: Arc<ShaderCache>,
    mappings: MappingTracker,
    guest_memory: Option<Arc<dyn GuestMemory>>,
}

impl BackendState {
    pub fn new() -> Self {
        Self {
            cache_path: PathBuf::new(),
            log_path: PathBuf::new(),
            shared_path: PathBuf::new(),
            static_assets: PathBuf::new(),
            shaders_path: PathBuf::new(),
            shaders_log_path: PathBuf::new(),
            base_path: String::new(),
            title_id: String::new(),
            self_name: String::new(),
            current_backend: None,
            features: FeatureState::default(),
            res_multiplier: 1.0,
            disable_surface_sync: true,
            stretch_the_display_area: false,
            fullscreen_hd_res_pixel_perfect: false,
            fullscreen: false,
            channel: Arc::new(CommandChannel::new(DEFAULT_MAX_PENDING_LISTS)),
            shader_cache: Arc::new(ShaderCache::new()),
            mappings: MappingTracker::new(),
            guest_memory: None,
        }
    }

    /// 从根目录提供者设置缓存、日志、共享和静态资源目录
    pub fn init_paths(&mut self, root_paths: &RootPaths) {
        self.cache_path = root_paths.get_cache_path().to_path_buf();
        self.log_path = root_paths.get_log_path().to_path_buf();
        self.shared_path = root_paths.get_shared_path().to_path_buf();
        self.static_assets = root_paths.get_static_assets_path().to_path_buf();
    }

    /// 推导当前标题的着色器缓存和着色器日志目录
    pub fn set_app_paths(&mut self, title_id: &str, self_name: &str) {
        self.shaders_path = self.cache_path.join("shaders").join(title_id).join(self_name);
        self.shaders_log_path = self.log_path.join("shaderlog").join(title_id).join(self_name);
    }

    pub fn texture_folder(&self) -> PathBuf {
        self.shared_path.join("textures")
    }

    /// 保存标题标识（拷贝一份）、推导路径、应用按标题的兼容性设置
    pub fn start_title(&mut self, base_path: &str, title_id: &str, self_name: &str) {
        self.base_path = base_path.to_string();
        self.title_id = title_id.to_string();
        self.self_name = self_name.to_string();

        self.set_app_paths(title_id, self_name);

        self.features.use_rgba16_for_rgba8 = TEARAWAY_TITLES
            .iter()
            .any(|tearaway| title_id.contains(tearaway));
        if self.features.use_rgba16_for_rgba8 {
            info!("Tearaway game detected, using improved tiled renderer emulation.");
        }
    }

    /// 绑定运行时配置中的共享标志和客户机内存
    pub fn bind_config(&mut self, graphics: &GraphicsConfig, guest_memory: Arc<dyn GuestMemory>) {
        self.set_surface_sync_state(graphics.disable_surface_sync);
        self.set_stretch_display(graphics.stretch_the_display_area);
        self.stretch_hd_pixel_perfect(graphics.fullscreen_hd_res_pixel_perfect);
        self.set_fullscreen(graphics.fullscreen);
        self.res_multiplier = graphics.resolution_multiplier;
        self.guest_memory = Some(guest_memory);
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn title_id(&self) -> &str {
        &self.title_id
    }

    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    pub fn set_surface_sync_state(&mut self, disable: bool) {
        self.disable_surface_sync = disable;
    }

    pub fn set_stretch_display(&mut self, enable: bool) {
        self.stretch_the_display_area = enable;
    }

    pub fn stretch_hd_pixel_perfect(&mut self, enable: bool) {
        self.fullscreen_hd_res_pixel_perfect = enable;
    }

    pub fn set_fullscreen(&mut self, enable: bool) {
        self.fullscreen = enable;
    }

    pub fn disable_surface_sync(&self) -> bool {
        self.disable_surface_sync
    }

    pub fn stretch_the_display_area(&self) -> bool {
        self.stretch_the_display_area
    }

    pub fn fullscreen_hd_res_pixel_perfect(&self) -> bool {
        self.fullscreen_hd_res_pixel_perfect
    }

    pub fn fullscreen(&self) -> bool {
        self.fullscreen
    }

    /// 命令通道（生产者线程持有一份克隆）
    pub fn channel(&self) -> Arc<CommandChannel> {
        Arc::clone(&self.channel)
    }

    pub fn shader_cache(&self) -> Arc<ShaderCache> {
        Arc::clone(&self.shader_cache)
    }

    pub fn mappings(&self) -> &MappingTracker {
        &self.mappings
    }

    pub fn mappings_mut(&mut self) -> &mut MappingTracker {
        &mut self.mappings
    }

    /// `late_init()` 绑定的客户机内存
    pub fn guest_memory(&self) -> Option<Arc<dyn GuestMemory>> {
        self.guest_memory.clone()
    }

    /// 当前标题是否已经推导出着色器目录
    pub fn has_title(&self) -> bool {
        !self.title_id.is_empty()
    }
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new()
    }
}

/// 统一的渲染后端接口
///
/// 具体后端只需要重写自己特化的部分，带默认实现的方法可以保持不变。
pub trait RenderBackend: Send {
    /// 共享的基础状态
    fn state(&self) -> &BackendState;

    fn state_mut(&mut self) -> &mut BackendState;

    /// 获取主机 GPU 设备/上下文
    ///
    /// 返回 `false` 时调用方不得再调用其他任何方法，
    /// 应当选择另一个后端或干净地退出。
    fn init(&mut self) -> bool;

    /// 绑定运行时配置和客户机内存；必须在 `init()` 之后、第一帧之前调用
    fn late_init(&mut self, config: &Config, game_id: &str, guest_memory: Arc<dyn GuestMemory>);

    /// 每个被加载的标题调用一次
    ///
    /// 重写时必须调用 [`default_game_start`] 以保留路径推导。
    fn game_start(&mut self, base_path: &str, title_id: &str, self_name: &str) {
        default_game_start(self, base_path, title_id, self_name);
    }

    fn get_texture_cache(&self) -> &dyn TextureCache;

    /// 执行一帧；这是发出主机 GPU 工作的唯一位置
    fn render_frame(
        &mut self,
        viewport_pos: &Vec2,
        viewport_size: &Vec2,
        display: &DisplayState,
        gpu: &GpuState,
        guest_memory: &dyn GuestMemory,
    );

    /// 呈现当前帧
    fn swap_window(&mut self, window: &dyn HasWindowHandle);

    /// 同步回读（放大后的）当前帧，RGBA8 格式
    ///
    /// 可能会让管线停顿以保证快照一致；还没有渲染过任何帧时返回 `None`。
    fn dump_frame(&mut self, display: &DisplayState) -> Option<FrameDump>;

    /// 影响编译出的着色器的特性掩码，会参与着色器哈希
    fn get_features_mask(&self) -> u32 {
        0
    }

    /// 支持的 [`Filter`](super::types::Filter) 位掩码
    fn get_supported_filters(&self) -> u32;

    fn set_screen_filter(&mut self, filter: &str);

    fn get_max_anisotropic_filtering(&self) -> i32;

    fn set_anisotropic_filtering(&mut self, anisotropic_filtering: i32);

    fn get_max_2d_texture_width(&self) -> i32;

    fn set_async_compilation(&mut self, _enable: bool) {}

    /// 零拷贝映射客户机内存
    ///
    /// 默认直接成功，表示不需要映射。返回 `false` 时调用方走拷贝路径。
    fn map_memory(&mut self, _guest_memory: &dyn GuestMemory, _address: GuestAddress, _size: u32) -> bool {
        true
    }

    fn unmap_memory(&mut self, _guest_memory: &dyn GuestMemory, _address: GuestAddress) {}

    fn get_gpu_list(&self) -> Vec<String> {
        vec!["Automatic".to_string()]
    }

    fn get_gpu_name(&self) -> &str;

    /// 预编译一个以前见过的着色器变体
    fn precompile_shader(&mut self, hash: &ShaderHash);

    /// 拆除前刷新并持久化状态
    fn preclose_action(&mut self);

    /// 在消费者线程上执行一条命令
    fn execute(&mut self, command: &Command, guest_memory: &dyn GuestMemory) -> Result<()>;
}

/// `game_start` 的默认行为
///
/// 保存标题标识并推导路径，然后读回该标题的着色器缓存并逐个预编译。
pub fn default_game_start<B: RenderBackend + ?Sized>(
    backend: &mut B,
    base_path: &str,
    title_id: &str,
    self_name: &str,
) {
    backend.state_mut().start_title(base_path, title_id, self_name);

    let features_mask = backend.get_features_mask();
    let cache = backend.state().shader_cache();
    let shaders_path = backend.state().shaders_path.clone();
    debug!(
        title_id,
        self_name,
        shaders_path = %shaders_path.display(),
        "Derived title paths"
    );

    let count = cache.load(&shaders_path, features_mask);

    if count > 0 {
        for hash in cache.take_pending() {
            backend.precompile_shader(&hash);
        }
        info!(
            count = cache.programs_count_pre_compiled(),
            "Shader cache warm-up finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn state_with_root() -> BackendState {
        let mut state = BackendState::new();
        state.init_paths(&RootPaths::new("/cache", "/log", "/shared", "/static"));
        state
    }

    #[test]
    fn test_title_paths() {
        let mut state = state_with_root();
        state.start_title("/base", "TITLE01", "eboot.bin");

        assert_eq!(state.shaders_path, Path::new("/cache/shaders/TITLE01/eboot.bin"));
        assert_eq!(state.shaders_log_path, Path::new("/log/shaderlog/TITLE01/eboot.bin"));
        assert_eq!(state.texture_folder(), Path::new("/shared/textures"));
        assert_eq!(state.base_path(), "/base");
        assert_eq!(state.title_id(), "TITLE01");
        assert_eq!(state.self_name(), "eboot.bin");
    }

    #[test]
    fn test_title_strings_are_owned() {
        let mut state = state_with_root();
        {
            let title = String::from("PCSE00001");
            state.start_title("/base", &title, "eboot.bin");
        }
        assert_eq!(state.title_id(), "PCSE00001");
    }

    #[test]
    fn test_tearaway_detection() {
        let mut state = state_with_root();
        state.start_title("/base", "PCSF00214", "eboot.bin");
        assert!(state.features.use_rgba16_for_rgba8);

        state.start_title("/base", "PCSE00001", "eboot.bin");
        assert!(!state.features.use_rgba16_for_rgba8);
    }

    #[test]
    fn test_flag_setters_take_effect_immediately() {
        let mut state = BackendState::new();
        assert!(!state.fullscreen());

        state.set_fullscreen(true);
        assert!(state.fullscreen());

        state.set_surface_sync_state(false);
        state.set_stretch_display(true);
        state.stretch_hd_pixel_perfect(true);
        assert!(!state.disable_surface_sync());
        assert!(state.stretch_the_display_area());
        assert!(state.fullscreen_hd_res_pixel_perfect());
    }
}
