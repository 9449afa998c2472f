use nebula_gfx::device::config::GraphicsDeviceCreateInfo;

/// Installs a test logger. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::Debug).try_init();
}

pub fn make_info(draw_threads: usize) -> GraphicsDeviceCreateInfo {
    let mut info = GraphicsDeviceCreateInfo::new();
    info.set_draw_threads(draw_threads);
    info.enable_validation();
    info
}
