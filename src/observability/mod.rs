//! 可观测性：tracing 订阅器初始化
//!
//! 默认 info，可通过 RUST_LOG 覆盖。日志写到 stderr，stdout 留给流式回答。

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    init_with_level(None);
}

/// level 形如 "debug" 或 "concierge=trace"；非法值回退到 info
pub fn init_with_level(level: Option<&str>) {
    let filter = match level.and_then(|l| EnvFilter::try_new(l).ok()) {
        Some(f) => f,
        None => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
