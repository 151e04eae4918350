use material_uploader::Application;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 默认配置文件路径
const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统（RUST_LOG 未设置时默认 info）
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    info!("Material Uploader v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let app = match Application::initialize(&config_path).await {
        Ok(app) => app,
        Err(e) => {
            error!("应用启动失败: {:#}", e);
            std::process::exit(1);
        }
    };

    app.run().await
}
