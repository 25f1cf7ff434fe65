//! MQTT → OpenTSDB 桥接进程入口。

mod bridge;

use bridge_config::AppConfig;
use bridge_telemetry::{init_tracing, metrics};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志（RUST_LOG 优先于 LOG_LEVEL）
    init_tracing(&config.log_level);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        sink = ?config.sink_kind,
        "bridge starting"
    );

    let result = bridge::run(&config).await;
    let snapshot = metrics().snapshot();
    info!("bridge stopped: {:?}", snapshot);
    if let Err(err) = result {
        error!("bridge failed: {}", err);
        return Err(err.into());
    }
    Ok(())
}
