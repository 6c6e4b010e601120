use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use render_pool::{AppConfig, BrowserPool, ChromeBackend};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load(None)?;
    info!(
        "🚀 启动页面池: {} 个端点，每个预热 {} 个页面",
        config.endpoints.len(),
        config.pool_size
    );

    let pool = BrowserPool::new(ChromeBackend::new(), config);
    pool.init().await?;

    let metrics = pool.metrics().await;
    info!("✓ 页面池就绪: {}", serde_json::to_string(&metrics)?);

    wait_for_shutdown_signal().await;
    pool.shutdown().await;

    Ok(())
}

/// 等待终止信号（Ctrl-C / SIGTERM / SIGHUP / SIGQUIT）
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).expect("注册 SIGTERM 失败");
    let mut hup = signal(SignalKind::hangup()).expect("注册 SIGHUP 失败");
    let mut quit = signal(SignalKind::quit()).expect("注册 SIGQUIT 失败");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("收到 Ctrl-C，准备关闭"),
        _ = term.recv() => info!("收到 SIGTERM，准备关闭"),
        _ = hup.recv() => info!("收到 SIGHUP，准备关闭"),
        _ = quit.recv() => info!("收到 SIGQUIT，准备关闭"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    use tracing::warn;

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("等待 Ctrl-C 失败: {}", e);
    } else {
        info!("收到 Ctrl-C，准备关闭");
    }
}
