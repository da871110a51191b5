//! KrishiVaani 服务入口
//!
//! 用法：`krishi [config.toml]`。初始化日志、加载配置、构建编排器，启动会话过期清理并运行 HTTP 服务。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use krishi::config::load_config;
use krishi::core::AgentBuilder;
use krishi::gateway::router;
use krishi::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    tracing::info!(app = %cfg.app.name, provider = %cfg.llm.provider, "starting");

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let ttl = Duration::from_secs(cfg.session.ttl_secs);
    let cleanup_every = Duration::from_secs(cfg.session.cleanup_interval_secs.max(1));

    let orchestrator = Arc::new(
        AgentBuilder::new(cfg)
            .build()
            .await
            .context("Failed to build agent")?,
    );

    // 定期清理空闲会话（跳过正在处理请求的会话）
    let sessions = Arc::clone(orchestrator.sessions());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            sessions.cleanup_expired(ttl).await;
        }
    });

    let app = router(orchestrator);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
