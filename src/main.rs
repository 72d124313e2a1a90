//! OmniCore 主入口
//! dapp 请求审批代理

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use omnicore::{
    api,
    app_state::AppState,
    config::Config,
    infrastructure::{
        kv_store::{KvStore, MemoryKvStore, RedisKvStore},
        logging,
    },
    service::{chain_client::JsonRpcChainClient, keystore::EthersKeystore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载环境变量
    dotenvy::dotenv().ok();

    // 2. 加载配置（CONFIG_PATH 指向的 toml 覆盖环境变量默认值）
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Config::from_env_and_file(config_path.as_deref())?;
    config.validate()?;

    // 3. 初始化日志
    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        logging::init_default_logging();
    }

    tracing::info!(mode = %config.network.mode, "Starting OmniCore approval broker");

    // 4. 持久化：配置了 REDIS_URL 时使用 Redis，否则使用内存存储
    let kv: Arc<dyn KvStore> = match config.storage.redis_url.as_deref() {
        Some(url) => {
            let store = RedisKvStore::new(url)?;
            store.ping().await?;
            tracing::info!("Redis store connected");
            Arc::new(store)
        }
        None => {
            tracing::warn!("REDIS_URL not set, state will not survive restart");
            Arc::new(MemoryKvStore::new())
        }
    };

    // 5. 外部协作方
    let keystore = Arc::new(EthersKeystore::new(config.broker.kdf_iterations));
    let chain_client = Arc::new(JsonRpcChainClient::new(Duration::from_secs(30)));

    // 6. 应用状态
    let config = Arc::new(config);
    let state = Arc::new(AppState::new(config.clone(), kv, keystore, chain_client).await?);

    // 7. 启动服务器
    let app = api::routes(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!("Server listening on http://{}", config.server.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// 收到退出信号后结束所有挂起请求，等待中的调用方收到错误
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    let cancelled = state.approvals.cancel_all().await;
    tracing::info!(cancelled, "Shutting down");
}
