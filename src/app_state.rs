use std::sync::Arc;

use crate::{
    api::control::ControlHandler,
    config::Config,
    error::BrokerError,
    infrastructure::{
        approval_window::ChannelSurface, event_bus::ChannelBroadcaster, kv_store::KvStore,
    },
    service::{
        approval_broker::ApprovalBroker, chain_client::ChainClient, chain_registry::ChainRegistry,
        connection_store::ConnectionStore, keystore::Keystore, rpc_dispatcher::RpcDispatcher,
        state_store::StateStore, wallet_broker::WalletBroker,
    },
};

/// 应用状态
/// 一个进程持有一个 broker 实例，所有共享状态都挂在这里
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub wallet: Arc<WalletBroker>,
    pub approvals: ApprovalBroker,
    pub control: ControlHandler,
    /// 页面事件（accountsChanged / chainChanged）
    pub events: Arc<ChannelBroadcaster>,
    /// 审批界面的打开/关闭指令
    pub surfaces: Arc<ChannelSurface>,
}

impl AppState {
    /// 组装各组件并恢复持久化状态
    pub async fn new(
        config: Arc<Config>,
        kv: Arc<dyn KvStore>,
        keystore: Arc<dyn Keystore>,
        chain_client: Arc<dyn ChainClient>,
    ) -> Result<Self, BrokerError> {
        let events = Arc::new(ChannelBroadcaster::default());
        let surfaces = Arc::new(ChannelSurface::default());

        let registry = Arc::new(ChainRegistry::new(kv.clone()));
        let state_store = StateStore::new(kv);
        let connections = ConnectionStore::new(state_store.clone());

        let wallet = Arc::new(WalletBroker::new(
            config.network.mode,
            registry,
            state_store,
            keystore,
            chain_client,
            events.clone(),
        ));
        wallet.load_persisted().await?;

        let approvals = ApprovalBroker::new(
            surfaces.clone(),
            config.broker.approval_url.clone(),
            config.broker.approval_timeout(),
        );
        let dispatcher = RpcDispatcher::new(wallet.clone(), connections, approvals.clone());
        let control = ControlHandler::new(wallet.clone(), dispatcher);

        Ok(Self {
            config,
            wallet,
            approvals,
            control,
            events,
            surfaces,
        })
    }
}
