//! Domain 模块
//!
//! 网络定义、待审批请求与页面方法分类

pub mod chain_config;
pub mod pending_request;
pub mod rpc_method;

// 重新导出常用类型
pub use chain_config::{ChainInfo, NetworkMode};
pub use pending_request::{Decision, PendingDetails, PendingKind, PendingRequest, RequestState};
pub use rpc_method::{MethodCategory, RpcMethod, TransactionDraft};
