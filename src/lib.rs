//! OmniCore - dapp 请求审批代理
//!
//! 页面不可信，钱包可信：账户披露、网络切换、消息签名与交易广播
//! 都必须经过用户逐次审批

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod metrics;
pub mod service;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{AppError, BrokerError};
