use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::domain::pending_request::PendingKind;

/// 用户拒绝的请求类别（决定错误消息）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    Connection,
    Signature,
    Transaction,
    Request,
}

impl RejectionKind {
    pub fn for_kind(kind: PendingKind) -> Self {
        match kind {
            PendingKind::Connect => RejectionKind::Connection,
            PendingKind::Sign => RejectionKind::Signature,
            PendingKind::Tx => RejectionKind::Transaction,
            PendingKind::SwitchChain => RejectionKind::Request,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::Connection => "connection",
            RejectionKind::Signature => "signature",
            RejectionKind::Transaction => "transaction",
            RejectionKind::Request => "request",
        }
    }
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker 业务错误
///
/// `Display` 即返回给调用方的 `{ error }` 消息
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    // 自定义网络校验
    #[error("Network name is required.")]
    NameRequired,
    #[error("Chain ID must be a positive integer.")]
    InvalidChainId,
    #[error("RPC URL must be a valid http(s) URL.")]
    InvalidRpcUrl,
    #[error("Currency symbol must be 2-8 characters.")]
    InvalidSymbol,
    #[error("Block explorer URL must be a valid http(s) URL.")]
    InvalidExplorerUrl,

    #[error("Invalid chainId: {0}")]
    MalformedChainId(String),
    #[error("Missing chainId")]
    MissingChainId,
    #[error("Unsupported chain: {0}")]
    UnsupportedChain(i64),
    /// 页面请求切换到未知网络
    #[error("Chain not supported")]
    ChainNotSupported(i64),

    #[error("Not connected. Call eth_requestAccounts first.")]
    NotConnected,
    #[error("Wallet locked")]
    WalletLocked,
    #[error("No wallet found")]
    NoWallet,
    #[error("User rejected {0}")]
    UserRejected(RejectionKind),

    #[error("Request not found/expired")]
    RequestNotFound,
    #[error("Request not found/expired")]
    RequestExpired,
    #[error("Request cancelled")]
    RequestCancelled,

    #[error("Invalid from address")]
    InvalidFromAddress,
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Method not supported: {0}")]
    MethodNotSupported(String),

    /// 链客户端原样返回的错误
    #[error("{message}")]
    Rpc { code: Option<i64>, message: String },

    #[error("{0}")]
    Keystore(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Approval surface error: {0}")]
    Surface(String),
    #[error("Unknown message")]
    UnknownMessage,
    #[error("{0}")]
    Internal(String),
}

impl BrokerError {
    pub fn rpc(message: impl Into<String>) -> Self {
        BrokerError::Rpc {
            code: None,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for BrokerError {
    fn from(err: anyhow::Error) -> Self {
        BrokerError::Internal(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::InvalidParams(err.to_string())
    }
}

/// 传输层错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorCode {
    BadRequest,
}

impl AppErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppErrorCode::BadRequest => "bad_request",
        }
    }
}

/// HTTP 层错误（请求体无法解析等传输层失败）
#[derive(Debug, Clone)]
pub struct AppError {
    pub code: AppErrorCode,
    pub message: String,
    pub status: StatusCode,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    error: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code.as_str(),
            error: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            code: AppErrorCode::BadRequest,
            message: msg.into(),
            status: StatusCode::BAD_REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages() {
        assert_eq!(
            BrokerError::UserRejected(RejectionKind::Connection).to_string(),
            "User rejected connection"
        );
        assert_eq!(
            BrokerError::UserRejected(RejectionKind::for_kind(PendingKind::Tx)).to_string(),
            "User rejected transaction"
        );
        assert_eq!(
            BrokerError::UserRejected(RejectionKind::for_kind(PendingKind::SwitchChain))
                .to_string(),
            "User rejected request"
        );
    }

    #[test]
    fn test_rpc_error_is_verbatim() {
        let err = BrokerError::Rpc {
            code: Some(-32000),
            message: "execution reverted".to_string(),
        };
        assert_eq!(err.to_string(), "execution reverted");
    }

    #[test]
    fn test_unknown_chain_messages() {
        assert_eq!(BrokerError::UnsupportedChain(999).to_string(), "Unsupported chain: 999");
        assert_eq!(BrokerError::ChainNotSupported(999).to_string(), "Chain not supported");
    }

    #[test]
    fn test_bad_request_body() {
        let err = AppError::bad_request("Expected request with `Content-Type: application/json`");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code.as_str(), "bad_request");
    }
}
