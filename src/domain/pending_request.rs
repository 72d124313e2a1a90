//! 待审批请求领域模型
//!
//! 状态转换：Created -> AwaitingDecision -> Approved | Rejected

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 待审批请求类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PendingKind {
    Connect,
    SwitchChain,
    Sign,
    Tx,
}

impl PendingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingKind::Connect => "connect",
            PendingKind::SwitchChain => "switchChain",
            PendingKind::Sign => "sign",
            PendingKind::Tx => "tx",
        }
    }
}

/// 请求状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Created,
    AwaitingDecision,
    Approved,
    Rejected,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Created => "created",
            RequestState::AwaitingDecision => "awaiting_decision",
            RequestState::Approved => "approved",
            RequestState::Rejected => "rejected",
        }
    }

    /// 验证状态转换
    ///
    /// ```text
    /// Created -> AwaitingDecision
    /// Created -> Rejected            (审批窗口打开失败、取消)
    /// AwaitingDecision -> Approved
    /// AwaitingDecision -> Rejected
    /// ```
    pub fn validate_transition(from: RequestState, to: RequestState) -> Result<()> {
        let valid = match from {
            RequestState::Created => {
                matches!(to, RequestState::AwaitingDecision | RequestState::Rejected)
            }
            RequestState::AwaitingDecision => {
                matches!(to, RequestState::Approved | RequestState::Rejected)
            }
            RequestState::Approved | RequestState::Rejected => false,
        };

        if valid {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "Invalid request state transition: {} -> {}",
                from.as_str(),
                to.as_str()
            ))
        }
    }
}

/// 审批界面展示用的详情，按类别区分
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PendingDetails {
    Connect {
        origin: String,
        address: String,
    },
    SwitchChain {
        origin: String,
        from: i64,
        to: i64,
    },
    Sign {
        origin: String,
        address: String,
        /// 0x 十六进制消息
        message: String,
    },
    Tx {
        origin: String,
        from: String,
        to: Option<String>,
        value: serde_json::Value,
        data: String,
    },
}

impl PendingDetails {
    pub fn kind(&self) -> PendingKind {
        match self {
            PendingDetails::Connect { .. } => PendingKind::Connect,
            PendingDetails::SwitchChain { .. } => PendingKind::SwitchChain,
            PendingDetails::Sign { .. } => PendingKind::Sign,
            PendingDetails::Tx { .. } => PendingKind::Tx,
        }
    }
}

/// 待审批请求快照
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub id: Uuid,
    pub kind: PendingKind,
    pub origin: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// 毫秒时间戳
    pub created_at: i64,
    pub details: PendingDetails,
}

/// 用户决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn from_approved(approved: bool) -> Self {
        if approved {
            Decision::Approved
        } else {
            Decision::Rejected
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved)
    }

    pub fn terminal_state(&self) -> RequestState {
        match self {
            Decision::Approved => RequestState::Approved,
            Decision::Rejected => RequestState::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(
            RequestState::validate_transition(RequestState::Created, RequestState::AwaitingDecision)
                .is_ok()
        );
        assert!(RequestState::validate_transition(
            RequestState::AwaitingDecision,
            RequestState::Approved
        )
        .is_ok());
        assert!(RequestState::validate_transition(
            RequestState::AwaitingDecision,
            RequestState::Rejected
        )
        .is_ok());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [RequestState::Approved, RequestState::Rejected] {
            for to in [
                RequestState::Created,
                RequestState::AwaitingDecision,
                RequestState::Approved,
                RequestState::Rejected,
            ] {
                assert!(RequestState::validate_transition(terminal, to).is_err());
            }
        }
        assert!(
            RequestState::validate_transition(RequestState::Created, RequestState::Approved)
                .is_err()
        );
    }

    #[test]
    fn test_snapshot_serialization() {
        let req = PendingRequest {
            id: Uuid::new_v4(),
            kind: PendingKind::SwitchChain,
            origin: "https://app.example".to_string(),
            method: "wallet_switchEthereumChain".to_string(),
            params: None,
            created_at: 1_700_000_000_000,
            details: PendingDetails::SwitchChain {
                origin: "https://app.example".to_string(),
                from: 11155111,
                to: 84532,
            },
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["kind"], "switchChain");
        assert_eq!(json["createdAt"], 1_700_000_000_000i64);
        assert_eq!(json["details"]["to"], 84532);
        assert!(json.get("params").is_none());
        assert_eq!(req.details.kind(), req.kind);
    }
}
