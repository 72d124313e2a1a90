//! 审批界面窗口
//!
//! 审批界面是外部协作方：broker 只负责按请求 id 打开、按窗口 id 关闭。
//! `ChannelSurface` 把打开/关闭指令广播给订阅的前端（`GET /api/v1/surfaces`）。

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

pub type SurfaceId = u64;

#[async_trait]
pub trait ApprovalSurface: Send + Sync {
    /// 打开审批界面，返回窗口 id
    async fn open(&self, request_id: Uuid, url: &str) -> Result<SurfaceId>;
    async fn close(&self, surface_id: SurfaceId) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SurfaceCommand {
    #[serde(rename_all = "camelCase")]
    Open {
        surface_id: SurfaceId,
        request_id: Uuid,
        url: String,
    },
    #[serde(rename_all = "camelCase")]
    Close { surface_id: SurfaceId },
}

pub struct ChannelSurface {
    next_id: AtomicU64,
    sender: broadcast::Sender<SurfaceCommand>,
}

impl ChannelSurface {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceCommand> {
        self.sender.subscribe()
    }
}

impl Default for ChannelSurface {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl ApprovalSurface for ChannelSurface {
    async fn open(&self, request_id: Uuid, url: &str) -> Result<SurfaceId> {
        let surface_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(%request_id, surface_id, "Opening approval surface");
        let _ = self.sender.send(SurfaceCommand::Open {
            surface_id,
            request_id,
            url: url.to_string(),
        });
        Ok(surface_id)
    }

    async fn close(&self, surface_id: SurfaceId) -> Result<()> {
        tracing::debug!(surface_id, "Closing approval surface");
        let _ = self.sender.send(SurfaceCommand::Close { surface_id });
        Ok(())
    }
}
