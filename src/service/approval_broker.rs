//! 待审批请求管理
//!
//! 每个请求对应一对 oneshot 通道：调用方等待 `DecisionFuture`，
//! `decide` / `cancel` 在锁内移除条目后唯一地完成该通道。
//! 条目一旦移除，后续对同一 id 的决定返回 `RequestNotFound`。

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
    time::Duration,
};

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{
    domain::pending_request::{Decision, PendingDetails, PendingKind, PendingRequest, RequestState},
    error::{BrokerError, RejectionKind},
    infrastructure::approval_window::{ApprovalSurface, SurfaceId},
};

pub type DecisionResult = Result<Decision, BrokerError>;

struct PendingEntry {
    request: PendingRequest,
    state: RequestState,
    surface_id: Option<SurfaceId>,
    responder: oneshot::Sender<DecisionResult>,
}

struct Inner {
    pending: Mutex<HashMap<Uuid, PendingEntry>>,
    surface: Arc<dyn ApprovalSurface>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, PendingEntry>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn close_surface(&self, request_id: Uuid, surface_id: Option<SurfaceId>) {
        if let Some(surface_id) = surface_id {
            if let Err(e) = self.surface.close(surface_id).await {
                tracing::warn!(
                    %request_id,
                    surface_id,
                    error = %e,
                    "Failed to close approval surface"
                );
            }
        }
    }

    /// 以错误结束请求（取消、过期）；条目不存在返回 false
    async fn abort(&self, id: Uuid, reason: BrokerError) -> bool {
        let Some(entry) = self.lock().remove(&id) else {
            return false;
        };
        tracing::info!(
            request_id = %id,
            kind = entry.request.kind.as_str(),
            reason = %reason,
            "Pending request aborted"
        );
        crate::metrics::inc_approval_cancelled();
        self.close_surface(id, entry.surface_id).await;
        let _ = entry.responder.send(Err(reason));
        true
    }
}

/// 等待用户决定的挂起点
pub struct DecisionFuture {
    rx: oneshot::Receiver<DecisionResult>,
}

impl Future for DecisionFuture {
    type Output = DecisionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // 发送端被丢弃（进程关闭）
            Poll::Ready(Err(_)) => Poll::Ready(Err(BrokerError::RequestNotFound)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Clone)]
pub struct ApprovalBroker {
    inner: Arc<Inner>,
    approval_url: String,
    timeout: Option<Duration>,
}

impl ApprovalBroker {
    pub fn new(
        surface: Arc<dyn ApprovalSurface>,
        approval_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                surface,
            }),
            approval_url: approval_url.into(),
            timeout,
        }
    }

    fn surface_url(&self, id: Uuid) -> String {
        let sep = if self.approval_url.contains('?') { '&' } else { '?' };
        format!("{}{}requestId={}", self.approval_url, sep, id)
    }

    /// 登记请求并打开审批界面，返回请求 id 与挂起点
    ///
    /// 请求类别由 `details` 决定
    pub async fn create(
        &self,
        origin: &str,
        method: &str,
        params: Option<Value>,
        details: PendingDetails,
    ) -> Result<(Uuid, DecisionFuture), BrokerError> {
        let id = Uuid::new_v4();
        let kind = details.kind();
        let (tx, rx) = oneshot::channel();

        let request = PendingRequest {
            id,
            kind,
            origin: origin.to_string(),
            method: method.to_string(),
            params,
            created_at: chrono::Utc::now().timestamp_millis(),
            details,
        };
        self.inner.lock().insert(
            id,
            PendingEntry {
                request,
                state: RequestState::Created,
                surface_id: None,
                responder: tx,
            },
        );

        let url = self.surface_url(id);
        let surface_id = match self.inner.surface.open(id, &url).await {
            Ok(surface_id) => surface_id,
            Err(e) => {
                self.inner.lock().remove(&id);
                tracing::error!(request_id = %id, error = %e, "Failed to open approval surface");
                return Err(BrokerError::Surface(format!("{:#}", e)));
            }
        };

        // 界面打开期间请求可能已被决定
        let orphaned = {
            let mut map = self.inner.lock();
            match map.get_mut(&id) {
                Some(entry) => {
                    entry.surface_id = Some(surface_id);
                    if entry.state == RequestState::Created {
                        entry.state = RequestState::AwaitingDecision;
                    }
                    false
                }
                None => true,
            }
        };
        if orphaned {
            self.inner.close_surface(id, Some(surface_id)).await;
        }

        if let Some(timeout) = self.timeout {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                inner.abort(id, BrokerError::RequestExpired).await;
            });
        }

        crate::metrics::inc_approval_created();
        tracing::info!(
            request_id = %id,
            kind = kind.as_str(),
            origin,
            method,
            "Pending request created"
        );
        Ok((id, DecisionFuture { rx }))
    }

    /// 只读快照，供审批界面渲染
    pub fn get(&self, id: Uuid) -> Result<PendingRequest, BrokerError> {
        self.inner
            .lock()
            .get(&id)
            .map(|entry| entry.request.clone())
            .ok_or(BrokerError::RequestNotFound)
    }

    pub fn state(&self, id: Uuid) -> Option<RequestState> {
        self.inner.lock().get(&id).map(|entry| entry.state)
    }

    /// 记录用户决定；同一 id 仅第一次调用生效
    pub async fn decide(&self, id: Uuid, approved: bool) -> Result<(), BrokerError> {
        let entry = self
            .inner
            .lock()
            .remove(&id)
            .ok_or(BrokerError::RequestNotFound)?;

        let decision = Decision::from_approved(approved);
        // 界面已收到 id 但打开流程尚未回写状态
        let from = match entry.state {
            RequestState::Created => RequestState::AwaitingDecision,
            state => state,
        };
        RequestState::validate_transition(from, decision.terminal_state())?;

        self.inner.close_surface(id, entry.surface_id).await;

        let kind = entry.request.kind;
        let outcome = match (kind, decision) {
            // 连接被拒以错误结束，而不是返回 false
            (PendingKind::Connect, Decision::Rejected) => {
                Err(BrokerError::UserRejected(RejectionKind::Connection))
            }
            (_, decision) => Ok(decision),
        };

        crate::metrics::inc_approval_decided(approved);
        tracing::info!(
            request_id = %id,
            kind = kind.as_str(),
            origin = %entry.request.origin,
            approved,
            "Pending request decided"
        );

        if entry.responder.send(outcome).is_err() {
            tracing::debug!(request_id = %id, "Caller no longer waiting for decision");
        }
        Ok(())
    }

    /// 主动取消；调用方收到 `RequestCancelled`
    pub async fn cancel(&self, id: Uuid) -> bool {
        self.inner.abort(id, BrokerError::RequestCancelled).await
    }

    /// 取消全部挂起请求（关闭时）
    pub async fn cancel_all(&self) -> usize {
        let ids: Vec<Uuid> = self.inner.lock().keys().copied().collect();
        let mut cancelled = 0;
        for id in ids {
            if self.cancel(id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
