use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};

use crate::{app_state::AppState, error::AppError};

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// 控制消息入口：请求体为一条带 `type` 的消息
///
/// 业务失败以 `{ "error": ... }` 形式返回 200；只有请求体无法解析时返回 400。
pub async fn post_message(
    State(st): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(raw) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;
    Ok(Json(st.control.handle_value(raw).await))
}

/// 页面事件流（accountsChanged / chainChanged）
pub async fn events_stream(
    State(st): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let rx = st.events.subscribe();
    tracing::debug!(subscribers = st.events.subscriber_count(), "Page context subscribed");

    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|envelope| {
            let data = serde_json::to_string(&envelope).unwrap_or_default();
            Ok(Event::default().event(envelope.event.name()).data(data))
        });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text(""))
}

/// 审批界面指令流（打开 / 关闭）
pub async fn surfaces_stream(
    State(st): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let stream = BroadcastStream::new(st.surfaces.subscribe())
        .filter_map(|result| result.ok())
        .map(|command| {
            let data = serde_json::to_string(&command).unwrap_or_default();
            Ok(Event::default().event("surface").data(data))
        });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text(""))
}

#[derive(Debug, Serialize)]
pub struct Healthz {
    pub status: String,
    pub mode: String,
    pub chain_id: i64,
    pub unlocked: bool,
    pub pending_requests: usize,
    pub version: String,
}

pub async fn healthz(State(st): State<Arc<AppState>>) -> Json<Healthz> {
    let snapshot = st.wallet.snapshot().await;
    Json(Healthz {
        status: "ok".into(),
        mode: st.wallet.mode().to_string(),
        chain_id: snapshot.selected_chain_id,
        unlocked: snapshot.unlocked,
        pending_requests: st.approvals.len(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

pub async fn metrics() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render_prometheus(),
    )
        .into_response()
}
