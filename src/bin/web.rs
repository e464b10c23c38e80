//! Concierge Web 服务
//!
//! 启动: cargo run --bin concierge-web --features web
//! 端口: CONCIERGE_WEB_PORT（默认 8080）
//!
//! - GET  /health               进程与领域就绪概况
//! - GET  /agents               各领域依赖健康
//! - POST /route                路由查询（不产生回答）
//! - POST /multi-agent/stream   SSE，每个事件是一条 JSON StreamEvent
//! - POST /session              记录会话初始化到长期记忆

#![cfg(feature = "web")]

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use concierge::config::load_config;
use concierge::core::{create_orchestrator, Orchestrator, Request, RequestHandle};
use concierge::memory::{MemoryRecord, Message, Metadata};
use concierge::routing::{DomainHealth, RoutingDecision};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};

struct AppState {
    orchestrator: Orchestrator,
}

fn default_user() -> String {
    "anonymous".to_string()
}

/// 路由与流式接口共用的请求体
#[derive(Debug, Deserialize)]
struct ChatBody {
    message: String,
    #[serde(default = "default_user")]
    user_id: String,
    #[serde(default)]
    history: Vec<Message>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    deadline_ms: Option<u64>,
}

impl From<ChatBody> for Request {
    fn from(body: ChatBody) -> Self {
        let mut req = Request::new(body.user_id, body.message).with_history(body.history);
        req.session_id = body.session_id;
        req.deadline_ms = body.deadline_ms;
        req
    }
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct SessionReply {
    session_id: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthReply {
    status: &'static str,
    domains: usize,
    ready_domains: usize,
    active_requests: usize,
    memory: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    concierge::observability::init();

    let config_path = std::env::var("CONCIERGE_CONFIG").ok().map(Into::into);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    let orchestrator = create_orchestrator(&cfg).context("Failed to build orchestrator")?;
    let state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/agents", get(agents))
        .route("/route", post(route))
        .route("/multi-agent/stream", post(stream_answer))
        .route("/session", post(init_session))
        .with_state(state);

    let port = std::env::var("CONCIERGE_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Concierge Web: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            orchestrator.shutdown();
        })
        .await?;

    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReply> {
    let orch = &state.orchestrator;
    let health = orch.health();
    Json(HealthReply {
        status: "ok",
        domains: health.len(),
        ready_domains: health.iter().filter(|h| h.ready).count(),
        active_requests: orch.active_requests(),
        memory: orch.memory().name().to_string(),
    })
}

async fn agents(State(state): State<Arc<AppState>>) -> Json<Vec<DomainHealth>> {
    Json(state.orchestrator.health())
}

async fn route(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Json<RoutingDecision> {
    let request = Request::from(body);
    Json(state.orchestrator.route(&request).await)
}

/// SSE：客户端断开即丢弃句柄，编排器按调用方取消处理
async fn stream_answer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let handle = state.orchestrator.stream(Request::from(body));
    tracing::debug!(id = %handle.id(), "SSE stream opened");

    let events = stream::unfold(handle, |mut handle: RequestHandle| async move {
        let event = handle.recv().await?;
        let data = serde_json::to_string(&event).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","kind":"responder","message":"{}"}}"#, e)
        });
        Some((Ok(Event::default().data(data)), handle))
    });

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

async fn init_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SessionBody>,
) -> Result<Json<SessionReply>, (StatusCode, String)> {
    let user_id = body.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "user_id is required".to_string()));
    }
    let session_id = format!("session-{}", user_id);

    let mut metadata = Metadata::new();
    metadata.insert("event".to_string(), "session_start".to_string());
    metadata.insert("session_id".to_string(), session_id.clone());
    let record = MemoryRecord::new(
        user_id.clone(),
        format!("User {} initialized", user_id),
        metadata,
    );
    if let Err(e) = state.orchestrator.memory().write(record).await {
        tracing::warn!(user = %user_id, error = %e, "Failed to record session start");
    }

    Ok(Json(SessionReply {
        session_id,
        status: "initialized",
    }))
}
