//! 编排器：分类 → 解析响应器 → 流式转发 → 记忆写入
//!
//! 每个请求一个 tokio task。响应器 → 编排器 → 调用方是一串有界 mpsc 通道，
//! 调用方不读，上游就不再生产。请求的结束总是一个显式终止事件（done / error / cancelled）。
//!
//! 取消有三个来源：调用方（handle.cancel() 或丢弃接收端）、截止时间、进程关闭。
//! 三者都会先取消响应器的子 token，在宽限时间内排空其剩余输出，再下发唯一一个 cancelled 事件。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::AppConfig;
use crate::core::error::{CancelReason, ConciergeError, FailureKind};
use crate::core::events::{Fragment, StreamEvent};
use crate::core::request::{new_request_id, Request};
use crate::core::state::{RequestLifecycle, RequestPhase};
use crate::core::supervisor::{RequestGuard, RequestSupervisor};
use crate::memory::{MemoryGateway, MemoryRecord, Metadata};
use crate::responders::profiles::memory_summary;
use crate::responders::FragmentStream;
use crate::routing::{Classifier, Domain, DomainHealth, DomainRegistry, RoutingDecision};

/// 编排参数（由 AppConfig 派生）
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub deadline: Duration,
    pub classify_timeout: Duration,
    pub relay_buffer: usize,
    pub cancel_grace: Duration,
    pub memory_query_limit: usize,
    pub memory_query_timeout: Duration,
}

impl From<&AppConfig> for OrchestratorSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            deadline: cfg.deadline(),
            classify_timeout: Duration::from_millis(cfg.orchestrator.classify_timeout_ms),
            relay_buffer: cfg.orchestrator.relay_buffer.max(1),
            cancel_grace: Duration::from_millis(cfg.orchestrator.cancel_grace_ms),
            memory_query_limit: cfg.memory.query_limit,
            memory_query_timeout: Duration::from_millis(cfg.memory.query_timeout_ms),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// 请求结束后的汇总（供调用方与测试检查）
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub request_id: String,
    pub phase: RequestPhase,
    pub decision: Option<RoutingDecision>,
    /// 已转发给调用方的非终止片段数
    pub fragments: usize,
    pub failure: Option<FailureKind>,
    pub cancel_reason: Option<CancelReason>,
}

/// 一次流式请求的调用方句柄
pub struct RequestHandle {
    id: String,
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    task: JoinHandle<RequestOutcome>,
}

impl RequestHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 请求取消；之后 recv 只会再返回终止事件
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 下一个事件；终止事件之后返回 None
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        loop {
            let event = self.events.recv().await?;
            // 取消前已进入缓冲区的正文不再交给调用方
            if self.cancel.is_cancelled() && !event.is_terminal() {
                continue;
            }
            return Some(event);
        }
    }

    /// 读完全部事件并等待编排 task 结束
    pub async fn collect(
        mut self,
    ) -> Result<(Vec<StreamEvent>, RequestOutcome), tokio::task::JoinError> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        let outcome = self.task.await?;
        Ok((events, outcome))
    }

    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<StreamEvent>,
        CancellationToken,
        JoinHandle<RequestOutcome>,
    ) {
        (self.events, self.cancel, self.task)
    }
}

/// 编排器：只读共享的注册表、分类器与记忆网关；可克隆，克隆共享同一组件
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<DomainRegistry>,
    classifier: Arc<Classifier>,
    memory: Arc<dyn MemoryGateway>,
    supervisor: Arc<RequestSupervisor>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<DomainRegistry>,
        classifier: Arc<Classifier>,
        memory: Arc<dyn MemoryGateway>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            classifier,
            memory,
            supervisor: Arc::new(RequestSupervisor::new()),
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<DomainRegistry> {
        &self.registry
    }

    pub fn memory(&self) -> &Arc<dyn MemoryGateway> {
        &self.memory
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn domains(&self) -> &[Domain] {
        self.registry.list()
    }

    pub fn health(&self) -> Vec<DomainHealth> {
        self.registry.health()
    }

    pub fn active_requests(&self) -> usize {
        self.supervisor.active_requests()
    }

    /// 取消全部在途请求
    pub fn shutdown(&self) {
        tracing::info!(active = self.supervisor.active_requests(), "Shutting down orchestrator");
        self.supervisor.shutdown();
    }

    /// 非流式路由查询：与流式请求使用同一个分类器
    pub async fn route(&self, request: &Request) -> RoutingDecision {
        self.classify_bounded(request).await
    }

    async fn classify_bounded(&self, request: &Request) -> RoutingDecision {
        match timeout(self.settings.classify_timeout, self.classifier.classify(request)).await {
            Ok(decision) => decision,
            Err(_) => self.classifier.fallback_decision(
                "classification timed out",
                Some(format!(
                    "classification exceeded {:?}",
                    self.settings.classify_timeout
                )),
            ),
        }
    }

    /// 提交请求：立即返回句柄，处理在后台 task 中进行
    pub fn stream(&self, request: Request) -> RequestHandle {
        let id = new_request_id();
        let guard = self.supervisor.begin();
        let cancel = guard.token();
        let (tx, rx) = mpsc::channel(self.settings.relay_buffer);

        let span = tracing::info_span!("request", id = %id, user = %request.user_id);
        let this = self.clone();
        let run_id = id.clone();
        let run_cancel = cancel.clone();
        let task = tokio::spawn(
            async move { this.run(run_id, Arc::new(request), tx, run_cancel, guard).await }
                .instrument(span),
        );

        RequestHandle {
            id,
            events: rx,
            cancel,
            task,
        }
    }

    async fn run(
        self,
        id: String,
        request: Arc<Request>,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
        _guard: RequestGuard,
    ) -> RequestOutcome {
        let deadline = Instant::now() + request.deadline_or(self.settings.deadline);
        let mut lifecycle = RequestLifecycle::new(id.clone());
        let mut outcome = RequestOutcome {
            request_id: id,
            phase: RequestPhase::Received,
            decision: None,
            fragments: 0,
            failure: None,
            cancel_reason: None,
        };

        lifecycle.advance(RequestPhase::Classifying);
        let decision = match guarded(
            self.classify_bounded(&request),
            &cancel,
            &tx,
            deadline,
        )
        .await
        {
            Ok(d) => d,
            Err(reason) => {
                return self
                    .finish_cancelled(&mut lifecycle, outcome, &tx, reason, None)
                    .await;
            }
        };
        tracing::info!(
            domain = %decision.domain,
            tier = %decision.tier,
            degraded = decision.degraded.as_deref().unwrap_or(""),
            rationale = %decision.rationale,
            "Routed request"
        );
        outcome.decision = Some(decision.clone());

        lifecycle.advance(RequestPhase::Dispatching);
        let responder = match self.registry.resolve(&decision.domain) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "Dispatch failed");
                return finish_failed(&mut lifecycle, outcome, &tx, FailureKind::Configuration, e)
                    .await;
            }
        };

        let memory_context = match guarded(
            self.query_memory(&request),
            &cancel,
            &tx,
            deadline,
        )
        .await
        {
            Ok(ctx) => ctx,
            Err(reason) => {
                return self
                    .finish_cancelled(&mut lifecycle, outcome, &tx, reason, None)
                    .await;
            }
        };

        lifecycle.advance(RequestPhase::Streaming);
        let responder_token = cancel.child_token();
        let mut fragments =
            responder.stream(Arc::clone(&request), memory_context, responder_token.clone());
        let mut response_chars = 0usize;

        loop {
            let next = match guarded(fragments.next(), &cancel, &tx, deadline).await {
                Ok(next) => next,
                Err(reason) => {
                    responder_token.cancel();
                    return self
                        .finish_cancelled(&mut lifecycle, outcome, &tx, reason, Some(fragments))
                        .await;
                }
            };

            let fragment = match next {
                Some(f) => f,
                None => break,
            };
            match fragment {
                Fragment::Error {
                    message,
                    recoverable: false,
                } => {
                    tracing::warn!(error = %message, fragments = outcome.fragments, "Responder failed");
                    return finish_failed(
                        &mut lifecycle,
                        outcome,
                        &tx,
                        FailureKind::Responder,
                        ConciergeError::Responder(message),
                    )
                    .await;
                }
                Fragment::Cancelled => {
                    // 只有请求 token 被取消时响应器才会自行结束
                    return self
                        .finish_cancelled(&mut lifecycle, outcome, &tx, CancelReason::Caller, None)
                        .await;
                }
                other => {
                    if let Fragment::Content { text } = &other {
                        response_chars += text.chars().count();
                    }
                    let Some(event) = StreamEvent::relay(other) else {
                        continue;
                    };
                    tracing::debug!(index = outcome.fragments, "relay fragment");
                    match guarded(tx.send(event), &cancel, &tx, deadline).await {
                        Ok(Ok(())) => outcome.fragments += 1,
                        Ok(Err(_)) | Err(CancelReason::Caller) => {
                            responder_token.cancel();
                            return self
                                .finish_cancelled(
                                    &mut lifecycle,
                                    outcome,
                                    &tx,
                                    CancelReason::Caller,
                                    Some(fragments),
                                )
                                .await;
                        }
                        Err(reason) => {
                            responder_token.cancel();
                            return self
                                .finish_cancelled(&mut lifecycle, outcome, &tx, reason, Some(fragments))
                                .await;
                        }
                    }
                }
            }
        }

        lifecycle.advance(RequestPhase::Completed);
        outcome.phase = lifecycle.phase();
        if let Some(decision) = &outcome.decision {
            self.spawn_memory_write(&request, decision, &outcome.request_id, response_chars);
            tracing::info!(
                domain = %decision.domain,
                fragments = outcome.fragments,
                "Request completed"
            );
            let _ = tx
                .send(StreamEvent::Done {
                    fragments: outcome.fragments,
                    domain: decision.domain.to_string(),
                })
                .await;
        }
        outcome
    }

    /// 带独立超时的记忆查询；失败或超时都退回空上下文
    async fn query_memory(&self, request: &Request) -> Vec<String> {
        if !self.memory.enabled() || request.message.trim().is_empty() {
            return Vec::new();
        }
        let query = self.memory.query(
            &request.user_id,
            &request.message,
            self.settings.memory_query_limit,
        );
        match timeout(self.settings.memory_query_timeout, query).await {
            Ok(Ok(context)) => {
                tracing::debug!(hits = context.len(), "memory context");
                context
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Memory query failed, continuing without context");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.settings.memory_query_timeout,
                    "Memory query timed out, continuing without context"
                );
                Vec::new()
            }
        }
    }

    /// 发出即忘：写入结果只进日志，不影响已确定的终止事件
    fn spawn_memory_write(
        &self,
        request: &Request,
        decision: &RoutingDecision,
        request_id: &str,
        response_chars: usize,
    ) {
        if !self.memory.enabled() || request.message.trim().is_empty() {
            return;
        }
        let label = self.registry.memory_label(&decision.domain);
        let mut metadata = Metadata::new();
        metadata.insert("domain".to_string(), decision.domain.to_string());
        metadata.insert("query".to_string(), request.message.clone());
        metadata.insert("rationale".to_string(), decision.rationale.clone());
        metadata.insert("tier".to_string(), decision.tier.to_string());
        metadata.insert("request_id".to_string(), request_id.to_string());
        metadata.insert("response_chars".to_string(), response_chars.to_string());
        if let Some(session) = &request.session_id {
            metadata.insert("session_id".to_string(), session.clone());
        }
        let record = MemoryRecord::new(
            request.user_id.clone(),
            memory_summary(&label, &request.message),
            metadata,
        );

        let memory = Arc::clone(&self.memory);
        tokio::spawn(
            async move {
                if let Err(e) = memory.write(record).await {
                    tracing::warn!(
                        backend = memory.name(),
                        "{}",
                        ConciergeError::MemoryWriteFailure(e.to_string())
                    );
                }
            }
            .in_current_span(),
        );
    }

    /// 取消收尾：排空响应器剩余输出（丢弃），然后发送唯一的 cancelled 事件
    async fn finish_cancelled(
        &self,
        lifecycle: &mut RequestLifecycle,
        mut outcome: RequestOutcome,
        tx: &mpsc::Sender<StreamEvent>,
        reason: CancelReason,
        pending: Option<FragmentStream>,
    ) -> RequestOutcome {
        // 根 token 被取消时，子 token 的取消归因于进程关闭
        let reason = match reason {
            CancelReason::Caller if self.supervisor.is_shutdown() => CancelReason::Shutdown,
            other => other,
        };
        if let Some(mut stream) = pending {
            let drain = async {
                while let Some(fragment) = stream.next().await {
                    if fragment == Fragment::Cancelled {
                        break;
                    }
                }
            };
            if timeout(self.settings.cancel_grace, drain).await.is_err() {
                tracing::debug!("Responder did not stop within grace period");
            }
        }
        lifecycle.advance(RequestPhase::Failed);
        outcome.phase = lifecycle.phase();
        outcome.failure = Some(FailureKind::Cancelled);
        outcome.cancel_reason = Some(reason);
        tracing::info!(
            reason = %reason,
            fragments = outcome.fragments,
            "{}",
            ConciergeError::StreamCancelled(reason)
        );
        let _ = tx.send(StreamEvent::Cancelled { reason }).await;
        outcome
    }
}

async fn finish_failed(
    lifecycle: &mut RequestLifecycle,
    mut outcome: RequestOutcome,
    tx: &mpsc::Sender<StreamEvent>,
    kind: FailureKind,
    error: ConciergeError,
) -> RequestOutcome {
    lifecycle.advance(RequestPhase::Failed);
    outcome.phase = lifecycle.phase();
    outcome.failure = Some(kind);
    let message = match error {
        ConciergeError::Responder(message) => message,
        other => other.to_string(),
    };
    let _ = tx.send(StreamEvent::Error { kind, message }).await;
    outcome
}

/// 等待 fut，同时观察调用方取消、调用方离开与截止时间
async fn guarded<F: Future>(
    fut: F,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<StreamEvent>,
    deadline: Instant,
) -> Result<F::Output, CancelReason> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CancelReason::Caller),
        _ = tx.closed() => Err(CancelReason::Caller),
        _ = sleep_until(deadline) => Err(CancelReason::Deadline),
        out = fut => Ok(out),
    }
}
