//! 响应器：给定请求与记忆上下文，流式产出 Fragment
//!
//! 生产者跑在独立 task 中，经容量为 1 的通道交给消费者：消费者不拉取，生产者就停在 emit 上。
//! [`fragment_stream`] 集中保证「至少一个片段」：生产者返回错误或 panic 时补一个 error 片段，
//! 观察到取消时补一个 cancelled 片段。

pub mod domain;
pub mod profiles;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{Fragment, Request};

pub use domain::DomainResponder;
pub use profiles::{DomainProfile, ToolBinding};

pub type FragmentStream = Pin<Box<dyn Stream<Item = Fragment> + Send>>;

/// 响应器声明的依赖及其就绪状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub name: String,
    pub ready: bool,
    /// 不就绪时该领域是否无法回答
    pub essential: bool,
}

/// 领域响应器 trait：无跨请求可变状态，可被多个请求并发调用
pub trait Responder: Send + Sync {
    fn stream(
        &self,
        request: Arc<Request>,
        memory_context: Vec<String>,
        cancel: CancellationToken,
    ) -> FragmentStream;

    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }
}

/// 生产者提前结束的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProduceError {
    /// 被取消或消费者已离开
    Stopped,
    /// 不可恢复的错误，消息会作为终止 error 片段下发
    Failed(String),
}

/// 生产者一侧的写入端
pub struct FragmentSink {
    tx: mpsc::Sender<Fragment>,
    cancel: CancellationToken,
    emitted: Arc<AtomicUsize>,
}

impl FragmentSink {
    /// 发送一个片段；已取消或消费者已离开时返回 Stopped
    pub async fn emit(&self, fragment: Fragment) -> Result<(), ProduceError> {
        if self.cancel.is_cancelled() {
            return Err(ProduceError::Stopped);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProduceError::Stopped),
            sent = self.tx.send(fragment) => {
                sent.map_err(|_| ProduceError::Stopped)?;
                self.emitted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// 把生产者包装为 FragmentStream
pub fn fragment_stream<F, Fut>(cancel: CancellationToken, producer: F) -> FragmentStream
where
    F: FnOnce(FragmentSink) -> Fut,
    Fut: Future<Output = Result<(), ProduceError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Fragment>(1);
    let emitted = Arc::new(AtomicUsize::new(0));
    let sink = FragmentSink {
        tx: tx.clone(),
        cancel: cancel.clone(),
        emitted: Arc::clone(&emitted),
    };
    let task = tokio::spawn(producer(sink));

    tokio::spawn(async move {
        let outcome = task.await;
        let tail = match outcome {
            _ if cancel.is_cancelled() => Some(Fragment::Cancelled),
            Ok(Ok(())) if emitted.load(Ordering::SeqCst) == 0 => {
                Some(Fragment::fatal("responder produced no output"))
            }
            Ok(Ok(())) | Ok(Err(ProduceError::Stopped)) => None,
            Ok(Err(ProduceError::Failed(message))) => Some(Fragment::fatal(message)),
            Err(e) if e.is_panic() => {
                tracing::error!("Responder task panicked");
                Some(Fragment::fatal("responder panicked"))
            }
            Err(_) => Some(Fragment::fatal("responder task aborted")),
        };
        if let Some(fragment) = tail {
            let _ = tx.send(fragment).await;
        }
    });

    Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|fragment| (fragment, rx))
    }))
}
