//! 请求监管：取消令牌与在途请求计数
//!
//! 进程级持有根 CancellationToken（关闭时取消全部请求）；每个请求拿到一个子 token，
//! 调用方取消或截止时间到期只取消自己的子 token。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// 进程级监管者，可在多个编排任务间共享
#[derive(Debug)]
pub struct RequestSupervisor {
    /// 关闭时触发
    root: CancellationToken,
    /// 在途请求数
    active: Arc<AtomicUsize>,
}

impl RequestSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 为新请求登记并分配子 token；guard 释放时计数减一
    pub fn begin(&self) -> RequestGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            token: self.root.child_token(),
            active: Arc::clone(&self.active),
        }
    }

    /// 取消所有在途请求（进程关闭）
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }

    pub fn active_requests(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for RequestSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 单个请求的登记凭证
#[derive(Debug)]
pub struct RequestGuard {
    token: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl RequestGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_tracks_active_requests() {
        let sup = RequestSupervisor::new();
        let g1 = sup.begin();
        let g2 = sup.begin();
        assert_eq!(sup.active_requests(), 2);
        drop(g1);
        assert_eq!(sup.active_requests(), 1);
        drop(g2);
        assert_eq!(sup.active_requests(), 0);
    }

    #[test]
    fn test_child_cancel_is_isolated() {
        let sup = RequestSupervisor::new();
        let a = sup.begin();
        let b = sup.begin();
        a.token().cancel();
        assert!(a.token().is_cancelled());
        assert!(!b.token().is_cancelled());
    }

    #[test]
    fn test_shutdown_cancels_all() {
        let sup = RequestSupervisor::new();
        let a = sup.begin();
        let b = sup.begin();
        sup.shutdown();
        assert!(sup.is_shutdown());
        assert!(a.token().is_cancelled());
        assert!(b.token().is_cancelled());
    }
}
