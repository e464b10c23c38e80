//! 长期记忆网关：按用户追加写入、按相似度查询
//!
//! 编排器把查询结果当作参考上下文；查询失败或为空都不能阻塞响应器，
//! 写入是完成之后的「发出即忘」任务，失败只记日志。

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 元数据（domain、query 以及任意键值）
pub type Metadata = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Memory I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory record encoding error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Memory backend error: {0}")]
    Backend(String),
}

/// 一次交互的摘要记录，提交后即归网关所有
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub user_id: String,
    pub summary: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(user_id: impl Into<String>, summary: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            user_id: user_id.into(),
            summary: summary.into(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// 记忆网关 trait：追加写入与相似度检索（最相关在前）
#[async_trait]
pub trait MemoryGateway: Send + Sync {
    async fn write(&self, record: MemoryRecord) -> Result<(), MemoryError>;

    async fn query(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<String>, MemoryError>;

    /// 后端名称（健康检查与日志用）
    fn name(&self) -> &str;

    /// 是否启用（Noop 实现返回 false）
    fn enabled(&self) -> bool {
        true
    }
}

/// 空实现：未启用长期记忆时使用
#[derive(Clone, Default)]
pub struct NoopMemoryGateway;

#[async_trait]
impl MemoryGateway for NoopMemoryGateway {
    async fn write(&self, _record: MemoryRecord) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn query(
        &self,
        _user_id: &str,
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<String>, MemoryError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "none"
    }

    fn enabled(&self) -> bool {
        false
    }
}
