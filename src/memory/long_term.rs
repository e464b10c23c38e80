//! 内存版长期记忆：按用户隔离，按关键词重叠检索
//!
//! 超过 max_entries 时丢弃最旧记录。无真实向量，适合单进程部署与测试。

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::memory::gateway::{MemoryError, MemoryGateway, MemoryRecord};
use crate::memory::tokenizer::{overlap_score, tokenize_to_set};

/// 对候选记录打分排序：重叠数降序，同分时较新的在前
pub(crate) fn rank<'a, I>(records: I, query: &str, limit: usize) -> Vec<String>
where
    I: Iterator<Item = (&'a MemoryRecord, &'a HashSet<String>)>,
{
    let query_tokens = tokenize_to_set(query);
    if query_tokens.is_empty() || limit == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(usize, usize, &MemoryRecord)> = records
        .enumerate()
        .map(|(i, (record, tokens))| (overlap_score(&query_tokens, tokens), i, record))
        .filter(|(s, _, _)| *s > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
    scored
        .into_iter()
        .take(limit)
        .map(|(_, _, r)| r.summary.clone())
        .collect()
}

/// 记录与其分词结果（摘要 + query 元数据）
pub(crate) fn index(record: &MemoryRecord) -> HashSet<String> {
    let mut tokens = tokenize_to_set(&record.summary);
    if let Some(q) = record.metadata.get("query") {
        tokens.extend(tokenize_to_set(q));
    }
    tokens
}

#[derive(Clone)]
pub struct InMemoryGateway {
    store: Arc<RwLock<Vec<(MemoryRecord, HashSet<String>)>>>,
    max_entries: usize,
}

impl InMemoryGateway {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Vec::new())),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl MemoryGateway for InMemoryGateway {
    async fn write(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        if record.summary.trim().is_empty() {
            return Ok(());
        }
        let tokens = index(&record);
        let mut store = self
            .store
            .write()
            .map_err(|_| MemoryError::Backend("memory store lock poisoned".to_string()))?;
        store.push((record, tokens));
        let n = store.len();
        if n > self.max_entries {
            store.drain(0..n - self.max_entries);
        }
        Ok(())
    }

    async fn query(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<String>, MemoryError> {
        let store = self
            .store
            .read()
            .map_err(|_| MemoryError::Backend("memory store lock poisoned".to_string()))?;
        Ok(rank(
            store
                .iter()
                .filter(|(r, _)| r.user_id == user_id)
                .map(|(r, t)| (r, t)),
            query,
            limit,
        ))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::gateway::Metadata;

    fn record(user: &str, summary: &str) -> MemoryRecord {
        MemoryRecord::new(user, summary, Metadata::new())
    }

    #[tokio::test]
    async fn test_query_is_scoped_by_user() {
        let gw = InMemoryGateway::default();
        gw.write(record("alice", "Job Search: remote python jobs")).await.unwrap();
        gw.write(record("bob", "Job Search: python internships")).await.unwrap();

        let hits = gw.query("alice", "python", 5).await.unwrap();
        assert_eq!(hits, vec!["Job Search: remote python jobs".to_string()]);
    }

    #[tokio::test]
    async fn test_most_relevant_first_then_newest() {
        let gw = InMemoryGateway::default();
        gw.write(record("u", "Recipe Interest: vegan curry")).await.unwrap();
        gw.write(record("u", "Recipe Interest: vegan curry with rice")).await.unwrap();
        gw.write(record("u", "Travel Interest: curry tour in India")).await.unwrap();

        let hits = gw.query("u", "vegan curry rice", 2).await.unwrap();
        assert_eq!(hits[0], "Recipe Interest: vegan curry with rice");
        assert_eq!(hits[1], "Recipe Interest: vegan curry");

        let hits = gw.query("u", "curry", 3).await.unwrap();
        assert_eq!(hits[0], "Travel Interest: curry tour in India");
    }

    #[tokio::test]
    async fn test_metadata_query_is_indexed() {
        let gw = InMemoryGateway::default();
        let mut meta = Metadata::new();
        meta.insert("query".to_string(), "index funds for beginners".to_string());
        gw.write(MemoryRecord::new("u", "Financial Query", meta)).await.unwrap();
        let hits = gw.query("u", "index funds", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_bounded_size() {
        let gw = InMemoryGateway::new(2);
        gw.write(record("u", "first entry")).await.unwrap();
        gw.write(record("u", "second entry")).await.unwrap();
        gw.write(record("u", "third entry")).await.unwrap();
        assert_eq!(gw.len(), 2);
        assert!(gw.query("u", "first", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let gw = InMemoryGateway::default();
        gw.write(record("u", "something")).await.unwrap();
        assert!(gw.query("u", "", 5).await.unwrap().is_empty());
    }
}
