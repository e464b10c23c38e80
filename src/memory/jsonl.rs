//! JSONL 文件版长期记忆
//!
//! 每条 MemoryRecord 一行 JSON，追加写入；查询时整文件读取并按关键词重叠排序。
//! 文件中无法解析的行会被跳过（记 warn），不影响其余记录。

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::memory::gateway::{MemoryError, MemoryGateway, MemoryRecord};
use crate::memory::long_term::{index, rank};

pub struct JsonlMemoryGateway {
    path: PathBuf,
    /// 串行化追加写，避免并发写入交错
    write_lock: Mutex<()>,
}

impl JsonlMemoryGateway {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取全部记录；文件不存在时返回空
    async fn load(&self) -> Result<Vec<MemoryRecord>, MemoryError> {
        let data = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for (lineno, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryRecord>(line) {
                Ok(r) => records.push(r),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = lineno + 1,
                    error = %e,
                    "Skipping malformed memory record"
                ),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl MemoryGateway for JsonlMemoryGateway {
    async fn write(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        if record.summary.trim().is_empty() {
            return Ok(());
        }
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(p) = self.path.parent() {
            if !p.as_os_str().is_empty() {
                fs::create_dir_all(p).await?;
            }
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn query(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<String>, MemoryError> {
        let records: Vec<MemoryRecord> = self
            .load()
            .await?
            .into_iter()
            .filter(|r| r.user_id == user_id)
            .collect();
        let indexed: Vec<(MemoryRecord, HashSet<String>)> = records
            .into_iter()
            .map(|r| {
                let tokens = index(&r);
                (r, tokens)
            })
            .collect();
        Ok(rank(indexed.iter().map(|(r, t)| (r, t)), query, limit))
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::gateway::Metadata;

    #[tokio::test]
    async fn test_write_then_query_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.jsonl");

        let gw = JsonlMemoryGateway::new(&path);
        gw.write(MemoryRecord::new("u1", "Travel Interest: Kyoto in autumn", Metadata::new()))
            .await
            .unwrap();
        gw.write(MemoryRecord::new("u2", "Travel Interest: Kyoto hostels", Metadata::new()))
            .await
            .unwrap();

        let reopened = JsonlMemoryGateway::new(&path);
        let hits = reopened.query("u1", "kyoto trip", 5).await.unwrap();
        assert_eq!(hits, vec!["Travel Interest: Kyoto in autumn".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gw = JsonlMemoryGateway::new(dir.path().join("none.jsonl"));
        assert!(gw.query("u", "anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.jsonl");
        let good = serde_json::to_string(&MemoryRecord::new(
            "u",
            "Shopping Interest: mechanical keyboard",
            Metadata::new(),
        ))
        .unwrap();
        std::fs::write(&path, format!("{{not json\n{}\n", good)).unwrap();

        let gw = JsonlMemoryGateway::new(&path);
        let hits = gw.query("u", "keyboard", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_write_to_directory_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let gw = JsonlMemoryGateway::new(dir.path());
        let res = gw
            .write(MemoryRecord::new("u", "summary", Metadata::new()))
            .await;
        assert!(matches!(res, Err(MemoryError::Io(_))));
    }

    #[tokio::test]
    async fn test_ranking_matches_in_memory_backend() {
        let dir = tempfile::tempdir().unwrap();
        let jsonl = JsonlMemoryGateway::new(dir.path().join("memory.jsonl"));
        let memory = crate::memory::InMemoryGateway::new(16);

        let mut meta = Metadata::new();
        meta.insert("query".to_string(), "remote rust positions".to_string());
        let records = [
            MemoryRecord::new("u", "Job Search: backend roles", meta),
            MemoryRecord::new("u", "Recipe Interest: rust colored beet salad", Metadata::new()),
            MemoryRecord::new("u", "Travel Interest: Lisbon", Metadata::new()),
        ];
        for r in records {
            jsonl.write(r.clone()).await.unwrap();
            memory.write(r).await.unwrap();
        }

        let from_file = jsonl.query("u", "remote rust", 5).await.unwrap();
        let from_memory = memory.query("u", "remote rust", 5).await.unwrap();
        assert_eq!(from_file, from_memory);
        assert_eq!(from_file[0], "Job Search: backend roles");
        assert_eq!(from_file.len(), 2);
    }
}
