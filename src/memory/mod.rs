//! 记忆层：对话消息（短期）、长期记忆网关（内存 / JSONL / 关闭）、分词

pub mod conversation;
pub mod gateway;
pub mod jsonl;
pub mod long_term;
pub mod tokenizer;

use std::sync::Arc;

use crate::config::{MemoryBackend, MemorySection};

pub use conversation::{recent_turns, Message, Role};
pub use gateway::{MemoryError, MemoryGateway, MemoryRecord, Metadata, NoopMemoryGateway};
pub use jsonl::JsonlMemoryGateway;
pub use long_term::InMemoryGateway;

/// 按配置创建记忆网关
pub fn create_memory_gateway(section: &MemorySection) -> Arc<dyn MemoryGateway> {
    match section.backend {
        MemoryBackend::Memory => Arc::new(InMemoryGateway::new(section.max_entries)),
        MemoryBackend::Jsonl => Arc::new(JsonlMemoryGateway::new(section.jsonl_path())),
        MemoryBackend::None => Arc::new(NoopMemoryGateway),
    }
}
