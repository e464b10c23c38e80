//! 领域画像：响应器的可配置部分（状态提示、角色设定、记忆标签、绑定工具）

use crate::config::DomainSection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBinding {
    pub name: String,
    pub query_suffix: Option<String>,
    /// 为 true 时工具失败即终止回答；否则降级为无工具上下文的回答
    pub essential: bool,
}

impl ToolBinding {
    /// 发给工具的查询：原消息加可选后缀
    pub fn query_for(&self, message: &str) -> String {
        match self.query_suffix.as_deref().map(str::trim) {
            Some(suffix) if !suffix.is_empty() => format!("{} {}", message.trim(), suffix),
            _ => message.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainProfile {
    pub name: String,
    pub status: String,
    pub persona: String,
    pub memory_label: String,
    pub tool: Option<ToolBinding>,
}

impl From<&DomainSection> for DomainProfile {
    fn from(section: &DomainSection) -> Self {
        let name = section.name.trim().to_lowercase();
        let status = if section.status.trim().is_empty() {
            format!("Working on your {} request...", name)
        } else {
            section.status.clone()
        };
        let persona = if section.persona.trim().is_empty() {
            format!("You are a helpful {} assistant.", name)
        } else {
            section.persona.clone()
        };
        let memory_label = section
            .memory_label
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| capitalize(&name));
        Self {
            name,
            status,
            persona,
            memory_label,
            tool: section.tool.as_ref().map(|t| ToolBinding {
                name: t.name.clone(),
                query_suffix: t.query_suffix.clone(),
                essential: t.essential,
            }),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// 长期记忆摘要："{label}: {消息前 100 个字符}"
pub fn memory_summary(label: &str, message: &str) -> String {
    let head: String = message.trim().chars().take(100).collect();
    format!("{}: {}", label, head)
}
