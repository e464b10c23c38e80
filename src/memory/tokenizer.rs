//! 分词模块
//!
//! 关键词路由与长期记忆检索共用：含 CJK 字符时使用 jieba-rs 搜索引擎模式分词，
//! 其余文本按非字母数字字符切分。输出统一小写。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 全局 Jieba 实例（延迟初始化）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

/// 判断字符是否为 CJK（中日韩）字符
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{F900}'..='\u{FAFF}' |
        '\u{3040}'..='\u{309F}' |
        '\u{30A0}'..='\u{30FF}'
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

/// 有序分词（保留重复，用于短语匹配）
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if contains_cjk(text) {
        get_jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| s.chars().any(|c| c.is_alphanumeric()))
            .collect()
    } else {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect()
    }
}

/// 分词并返回词集合（检索用，丢弃单字符英文词）
pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text)
        .into_iter()
        .filter(|s| s.chars().count() > 1 || s.chars().next().map(is_cjk).unwrap_or(false))
        .collect()
}

/// 两个词集合的重叠分数（交集大小）
pub fn overlap_score(set1: &HashSet<String>, set2: &HashSet<String>) -> usize {
    set1.intersection(set2).count()
}
