//! 工具层：Tool trait 与注册表、带超时的执行器、Web 搜索

pub mod executor;
pub mod registry;
pub mod search;

pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use search::{register_search_tools, SearchKind, WebSearchTool};
