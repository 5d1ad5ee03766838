//! 工具层：封闭的工具调用 / 结果类型、参数 Schema、检索与联网搜索适配器、执行器

pub mod call;
pub mod executor;
pub mod result;
pub mod retrieve;
pub mod schema;
pub mod web_search;

pub use call::{ToolCall, ToolName};
pub use executor::ToolExecutor;
pub use result::{
    DocumentHit, DocumentHits, ToolError, ToolErrorCode, ToolResult, WebHits, WebResult,
};
pub use retrieve::RetrieverAdapter;
pub use schema::decide_tool_schemas;
pub use web_search::{DisabledSearch, TavilySearch, WebSearchAdapter, WebSearchProvider};
