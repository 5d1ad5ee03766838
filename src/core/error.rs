//! 错误类型
//!
//! 按层划分：AgentError（单轮对话对调用方可见的致命错误）、LlmError（补全 / 嵌入服务）、
//! IndexError（向量索引）、SearchError（联网搜索）、IngestError（文档入库）。
//! 工具失败不在此列：它们以 ToolError 数据形式交给 finalize 步骤解释。

use thiserror::Error;

/// 单轮对话的致命错误；调用方只会收到最终回答或其中之一
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// decide 步骤声明了未知工具，或参数非法；不会派发任何工具
    #[error("Invalid tool call: {0}")]
    InvalidToolCall(String),

    /// decide / finalize 的补全调用失败（网络、配额、鉴权、超时、流中断）
    #[error("Completion failed: {0}")]
    CompletionFailed(String),

    /// 本轮结果未通过会话历史校验，未写入历史
    #[error("Turn rejected by history: {0}")]
    HistoryRejected(String),
}

impl AgentError {
    /// 对外暴露的稳定错误码
    pub fn reason(&self) -> &'static str {
        match self {
            AgentError::InvalidToolCall(_) => "invalid_tool_call",
            AgentError::CompletionFailed(_) => "completion_failed",
            AgentError::HistoryRejected(_) => "history_rejected",
        }
    }
}

/// 补全 / 嵌入服务错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Mock exhausted: {0}")]
    Mock(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::Transport(e.to_string())
    }
}

/// 向量索引错误
#[derive(Error, Debug, Clone)]
pub enum IndexError {
    #[error("Index unreachable: {0}")]
    Unreachable(String),

    #[error("Index HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid index response: {0}")]
    Malformed(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<reqwest::Error> for IndexError {
    fn from(e: reqwest::Error) -> Self {
        IndexError::Unreachable(e.to_string())
    }
}

/// 联网搜索错误
#[derive(Error, Debug, Clone)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Transport(String),

    #[error("Search HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid search response: {0}")]
    Malformed(String),

    #[error("Web search is not configured")]
    Disabled,
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        SearchError::Transport(e.to_string())
    }
}

/// 文档入库错误
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Missing namespace")]
    MissingNamespace,

    #[error("Document is empty: {0}")]
    EmptyDocument(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] LlmError),

    #[error("Upsert failed: {0}")]
    Index(#[from] IndexError),
}
