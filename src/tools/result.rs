//! 工具结果：DocumentHits / WebHits / ToolError 三选一
//!
//! ToolError 是数据而不是异常：它会原样写入历史，由 finalize 步骤向用户解释缺口。

use serde::{Deserialize, Serialize};

/// 检索到的一段文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHit {
    pub text: String,
    pub source_name: String,
    pub source_id: String,
    pub chunk_index: u32,
}

/// 文档检索结果（相似度从高到低，最多 top_k 条）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentHits {
    pub query: String,
    pub hits: Vec<DocumentHit>,
}

impl DocumentHits {
    /// 去重后的来源文件名（保持首次出现顺序），即 finalize 允许引用的名字
    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for hit in &self.hits {
            if !names.contains(&hit.source_name) {
                names.push(hit.source_name.clone());
            }
        }
        names
    }
}

/// 单条联网搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// 联网搜索结果：有序结果 + 可选的服务方综合回答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebHits {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub results: Vec<WebResult>,
}

/// 工具失败码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorCode {
    VectorSearchFailed,
    WebSearchFailed,
}

impl ToolErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorCode::VectorSearchFailed => "vector_search_failed",
            ToolErrorCode::WebSearchFailed => "web_search_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolError {
    pub error_code: ToolErrorCode,
    pub message: String,
}

impl ToolError {
    pub fn vector_search_failed(message: impl Into<String>) -> Self {
        Self {
            error_code: ToolErrorCode::VectorSearchFailed,
            message: message.into(),
        }
    }

    pub fn web_search_failed(message: impl Into<String>) -> Self {
        Self {
            error_code: ToolErrorCode::WebSearchFailed,
            message: message.into(),
        }
    }
}

/// 工具结果（写入历史时序列化为带 kind 标签的 JSON）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolResult {
    DocumentHits(DocumentHits),
    WebHits(WebHits),
    ToolError(ToolError),
}

impl ToolResult {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!("{{\"kind\":\"tool_error\",\"errorCode\":\"serialization\",\"message\":\"{e}\"}}")
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::ToolError(_))
    }

    /// 结果概要，用于日志与事件预览
    pub fn summary(&self) -> String {
        match self {
            ToolResult::DocumentHits(d) => format!(
                "{} passage(s) from [{}]",
                d.hits.len(),
                d.source_names().join(", ")
            ),
            ToolResult::WebHits(w) => format!(
                "{} web result(s){}",
                w.results.len(),
                if w.answer.is_some() { " + answer" } else { "" }
            ),
            ToolResult::ToolError(e) => format!("{}: {}", e.error_code.as_str(), e.message),
        }
    }
}
