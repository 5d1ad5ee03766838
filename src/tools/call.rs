//! 工具调用：封闭的工具名集合与经过校验的 ToolCall
//!
//! 模型返回的 functionCall 先落到 FunctionCall（名字 + 任意 JSON 参数），
//! 再由 ToolCall::parse 做穷举匹配：未知工具或非法参数一律 InvalidToolCall，不做猜测。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::FunctionCall;
use crate::tools::schema::{RetrieveDocumentsArgs, WebSearchArgs};

/// 可调用的工具名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    RetrieveDocuments,
    WebSearch,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::RetrieveDocuments => "retrieve_documents",
            ToolName::WebSearch => "web_search",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retrieve_documents" => Ok(ToolName::RetrieveDocuments),
            "web_search" => Ok(ToolName::WebSearch),
            other => Err(AgentError::InvalidToolCall(format!("unknown tool: {other}"))),
        }
    }
}

/// 经过校验的工具调用；序列化为 {"name": "...", "args": {...}}，即写入历史的声明文本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "snake_case")]
pub enum ToolCall {
    RetrieveDocuments {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
    },
    WebSearch {
        query: String,
    },
}

impl ToolCall {
    /// 校验模型返回的 functionCall
    pub fn parse(call: &FunctionCall) -> Result<Self, AgentError> {
        let name: ToolName = call.name.parse()?;
        let args = serde_json::Value::Object(call.args.clone());
        let invalid = |e: serde_json::Error| {
            AgentError::InvalidToolCall(format!("invalid arguments for {name}: {e}"))
        };
        let parsed = match name {
            ToolName::RetrieveDocuments => {
                let a: RetrieveDocumentsArgs = serde_json::from_value(args).map_err(invalid)?;
                ToolCall::RetrieveDocuments {
                    query: a.query,
                    namespace: a.namespace,
                }
            }
            ToolName::WebSearch => {
                let a: WebSearchArgs = serde_json::from_value(args).map_err(invalid)?;
                ToolCall::WebSearch { query: a.query }
            }
        };
        if parsed.query().trim().is_empty() {
            return Err(AgentError::InvalidToolCall(format!("empty query for {name}")));
        }
        Ok(parsed)
    }

    pub fn name(&self) -> ToolName {
        match self {
            ToolCall::RetrieveDocuments { .. } => ToolName::RetrieveDocuments,
            ToolCall::WebSearch { .. } => ToolName::WebSearch,
        }
    }

    pub fn query(&self) -> &str {
        match self {
            ToolCall::RetrieveDocuments { query, .. } | ToolCall::WebSearch { query } => query,
        }
    }

    /// 规范 JSON 文本（历史中的工具调用声明）
    pub fn to_declaration(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"name\":\"{}\"}}", self.name()))
    }
}
