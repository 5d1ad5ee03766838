//! 工具执行器
//!
//! 按 ToolCall 变体穷举派发到 RetrieverAdapter / WebSearchAdapter；两者自身带超时并把失败转成 ToolError 数据，
//! 因此 execute 不返回 Err。每次调用输出一条结构化审计日志（JSON）。

use std::time::Instant;

use crate::tools::{RetrieverAdapter, ToolCall, ToolResult, WebSearchAdapter};

pub struct ToolExecutor {
    retriever: RetrieverAdapter,
    web: WebSearchAdapter,
}

impl ToolExecutor {
    pub fn new(retriever: RetrieverAdapter, web: WebSearchAdapter) -> Self {
        Self { retriever, web }
    }

    /// 执行工具调用。检索始终使用会话命名空间，忽略模型给出的 namespace 参数
    pub async fn execute(&self, call: &ToolCall, namespace: &str) -> ToolResult {
        let start = Instant::now();
        let result = match call {
            ToolCall::RetrieveDocuments {
                query,
                namespace: requested,
            } => {
                if let Some(requested) = requested.as_deref().filter(|r| *r != namespace) {
                    tracing::warn!(requested, namespace, "ignoring model-supplied namespace");
                }
                self.retriever.retrieve(query, namespace).await
            }
            ToolCall::WebSearch { query } => self.web.search(query).await,
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name().as_str(),
            "ok": !result.is_error(),
            "outcome": result.summary(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.to_declaration()),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }
}

fn args_preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}
