//! 查询改写：把依赖上下文的追问改写为可独立检索的问题
//!
//! 一次 temperature=0 的补全；出错、超时或空输出时原样返回 raw_query（warn 日志），从不失败。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::llm::{CompletionRequest, CompletionResponse, CompletionService};
use crate::memory::{Turn, TurnRole, WireTurn};
use crate::react::prompts::reformulate_instruction;

pub struct QueryReformulator {
    llm: Arc<dyn CompletionService>,
    timeout: Duration,
}

impl QueryReformulator {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self {
            llm,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub async fn reformulate(&self, raw_query: &str, history: &[Turn]) -> String {
        let system = reformulate_instruction(&render_history(history));
        let contents = [WireTurn::human(raw_query)];
        let request = CompletionRequest::new(&system, &contents).with_temperature(0.0);

        let reason = match timeout(self.timeout, self.llm.complete(request)).await {
            Ok(Ok(CompletionResponse::Text(text))) => match clean(&text) {
                Some(rewritten) => {
                    tracing::info!(raw = raw_query, rewritten = %rewritten, "query reformulated");
                    return rewritten;
                }
                None => "empty output".to_string(),
            },
            Ok(Ok(CompletionResponse::ToolCall(call))) => format!("unexpected tool call {}", call.name),
            Ok(Ok(CompletionResponse::Empty)) => "empty output".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}s", self.timeout.as_secs()),
        };
        tracing::warn!(raw = raw_query, reason = %reason, "reformulation degraded, using raw query");
        raw_query.to_string()
    }
}

/// 只渲染 User / Assistant 文本轮，形如 "user: ..."；无历史时为 "No history."
pub fn render_history(history: &[Turn]) -> String {
    let lines: Vec<String> = history
        .iter()
        .filter_map(|t| {
            let role = match t.role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
                TurnRole::ToolResult => return None,
            };
            t.text().map(|text| format!("{role}: {text}"))
        })
        .collect();
    if lines.is_empty() {
        "No history.".to_string()
    } else {
        lines.join("\n")
    }
}

fn clean(output: &str) -> Option<String> {
    let s = output
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    (!s.is_empty()).then(|| s.to_string())
}
