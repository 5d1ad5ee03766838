//! Planner：decide / finalize 两次补全调用
//!
//! decide 声明两个工具，返回直接回答、经过校验的 ToolCall 或空；finalize 不声明工具，
//! 模型若仍返回工具调用则丢弃并以占位回答结束。补全失败与超时统一映射为 CompletionFailed。

use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, StreamExt};
use tokio::time::timeout;

use crate::core::{AgentError, LlmError};
use crate::llm::{CompletionRequest, CompletionResponse, CompletionService, TextStream, ToolSchema};
use crate::memory::WireTurn;
use crate::react::prompts::{decide_instruction, finalize_instruction};
use crate::tools::{decide_tool_schemas, ToolCall, ToolResult};

/// 模型既没有文本也没有工具调用时的回答
pub const NO_RESPONSE: &str = "No response.";

/// finalize 步骤的流式输出，已映射为 AgentError
pub type AnswerStream =
    std::pin::Pin<Box<dyn futures_util::Stream<Item = Result<String, AgentError>> + Send>>;

/// decide 结果
#[derive(Debug, Clone, PartialEq)]
pub enum DecideOutcome {
    /// 直接回答
    Answer(String),
    /// 需要调用一个工具
    ToolCall(ToolCall),
    /// 无文本也无工具调用
    NoResponse,
}

pub struct Planner {
    llm: Arc<dyn CompletionService>,
    tools: Vec<ToolSchema>,
    request_timeout: Duration,
    stream_timeout: Duration,
}

impl Planner {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self {
            llm,
            tools: decide_tool_schemas(),
            request_timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(30),
        }
    }

    /// stream_secs 同时限制打开流与相邻两个片段之间的等待
    pub fn with_timeouts(mut self, request_secs: u64, stream_secs: u64) -> Self {
        self.request_timeout = Duration::from_secs(request_secs);
        self.stream_timeout = Duration::from_secs(stream_secs);
        self
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn decide(&self, namespace: &str, history: &[WireTurn]) -> Result<DecideOutcome, AgentError> {
        let system = decide_instruction(namespace);
        let request = CompletionRequest::new(&system, history).with_tools(&self.tools);
        match self.complete(request).await? {
            CompletionResponse::Text(text) if !text.trim().is_empty() => Ok(DecideOutcome::Answer(text)),
            CompletionResponse::Text(_) | CompletionResponse::Empty => Ok(DecideOutcome::NoResponse),
            CompletionResponse::ToolCall(call) => ToolCall::parse(&call).map(DecideOutcome::ToolCall),
        }
    }

    /// 非流式 finalize；工具调用与空响应都得到占位回答
    pub async fn finalize(&self, latest: Option<&ToolResult>, history: &[WireTurn]) -> Result<String, AgentError> {
        let system = finalize_instruction(latest);
        match self.complete(CompletionRequest::new(&system, history)).await? {
            CompletionResponse::Text(text) if !text.trim().is_empty() => Ok(text),
            CompletionResponse::ToolCall(call) => {
                tracing::warn!(tool = %call.name, "finalize returned a tool call, not dispatching");
                Ok(NO_RESPONSE.to_string())
            }
            _ => Ok(NO_RESPONSE.to_string()),
        }
    }

    /// 流式 finalize；打开流与每个片段的等待都受 stream_timeout 限制，超时后流以错误结束
    pub async fn finalize_stream(
        &self,
        latest: Option<&ToolResult>,
        history: &[WireTurn],
    ) -> Result<AnswerStream, AgentError> {
        let system = finalize_instruction(latest);
        let idle = self.stream_timeout;
        let opened: TextStream = match timeout(idle, self.llm.stream(&system, history)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(completion_failed(e)),
            Err(_) => return Err(completion_failed(LlmError::Timeout(idle.as_secs()))),
        };
        Ok(Box::pin(stream::unfold(Some(opened), move |state| async move {
            let mut fragments = state?;
            match timeout(idle, fragments.next()).await {
                Ok(Some(Ok(text))) => Some((Ok(text), Some(fragments))),
                Ok(Some(Err(e))) => Some((Err(completion_failed(e)), None)),
                Ok(None) => None,
                Err(_) => {
                    tracing::warn!(secs = idle.as_secs(), "finalize stream stalled");
                    Some((Err(completion_failed(LlmError::Timeout(idle.as_secs()))), None))
                }
            }
        })))
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<CompletionResponse, AgentError> {
        match timeout(self.request_timeout, self.llm.complete(request)).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(completion_failed(e)),
            Err(_) => Err(completion_failed(LlmError::Timeout(self.request_timeout.as_secs()))),
        }
    }
}

fn completion_failed(e: LlmError) -> AgentError {
    AgentError::CompletionFailed(e.to_string())
}
