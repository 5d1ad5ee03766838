//! Mock 客户端（用于测试与离线运行，无需 API）
//!
//! MockLlmClient 按脚本依次返回补全 / 流式结果，并记录每次请求，便于断言 system、历史与工具声明；
//! 脚本耗尽后回显最后一条 human 消息。MockEmbedder 用词袋哈希生成确定性向量。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::core::LlmError;
use crate::llm::{
    CompletionRequest, CompletionResponse, CompletionService, EmbeddingProvider, FunctionCall,
    TextStream,
};
use crate::memory::{WireRole, WireTurn};

/// 被记录的一次调用
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub history: Vec<WireTurn>,
    pub tool_names: Vec<String>,
    pub temperature: Option<f32>,
    pub streamed: bool,
}

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum MockStep {
    Reply(CompletionResponse),
    Stream(Vec<String>),
    /// 产出若干片段后报错
    StreamFail(Vec<String>, String),
    /// 产出若干片段后不再产出也不结束
    Stall(Vec<String>),
    Fail(String),
}

/// 脚本化的补全客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<MockStep>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.push(MockStep::Reply(CompletionResponse::Text(text.into())))
    }

    pub fn then_tool_call(self, name: &str, args: serde_json::Value) -> Self {
        self.push(MockStep::Reply(CompletionResponse::ToolCall(FunctionCall {
            name: name.to_string(),
            args: args.as_object().cloned().unwrap_or_default(),
        })))
    }

    pub fn then_empty(self) -> Self {
        self.push(MockStep::Reply(CompletionResponse::Empty))
    }

    pub fn then_stream<I, S>(self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(MockStep::Stream(fragments.into_iter().map(Into::into).collect()))
    }

    pub fn then_stream_fail<I, S>(self, fragments: I, reason: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(MockStep::StreamFail(
            fragments.into_iter().map(Into::into).collect(),
            reason.into(),
        ))
    }

    pub fn then_stall<I, S>(self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(MockStep::Stall(fragments.into_iter().map(Into::into).collect()))
    }

    pub fn then_fail(self, reason: impl Into<String>) -> Self {
        self.push(MockStep::Fail(reason.into()))
    }

    fn push(self, step: MockStep) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
        self
    }

    /// 已记录的请求（按调用顺序）
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record(&self, req: RecordedRequest) {
        if let Ok(mut r) = self.requests.lock() {
            r.push(req);
        }
    }

    fn next_step(&self) -> Option<MockStep> {
        self.script.lock().ok().and_then(|mut s| s.pop_front())
    }

    fn echo(history: &[WireTurn]) -> String {
        let last_human = history
            .iter()
            .rev()
            .find(|t| t.role == WireRole::Human)
            .map(|t| t.text())
            .unwrap_or_else(|| "(no input)".to_string());
        format!("Echo from Mock: {last_human}")
    }
}

#[async_trait]
impl CompletionService for MockLlmClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<CompletionResponse, LlmError> {
        self.record(RecordedRequest {
            system: request.system.to_string(),
            history: request.history.to_vec(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            temperature: request.temperature,
            streamed: false,
        });
        match self.next_step() {
            Some(MockStep::Reply(resp)) => Ok(resp),
            Some(MockStep::Stream(fragments)) | Some(MockStep::Stall(fragments)) => {
                Ok(CompletionResponse::Text(fragments.concat()))
            }
            Some(MockStep::StreamFail(_, reason)) | Some(MockStep::Fail(reason)) => Err(LlmError::Mock(reason)),
            None => Ok(CompletionResponse::Text(Self::echo(request.history))),
        }
    }

    async fn stream(&self, system: &str, history: &[WireTurn]) -> Result<TextStream, LlmError> {
        self.record(RecordedRequest {
            system: system.to_string(),
            history: history.to_vec(),
            tool_names: Vec::new(),
            temperature: None,
            streamed: true,
        });
        let fragments = match self.next_step() {
            Some(MockStep::Stream(fragments)) => fragments,
            Some(MockStep::StreamFail(fragments, reason)) => {
                let items = fragments
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(LlmError::Mock(reason))));
                return Ok(Box::pin(stream::iter(items)));
            }
            Some(MockStep::Stall(fragments)) => {
                let items = stream::iter(fragments.into_iter().map(Ok::<String, LlmError>));
                return Ok(Box::pin(items.chain(stream::pending())));
            }
            Some(MockStep::Reply(CompletionResponse::Text(text))) => vec![text],
            Some(MockStep::Reply(_)) => Vec::new(),
            Some(MockStep::Fail(reason)) => return Err(LlmError::Mock(reason)),
            None => vec![Self::echo(history)],
        };
        Ok(Box::pin(stream::iter(fragments.into_iter().map(Ok))))
    }
}

/// 维度固定的词袋哈希嵌入：同词同维，适合验证检索排序
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dims: usize,
}

impl MockEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn bucket(&self, word: &str) -> usize {
        // FNV-1a
        let mut h: u64 = 0xcbf29ce484222325;
        for b in word.as_bytes() {
            h ^= u64::from(*b);
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % self.dims as u64) as usize
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 1)
        {
            v[self.bucket(&word.to_lowercase())] += 1.0;
        }
        Ok(v)
    }
}
