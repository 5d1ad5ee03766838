//! 单轮主循环：Deciding → (ToolDispatch)? → Finalizing → Done
//!
//! 每轮至多一次工具往返：decide 得到工具调用时，检索先改写查询再在会话命名空间内执行，联网搜索用原始查询；
//! 结果作为 ToolResult 轮注入历史后进行 finalize。新产生的轮次只在回答完整产出后交给调用方提交，
//! 失败或取消时不会留下半轮历史。

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{stream, Stream};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::memory::{ToWire, Turn, WireTurn};
use crate::react::citation::{invented_names, sanitize, CitationFilter};
use crate::react::planner::{AnswerStream, DecideOutcome, Planner, NO_RESPONSE};
use crate::react::{QueryReformulator, TurnEvent, TurnPhase};
use crate::tools::{ToolCall, ToolExecutor, ToolName, ToolResult};

pub type EventSender = UnboundedSender<TurnEvent>;

/// 一轮完成后的结果；turns 为本轮新增的轮次（User 起始、Assistant 结束），由调用方提交
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub answer: String,
    pub turns: Vec<Turn>,
    pub tool_used: Option<ToolName>,
}

/// decide 与工具派发之后的中间状态
enum Prepared {
    Answered {
        answer: String,
        staged: Vec<Turn>,
    },
    Finalize {
        staged: Vec<Turn>,
        latest: ToolResult,
        tool: ToolName,
    },
}

fn send_event(tx: Option<&EventSender>, ev: TurnEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

fn wire(prior: &[Turn], staged: &[Turn]) -> Vec<WireTurn> {
    prior.iter().chain(staged).map(ToWire::to_wire).collect()
}

/// 本轮允许引用的来源名：只来自最近一次 DocumentHits
fn allowed_sources(latest: Option<&ToolResult>) -> Vec<String> {
    match latest {
        Some(ToolResult::DocumentHits(hits)) => hits.source_names(),
        _ => Vec::new(),
    }
}

pub struct AgentLoop {
    planner: Planner,
    reformulator: QueryReformulator,
    executor: ToolExecutor,
}

impl AgentLoop {
    pub fn new(planner: Planner, reformulator: QueryReformulator, executor: ToolExecutor) -> Self {
        Self {
            planner,
            reformulator,
            executor,
        }
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.planner.token_usage()
    }

    pub async fn run_turn(
        &self,
        user_text: &str,
        namespace: &str,
        prior: &[Turn],
    ) -> Result<TurnOutcome, AgentError> {
        self.run_turn_with_events(user_text, namespace, prior, None).await
    }

    /// 字符串路径：回答中编造的引用在提交前被删除
    pub async fn run_turn_with_events(
        &self,
        user_text: &str,
        namespace: &str,
        prior: &[Turn],
        events: Option<&EventSender>,
    ) -> Result<TurnOutcome, AgentError> {
        let (answer, mut staged, allowed, tool_used) =
            match self.prepare(user_text, namespace, prior, events).await? {
                Prepared::Answered { answer, staged } => (answer, staged, Vec::new(), None),
                Prepared::Finalize {
                    staged,
                    latest,
                    tool,
                } => {
                    send_event(events, TurnEvent::Phase { phase: TurnPhase::Finalizing });
                    let history = wire(prior, &staged);
                    let answer = self
                        .planner
                        .finalize(Some(&latest), &history)
                        .await
                        .inspect_err(|e| send_event(events, TurnEvent::Error { text: e.to_string() }))?;
                    (answer, staged, allowed_sources(Some(&latest)), Some(tool))
                }
            };

        let invented = invented_names(&answer, &allowed);
        let answer = if invented.is_empty() {
            answer
        } else {
            tracing::warn!(?invented, "removing citations of unknown sources");
            let cleaned = sanitize(&answer, &allowed);
            if cleaned.trim().is_empty() {
                NO_RESPONSE.to_string()
            } else {
                cleaned
            }
        };

        staged.push(Turn::assistant(answer.clone()));
        send_event(events, TurnEvent::MessageDone);
        send_event(events, TurnEvent::Phase { phase: TurnPhase::Done });
        tracing::info!(namespace, tool = ?tool_used, turns = staged.len(), "turn done");
        Ok(TurnOutcome {
            answer,
            turns: staged,
            tool_used,
        })
    }

    pub async fn run_turn_stream(
        &self,
        user_text: &str,
        namespace: &str,
        prior: &[Turn],
    ) -> Result<TurnStream, AgentError> {
        self.run_turn_stream_with_events(user_text, namespace, prior, None).await
    }

    /// 流式路径：decide 与工具派发先完成，返回的 TurnStream 逐段产出 finalize 回答；
    /// 编造的引用在放出前被删除
    pub async fn run_turn_stream_with_events(
        &self,
        user_text: &str,
        namespace: &str,
        prior: &[Turn],
        events: Option<EventSender>,
    ) -> Result<TurnStream, AgentError> {
        match self.prepare(user_text, namespace, prior, events.as_ref()).await? {
            Prepared::Answered { answer, staged } => {
                let inner: AnswerStream = Box::pin(stream::iter([Ok::<_, AgentError>(answer)]));
                Ok(TurnStream::new(inner, staged, Vec::new(), None, events))
            }
            Prepared::Finalize {
                staged,
                latest,
                tool,
            } => {
                send_event(events.as_ref(), TurnEvent::Phase { phase: TurnPhase::Finalizing });
                let history = wire(prior, &staged);
                let inner = match self.planner.finalize_stream(Some(&latest), &history).await {
                    Ok(s) => s,
                    Err(e) => {
                        send_event(events.as_ref(), TurnEvent::Error { text: e.to_string() });
                        return Err(e);
                    }
                };
                let allowed = allowed_sources(Some(&latest));
                Ok(TurnStream::new(inner, staged, allowed, Some(tool), events))
            }
        }
    }

    async fn prepare(
        &self,
        user_text: &str,
        namespace: &str,
        prior: &[Turn],
        events: Option<&EventSender>,
    ) -> Result<Prepared, AgentError> {
        send_event(events, TurnEvent::Phase { phase: TurnPhase::Deciding });
        let mut staged = vec![Turn::user(user_text)];
        let history = wire(prior, &staged);

        let decided = self
            .planner
            .decide(namespace, &history)
            .await
            .inspect_err(|e| {
                tracing::warn!(namespace, reason = e.reason(), error = %e, "decide failed");
                send_event(events, TurnEvent::Error { text: e.to_string() });
            })?;

        let call = match decided {
            DecideOutcome::Answer(answer) => return Ok(Prepared::Answered { answer, staged }),
            DecideOutcome::NoResponse => {
                tracing::warn!(namespace, "decide returned neither text nor tool call");
                return Ok(Prepared::Answered {
                    answer: NO_RESPONSE.to_string(),
                    staged,
                });
            }
            DecideOutcome::ToolCall(call) => call,
        };

        send_event(events, TurnEvent::Phase { phase: TurnPhase::ToolDispatch });
        let call = match call {
            ToolCall::RetrieveDocuments { query, .. } => ToolCall::RetrieveDocuments {
                query: self.reformulator.reformulate(&query, prior).await,
                namespace: Some(namespace.to_string()),
            },
            web @ ToolCall::WebSearch { .. } => web,
        };
        let tool = call.name();
        send_event(events, TurnEvent::ToolCall {
            tool: tool.to_string(),
            query: call.query().to_string(),
        });

        let result = self.executor.execute(&call, namespace).await;
        match &result {
            ToolResult::ToolError(e) => send_event(events, TurnEvent::ToolFailure {
                tool: tool.to_string(),
                reason: format!("{}: {}", e.error_code.as_str(), e.message),
            }),
            ok => send_event(events, TurnEvent::Observation {
                tool: tool.to_string(),
                preview: ok.summary(),
            }),
        }

        staged.push(Turn::tool_call(call));
        staged.push(Turn::tool_result(result.clone()));
        Ok(Prepared::Finalize {
            staged,
            latest: result,
            tool,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

/// 流式回答。逐段产出文本；流正常结束后本轮轮次才可通过 into_outcome 取出。
/// 中途出错、取消或提前丢弃都不会产生可提交的轮次。
pub struct TurnStream {
    inner: AnswerStream,
    staged: Vec<Turn>,
    answer: String,
    citations: CitationFilter,
    tool_used: Option<ToolName>,
    events: Option<EventSender>,
    cancelled: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    state: StreamState,
}

impl TurnStream {
    fn new(
        inner: AnswerStream,
        staged: Vec<Turn>,
        allowed: Vec<String>,
        tool_used: Option<ToolName>,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            inner,
            staged,
            answer: String::new(),
            citations: CitationFilter::new(allowed),
            tool_used,
            events,
            cancelled: None,
            state: StreamState::Streaming,
        }
    }

    /// 令牌取消后停止产出，本轮不提交
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancelled = Some(Box::pin(token.cancelled_owned()));
        self
    }

    /// 目前为止产出的回答（已清理引用）
    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn is_complete(&self) -> bool {
        self.state == StreamState::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == StreamState::Cancelled
    }

    /// 流正常结束时返回本轮结果，否则 None
    pub fn into_outcome(self) -> Option<TurnOutcome> {
        (self.state == StreamState::Completed).then_some(TurnOutcome {
            answer: self.answer,
            turns: self.staged,
            tool_used: self.tool_used,
        })
    }

    fn emit(&mut self, text: String) -> String {
        self.answer.push_str(&text);
        send_event(self.events.as_ref(), TurnEvent::MessageChunk { text: text.clone() });
        text
    }

    fn complete(&mut self) {
        if !self.citations.removed().is_empty() {
            tracing::warn!(invented = ?self.citations.removed(), "removed citations of unknown sources");
        }
        self.staged.push(Turn::assistant(self.answer.clone()));
        self.state = StreamState::Completed;
        send_event(self.events.as_ref(), TurnEvent::MessageDone);
        send_event(self.events.as_ref(), TurnEvent::Phase { phase: TurnPhase::Done });
        tracing::info!(tool = ?self.tool_used, chars = self.answer.chars().count(), "streamed turn done");
    }
}

impl Stream for TurnStream {
    type Item = Result<String, AgentError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state != StreamState::Streaming {
            return Poll::Ready(None);
        }
        if let Some(cancelled) = this.cancelled.as_mut() {
            if cancelled.as_mut().poll(cx).is_ready() {
                this.state = StreamState::Cancelled;
                tracing::info!(chars = this.answer.chars().count(), "stream cancelled, turn discarded");
                send_event(this.events.as_ref(), TurnEvent::Error {
                    text: "Cancelled by user".to_string(),
                });
                return Poll::Ready(None);
            }
        }
        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(fragment))) => {
                    let text = this.citations.push(&fragment);
                    if !text.is_empty() {
                        return Poll::Ready(Some(Ok(this.emit(text))));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.state = StreamState::Failed;
                    tracing::warn!(error = %e, "stream failed, turn discarded");
                    send_event(this.events.as_ref(), TurnEvent::Error { text: e.to_string() });
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    let mut tail = this.citations.finish();
                    if this.answer.trim().is_empty() && tail.trim().is_empty() {
                        this.answer.clear();
                        tail = NO_RESPONSE.to_string();
                    }
                    let last = (!tail.is_empty()).then(|| this.emit(tail));
                    this.complete();
                    return Poll::Ready(last.map(Ok));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockEmbedder, MockLlmClient};
    use crate::memory::InMemoryVectorIndex;
    use crate::tools::{DisabledSearch, RetrieverAdapter, WebSearchAdapter};
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::Arc;

    fn agent(mock: Arc<MockLlmClient>) -> AgentLoop {
        let executor = ToolExecutor::new(
            RetrieverAdapter::new(Arc::new(MockEmbedder::default()), Arc::new(InMemoryVectorIndex::new())),
            WebSearchAdapter::new(Box::new(DisabledSearch)),
        );
        AgentLoop::new(
            Planner::new(mock.clone()),
            QueryReformulator::new(mock),
            executor,
        )
    }

    #[tokio::test]
    async fn test_direct_answer_skips_tools() {
        let mock = Arc::new(MockLlmClient::new().then_text("Hello!"));
        let out = agent(mock.clone()).run_turn("hi", "ws", &[]).await.unwrap();
        assert_eq!(out.answer, "Hello!");
        assert_eq!(out.turns, vec![Turn::user("hi"), Turn::assistant("Hello!")]);
        assert!(out.tool_used.is_none());
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_events_follow_phases() {
        let mock = Arc::new(
            MockLlmClient::new()
                .then_tool_call("web_search", json!({"query": "news"}))
                .then_text("Nothing found."),
        );
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        agent(mock)
            .run_turn_with_events("news?", "ws", &[], Some(&tx))
            .await
            .unwrap();
        drop(tx);
        let mut phases = Vec::new();
        let mut failures = 0;
        while let Some(ev) = rx.recv().await {
            match ev {
                TurnEvent::Phase { phase } => phases.push(phase),
                TurnEvent::ToolFailure { .. } => failures += 1,
                _ => {}
            }
        }
        assert_eq!(
            phases,
            vec![TurnPhase::Deciding, TurnPhase::ToolDispatch, TurnPhase::Finalizing, TurnPhase::Done]
        );
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_stream_commits_only_after_completion() {
        let mock = Arc::new(
            MockLlmClient::new()
                .then_tool_call("web_search", json!({"query": "news"}))
                .then_stream(["No ", "results."]),
        );
        let mut s = agent(mock).run_turn_stream("news?", "ws", &[]).await.unwrap();
        assert_eq!(s.next().await.unwrap().unwrap(), "No");
        assert!(!s.is_complete());
        assert_eq!(s.next().await.unwrap().unwrap(), " results.");
        assert!(s.next().await.is_none());
        let out = s.into_outcome().unwrap();
        assert_eq!(out.answer, "No results.");
        assert_eq!(out.turns.len(), 4);
    }

    #[tokio::test]
    async fn test_stream_empty_yields_placeholder() {
        let mock = Arc::new(
            MockLlmClient::new()
                .then_tool_call("web_search", json!({"query": "news"}))
                .then_stream(Vec::<String>::new()),
        );
        let s = agent(mock).run_turn_stream("news?", "ws", &[]).await.unwrap();
        let parts: Vec<String> = s.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts, vec![NO_RESPONSE]);
    }

    #[tokio::test]
    async fn test_cancelled_stream_is_not_committed() {
        let mock = Arc::new(MockLlmClient::new().then_text("Hello there"));
        let token = CancellationToken::new();
        let mut s = agent(mock)
            .run_turn_stream("hi", "ws", &[])
            .await
            .unwrap()
            .with_cancellation(token.clone());
        token.cancel();
        assert!(s.next().await.is_none());
        assert!(s.is_cancelled());
        assert!(s.into_outcome().is_none());
    }

    #[tokio::test]
    async fn test_stream_removes_invented_citations() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let embedder = Arc::new(MockEmbedder::default());
        let ingestor = crate::memory::DocumentIngestor::new(
            crate::memory::Chunker::default(),
            embedder.clone(),
            index.clone(),
        );
        ingestor
            .ingest("ws", "onboarding.pdf", "Laptops are issued on day one.")
            .await
            .unwrap();
        let mock = Arc::new(
            MockLlmClient::new()
                .then_tool_call("retrieve_documents", json!({"query": "laptop day one"}))
                .then_text("laptop day one")
                .then_stream(["Day one [Sources: onboarding.pdf; ", "handbook.pdf]."]),
        );
        let executor = ToolExecutor::new(
            RetrieverAdapter::new(embedder, index),
            WebSearchAdapter::new(Box::new(DisabledSearch)),
        );
        let agent = AgentLoop::new(Planner::new(mock.clone()), QueryReformulator::new(mock), executor);
        let mut s = agent.run_turn_stream("When do I get a laptop?", "ws", &[]).await.unwrap();
        let mut emitted = String::new();
        while let Some(part) = s.next().await {
            emitted.push_str(&part.unwrap());
        }
        assert_eq!(emitted, "Day one [Source: onboarding.pdf].");
        let out = s.into_outcome().unwrap();
        assert_eq!(out.answer, emitted);
        assert_eq!(out.turns.last(), Some(&Turn::assistant(emitted.clone())));
    }

    #[tokio::test]
    async fn test_stream_error_after_fragments_is_not_committed() {
        let mock = Arc::new(
            MockLlmClient::new()
                .then_tool_call("web_search", json!({"query": "news"}))
                .then_stream_fail(["Partial answer."], "connection reset"),
        );
        let mut s = agent(mock).run_turn_stream("news?", "ws", &[]).await.unwrap();
        assert_eq!(s.next().await.unwrap().unwrap(), "Partial answer.");
        assert_eq!(s.next().await.unwrap().unwrap_err().reason(), "completion_failed");
        assert!(s.next().await.is_none());
        assert!(!s.is_complete());
        assert!(s.into_outcome().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_fails_turn() {
        let mock = Arc::new(
            MockLlmClient::new()
                .then_tool_call("web_search", json!({"query": "news"}))
                .then_stall(Vec::<String>::new()),
        );
        let mut s = agent(mock).run_turn_stream("news?", "ws", &[]).await.unwrap();
        assert_eq!(s.next().await.unwrap().unwrap_err().reason(), "completion_failed");
        assert!(s.into_outcome().is_none());
    }
}
