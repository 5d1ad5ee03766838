//! Headless Agent 运行时
//!
//! 供 CLI 或其他前端调用的无界面逻辑：from_config 按配置构建补全服务、改写器、嵌入、向量索引、
//! 搜索服务与入库器；process_message / process_message_stream 在会话锁内跑一轮并在完成后提交。

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::Context as _;
use futures_util::Stream;
use tokio::sync::OwnedMutexGuard;

use crate::config::{load_config, resolve_secret, AppConfig};
use crate::core::{AgentError, AgentSession, IngestError, SessionHandle, SessionSupervisor};
use crate::llm::{create_embedder, CompletionService, EmbeddingProvider, GeminiClient, MockEmbedder, MockLlmClient};
use crate::memory::{Chunker, ChunkingConfig, DocumentIngestor, InMemoryVectorIndex, IngestReport, PineconeIndex, VectorIndex};
use crate::react::{AgentLoop, EventSender, Planner, QueryReformulator, TurnOutcome, TurnStream};
use crate::tools::{DisabledSearch, RetrieverAdapter, TavilySearch, ToolExecutor, WebSearchAdapter, WebSearchProvider};

/// 按配置创建补全服务：gemini 且有 Key 时用 GeminiClient，否则回退 Mock
pub fn create_llm_from_config(cfg: &AppConfig, model: &str) -> Arc<dyn CompletionService> {
    let provider = cfg.llm.provider.to_lowercase();
    let key = resolve_secret(cfg.llm.api_key.as_deref(), "GEMINI_API_KEY");
    match (provider.as_str(), key) {
        ("gemini", Some(key)) => {
            tracing::info!("Using Gemini LLM ({})", model);
            Arc::new(GeminiClient::new(cfg.llm.base_url.as_deref(), model, Some(&key)))
        }
        ("mock", _) => Arc::new(MockLlmClient::new()),
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

fn create_embedder_from_config(cfg: &AppConfig) -> Arc<dyn EmbeddingProvider> {
    let e = &cfg.embedding;
    if e.provider != "mock" {
        if let Some(embedder) = create_embedder(&e.provider, e.base_url.as_deref(), &e.model, e.api_key.as_deref()) {
            tracing::info!("Using {} embeddings ({})", e.provider, e.model);
            return embedder;
        }
        tracing::warn!(provider = %e.provider, "No embedding API key, using mock embeddings");
    }
    Arc::new(MockEmbedder::default())
}

fn create_index_from_config(cfg: &AppConfig) -> Arc<dyn VectorIndex> {
    let r = &cfg.retrieval;
    if r.index == "pinecone" {
        let key = resolve_secret(r.pinecone.api_key.as_deref(), "PINECONE_API_KEY");
        match (r.pinecone.host.as_deref(), key) {
            (Some(host), Some(key)) => {
                tracing::info!(host, "Using Pinecone index");
                return Arc::new(PineconeIndex::new(host, &key, r.timeout_secs));
            }
            _ => tracing::warn!("Pinecone host or PINECONE_API_KEY missing, using in-memory index"),
        }
    }
    Arc::new(InMemoryVectorIndex::new())
}

fn create_search_from_config(cfg: &AppConfig) -> Box<dyn WebSearchProvider> {
    let w = &cfg.web_search;
    if w.provider == "tavily" {
        if let Some(key) = resolve_secret(w.api_key.as_deref(), "TAVILY_API_KEY") {
            tracing::info!("Using Tavily web search");
            return Box::new(TavilySearch::new(w.base_url.as_deref(), &key));
        }
        tracing::warn!("TAVILY_API_KEY not set, web search disabled");
    }
    Box::new(DisabledSearch)
}

/// 把本轮结果写入会话；校验失败时历史保持不变
fn commit_outcome(session: &mut AgentSession, outcome: &TurnOutcome) -> Result<(), AgentError> {
    session.commit(outcome).map_err(|e| {
        tracing::error!(session = %session.id(), error = %e, "turn rejected by history validation");
        AgentError::HistoryRejected(e.to_string())
    })
}

/// 一轮流式回答，持有会话锁直到提交或丢弃
pub struct SessionTurn {
    stream: TurnStream,
    session: OwnedMutexGuard<AgentSession>,
}

impl SessionTurn {
    /// 流正常结束时提交本轮并返回结果；否则丢弃
    pub fn commit(self) -> Option<TurnOutcome> {
        let mut session = self.session;
        let outcome = self.stream.into_outcome()?;
        commit_outcome(&mut session, &outcome).ok().map(|()| outcome)
    }
}

impl Stream for SessionTurn {
    type Item = Result<String, AgentError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().stream).poll_next(cx)
    }
}

pub struct AgentRuntime {
    config: AppConfig,
    agent: AgentLoop,
    ingestor: DocumentIngestor,
    supervisor: SessionSupervisor,
}

impl AgentRuntime {
    /// 加载配置文件与环境变量后构建
    pub fn load(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let cfg = load_config(config_path).context("Failed to load config")?;
        Ok(Self::from_config(cfg))
    }

    pub fn from_config(cfg: AppConfig) -> Self {
        let llm = create_llm_from_config(&cfg, &cfg.llm.model);
        let reformulate_llm = create_llm_from_config(&cfg, &cfg.llm.reformulate_model);
        let embedder = create_embedder_from_config(&cfg);
        let index = create_index_from_config(&cfg);
        let search = create_search_from_config(&cfg);
        Self::from_parts(cfg, llm, reformulate_llm, embedder, index, search)
    }

    /// 由显式组件构建（测试与嵌入场景）
    pub fn from_parts(
        cfg: AppConfig,
        llm: Arc<dyn CompletionService>,
        reformulate_llm: Arc<dyn CompletionService>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        search: Box<dyn WebSearchProvider>,
    ) -> Self {
        let t = &cfg.llm.timeouts;
        let planner = Planner::new(llm).with_timeouts(t.request, t.stream);
        let reformulator = QueryReformulator::new(reformulate_llm).with_timeout(t.reformulate);
        let retriever = RetrieverAdapter::new(embedder.clone(), index.clone())
            .with_top_k(cfg.retrieval.top_k)
            .with_timeout(cfg.retrieval.timeout_secs);
        let web = WebSearchAdapter::new(search)
            .with_max_results(cfg.web_search.max_results)
            .with_timeout(cfg.web_search.timeout_secs);
        let chunker = Chunker::new(ChunkingConfig::new(cfg.ingest.chunk_size, cfg.ingest.chunk_overlap));
        Self {
            agent: AgentLoop::new(planner, reformulator, ToolExecutor::new(retriever, web)),
            ingestor: DocumentIngestor::new(chunker, embedder, index),
            supervisor: SessionSupervisor::new(),
            config: cfg,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn agent(&self) -> &AgentLoop {
        &self.agent
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    pub async fn ingest(&self, namespace: &str, source_name: &str, text: &str) -> Result<IngestReport, IngestError> {
        self.ingestor.ingest(namespace, source_name, text).await
    }

    /// 对单条用户输入跑一轮并提交（字符串路径）；未能写入历史时返回 HistoryRejected
    pub async fn process_message(&self, handle: &SessionHandle, user_text: &str) -> Result<TurnOutcome, AgentError> {
        let mut session = handle.lock().await;
        let prior = session.prior(self.config.app.history_turns).to_vec();
        let outcome = self.agent.run_turn(user_text, session.namespace(), &prior).await?;
        commit_outcome(&mut session, &outcome)?;
        Ok(outcome)
    }

    /// 流式路径：返回的 SessionTurn 持有会话锁，消费完毕后调用 commit
    pub async fn process_message_stream(
        &self,
        handle: &SessionHandle,
        user_text: &str,
        events: Option<EventSender>,
    ) -> Result<SessionTurn, AgentError> {
        let session = handle.lock().await;
        let token = handle.begin_turn();
        let prior = session.prior(self.config.app.history_turns).to_vec();
        let stream = self
            .agent
            .run_turn_stream_with_events(user_text, session.namespace(), &prior, events)
            .await?
            .with_cancellation(token);
        Ok(SessionTurn { stream, session })
    }
}
