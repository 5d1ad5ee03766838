//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DOCENT__*` 覆盖（双下划线表示嵌套，如 `DOCENT__RETRIEVAL__TOP_K=6`）。
//! API Key 未写入配置时从各服务的标准环境变量读取（GEMINI_API_KEY、OPENAI_API_KEY、PINECONE_API_KEY、TAVILY_API_KEY）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub retrieval: RetrievalSection,
    pub web_search: WebSearchSection,
    pub ingest: IngestSection,
}

/// [app] 段：应用名、默认命名空间、送入模型的历史轮数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// CLI 会话使用的工作区命名空间
    pub namespace: String,
    /// 每轮送入模型的最近对话轮数（以用户发言为单位）
    pub history_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            namespace: "default".to_string(),
            history_turns: 10,
        }
    }
}

/// [llm] 段：补全后端、模型与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// gemini / mock
    pub provider: String,
    pub model: String,
    /// 查询改写使用的模型
    pub reformulate_model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: crate::llm::gemini::GEMINI_FLASH.to_string(),
            reformulate_model: "gemini-2.0-flash".to_string(),
            base_url: None,
            api_key: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

/// [llm.timeouts] 段（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// decide / finalize 非流式补全
    pub request: u64,
    /// 打开 finalize 流
    pub stream: u64,
    /// 查询改写
    pub reformulate: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: 60,
            stream: 30,
            reformulate: 15,
        }
    }
}

/// [embedding] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    /// gemini / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "text-embedding-004".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

/// [retrieval] 段：向量索引与检索参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub top_k: usize,
    pub timeout_secs: u64,
    /// memory / pinecone
    pub index: String,
    pub pinecone: PineconeSection,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: 4,
            timeout_secs: 20,
            index: "memory".to_string(),
            pinecone: PineconeSection::default(),
        }
    }
}

/// [retrieval.pinecone] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PineconeSection {
    /// 索引 host，如 my-index-abc123.svc.us-east-1.pinecone.io
    pub host: Option<String>,
    pub api_key: Option<String>,
}

/// [web_search] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSearchSection {
    /// tavily / disabled
    pub provider: String,
    pub max_results: usize,
    pub timeout_secs: u64,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for WebSearchSection {
    fn default() -> Self {
        Self {
            provider: "tavily".to_string(),
            max_results: 3,
            timeout_secs: 15,
            base_url: None,
            api_key: None,
        }
    }
}

/// [ingest] 段：分块参数（字符数）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// 配置值优先，其次环境变量；空白视为未设置
pub fn resolve_secret(configured: Option<&str>, env_key: &str) -> Option<String> {
    configured
        .map(String::from)
        .filter(|k| !k.trim().is_empty())
        .or_else(|| std::env::var(env_key).ok())
        .filter(|k| !k.trim().is_empty())
}

/// 从 config 目录加载配置，环境变量 DOCENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DOCENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DOCENT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
