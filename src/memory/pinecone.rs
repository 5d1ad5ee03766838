//! Pinecone 兼容的向量索引（REST）
//!
//! POST {host}/query 与 {host}/vectors/upsert，请求头 Api-Key；命名空间随请求体传递。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::IndexError;
use crate::memory::{IndexRecord, ScoredPassage, VectorIndex};

/// 单次 upsert 的最大记录数
const UPSERT_BATCH: usize = 100;

pub struct PineconeIndex {
    client: Client,
    host: String,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<Match>,
}

#[derive(Deserialize)]
struct Match {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a Map<String, Value>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
    namespace: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

impl PineconeIndex {
    /// host 为索引专属地址（如 https://my-index-xxxx.svc.region.pinecone.io）
    pub fn new(host: &str, api_key: &str, timeout_secs: u64) -> Self {
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", host.trim_end_matches('/'))
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            host,
            api_key: api_key.to_string(),
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response, IndexError> {
        let resp = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn similarity_search(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>, IndexError> {
        let request = QueryRequest {
            namespace,
            vector,
            top_k,
            include_metadata: true,
        };
        let resp = self.post("/query", &request).await?;
        let parsed: QueryResponse = resp
            .json()
            .await
            .map_err(|e| IndexError::Malformed(e.to_string()))?;
        Ok(parsed
            .matches
            .into_iter()
            .map(|m| ScoredPassage {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }

    async fn upsert(&self, namespace: &str, records: Vec<IndexRecord>) -> Result<usize, IndexError> {
        let mut total = 0;
        for batch in records.chunks(UPSERT_BATCH) {
            let request = UpsertRequest {
                vectors: batch
                    .iter()
                    .map(|r| UpsertVector {
                        id: &r.id,
                        values: &r.values,
                        metadata: &r.metadata,
                    })
                    .collect(),
                namespace,
            };
            let resp = self.post("/vectors/upsert", &request).await?;
            let parsed: UpsertResponse = resp
                .json()
                .await
                .map_err(|e| IndexError::Malformed(e.to_string()))?;
            total += parsed.upserted_count;
        }
        tracing::debug!(namespace, total, "pinecone upsert");
        Ok(total)
    }
}
