use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::types::*;
use super::{StoreResult, VectorStore};
use crate::chunk::chunked;
use crate::error::StoreError;

pub const DEFAULT_CONTROL_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";
/// fetch 接口单次请求的 ID 数量
const FETCH_BATCH: NonZeroUsize = NonZeroUsize::new(100).unwrap();
const LIST_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct PineconeOptions {
    pub api_key: String,
    /// 控制面地址
    pub control_url: String,
    /// 单次 HTTP 请求超时
    pub timeout: Duration,
}

/// Pinecone REST API 客户端
pub struct PineconeStore {
    client: Client,
    api_key: String,
    control_url: String,
    /// 索引名 -> 数据面地址
    hosts: Mutex<HashMap<String, String>>,
}

impl PineconeStore {
    pub fn new(options: PineconeOptions) -> StoreResult<Self> {
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self {
            client,
            api_key: options.api_key,
            control_url: options.control_url.trim_end_matches('/').to_string(),
            hosts: Mutex::new(HashMap::new()),
        })
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Api-Key", &self.api_key).header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn send(&self, builder: RequestBuilder) -> StoreResult<Response> {
        let resp = self.request(builder).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = api_message(&resp.text().await.unwrap_or_default());
            return Err(StoreError::Api { status: status.as_u16(), message });
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> StoreResult<T> {
        Ok(self.send(builder).await?.json().await?)
    }

    /// 缓存中只有地址字符串，锁中毒时沿用其中的数据
    fn hosts(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 获取索引的数据面地址，结果会被缓存
    async fn host(&self, index: &str) -> StoreResult<String> {
        let cached = self.hosts().get(index).cloned();
        if let Some(host) = cached {
            return Ok(host);
        }
        let descriptor = self.describe_index(index).await?;
        let host = descriptor.host.ok_or_else(|| StoreError::IndexNotFound(index.to_string()))?;
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("https://{host}")
        };
        debug!("索引 {index} 的数据面地址: {host}");
        self.hosts().insert(index.to_string(), host.clone());
        Ok(host)
    }
}

#[derive(Deserialize)]
struct IndexModel {
    name: String,
    dimension: usize,
    #[serde(default)]
    metric: Metric,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Deserialize, Default)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: String,
}

impl From<IndexModel> for IndexDescriptor {
    fn from(model: IndexModel) -> Self {
        Self {
            name: model.name,
            dimension: model.dimension,
            metric: model.metric,
            host: model.host.filter(|h| !h.is_empty()),
            ready: model.status.ready,
            state: model.status.state,
        }
    }
}

#[derive(Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexModel>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpsertRequest<'a> {
    vectors: &'a [EmbeddingVector],
    namespace: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<ScoredVector>,
}

#[derive(Deserialize)]
struct ScoredVector {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<VectorMetadata>,
}

impl From<ScoredVector> for Match {
    fn from(m: ScoredVector) -> Self {
        Self { id: m.id, score: m.score, metadata: m.metadata }
    }
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, EmbeddingVector>,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    vectors: Vec<ListItem>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct ListItem {
    id: String,
}

#[derive(Deserialize)]
struct Pagination {
    next: Option<String>,
}

impl VectorStore for PineconeStore {
    async fn list_indexes(&self) -> StoreResult<Vec<IndexDescriptor>> {
        let url = format!("{}/indexes", self.control_url);
        let list: IndexList = self.send_json(self.client.get(url)).await?;
        Ok(list.indexes.into_iter().map(Into::into).collect())
    }

    async fn create_index(&self, spec: &IndexSpec) -> StoreResult<()> {
        let url = format!("{}/indexes", self.control_url);
        let body = json!({
            "name": spec.name,
            "dimension": spec.dimension,
            "metric": spec.metric,
            "spec": { "serverless": { "cloud": spec.cloud, "region": spec.region } },
        });
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn describe_index(&self, name: &str) -> StoreResult<IndexDescriptor> {
        let url = format!("{}/indexes/{name}", self.control_url);
        match self.send_json::<IndexModel>(self.client.get(url)).await {
            Err(StoreError::Api { status: 404, .. }) => {
                Err(StoreError::IndexNotFound(name.to_string()))
            }
            result => result.map(Into::into),
        }
    }

    async fn delete_index(&self, name: &str) -> StoreResult<()> {
        let url = format!("{}/indexes/{name}", self.control_url);
        self.send(self.client.delete(url)).await?;
        self.hosts().remove(name);
        Ok(())
    }

    async fn upsert(
        &self,
        index: &str,
        namespace: &str,
        vectors: &[EmbeddingVector],
    ) -> StoreResult<usize> {
        let url = format!("{}/vectors/upsert", self.host(index).await?);
        let body = UpsertRequest { vectors, namespace };
        let resp: UpsertResponse = self.send_json(self.client.post(url).json(&body)).await?;
        Ok(resp.upserted_count)
    }

    async fn query(
        &self,
        index: &str,
        namespace: &str,
        request: &QueryRequest,
    ) -> StoreResult<Vec<Match>> {
        let url = format!("{}/query", self.host(index).await?);
        let mut body = json!({
            "namespace": namespace,
            "vector": request.vector,
            "topK": request.top_k,
            "includeMetadata": request.include_metadata,
            "includeValues": false,
        });
        if let Some(filter) = &request.filter {
            body["filter"] = filter.to_json();
        }
        let resp: QueryResponse = self.send_json(self.client.post(url).json(&body)).await?;
        Ok(resp
            .matches
            .into_iter()
            .map(Match::from)
            .collect())
    }

    async fn delete_one(&self, index: &str, namespace: &str, id: &str) -> StoreResult<()> {
        let url = format!("{}/vectors/delete", self.host(index).await?);
        let body = json!({ "ids": [id], "namespace": namespace });
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn fetch(
        &self,
        index: &str,
        namespace: &str,
        ids: &[String],
    ) -> StoreResult<Vec<EmbeddingVector>> {
        let url = format!("{}/vectors/fetch", self.host(index).await?);
        let mut vectors = Vec::with_capacity(ids.len());
        for batch in chunked(ids, FETCH_BATCH) {
            let mut query = vec![("namespace", namespace)];
            query.extend(batch.iter().map(|id| ("ids", id.as_str())));
            let mut resp: FetchResponse =
                self.send_json(self.client.get(&url).query(&query)).await?;
            // 按请求的顺序返回
            vectors.extend(batch.iter().filter_map(|id| resp.vectors.remove(id)));
        }
        Ok(vectors)
    }

    async fn list_ids(&self, index: &str, namespace: &str) -> StoreResult<Vec<String>> {
        let url = format!("{}/vectors/list", self.host(index).await?);
        let limit = LIST_LIMIT.to_string();
        let mut ids = vec![];
        let mut token: Option<String> = None;
        loop {
            let mut query = vec![("namespace", namespace), ("limit", limit.as_str())];
            if let Some(token) = &token {
                query.push(("paginationToken", token.as_str()));
            }
            let resp: ListResponse = self.send_json(self.client.get(&url).query(&query)).await?;
            ids.extend(resp.vectors.into_iter().map(|item| item.id));
            token = resp.pagination.and_then(|p| p.next).filter(|t| !t.is_empty());
            if token.is_none() {
                break;
            }
        }
        Ok(ids)
    }
}

/// 从错误响应中提取 message 字段，提取失败时返回原文
fn api_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchResult;

    #[test]
    fn index_model_maps_status() {
        let model: IndexModel = serde_json::from_value(json!({
            "name": "images",
            "dimension": 512,
            "metric": "cosine",
            "host": "images-abc.svc.aped-4627-b74a.pinecone.io",
            "spec": { "serverless": { "cloud": "aws", "region": "us-east-1" } },
            "status": { "ready": true, "state": "Ready" },
        }))
        .unwrap();
        let descriptor = IndexDescriptor::from(model);
        assert!(descriptor.ready);
        assert_eq!(descriptor.dimension, 512);
        assert_eq!(descriptor.metric, Metric::Cosine);
        assert_eq!(descriptor.host.as_deref(), Some("images-abc.svc.aped-4627-b74a.pinecone.io"));
    }

    #[test]
    fn query_response_tolerates_missing_metadata() {
        let resp: QueryResponse = serde_json::from_value(json!({
            "matches": [
                { "id": "a", "score": 0.9, "metadata": { "imagePath": "data/a.jpg" } },
                { "id": "b", "score": 0.5 },
            ],
            "namespace": "default",
        }))
        .unwrap();
        assert_eq!(resp.matches[0].metadata.as_ref().unwrap().image_path, "data/a.jpg");
        assert!(resp.matches[1].metadata.is_none());
    }

    #[test]
    fn metadata_without_image_path_maps_to_empty_src() {
        let resp: QueryResponse = serde_json::from_value(json!({
            "matches": [
                { "id": "a", "score": 0.9, "metadata": { "imagePath": "data/a.jpg" } },
                { "id": "b", "score": 0.5, "metadata": { "genre": "x" } },
                { "id": "c", "score": 0.4, "metadata": {} },
                { "id": "d", "score": 0.3, "metadata": { "imagePath": null } },
            ],
        }))
        .unwrap();
        let srcs = resp
            .matches
            .into_iter()
            .map(|m| SearchResult::from(Match::from(m)).src)
            .collect::<Vec<_>>();
        assert_eq!(srcs, ["data/a.jpg", "", "", ""]);
    }

    #[test]
    fn fetch_response_tolerates_foreign_metadata() {
        let resp: FetchResponse = serde_json::from_value(json!({
            "vectors": {
                "a": { "id": "a", "values": [0.5], "metadata": { "genre": "x" } },
                "b": { "id": "b", "values": [0.1], "metadata": null },
                "c": { "id": "c", "values": [0.2], "metadata": { "imagePath": null } },
            },
            "namespace": "default",
        }))
        .unwrap();
        assert_eq!(resp.vectors.len(), 3);
        assert!(resp.vectors.values().all(|v| v.metadata.image_path.is_empty()));
    }

    #[test]
    fn upsert_request_shape() {
        let vectors = [EmbeddingVector {
            id: "a".into(),
            values: vec![0.5],
            metadata: VectorMetadata { image_path: "data/a.jpg".into() },
        }];
        let body = serde_json::to_value(UpsertRequest { vectors: &vectors, namespace: "default" })
            .unwrap();
        assert_eq!(
            body,
            json!({
                "vectors": [{ "id": "a", "values": [0.5], "metadata": { "imagePath": "data/a.jpg" } }],
                "namespace": "default",
            })
        );
    }

    #[test]
    fn host_cache_survives_poisoning() {
        let store = std::sync::Arc::new(
            PineconeStore::new(PineconeOptions {
                api_key: "key".into(),
                control_url: DEFAULT_CONTROL_URL.into(),
                timeout: Duration::from_secs(1),
            })
            .unwrap(),
        );
        store.hosts().insert("images".into(), "https://images.example".into());
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.hosts.lock().unwrap();
            panic!("poison the host cache");
        })
        .join();
        assert!(store.hosts.is_poisoned());
        assert_eq!(store.hosts().get("images").map(String::as_str), Some("https://images.example"));
    }

    #[test]
    fn api_message_extracts_error() {
        assert_eq!(api_message(r#"{"error":{"code":"NOT_FOUND","message":"gone"}}"#), "gone");
        assert_eq!(api_message("plain"), "plain");
    }
}
