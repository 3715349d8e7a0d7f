use std::time::Instant;

use log::debug;
use serde::Serialize;

use crate::embed::{Embedder, EmbeddingProvider};
use crate::error::Result;
use crate::metrics;
use crate::store::{DEFAULT_NAMESPACE, Match, QueryRequest, VectorStore};

/// 默认返回的结果数量
pub const DEFAULT_TOP_K: usize = 6;

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// 命中图片的规范路径，向量缺少元数据时为空
    pub src: String,
    pub score: f32,
}

impl From<Match> for SearchResult {
    fn from(m: Match) -> Self {
        Self { src: m.metadata.map(|meta| meta.image_path).unwrap_or_default(), score: m.score }
    }
}

/// 以 `path` 指向的图片搜索最相似的 `top_k` 张图片
///
/// 被搜索的图片不需要已被索引，结果保持存储返回的顺序
pub async fn search<P: EmbeddingProvider, S: VectorStore>(
    embedder: &Embedder<P>,
    store: &S,
    index: &str,
    path: &str,
    top_k: usize,
) -> Result<Vec<SearchResult>> {
    let start = Instant::now();
    let query = embedder.embed(path).await?;
    let request =
        QueryRequest { vector: query.values, top_k, filter: None, include_metadata: true };
    let matches = store.query(index, DEFAULT_NAMESPACE, &request).await?;
    let elapsed = start.elapsed().as_secs_f32();
    debug!("搜索 {path} 命中 {} 条，耗时 {elapsed:.3}s", matches.len());
    metrics::observe_search_duration(top_k, elapsed);
    Ok(matches.into_iter().map(SearchResult::from).collect())
}
