//! 保持语料库与向量索引一致：删除与对账

use std::collections::{HashMap, HashSet};
use std::slice;

use log::{error, info, warn};
use serde::Serialize;

use crate::corpus::Corpus;
use crate::embed::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::identity::vector_id;
use crate::lifecycle::ensure_index;
use crate::metrics;
use crate::pipeline::{Indexer, RetryPolicy, retry};
use crate::store::{DEFAULT_NAMESPACE, VectorStore};

/// 删除一张图片：先删除向量，再软删除文件
///
/// 文件重命名失败时会把删除前取到的向量写回。写回成功则返回重命名的错误，
/// 写回也失败时返回 [`Error::Consistency`]
pub async fn delete_image<S: VectorStore>(
    store: &S,
    corpus: &Corpus,
    index: &str,
    path: &str,
    policy: RetryPolicy,
) -> Result<()> {
    let file = corpus.resolve(path)?;
    if !tokio::fs::try_exists(&file).await? {
        return Err(Error::NotFound(path.to_string()));
    }

    let id = vector_id(path);
    let previous = store.fetch(index, DEFAULT_NAMESPACE, slice::from_ref(&id)).await?.pop();
    if previous.is_none() {
        warn!("{path} 没有对应的向量");
    }
    retry(policy, "delete", || store.delete_one(index, DEFAULT_NAMESPACE, &id)).await?;

    let err = match corpus.soft_delete(path).await {
        Ok(_) => {
            metrics::inc_deleted_images("ok");
            info!("已删除图片 {path}");
            return Ok(());
        }
        Err(err) => err,
    };

    let Some(vector) = previous else {
        return Err(err);
    };
    match retry(policy, "upsert", || store.upsert(index, DEFAULT_NAMESPACE, slice::from_ref(&vector)))
        .await
    {
        Ok(_) => {
            warn!("软删除 {path} 失败，已恢复其向量: {err}");
            metrics::inc_deleted_images("compensated");
            Err(err)
        }
        Err(restore) => {
            error!("软删除 {path} 失败且无法恢复向量: {err}; {restore}");
            metrics::inc_deleted_images("inconsistent");
            Err(Error::Consistency(format!(
                "{path} 的向量已删除但文件未删除 ({err})，恢复向量失败: {restore}"
            )))
        }
    }
}

/// 对账结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// 在索引中但找不到对应文件的向量 ID
    pub orphaned_vectors: Vec<String>,
    /// 尚未被索引的图片
    pub unindexed_images: Vec<String>,
    /// 是否已经修复
    pub applied: bool,
}

/// 比较语料库与索引，`apply` 时删除孤立向量并索引缺失的图片
pub async fn reconcile<P: EmbeddingProvider, S: VectorStore>(
    indexer: &Indexer<'_, P, S>,
    paths: &[String],
    apply: bool,
) -> Result<ReconcileReport> {
    let store = indexer.store();
    let options = indexer.options();
    let index = options.spec.name.as_str();
    ensure_index(store, &options.spec, options.wait).await?;

    let indexed = store.list_ids(index, DEFAULT_NAMESPACE).await?.into_iter().collect::<HashSet<_>>();
    let corpus = paths.iter().map(|path| (vector_id(path), path)).collect::<HashMap<_, _>>();

    let mut orphaned_vectors =
        indexed.iter().filter(|id| !corpus.contains_key(*id)).cloned().collect::<Vec<_>>();
    orphaned_vectors.sort_unstable();
    let unindexed_images = paths
        .iter()
        .filter(|path| !indexed.contains(&vector_id(path)))
        .cloned()
        .collect::<Vec<_>>();
    info!(
        "对账：{} 条孤立向量，{} 张未索引图片",
        orphaned_vectors.len(),
        unindexed_images.len()
    );

    if apply {
        for id in &orphaned_vectors {
            retry(options.retry, "delete", || store.delete_one(index, DEFAULT_NAMESPACE, id)).await?;
        }
        if !unindexed_images.is_empty() {
            indexer.run(&unindexed_images).await?;
        }
    }

    Ok(ReconcileReport { orphaned_vectors, unindexed_images, applied: apply })
}
