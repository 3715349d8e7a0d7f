//! 索引流水线：嵌入、分批写入与重试

use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::pin;
use std::time::{Duration, Instant};

use futures::{Stream, TryStreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::sleep;

use crate::chunk::{chunk_count, chunked};
use crate::embed::{Embedder, EmbeddingProvider};
use crate::error::Result;
use crate::identity::vector_id;
use crate::lifecycle::{ReadyWait, ensure_index};
use crate::metrics;
use crate::store::{DEFAULT_NAMESPACE, EmbeddingVector, IndexSpec, StoreResult, VectorStore};

/// 单次写入存储的最大向量数
pub const MAX_UPSERT_BATCH: NonZeroUsize = NonZeroUsize::new(100).unwrap();

/// 存储写入失败时的重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, initial: Duration::from_millis(200), max_delay: Duration::from_secs(5) }
    }
}

/// 对可重试的存储错误进行指数退避重试
pub async fn retry<T, F, Fut>(policy: RetryPolicy, operation: &str, mut f: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut delay = policy.initial;
    let mut attempt = 0;
    loop {
        match f().await {
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                warn!("{operation} 失败，{delay:?} 后进行第 {attempt} 次重试: {e}");
                metrics::inc_store_retries(operation);
                sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
            result => return result,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub spec: IndexSpec,
    /// 每批嵌入的图片数量
    pub batch_size: NonZeroUsize,
    pub wait: ReadyWait,
    pub retry: RetryPolicy,
    /// 跳过存储中已有向量的图片
    pub incremental: bool,
}

/// 一次索引的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub batches: usize,
    pub embedded: usize,
    pub upserted: usize,
    pub skipped: usize,
}

/// 单个批次的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub embedded: usize,
    pub upserted: usize,
}

/// 准备阶段的结果：需要嵌入的图片与跳过的数量
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub pending: Vec<String>,
    pub skipped: usize,
}

pub struct Indexer<'a, P, S> {
    embedder: &'a Embedder<P>,
    store: &'a S,
    options: &'a IndexOptions,
}

impl<'a, P: EmbeddingProvider, S: VectorStore> Indexer<'a, P, S> {
    pub fn new(embedder: &'a Embedder<P>, store: &'a S, options: &'a IndexOptions) -> Self {
        Self { embedder, store, options }
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    pub fn options(&self) -> &'a IndexOptions {
        self.options
    }

    /// 确保索引可用，增量模式下过滤掉已有向量的图片
    pub async fn prepare(&self, paths: &[String]) -> Result<Plan> {
        ensure_index(self.store, &self.options.spec, self.options.wait).await?;
        if !self.options.incremental {
            return Ok(Plan { pending: paths.to_vec(), skipped: 0 });
        }

        let ids = paths.iter().map(|path| vector_id(path)).collect::<Vec<_>>();
        let existing = retry(self.options.retry, "fetch", || {
            self.store.fetch(&self.options.spec.name, DEFAULT_NAMESPACE, &ids)
        })
        .await?
        .into_iter()
        .map(|v| v.id)
        .collect::<std::collections::HashSet<_>>();

        let pending = paths
            .iter()
            .zip(&ids)
            .filter(|(_, id)| !existing.contains(*id))
            .map(|(path, _)| path.clone())
            .collect::<Vec<_>>();
        let skipped = paths.len() - pending.len();
        info!("增量模式：跳过 {skipped} 张已索引的图片");
        Ok(Plan { pending, skipped })
    }

    /// 逐批嵌入并写入，每批写入完成后才会开始下一批的嵌入
    ///
    /// 调用前需要先 [`prepare`](Self::prepare)
    pub fn batches<'b>(&'b self, paths: &'b [String]) -> impl Stream<Item = Result<BatchReport>> + Send + 'b
    where
        P: 'b,
        S: 'b,
    {
        self.embedder
            .embed_batches(paths, self.options.batch_size)
            .and_then(move |vectors| async move {
                let upserted = self.upsert(&vectors).await?;
                Ok(BatchReport { embedded: vectors.len(), upserted })
            })
    }

    /// 完整执行一次索引
    pub async fn run(&self, paths: &[String]) -> Result<IndexReport> {
        let start = Instant::now();
        let plan = self.prepare(paths).await?;
        let total = chunk_count(plan.pending.len(), self.options.batch_size);
        let mut report = IndexReport { skipped: plan.skipped, ..Default::default() };

        let mut batches = pin!(self.batches(&plan.pending));
        while let Some(batch) = batches.try_next().await? {
            report.batches += 1;
            report.embedded += batch.embedded;
            report.upserted += batch.upserted;
            info!("批次 {}/{total} 完成，写入 {} 条向量", report.batches, batch.upserted);
        }

        info!(
            "索引完成：嵌入 {}，写入 {}，跳过 {}，耗时 {:.2}s",
            report.embedded,
            report.upserted,
            report.skipped,
            start.elapsed().as_secs_f32()
        );
        Ok(report)
    }

    /// 按 [`MAX_UPSERT_BATCH`] 拆分后写入默认命名空间
    pub async fn upsert(&self, vectors: &[EmbeddingVector]) -> Result<usize> {
        let mut upserted = 0;
        for chunk in chunked(vectors, MAX_UPSERT_BATCH) {
            upserted += retry(self.options.retry, "upsert", || {
                self.store.upsert(&self.options.spec.name, DEFAULT_NAMESPACE, chunk)
            })
            .await?;
            debug!("写入 {} 条向量", chunk.len());
        }
        metrics::inc_indexed_vectors(upserted);
        Ok(upserted)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use rstest::*;

    use super::*;
    use crate::corpus::Corpus;
    use crate::embed::testing::FixedEmbedder;
    use crate::error::{Error, StoreError};
    use crate::store::{MemoryStore, Metric};

    fn options(batch_size: usize, incremental: bool) -> IndexOptions {
        IndexOptions {
            spec: IndexSpec {
                name: "images".into(),
                dimension: 2,
                metric: Metric::Cosine,
                cloud: "aws".into(),
                region: "us-east-1".into(),
            },
            batch_size: NonZeroUsize::new(batch_size).unwrap(),
            wait: ReadyWait::default(),
            retry: RetryPolicy { max_retries: 2, initial: Duration::from_millis(1), max_delay: Duration::from_millis(2) },
            incremental,
        }
    }

    /// `n` 张图片，文件名为 `img-<i>.jpg`
    fn images(n: usize) -> (Embedder<FixedEmbedder>, Vec<String>) {
        let names = (0..n).map(|i| format!("img-{i:03}.jpg")).collect::<Vec<_>>();
        let vectors = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), vec![1., i as f32]))
            .collect::<Vec<_>>();
        let corpus = Arc::new(Corpus::new("/srv/images", "data", "jpg").unwrap());
        let embedder =
            Embedder::new(FixedEmbedder::new(&vectors), corpus, 2, Duration::from_secs(5)).unwrap();
        let paths = names.iter().map(|name| format!("data/{name}")).collect();
        (embedder, paths)
    }

    #[rstest]
    #[case(5, 2, 3)]
    #[case(250, 100, 3)]
    #[case(0, 10, 0)]
    #[tokio::test]
    async fn run_upserts_every_batch(#[case] n: usize, #[case] batch_size: usize, #[case] batches: usize) {
        let (embedder, paths) = images(n);
        let store = MemoryStore::new();
        let options = options(batch_size, false);
        let report = Indexer::new(&embedder, &store, &options).run(&paths).await.unwrap();
        assert_eq!(report, IndexReport { batches, embedded: n, upserted: n, skipped: 0 });
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let (embedder, paths) = images(7);
        let store = MemoryStore::new();
        let options = options(3, false);
        let indexer = Indexer::new(&embedder, &store, &options);

        indexer.run(&paths).await.unwrap();
        let first = store.list_ids("images", DEFAULT_NAMESPACE).await.unwrap();
        indexer.run(&paths).await.unwrap();
        let second = store.list_ids("images", DEFAULT_NAMESPACE).await.unwrap();

        assert_eq!(first.len(), 7);
        assert_eq!(first, second);
        let mut expected = paths.iter().map(|p| vector_id(p)).collect::<Vec<_>>();
        expected.sort();
        assert_eq!(second, expected);
    }

    #[tokio::test]
    async fn incremental_skips_indexed_images() {
        let (embedder, paths) = images(6);
        let store = MemoryStore::new();

        let full = options(4, false);
        Indexer::new(&embedder, &store, &full).run(&paths[..4]).await.unwrap();
        let calls = embedder.provider().calls.load(Ordering::SeqCst);

        let incremental = options(4, true);
        let report = Indexer::new(&embedder, &store, &incremental).run(&paths).await.unwrap();
        assert_eq!(report, IndexReport { batches: 1, embedded: 2, upserted: 2, skipped: 4 });
        assert_eq!(embedder.provider().calls.load(Ordering::SeqCst), calls + 2);
    }

    #[tokio::test]
    async fn failed_batch_stops_the_run() {
        let (embedder, mut paths) = images(4);
        paths.insert(2, "data/missing.jpg".to_string());
        let store = MemoryStore::new();
        let options = options(2, false);

        let err = Indexer::new(&embedder, &store, &options).run(&paths).await.unwrap_err();
        assert!(matches!(err, Error::Provider { ref path, .. } if path == "data/missing.jpg"));
        // 只有第一批被写入
        assert_eq!(store.list_ids("images", DEFAULT_NAMESPACE).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn retry_stops_after_max_retries() {
        let policy =
            RetryPolicy { max_retries: 2, initial: Duration::from_millis(1), max_delay: Duration::from_millis(1) };
        let attempts = AtomicU32::new(0);
        let result: StoreResult<()> = retry(policy, "test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Api { status: 503, message: "unavailable".into() })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_recovers_and_skips_fatal_errors() {
        let policy = RetryPolicy { initial: Duration::from_millis(1), ..Default::default() };
        let attempts = AtomicU32::new(0);
        let result = retry(policy, "test", || async {
            match attempts.fetch_add(1, Ordering::SeqCst) {
                0 => Err(StoreError::Api { status: 429, message: "slow down".into() }),
                _ => Ok(42),
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);

        let attempts = AtomicU32::new(0);
        let result: StoreResult<()> = retry(policy, "test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Api { status: 400, message: "bad request".into() })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
