//! 图片嵌入：提供方接口与分批嵌入

mod histogram;
mod remote;

use std::future::Future;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use futures::{Stream, StreamExt, stream};
use log::debug;

pub use self::histogram::{HISTOGRAM_BINS, HistogramEmbedder};
pub use self::remote::{RemoteEmbedder, RemoteOptions};
use crate::chunk::chunked;
use crate::corpus::Corpus;
use crate::error::{Error, Result};
use crate::identity::vector_id;
use crate::store::{EmbeddingVector, VectorMetadata};

/// 嵌入提供方：将一张图片转换为定长向量
pub trait EmbeddingProvider: Send + Sync {
    /// 输出向量的维数
    fn dimension(&self) -> Option<usize>;

    /// 检查提供方是否可用
    fn check(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn embed(&self, path: &Path) -> impl Future<Output = anyhow::Result<Vec<f32>>> + Send;
}

/// 运行时选择的嵌入提供方
pub enum Provider {
    Histogram(HistogramEmbedder),
    Remote(RemoteEmbedder),
}

impl EmbeddingProvider for Provider {
    fn dimension(&self) -> Option<usize> {
        match self {
            Self::Histogram(p) => p.dimension(),
            Self::Remote(p) => p.dimension(),
        }
    }

    async fn check(&self) -> anyhow::Result<()> {
        match self {
            Self::Histogram(p) => p.check().await,
            Self::Remote(p) => p.check().await,
        }
    }

    async fn embed(&self, path: &Path) -> anyhow::Result<Vec<f32>> {
        match self {
            Self::Histogram(p) => p.embed(path).await,
            Self::Remote(p) => p.embed(path).await,
        }
    }
}

/// 在提供方之上分配 ID、校验维度并分批嵌入
pub struct Embedder<P> {
    provider: P,
    corpus: Arc<Corpus>,
    dimension: usize,
    timeout: Duration,
}

impl<P: EmbeddingProvider> Embedder<P> {
    /// # Arguments
    ///
    /// * `dimension` - 索引配置的维数，提供方的维数必须与之一致
    /// * `timeout` - 单张图片的嵌入超时
    pub fn new(provider: P, corpus: Arc<Corpus>, dimension: usize, timeout: Duration) -> Result<Self> {
        if let Some(actual) = provider.dimension() {
            if actual != dimension {
                return Err(Error::Dimension { expected: dimension, actual });
            }
        }
        Ok(Self { provider, corpus, dimension, timeout })
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 计算单张图片的嵌入
    ///
    /// `path` 为规范路径，图片不需要已被索引
    pub async fn embed(&self, path: &str) -> Result<EmbeddingVector> {
        let file = self.corpus.resolve(path)?;
        let values = match tokio::time::timeout(self.timeout, self.provider.embed(&file)).await {
            Ok(result) => result.map_err(|e| Error::provider(path, e))?,
            Err(_) => {
                return Err(Error::provider(
                    path,
                    anyhow::anyhow!("超过 {:?} 未完成", self.timeout),
                ));
            }
        };
        if values.len() != self.dimension {
            return Err(Error::Dimension { expected: self.dimension, actual: values.len() });
        }
        Ok(EmbeddingVector {
            id: vector_id(path),
            values,
            metadata: VectorMetadata { image_path: path.to_string() },
        })
    }

    /// 并发计算一批图片的嵌入，任意一张失败则整批失败
    pub async fn embed_all(&self, paths: &[String]) -> Result<Vec<EmbeddingVector>> {
        try_join_all(paths.iter().map(|path| self.embed(path))).await
    }

    /// 分批计算嵌入
    ///
    /// 批次之间顺序执行，批次内部并发。流是惰性的，消费方处理完上一批后才会开始下一批
    pub fn embed_batches<'a>(
        &'a self,
        paths: &'a [String],
        batch_size: NonZeroUsize,
    ) -> impl Stream<Item = Result<Vec<EmbeddingVector>>> + Send + 'a {
        let batches = chunked(paths, batch_size).enumerate();
        stream::iter(batches).then(move |(i, batch)| async move {
            debug!("计算第 {} 批嵌入，共 {} 张", i + 1, batch.len());
            self.embed_all(batch).await
        })
    }
}
