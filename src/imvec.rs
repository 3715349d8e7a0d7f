use std::sync::Arc;

use log::info;
use tokio::task::spawn_blocking;

use crate::config::{Backend, ConfDir, ProviderKind, Settings};
use crate::consistency::{self, ReconcileReport};
use crate::corpus::{self, Corpus, ImageRecord};
use crate::embed::{Embedder, EmbeddingProvider, HistogramEmbedder, Provider, RemoteEmbedder, RemoteOptions};
use crate::error::{Error, Result};
use crate::lifecycle::{self, ReadyWait};
use crate::pipeline::{IndexOptions, IndexReport, Indexer, RetryPolicy};
use crate::search::{self, SearchResult};
use crate::store::{IndexSpec, MemoryStore, PineconeOptions, PineconeStore, Store};

/// 没有配置云和区域时（内存存储）使用的占位值
const LOCAL: &str = "local";

pub struct ImvecBuilder {
    conf_dir: ConfDir,
    settings: Settings,
}

impl ImvecBuilder {
    pub fn new(conf_dir: ConfDir, settings: Settings) -> Self {
        Self { conf_dir, settings }
    }

    /// 校验配置，创建嵌入提供方、存储与语料库
    pub async fn open(self) -> Result<Imvec> {
        let settings = self.settings;
        settings.validate()?;

        let data_dir = settings.data_dir.clone().unwrap_or_default();
        let corpus = Arc::new(Corpus::new(data_dir, &settings.data_prefix, &settings.suffix)?);

        let provider = match settings.provider {
            ProviderKind::Histogram => Provider::Histogram(HistogramEmbedder::new()),
            ProviderKind::Remote => {
                let options = RemoteOptions {
                    endpoint: settings.embed_endpoint.clone().unwrap_or_default(),
                    model: settings.model.clone(),
                    dimension: settings.dimension,
                    timeout: settings.embed_timeout(),
                };
                Provider::Remote(RemoteEmbedder::new(options).map_err(|e| Error::Config(e.to_string()))?)
            }
        };
        provider.check().await.map_err(|e| Error::Config(format!("嵌入提供方不可用: {e:#}")))?;
        let embedder =
            Embedder::new(provider, corpus.clone(), settings.dimension, settings.embed_timeout())?;

        let store = match settings.backend {
            Backend::Pinecone => Store::Pinecone(PineconeStore::new(PineconeOptions {
                api_key: settings.api_key.clone().unwrap_or_default(),
                control_url: settings.control_url.clone(),
                timeout: settings.store_timeout(),
            })?),
            Backend::Memory => {
                tokio::fs::create_dir_all(self.conf_dir.path()).await?;
                Store::Memory(MemoryStore::open(self.conf_dir.memory_store()).await?)
            }
        };

        let options = IndexOptions {
            spec: IndexSpec {
                name: settings.index.clone().unwrap_or_default(),
                dimension: settings.dimension,
                metric: settings.metric,
                cloud: settings.cloud.clone().unwrap_or_else(|| LOCAL.to_string()),
                region: settings.region.clone().unwrap_or_else(|| LOCAL.to_string()),
            },
            batch_size: settings.batch_size,
            wait: ReadyWait { timeout: settings.ready_timeout(), ..Default::default() },
            retry: RetryPolicy { max_retries: settings.max_retries, ..Default::default() },
            incremental: false,
        };

        info!(
            "打开 imvec：语料库 {}，索引 {} ({:?}，{} 维)",
            corpus.root().display(),
            options.spec.name,
            settings.backend,
            settings.dimension
        );
        Ok(Imvec { embedder, store, corpus, options })
    }
}

/// 嵌入提供方、向量存储与语料库的句柄
pub struct Imvec {
    embedder: Embedder<Provider>,
    store: Store,
    corpus: Arc<Corpus>,
    options: IndexOptions,
}

impl Imvec {
    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn index_name(&self) -> &str {
        &self.options.spec.name
    }

    /// 索引参数，`incremental` 决定是否跳过已索引的图片
    pub fn index_options(&self, incremental: bool) -> IndexOptions {
        IndexOptions { incremental, ..self.options.clone() }
    }

    pub fn indexer<'a>(&'a self, options: &'a IndexOptions) -> Indexer<'a, Provider, Store> {
        Indexer::new(&self.embedder, &self.store, options)
    }

    /// 在阻塞线程中扫描语料库
    pub async fn list(&self) -> Result<Vec<String>> {
        let corpus = self.corpus.clone();
        spawn_blocking(move || corpus.list()).await.map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// 第 `page` 页的图片
    pub async fn list_page(&self, page: usize, page_size: usize) -> Result<Vec<ImageRecord>> {
        let paths = self.list().await?;
        Ok(corpus::page(&paths, page, page_size).iter().cloned().map(ImageRecord::new).collect())
    }

    /// `path` 所在的页码
    pub async fn page_of(&self, path: &str, page_size: usize) -> Result<Option<usize>> {
        let paths = self.list().await?;
        Ok(corpus::page_of(&paths, &path.to_string(), page_size))
    }

    /// 索引语料库中的全部图片
    pub async fn index_all(&self, incremental: bool) -> Result<IndexReport> {
        let paths = self.list().await?;
        let options = self.index_options(incremental);
        self.indexer(&options).run(&paths).await
    }

    /// 嵌入并写入指定的图片，用于上传之后
    pub async fn upsert_paths(&self, paths: &[String]) -> Result<IndexReport> {
        self.indexer(&self.options).run(paths).await
    }

    pub async fn search(&self, path: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        search::search(&self.embedder, &self.store, self.index_name(), path, top_k).await
    }

    pub async fn delete_image(&self, path: &str) -> Result<()> {
        consistency::delete_image(&self.store, &self.corpus, self.index_name(), path, self.options.retry)
            .await
    }

    pub async fn reconcile(&self, apply: bool) -> Result<ReconcileReport> {
        let paths = self.list().await?;
        consistency::reconcile(&self.indexer(&self.options), &paths, apply).await
    }

    /// 删除整个索引
    pub async fn drop_index(&self) -> Result<()> {
        lifecycle::drop_index(&self.store, self.index_name()).await
    }

    /// 关闭句柄：写入内存存储的最终快照，释放存储与提供方
    pub async fn close(self) -> Result<()> {
        info!("关闭 imvec：索引 {}", self.index_name());
        self.store.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use tempfile::TempDir;

    use super::*;
    use crate::config::Opts;
    use crate::store::VectorStore;

    #[tokio::test]
    async fn close_writes_final_snapshot() {
        let conf_dir = TempDir::new().unwrap();
        let data_dir = TempDir::new().unwrap();
        let args: [std::ffi::OsString; 10] = [
            "imvec".into(),
            "-c".into(),
            conf_dir.path().as_os_str().to_owned(),
            "--backend".into(),
            "memory".into(),
            "--index".into(),
            "images".into(),
            "--data-dir".into(),
            data_dir.path().as_os_str().to_owned(),
            "list".into(),
        ];
        let opts = Opts::try_parse_from(args).unwrap();

        let imvec = ImvecBuilder::new(opts.conf_dir.clone(), opts.settings).open().await.unwrap();
        imvec.index_all(false).await.unwrap();
        let snapshot = opts.conf_dir.memory_store();
        std::fs::remove_file(&snapshot).unwrap();

        imvec.close().await.unwrap();
        let store = MemoryStore::open(&snapshot).await.unwrap();
        assert_eq!(store.list_indexes().await.unwrap().len(), 1);
    }
}
