//! 向量存储：统一的接口以及 Pinecone、内存两种实现

mod memory;
mod pinecone;
mod types;

use std::future::Future;

pub use self::memory::MemoryStore;
pub use self::pinecone::{DEFAULT_CONTROL_URL, PineconeOptions, PineconeStore};
pub use self::types::*;
use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// 向量存储需要提供的操作
///
/// 数据面的操作均指定索引名与命名空间
pub trait VectorStore: Send + Sync {
    fn list_indexes(&self) -> impl Future<Output = StoreResult<Vec<IndexDescriptor>>> + Send;

    fn create_index(&self, spec: &IndexSpec) -> impl Future<Output = StoreResult<()>> + Send;

    fn describe_index(&self, name: &str)
    -> impl Future<Output = StoreResult<IndexDescriptor>> + Send;

    fn delete_index(&self, name: &str) -> impl Future<Output = StoreResult<()>> + Send;

    /// 按 ID 写入或覆盖向量，返回写入数量
    fn upsert(
        &self,
        index: &str,
        namespace: &str,
        vectors: &[EmbeddingVector],
    ) -> impl Future<Output = StoreResult<usize>> + Send;

    /// 最近邻查询，结果按相似度降序
    fn query(
        &self,
        index: &str,
        namespace: &str,
        request: &QueryRequest,
    ) -> impl Future<Output = StoreResult<Vec<Match>>> + Send;

    fn delete_one(
        &self,
        index: &str,
        namespace: &str,
        id: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// 获取指定 ID 的向量，不存在的 ID 会被忽略
    fn fetch(
        &self,
        index: &str,
        namespace: &str,
        ids: &[String],
    ) -> impl Future<Output = StoreResult<Vec<EmbeddingVector>>> + Send;

    /// 列出命名空间中的全部向量 ID
    fn list_ids(
        &self,
        index: &str,
        namespace: &str,
    ) -> impl Future<Output = StoreResult<Vec<String>>> + Send;
}

/// 运行时选择的存储后端
pub enum Store {
    Pinecone(PineconeStore),
    Memory(MemoryStore),
}

impl Store {
    /// 关闭存储：内存存储写入最终快照，Pinecone 客户端随连接池一起释放
    pub async fn close(self) -> StoreResult<()> {
        match self {
            Self::Pinecone(_) => Ok(()),
            Self::Memory(s) => s.flush().await,
        }
    }
}

impl VectorStore for Store {
    async fn list_indexes(&self) -> StoreResult<Vec<IndexDescriptor>> {
        match self {
            Self::Pinecone(s) => s.list_indexes().await,
            Self::Memory(s) => s.list_indexes().await,
        }
    }

    async fn create_index(&self, spec: &IndexSpec) -> StoreResult<()> {
        match self {
            Self::Pinecone(s) => s.create_index(spec).await,
            Self::Memory(s) => s.create_index(spec).await,
        }
    }

    async fn describe_index(&self, name: &str) -> StoreResult<IndexDescriptor> {
        match self {
            Self::Pinecone(s) => s.describe_index(name).await,
            Self::Memory(s) => s.describe_index(name).await,
        }
    }

    async fn delete_index(&self, name: &str) -> StoreResult<()> {
        match self {
            Self::Pinecone(s) => s.delete_index(name).await,
            Self::Memory(s) => s.delete_index(name).await,
        }
    }

    async fn upsert(
        &self,
        index: &str,
        namespace: &str,
        vectors: &[EmbeddingVector],
    ) -> StoreResult<usize> {
        match self {
            Self::Pinecone(s) => s.upsert(index, namespace, vectors).await,
            Self::Memory(s) => s.upsert(index, namespace, vectors).await,
        }
    }

    async fn query(
        &self,
        index: &str,
        namespace: &str,
        request: &QueryRequest,
    ) -> StoreResult<Vec<Match>> {
        match self {
            Self::Pinecone(s) => s.query(index, namespace, request).await,
            Self::Memory(s) => s.query(index, namespace, request).await,
        }
    }

    async fn delete_one(&self, index: &str, namespace: &str, id: &str) -> StoreResult<()> {
        match self {
            Self::Pinecone(s) => s.delete_one(index, namespace, id).await,
            Self::Memory(s) => s.delete_one(index, namespace, id).await,
        }
    }

    async fn fetch(
        &self,
        index: &str,
        namespace: &str,
        ids: &[String],
    ) -> StoreResult<Vec<EmbeddingVector>> {
        match self {
            Self::Pinecone(s) => s.fetch(index, namespace, ids).await,
            Self::Memory(s) => s.fetch(index, namespace, ids).await,
        }
    }

    async fn list_ids(&self, index: &str, namespace: &str) -> StoreResult<Vec<String>> {
        match self {
            Self::Pinecone(s) => s.list_ids(index, namespace).await,
            Self::Memory(s) => s.list_ids(index, namespace).await,
        }
    }
}
