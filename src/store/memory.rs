use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::types::*;
use super::{StoreResult, VectorStore};
use crate::error::StoreError;

#[derive(Serialize, Deserialize, Default)]
struct MemoryIndex {
    spec: Option<IndexSpec>,
    /// 命名空间 -> (ID -> 向量)
    namespaces: HashMap<String, BTreeMap<String, EmbeddingVector>>,
}

#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    indexes: BTreeMap<String, MemoryIndex>,
}

/// 进程内的向量存储，可选地以 JSON 快照持久化
///
/// 创建的索引立即就绪，查询为暴力搜索
pub struct MemoryStore {
    state: Mutex<Snapshot>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// 不持久化的存储
    pub fn new() -> Self {
        Self { state: Mutex::new(Snapshot::default()), path: None }
    }

    /// 打开快照文件，不存在时创建空存储
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| StoreError::Persist(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(StoreError::Persist(format!("{}: {e}", path.display()))),
        };
        info!("加载内存向量存储: {}", path.display());
        Ok(Self { state: Mutex::new(snapshot), path: Some(path) })
    }

    /// 先写入临时文件再重命名，避免写入一半的快照
    async fn persist(&self, snapshot: &Snapshot) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let persist_err = |e: std::io::Error| StoreError::Persist(format!("{}: {e}", path.display()));
        let data = serde_json::to_vec(snapshot).map_err(|e| StoreError::Persist(e.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(persist_err)?;
        }
        let mut tmp_file = path.clone();
        tmp_file.set_extension("tmp");
        tokio::fs::write(&tmp_file, data).await.map_err(persist_err)?;
        tokio::fs::rename(&tmp_file, path).await.map_err(persist_err)?;
        Ok(())
    }
}

impl MemoryStore {
    /// 将当前状态完整写入快照文件
    pub async fn flush(&self) -> StoreResult<()> {
        let state = self.state.lock().await;
        self.persist(&state).await?;
        if let Some(path) = &self.path {
            debug!("内存向量存储已写入 {}", path.display());
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn describe(name: &str, index: &MemoryIndex) -> Option<IndexDescriptor> {
    let spec = index.spec.as_ref()?;
    Some(IndexDescriptor {
        name: name.to_string(),
        dimension: spec.dimension,
        metric: spec.metric,
        host: None,
        ready: true,
        state: "Ready".to_string(),
    })
}

fn lookup<'a>(snapshot: &'a mut Snapshot, name: &str) -> StoreResult<&'a mut MemoryIndex> {
    snapshot
        .indexes
        .get_mut(name)
        .filter(|index| index.spec.is_some())
        .ok_or_else(|| StoreError::IndexNotFound(name.to_string()))
}

fn check_dimension(index: &MemoryIndex, len: usize) -> StoreResult<()> {
    let expected = index.spec.as_ref().map_or(len, |spec| spec.dimension);
    if expected != len {
        return Err(StoreError::Api {
            status: 400,
            message: format!("vector dimension {len} does not match the dimension of the index {expected}"),
        });
    }
    Ok(())
}

impl VectorStore for MemoryStore {
    async fn list_indexes(&self) -> StoreResult<Vec<IndexDescriptor>> {
        let state = self.state.lock().await;
        Ok(state.indexes.iter().filter_map(|(name, index)| describe(name, index)).collect())
    }

    async fn create_index(&self, spec: &IndexSpec) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.indexes.get(&spec.name).is_some_and(|index| index.spec.is_some()) {
            return Err(StoreError::Api {
                status: 409,
                message: format!("index {} already exists", spec.name),
            });
        }
        state.indexes.insert(
            spec.name.clone(),
            MemoryIndex { spec: Some(spec.clone()), namespaces: HashMap::new() },
        );
        self.persist(&state).await
    }

    async fn describe_index(&self, name: &str) -> StoreResult<IndexDescriptor> {
        let state = self.state.lock().await;
        state
            .indexes
            .get(name)
            .and_then(|index| describe(name, index))
            .ok_or_else(|| StoreError::IndexNotFound(name.to_string()))
    }

    async fn delete_index(&self, name: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.indexes.remove(name).is_none() {
            return Err(StoreError::IndexNotFound(name.to_string()));
        }
        self.persist(&state).await
    }

    async fn upsert(
        &self,
        index: &str,
        namespace: &str,
        vectors: &[EmbeddingVector],
    ) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let target = lookup(&mut state, index)?;
        for vector in vectors {
            check_dimension(target, vector.values.len())?;
        }
        let ns = target.namespaces.entry(namespace.to_string()).or_default();
        for vector in vectors {
            ns.insert(vector.id.clone(), vector.clone());
        }
        debug!("写入 {} 条向量到 {index}/{namespace}", vectors.len());
        self.persist(&state).await?;
        Ok(vectors.len())
    }

    async fn query(
        &self,
        index: &str,
        namespace: &str,
        request: &QueryRequest,
    ) -> StoreResult<Vec<Match>> {
        let mut state = self.state.lock().await;
        let target = lookup(&mut state, index)?;
        check_dimension(target, request.vector.len())?;
        let metric = target.spec.as_ref().map(|spec| spec.metric).unwrap_or_default();
        let Some(ns) = target.namespaces.get(namespace) else {
            return Ok(vec![]);
        };

        let mut matches = ns
            .values()
            .filter(|v| request.filter.as_ref().is_none_or(|f| f.matches(&v.metadata)))
            .map(|v| Match {
                id: v.id.clone(),
                score: metric.score(&request.vector, &v.values),
                metadata: request.include_metadata.then(|| v.metadata.clone()),
            })
            .collect::<Vec<_>>();
        // 稳定排序，得分相同时保持 ID 顺序
        if metric.higher_is_better() {
            matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        } else {
            matches.sort_by(|a, b| a.score.total_cmp(&b.score));
        }
        matches.truncate(request.top_k);
        Ok(matches)
    }

    async fn delete_one(&self, index: &str, namespace: &str, id: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let target = lookup(&mut state, index)?;
        if let Some(ns) = target.namespaces.get_mut(namespace) {
            ns.remove(id);
        }
        self.persist(&state).await
    }

    async fn fetch(
        &self,
        index: &str,
        namespace: &str,
        ids: &[String],
    ) -> StoreResult<Vec<EmbeddingVector>> {
        let mut state = self.state.lock().await;
        let target = lookup(&mut state, index)?;
        let Some(ns) = target.namespaces.get(namespace) else {
            return Ok(vec![]);
        };
        Ok(ids.iter().filter_map(|id| ns.get(id).cloned()).collect())
    }

    async fn list_ids(&self, index: &str, namespace: &str) -> StoreResult<Vec<String>> {
        let mut state = self.state.lock().await;
        let target = lookup(&mut state, index)?;
        Ok(target
            .namespaces
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;
    use tempfile::TempDir;

    use super::*;

    fn spec(dimension: usize) -> IndexSpec {
        IndexSpec {
            name: "images".into(),
            dimension,
            metric: Metric::Cosine,
            cloud: "aws".into(),
            region: "us-east-1".into(),
        }
    }

    fn vector(id: &str, values: Vec<f32>) -> EmbeddingVector {
        EmbeddingVector {
            id: id.into(),
            values,
            metadata: VectorMetadata { image_path: format!("data/{id}.jpg") },
        }
    }

    #[fixture]
    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_index(&spec(2)).await.unwrap();
        store
            .upsert(
                "images",
                DEFAULT_NAMESPACE,
                &[vector("a", vec![1., 0.]), vector("b", vec![0.8, 0.6]), vector("c", vec![0., 1.])],
            )
            .await
            .unwrap();
        store
    }

    fn request(vector: Vec<f32>, top_k: usize) -> QueryRequest {
        QueryRequest { vector, top_k, filter: None, include_metadata: true }
    }

    #[rstest]
    #[tokio::test]
    async fn query_orders_by_score(#[future] store: MemoryStore) {
        let store = store.await;
        let matches = store.query("images", DEFAULT_NAMESPACE, &request(vec![1., 0.], 2)).await.unwrap();
        assert_eq!(matches.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert!((matches[0].score - 1.).abs() < 1e-6);
        assert_eq!(matches[0].metadata.as_ref().unwrap().image_path, "data/a.jpg");
    }

    #[rstest]
    #[tokio::test]
    async fn query_applies_filter(#[future] store: MemoryStore) {
        let store = store.await;
        let mut req = request(vec![1., 0.], 1);
        req.filter = Some(Filter::ImagePath("data/c.jpg".into()));
        let matches = store.query("images", DEFAULT_NAMESPACE, &req).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "c");
    }

    #[rstest]
    #[tokio::test]
    async fn upsert_overwrites_by_id(#[future] store: MemoryStore) {
        let store = store.await;
        store.upsert("images", DEFAULT_NAMESPACE, &[vector("a", vec![0., 1.])]).await.unwrap();
        let ids = store.list_ids("images", DEFAULT_NAMESPACE).await.unwrap();
        assert_eq!(ids, ["a", "b", "c"]);
        let fetched = store.fetch("images", DEFAULT_NAMESPACE, &["a".into(), "x".into()]).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].values, vec![0., 1.]);
    }

    #[rstest]
    #[tokio::test]
    async fn rejects_wrong_dimension(#[future] store: MemoryStore) {
        let store = store.await;
        let err = store.upsert("images", DEFAULT_NAMESPACE, &[vector("d", vec![1.])]).await;
        assert!(matches!(err, Err(StoreError::Api { status: 400, .. })));
    }

    #[rstest]
    #[tokio::test]
    async fn delete_one_removes_vector(#[future] store: MemoryStore) {
        let store = store.await;
        store.delete_one("images", DEFAULT_NAMESPACE, "b").await.unwrap();
        assert_eq!(store.list_ids("images", DEFAULT_NAMESPACE).await.unwrap(), ["a", "c"]);
    }

    #[tokio::test]
    async fn unknown_index_is_an_error() {
        let store = MemoryStore::new();
        let err = store.list_ids("missing", DEFAULT_NAMESPACE).await;
        assert!(matches!(err, Err(StoreError::IndexNotFound(_))));
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = MemoryStore::open(&path).await.unwrap();
            store.create_index(&spec(2)).await.unwrap();
            store.upsert("images", DEFAULT_NAMESPACE, &[vector("a", vec![1., 0.])]).await.unwrap();
        }
        let store = MemoryStore::open(&path).await.unwrap();
        assert_eq!(store.list_indexes().await.unwrap().len(), 1);
        assert_eq!(store.list_ids("images", DEFAULT_NAMESPACE).await.unwrap(), ["a"]);
    }

    #[tokio::test]
    async fn flush_rewrites_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let store = MemoryStore::open(&path).await.unwrap();
        store.create_index(&spec(2)).await.unwrap();
        store.upsert("images", DEFAULT_NAMESPACE, &[vector("a", vec![1., 0.])]).await.unwrap();

        std::fs::remove_file(&path).unwrap();
        store.flush().await.unwrap();
        let reopened = MemoryStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_ids("images", DEFAULT_NAMESPACE).await.unwrap(), ["a"]);
    }
}
