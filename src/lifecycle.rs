//! 索引生命周期：按需创建并等待就绪

use std::time::Duration;

use log::{debug, info};
use tokio::time::{Instant, sleep};

use crate::error::{Error, Result, StoreError};
use crate::store::{IndexDescriptor, IndexSpec, VectorStore};

/// 等待索引就绪的退避参数
#[derive(Debug, Clone, Copy)]
pub struct ReadyWait {
    /// 首次轮询间隔，之后每次翻倍
    pub initial: Duration,
    /// 轮询间隔上限
    pub max_interval: Duration,
    /// 总等待时间上限
    pub timeout: Duration,
}

impl Default for ReadyWait {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
        }
    }
}

/// 确保索引存在且可用
///
/// 不存在时创建，然后阻塞直到存储报告就绪。已存在的索引维数不一致时返回错误。
/// 同一索引的并发调用需由调用方串行化
pub async fn ensure_index<S: VectorStore>(
    store: &S,
    spec: &IndexSpec,
    wait: ReadyWait,
) -> Result<IndexDescriptor> {
    let existing = store.list_indexes().await?;
    match existing.iter().find(|index| index.name == spec.name) {
        Some(index) => {
            if index.dimension != spec.dimension {
                return Err(Error::Dimension { expected: spec.dimension, actual: index.dimension });
            }
            debug!("索引 {} 已存在", spec.name);
            if index.ready {
                return Ok(index.clone());
            }
        }
        None => {
            info!(
                "创建索引 {} (维数 {}，{:?}，{}/{})",
                spec.name, spec.dimension, spec.metric, spec.cloud, spec.region
            );
            store.create_index(spec).await?;
        }
    }
    wait_until_ready(store, &spec.name, wait).await
}

/// 以指数退避轮询索引状态，超时返回 [`StoreError::IndexNotReady`]
pub async fn wait_until_ready<S: VectorStore>(
    store: &S,
    name: &str,
    wait: ReadyWait,
) -> Result<IndexDescriptor> {
    let start = Instant::now();
    let mut interval = wait.initial;
    loop {
        match store.describe_index(name).await {
            Ok(index) if index.ready => {
                info!("索引 {name} 已就绪，等待 {:.1}s", start.elapsed().as_secs_f32());
                return Ok(index);
            }
            Ok(index) => debug!("索引 {name} 状态: {}", index.state),
            // 刚创建的索引可能暂时查询不到
            Err(StoreError::IndexNotFound(_)) => debug!("索引 {name} 尚不可见"),
            Err(e) => return Err(e.into()),
        }
        let elapsed = start.elapsed();
        if elapsed >= wait.timeout {
            return Err(StoreError::IndexNotReady { name: name.to_string(), waited: elapsed }.into());
        }
        sleep(interval.min(wait.timeout - elapsed)).await;
        interval = (interval * 2).min(wait.max_interval);
    }
}

/// 删除索引
pub async fn drop_index<S: VectorStore>(store: &S, name: &str) -> Result<()> {
    store.delete_index(name).await?;
    info!("已删除索引 {name}");
    Ok(())
}
