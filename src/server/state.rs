use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::Imvec;

/// 同一时间只允许一个索引任务
///
/// 持有的守卫在任务结束、失败或请求被取消时释放
#[derive(Clone, Default)]
pub struct IndexGuard(Arc<Mutex<()>>);

impl IndexGuard {
    /// 已有任务在运行时返回 `None`
    pub fn try_acquire(&self) -> Option<OwnedMutexGuard<()>> {
        self.0.clone().try_lock_owned().ok()
    }

    /// 等待正在运行的任务结束
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        self.0.clone().lock_owned().await
    }
}

/// 应用状态
pub struct AppState {
    pub imvec: Imvec,
    /// 鉴权 token
    pub token: Option<String>,
    pub indexing: IndexGuard,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(imvec: Imvec, token: Option<String>) -> Arc<Self> {
        Arc::new(AppState { imvec, token, indexing: IndexGuard::default() })
    }
}
