use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// imvec 的错误类型
#[derive(Debug, Error)]
pub enum Error {
    /// 缺少或无效的配置项，启动时即失败
    #[error("配置错误: {0}")]
    Config(String),
    /// 向量维度与索引配置不一致
    #[error("向量维度不匹配: 期望 {expected}，实际 {actual}")]
    Dimension { expected: usize, actual: usize },
    /// 嵌入提供方处理某张图片失败
    #[error("计算嵌入失败 {path}: {source}")]
    Provider {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    /// 删除只完成了一半，且补偿失败
    #[error("语料库与索引不一致: {0}")]
    Consistency(String),
    #[error("无效的图片路径: {0}")]
    InvalidPath(String),
    #[error("图片不存在: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("操作已取消")]
    Cancelled,
}

impl Error {
    pub fn provider(path: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Provider { path: path.into(), source: source.into() }
    }

    /// 配置类错误不应重试，也不应继续提供服务
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Dimension { .. })
    }
}

/// 向量存储相关错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("请求失败: {0}")]
    Http(#[from] reqwest::Error),
    #[error("存储返回错误 {status}: {message}")]
    Api { status: u16, message: String },
    #[error("索引 {name} 在 {waited:?} 内未就绪")]
    IndexNotReady { name: String, waited: Duration },
    #[error("索引不存在: {0}")]
    IndexNotFound(String),
    #[error("持久化失败: {0}")]
    Persist(String),
}

impl StoreError {
    /// 网络错误、限流和服务端错误可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
