use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use log::info;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use super::EmbeddingProvider;

#[derive(Debug, Clone)]
pub struct RemoteOptions {
    /// 嵌入服务地址，接收图片原始字节
    pub endpoint: String,
    /// 模型 ID，通过 `X-Model-Id` 请求头传递
    pub model: String,
    pub dimension: usize,
    pub timeout: Duration,
}

/// 通过 HTTP 调用外部模型服务计算嵌入
pub struct RemoteEmbedder {
    client: Client,
    options: RemoteOptions,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(options: RemoteOptions) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self { client, options })
    }

    pub async fn embed_bytes(&self, data: Vec<u8>) -> anyhow::Result<Vec<f32>> {
        let resp = self
            .client
            .post(&self.options.endpoint)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header("X-Model-Id", &self.options.model)
            .body(data)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("嵌入服务返回 {status}: {}", resp.text().await.unwrap_or_default());
        }
        let resp: EmbedResponse = resp.json().await.context("无法解析嵌入服务的响应")?;
        Ok(resp.embedding)
    }
}

impl EmbeddingProvider for RemoteEmbedder {
    fn dimension(&self) -> Option<usize> {
        Some(self.options.dimension)
    }

    /// 只检查服务是否可达，不校验模型
    async fn check(&self) -> anyhow::Result<()> {
        let resp = self
            .client
            .head(&self.options.endpoint)
            .send()
            .await
            .with_context(|| format!("无法连接嵌入服务 {}", self.options.endpoint))?;
        info!("嵌入服务 {} 可用 ({})，模型: {}", self.options.endpoint, resp.status(), self.options.model);
        Ok(())
    }

    async fn embed(&self, path: &Path) -> anyhow::Result<Vec<f32>> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("读取 {} 失败", path.display()))?;
        self.embed_bytes(data).await
    }
}
