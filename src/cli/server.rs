use anyhow::{Context, anyhow};
use clap::Parser;
use log::{error, info, warn};
use prometheus::{BasicAuthentication, labels};
use rand::distr::{Alphanumeric, SampleString};
use tokio::net::TcpListener;
use tokio::task::spawn_blocking;
use tokio::time::{Duration, sleep};

use crate::cli::{SubCommandExtend, open};
use crate::config::Opts;
use crate::server;

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 上传、删除与索引接口的验证 token，不填则不验证
    #[arg(long, env = "IMVEC_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// 随机生成验证 token
    #[arg(long, conflicts_with = "token")]
    pub random_token: bool,
    /// 请求体大小上限，单位为 MiB
    #[arg(long, value_name = "MIB", default_value_t = 50)]
    pub max_upload: usize,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let imvec = open(opts).await?;

        let mut token = self.token.clone().filter(|token| !token.is_empty());
        if self.random_token {
            let generated = Alphanumeric.sample_string(&mut rand::rng(), 32);
            info!("鉴权 token: {generated}");
            token = Some(generated);
        }
        if token.is_none() {
            warn!("未设置 token，上传、删除与索引接口不需要验证");
        }

        // 创建应用状态
        let state = server::AppState::new(imvec, token);

        // 创建应用
        let app = server::create_app(state.clone(), self.max_upload * 1024 * 1024);

        if let Some(url) = self.prometheus_push.clone() {
            let instance = self.prometheus_instance.clone().unwrap_or_else(|| self.addr.clone());
            let auth = self
                .prometheus_auth
                .as_deref()
                .map(|s| {
                    s.split_once(':')
                        .map(|(username, password)| (username.to_string(), password.to_string()))
                        .ok_or_else(|| anyhow!("prometheus 认证信息格式应为 username:password"))
                })
                .transpose()?;
            tokio::spawn(push_metrics(url, instance, auth));
        }

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener =
            TcpListener::bind(&self.addr).await.with_context(|| format!("无法监听 {}", self.addr))?;
        axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
        info!("服务器已停止");

        match std::sync::Arc::into_inner(state) {
            Some(state) => state.imvec.close().await?,
            None => warn!("仍有请求持有应用状态，跳过关闭"),
        }
        Ok(())
    }
}

async fn push_metrics(url: String, instance: String, auth: Option<(String, String)>) {
    loop {
        let metric_families = prometheus::gather();
        let url = url.clone();
        let instance = instance.clone();
        let auth = auth.clone();
        let r = spawn_blocking(move || {
            prometheus::push_metrics(
                "imvec",
                labels! {
                    "instance".to_string() => instance,
                },
                &url,
                metric_families,
                auth.map(|(username, password)| BasicAuthentication { username, password }),
            )
        })
        .await;
        match r {
            Ok(Err(e)) => error!("推送指标失败: {e}"),
            Err(e) => error!("推送指标任务异常: {e}"),
            Ok(Ok(())) => {}
        }
        sleep(Duration::from_secs(30)).await;
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("无法监听 Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("收到 Ctrl-C，正在停止服务器");
}
