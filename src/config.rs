use std::convert::Infallible;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::error::{Error, Result};
use crate::store::{DEFAULT_CONTROL_URL, Metric};

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "imvec", "imvec").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imvec", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imvec 配置文件目录，内存存储的快照也保存在这里
    #[arg(short, long, env = "IMVEC_CONF_DIR", default_value = default_config_dir(), global = true)]
    pub conf_dir: ConfDir,
    #[command(flatten)]
    pub settings: Settings,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 启动 HTTP 服务
    Server(ServerCommand),
    /// 为语料库中的全部图片建立索引
    Index(IndexCommand),
    /// 搜索与指定图片相似的图片
    Search(SearchCommand),
    /// 分页列出语料库中的图片
    List(ListCommand),
    /// 删除图片及其向量
    Delete(DeleteCommand),
    /// 比较语料库与索引，找出孤立向量和未索引图片
    Reconcile(ReconcileCommand),
    /// 删除整个索引
    Drop(DropCommand),
}

/// 向量存储后端
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Pinecone serverless 索引
    Pinecone,
    /// 进程内存储，快照保存在配置目录
    Memory,
}

/// 嵌入提供方
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// 本地颜色直方图，维数固定为 512
    Histogram,
    /// 外部 HTTP 模型服务
    Remote,
}

/// 所有子命令共用的设置
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// 图片目录
    #[arg(long, env = "IMVEC_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,
    /// 图片路径的公开前缀，也是静态文件的挂载路径
    #[arg(long, env = "IMVEC_DATA_PREFIX", default_value = "data", global = true)]
    pub data_prefix: String,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp,gif,bmp", global = true)]
    pub suffix: String,
    /// 向量存储后端
    #[arg(long, value_enum, env = "IMVEC_BACKEND", default_value_t = Backend::Pinecone, global = true)]
    pub backend: Backend,
    /// Pinecone API key
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,
    #[arg(long, env = "PINECONE_CLOUD", global = true)]
    pub cloud: Option<String>,
    #[arg(long, env = "PINECONE_REGION", global = true)]
    pub region: Option<String>,
    /// Pinecone 控制面地址
    #[arg(long, env = "PINECONE_CONTROL_URL", default_value = DEFAULT_CONTROL_URL, global = true)]
    pub control_url: String,
    /// 索引名
    #[arg(long, env = "PINECONE_INDEX", global = true)]
    pub index: Option<String>,
    /// 向量维数
    #[arg(long, default_value_t = 512, global = true)]
    pub dimension: usize,
    /// 相似度度量，只在创建索引时使用
    #[arg(long, value_enum, default_value_t = Metric::Cosine, global = true)]
    pub metric: Metric,
    /// 嵌入提供方
    #[arg(long, value_enum, env = "IMVEC_PROVIDER", default_value_t = ProviderKind::Histogram, global = true)]
    pub provider: ProviderKind,
    /// 远程嵌入服务使用的模型
    #[arg(long, env = "IMVEC_MODEL", default_value = "Xenova/clip-vit-base-patch32", global = true)]
    pub model: String,
    /// 远程嵌入服务地址
    #[arg(long, env = "IMVEC_EMBED_ENDPOINT", global = true)]
    pub embed_endpoint: Option<String>,
    /// 每批嵌入的图片数量
    #[arg(long, value_name = "N", default_value = "100", global = true)]
    pub batch_size: NonZeroUsize,
    /// 单张图片嵌入超时，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 60, global = true)]
    pub embed_timeout: u64,
    /// 单次存储请求超时，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 30, global = true)]
    pub store_timeout: u64,
    /// 等待索引就绪的最长时间，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 120, global = true)]
    pub ready_timeout: u64,
    /// 存储写入失败时的最大重试次数
    #[arg(long, value_name = "N", default_value_t = 3, global = true)]
    pub max_retries: u32,
}

impl Settings {
    /// 检查必填项，任何存储或服务打开之前调用
    pub fn validate(&self) -> Result<()> {
        let mut missing = vec![];
        if self.data_dir.is_none() {
            missing.push("--data-dir (IMVEC_DATA_DIR)");
        }
        if self.index.as_deref().is_none_or(str::is_empty) {
            missing.push("--index (PINECONE_INDEX)");
        }
        if self.backend == Backend::Pinecone {
            if self.api_key.as_deref().is_none_or(str::is_empty) {
                missing.push("--api-key (PINECONE_API_KEY)");
            }
            if self.cloud.as_deref().is_none_or(str::is_empty) {
                missing.push("--cloud (PINECONE_CLOUD)");
            }
            if self.region.as_deref().is_none_or(str::is_empty) {
                missing.push("--region (PINECONE_REGION)");
            }
        }
        if self.provider == ProviderKind::Remote && self.embed_endpoint.is_none() {
            missing.push("--embed-endpoint (IMVEC_EMBED_ENDPOINT)");
        }
        if !missing.is_empty() {
            return Err(Error::Config(format!("缺少必要的配置: {}", missing.join(", "))));
        }
        if self.dimension == 0 {
            return Err(Error::Config("向量维数不能为 0".to_string()));
        }
        Ok(())
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout)
    }
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回内存存储快照的路径
    pub fn memory_store(&self) -> PathBuf {
        self.path.join("vectors.json")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opts {
        Opts::try_parse_from(["imvec"].iter().chain(args)).unwrap()
    }

    #[test]
    fn memory_backend_needs_no_credentials() {
        let opts = parse(&[
            "-c", "/tmp/imvec", "list", "--backend", "memory", "--data-dir", "/srv", "--index", "images",
        ]);
        assert!(matches!(opts.subcmd, SubCommand::List(_)));
        assert_eq!(opts.conf_dir.memory_store(), Path::new("/tmp/imvec/vectors.json"));
        opts.settings.validate().unwrap();
    }

    #[test]
    fn pinecone_backend_requires_credentials() {
        let opts = parse(&[
            "--backend", "pinecone", "--data-dir", "/srv", "--index", "images", "--api-key", "", "list",
        ]);
        let err = opts.settings.validate().unwrap_err();
        assert!(err.is_fatal());
        let message = err.to_string();
        assert!(message.contains("--api-key"));
    }

    #[test]
    fn empty_cloud_and_region_are_missing() {
        let opts = parse(&[
            "--backend", "pinecone", "--data-dir", "/srv", "--index", "images", "--api-key", "key",
            "--cloud", "", "--region", "", "list",
        ]);
        let message = opts.settings.validate().unwrap_err().to_string();
        assert!(message.contains("--cloud"));
        assert!(message.contains("--region"));
        assert!(!message.contains("--api-key"));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = Opts::try_parse_from(["imvec", "list", "--batch-size", "0"]);
        assert!(result.is_err());
    }
}
