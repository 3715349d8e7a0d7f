use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::debug;

use crate::cli::{SubCommandExtend, canonical_arg, open};
use crate::config::Opts;
use crate::search::{DEFAULT_TOP_K, SearchResult};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    /// 被搜索的图片，规范路径（如 `data/a.jpg`）或语料库目录下的文件
    pub image: String,
    /// 显示的结果数量
    #[arg(short = 'k', long, value_name = "COUNT", default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let imvec = open(opts).await?;
        let path = canonical_arg(&imvec, &self.image);
        debug!("搜索图片: {path}");

        let result = imvec.search(&path, self.top_k).await?;
        print_result(&result, self.output_format)?;
        imvec.close().await?;
        Ok(())
    }
}

fn print_result(result: &[SearchResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for item in result {
                println!("{:.4}\t{}", item.score, item.src);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
