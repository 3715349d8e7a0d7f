use clap::Parser;

use crate::cli::{OutputFormat, SubCommandExtend, open};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ReconcileCommand {
    /// 删除孤立向量并索引缺失的图片，否则只报告
    #[arg(long)]
    pub apply: bool,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ReconcileCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let imvec = open(opts).await?;
        let report = imvec.reconcile(self.apply).await?;
        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Table => {
                for id in &report.orphaned_vectors {
                    println!("orphaned\t{id}");
                }
                for path in &report.unindexed_images {
                    println!("unindexed\t{path}");
                }
                if report.applied {
                    println!("已修复");
                }
            }
        }
        imvec.close().await?;
        Ok(())
    }
}
