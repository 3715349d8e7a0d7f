use anyhow::bail;
use clap::Parser;

use crate::cli::{SubCommandExtend, open};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct DropCommand {
    /// 确认删除，索引中的全部向量都会丢失
    #[arg(long)]
    pub yes: bool,
}

impl SubCommandExtend for DropCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        if !self.yes {
            bail!("删除索引不可恢复，请使用 --yes 确认");
        }
        let imvec = open(opts).await?;
        imvec.drop_index().await?;
        println!("已删除索引 {}", imvec.index_name());
        imvec.close().await?;
        Ok(())
    }
}
