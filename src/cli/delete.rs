use clap::Parser;

use crate::cli::{SubCommandExtend, canonical_arg, open};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct DeleteCommand {
    /// 要删除的图片，文件会被重命名为 `<文件名>_deleted`
    pub image: String,
}

impl SubCommandExtend for DeleteCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let imvec = open(opts).await?;
        let path = canonical_arg(&imvec, &self.image);
        imvec.delete_image(&path).await?;
        println!("已删除 {path}");
        imvec.close().await?;
        Ok(())
    }
}
