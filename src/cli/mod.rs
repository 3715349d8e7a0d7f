mod delete;
mod drop_index;
mod index;
mod list;
mod reconcile;
mod search;
pub mod server;

use std::path::Path;

pub use delete::*;
pub use drop_index::*;
pub use index::*;
use indicatif::ProgressStyle;
pub use list::*;
pub use reconcile::*;
pub use search::*;
pub use server::*;

use crate::config::Opts;
use crate::{Imvec, ImvecBuilder};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 按命令行的全局设置打开 imvec
async fn open(opts: &Opts) -> anyhow::Result<Imvec> {
    Ok(ImvecBuilder::new(opts.conf_dir.clone(), opts.settings.clone()).open().await?)
}

/// 命令行中的图片既可以是规范路径，也可以是语料库目录下的文件路径
fn canonical_arg(imvec: &Imvec, image: &str) -> String {
    let file = Path::new(image);
    if file.is_file() {
        if let Some(path) = file.canonicalize().ok().and_then(|file| {
            let root = imvec.corpus().root().canonicalize().ok()?;
            let relative = file.strip_prefix(&root).ok()?;
            imvec.corpus().canonical(&imvec.corpus().root().join(relative))
        }) {
            return path;
        }
    }
    image.to_string()
}

fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .unwrap()
        .progress_chars("#>-")
}
