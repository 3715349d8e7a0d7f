use std::pin::pin;

use clap::Parser;
use futures::TryStreamExt;
use indicatif::ProgressBar;
use log::warn;

use crate::cli::{SubCommandExtend, open, pb_style};
use crate::config::Opts;
use crate::embed::Provider;
use crate::error::{Error, Result};
use crate::pipeline::{IndexReport, Indexer};
use crate::store::Store;

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    /// 跳过已经写入索引的图片，默认重新嵌入全部图片
    #[arg(long)]
    pub incremental: bool,
}

impl SubCommandExtend for IndexCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let imvec = open(opts).await?;
        let paths = imvec.list().await?;
        let options = imvec.index_options(self.incremental);
        let indexer = imvec.indexer(&options);

        let report = tokio::select! {
            report = index_with_progress(&indexer, &paths) => report?,
            _ = tokio::signal::ctrl_c() => {
                warn!("收到 Ctrl-C，索引已中止，已完成的批次会保留在索引中");
                return Err(Error::Cancelled.into());
            }
        };

        println!("{}", serde_json::to_string_pretty(&report)?);
        imvec.close().await?;
        Ok(())
    }
}

async fn index_with_progress(
    indexer: &Indexer<'_, Provider, Store>,
    paths: &[String],
) -> Result<IndexReport> {
    let plan = indexer.prepare(paths).await?;
    let pb = ProgressBar::new(plan.pending.len() as u64).with_style(pb_style());
    let mut report = IndexReport { skipped: plan.skipped, ..Default::default() };

    let mut batches = pin!(indexer.batches(&plan.pending));
    while let Some(batch) = batches.try_next().await? {
        report.batches += 1;
        report.embedded += batch.embedded;
        report.upserted += batch.upserted;
        pb.inc(batch.embedded as u64);
        pb.set_message(format!("已写入 {} 条向量", report.upserted));
    }

    pb.finish_with_message("索引完成");
    Ok(report)
}
