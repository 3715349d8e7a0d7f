use clap::Parser;
use serde_json::json;

use crate::cli::{OutputFormat, SubCommandExtend, open};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// 页码，从 1 开始
    #[arg(long, default_value_t = 1)]
    pub page: usize,
    /// 每页图片数量
    #[arg(long, default_value_t = 10)]
    pub page_size: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ListCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let imvec = open(opts).await?;
        let records = imvec.list_page(self.page, self.page_size).await?;
        match self.output_format {
            OutputFormat::Json => {
                let records = records
                    .iter()
                    .map(|record| json!({ "src": record.path, "alt": record.alt_text }))
                    .collect::<Vec<_>>();
                println!("{}", serde_json::to_string_pretty(&records)?);
            }
            OutputFormat::Table => {
                for record in &records {
                    println!("{}\t{}", record.path, record.alt_text);
                }
            }
        }
        imvec.close().await?;
        Ok(())
    }
}
