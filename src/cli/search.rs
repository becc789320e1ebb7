use clap::Parser;
use log::debug;
use serde_json::json;

use crate::cli::{SubCommandExtend, open_catalog};
use crate::config::{Opts, OutputFormat};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    /// 查询文本
    pub query: String,
    /// 使用全文检索而不是语义搜索
    #[arg(long)]
    pub lexical: bool,
    /// 显示的结果数量
    #[arg(short = 'k', long, value_name = "K", default_value_t = 10)]
    pub count: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let catalog = open_catalog(opts, None).await?;

        // (分数, 记录)，表格模式下分数保留四位小数
        let (results, extra) = if self.lexical {
            let results = catalog.search_lexical(&self.query, Some(self.count)).await?;
            let results = results
                .into_iter()
                .map(|(record, score)| (score, json!({ "score": score, "record": record })))
                .collect::<Vec<_>>();
            (results, json!({}))
        } else {
            let search = catalog.search_semantic(&self.query, self.count).await?;
            debug!("向量索引版本: {}", search.version);
            let results = search
                .results
                .into_iter()
                .map(|(record, distance)| {
                    (distance as f64, json!({ "distance": distance, "record": record }))
                })
                .collect::<Vec<_>>();
            (results, json!({ "version": search.version }))
        };

        match self.output_format {
            OutputFormat::Json => {
                let results = results.into_iter().map(|(_, value)| value).collect::<Vec<_>>();
                let mut output = extra;
                output["result"] = json!(results);
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                for (score, value) in results {
                    println!("{:.4}\t{}", score, value["record"]["path"].as_str().unwrap_or_default());
                }
            }
        }
        Ok(())
    }
}
