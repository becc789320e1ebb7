use std::path::Path;

use clap::Parser;
use serde::Serialize;

use crate::cli::{SubCommandExtend, open_catalog};
use crate::config::{Opts, OutputFormat};
use crate::db::ImageRecord;

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// 每页显示的数量
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,
    /// 跳过的数量
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
    /// 只列出描述中包含这些词的图片
    #[arg(short, long, value_name = "QUERY")]
    pub filter: Option<String>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(Serialize)]
struct ListedRecord<'a> {
    #[serde(flatten)]
    record: &'a ImageRecord,
    /// 文件是否仍然存在
    exists: bool,
}

impl SubCommandExtend for ListCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let catalog = open_catalog(opts, None).await?;
        let records = catalog.list(Some(self.limit), self.offset, self.filter.as_deref()).await?;

        match self.output_format {
            OutputFormat::Json => {
                let listed = records
                    .iter()
                    .map(|record| ListedRecord { record, exists: Path::new(&record.path).exists() })
                    .collect::<Vec<_>>();
                println!("{}", serde_json::to_string_pretty(&listed)?);
            }
            OutputFormat::Table => {
                let total = catalog.count().await?;
                for record in &records {
                    let missing = if Path::new(&record.path).exists() { "" } else { " [missing]" };
                    println!(
                        "{}\t{}\t{}{}\t{}",
                        record.id,
                        record.created_at.format("%Y-%m-%d %H:%M:%S"),
                        record.path,
                        missing,
                        summarize(&record.description, 60),
                    );
                }
                println!("-- {}..{} / {}", self.offset, self.offset + records.len(), total);
            }
        }
        Ok(())
    }
}

/// 截取描述的前 `max_chars` 个字符并去掉换行
fn summarize(description: &str, max_chars: usize) -> String {
    let mut text = description.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
        text.push('…');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize() {
        assert_eq!(summarize("a  red\ncar", 60), "a red car");
        assert_eq!(summarize("abcdef", 3), "abc…");
        assert_eq!(summarize("红色的汽车", 2), "红色…");
        assert_eq!(summarize("", 3), "");
    }
}
