use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::{SubCommandExtend, open_catalog};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct PruneCommand {}

impl SubCommandExtend for PruneCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = open_catalog(opts, None).await?;
        info!("清理已删除的图片中……");
        let removed = catalog.prune().await?;
        for path in &removed {
            println!("{}", path);
        }
        info!("清理完成，共删除 {} 条记录", removed.len());
        Ok(())
    }
}
