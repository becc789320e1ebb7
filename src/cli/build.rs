use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;

use crate::cli::{SubCommandExtend, open_catalog};
use crate::config::Opts;
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = open_catalog(opts, None).await?;
        let pb = ProgressBar::no_length().with_style(pb_style());
        let version = catalog.rebuild_vectors(Some(&pb)).await?;
        pb.finish_and_clear();
        info!("构建索引成功，版本 {}，共 {} 条向量", version, catalog.vector_count());
        Ok(())
    }
}
