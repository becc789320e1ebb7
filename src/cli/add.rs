use std::path::PathBuf;

use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};

use crate::cli::{SubCommandExtend, open_catalog};
use crate::config::{CatalogOptions, Opts};
use crate::utils::{pb_style, scan_images, suffix_regex};

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    #[command(flatten)]
    pub catalog: CatalogOptions,
    /// 图片所在目录，也可以是单个图片文件
    pub path: PathBuf,
    /// 递归扫描子目录
    #[arg(short, long)]
    pub recursive: bool,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,bmp,tiff,tif,webp,gif")]
    pub suffix: String,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let re_suf = suffix_regex(&self.suffix)?;
        let catalog = open_catalog(opts, Some(&self.catalog)).await?;

        // 补齐上次中断留下的不一致
        catalog.reconcile().await?;

        let paths = scan_images(&self.path, self.recursive, &re_suf);
        let pb = ProgressBar::new(paths.len() as u64).with_style(pb_style());
        let summary = catalog.ingest_batch(paths, Some(&pb)).await?;
        pb.finish_with_message("图片添加完成");

        for (path, e) in &summary.failed {
            warn!("添加失败: {}: {}", path.display(), e);
        }
        info!(
            "共处理 {} 张图片，新增 {}，跳过 {}，失败 {}，向量待补齐 {}",
            summary.total(),
            summary.indexed,
            summary.skipped,
            summary.failed.len(),
            summary.vector_pending,
        );
        println!(
            "indexed: {}\tskipped: {}\tfailed: {}\tvector pending: {}",
            summary.indexed,
            summary.skipped,
            summary.failed.len(),
            summary.vector_pending
        );

        Ok(())
    }
}
