use anyhow::Result;
use clap::Parser;

use crate::cli::{SubCommandExtend, open_catalog};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct SyncCommand {}

impl SubCommandExtend for SyncCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = open_catalog(opts, None).await?;
        let report = catalog.reconcile().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}
