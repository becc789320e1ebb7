mod add;
mod build;
mod list;
mod prune;
mod search;
pub mod server;
mod sync;

use std::sync::Arc;

pub use add::*;
pub use build::*;
pub use list::*;
pub use prune::*;
pub use search::*;
pub use server::*;
pub use sync::*;

use crate::config::{CatalogOptions, Opts};
use crate::service::{ExifExtractor, OllamaDescriber, OllamaEmbedder};
use crate::{Catalog, CatalogBuilder};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 使用 Ollama 服务打开图片目录
pub async fn open_catalog(opts: &Opts, catalog: Option<&CatalogOptions>) -> anyhow::Result<Catalog> {
    let service = &opts.service;
    let describer = OllamaDescriber::new(
        &service.ollama_url,
        &service.describe_model,
        &service.prompt,
        service.timeout(),
    )?;
    let embedder =
        OllamaEmbedder::new(&service.ollama_url, &service.embed_model, service.timeout())?;

    let mut builder = CatalogBuilder::new(opts.conf_dir.clone());
    if let Some(catalog) = catalog {
        builder = builder.max_image_size(catalog.max_image_size).concurrency(catalog.concurrency);
    }
    let catalog =
        builder.open(Arc::new(describer), Arc::new(ExifExtractor), Arc::new(embedder)).await?;
    Ok(catalog)
}
