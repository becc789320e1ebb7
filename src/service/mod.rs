//! 外部服务：图片描述、元数据提取、文本嵌入
//!
//! [`crate::Catalog`] 只依赖这里的三个 trait，具体实现可以替换。

mod describe;
mod embed;
mod metadata;

use futures::future::BoxFuture;

pub use describe::*;
pub use embed::*;
pub use metadata::*;

use crate::db::Metadata;
use crate::error::{CatalogError, Result};

/// 图片描述服务，根据图片内容生成自然语言描述
pub trait Describer: Send + Sync {
    fn describe<'a>(&'a self, image: &'a [u8]) -> BoxFuture<'a, Result<String>>;
}

/// 图片元数据提取
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Metadata>;
}

/// 文本嵌入服务，每个输入返回一个定长向量，顺序与输入一致
pub trait Embedder: Send + Sync {
    fn embed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

/// 校验嵌入服务的返回：数量与输入一致，且所有向量维度相同且非零
pub fn check_embeddings(inputs: usize, embeddings: &[Vec<f32>]) -> Result<()> {
    if embeddings.len() != inputs {
        return Err(CatalogError::EmbeddingUnavailable(format!(
            "返回向量数量不一致: 输入 {}, 输出 {}",
            inputs,
            embeddings.len()
        )));
    }
    if let Some(first) = embeddings.first() {
        if first.is_empty() {
            return Err(CatalogError::EmbeddingUnavailable("返回了空向量".to_owned()));
        }
        if let Some(bad) = embeddings.iter().find(|v| v.len() != first.len()) {
            return Err(CatalogError::DimensionMismatch {
                expected: first.len(),
                actual: bad.len(),
            });
        }
    }
    Ok(())
}
