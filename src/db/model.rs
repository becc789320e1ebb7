use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use sqlx::types::Json;
use utoipa::ToSchema;

/// 图片元数据，标签名 => 标签值
pub type Metadata = BTreeMap<String, String>;

/// 图片记录
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ImageRecord {
    /// 图片 ID，由数据库分配，不会复用
    pub id: i64,
    /// 图片的规范化绝对路径
    pub path: String,
    /// 图片元数据
    pub metadata: Metadata,
    /// 图片描述，描述服务失败时为空
    pub description: String,
    /// 首次索引时间
    pub created_at: DateTime<Utc>,
}

/// 数据库中的原始行，元数据以 JSON 文本存储
#[derive(FromRow)]
pub(crate) struct ImageRow {
    pub id: i64,
    pub path: String,
    pub metadata: Json<Metadata>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<ImageRow> for ImageRecord {
    fn from(row: ImageRow) -> Self {
        Self {
            id: row.id,
            path: row.path,
            metadata: row.metadata.0,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

/// 描述非空的记录，用于构建向量索引
#[derive(Debug, Clone, FromRow)]
pub struct DescribedRecord {
    pub id: i64,
    pub description: String,
}
