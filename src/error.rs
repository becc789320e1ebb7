use thiserror::Error;

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;

/// 图片目录的错误类型
#[derive(Error, Debug)]
pub enum CatalogError {
    /// 路径已存在，调用方应视为跳过而不是失败
    #[error("记录已存在: {0}")]
    DuplicateKey(String),

    #[error("无法读取图片: {0}")]
    UnreadableImage(String),

    #[error("描述服务不可用: {0}")]
    DescriptorUnavailable(String),

    #[error("嵌入服务不可用: {0}")]
    EmbeddingUnavailable(String),

    #[error("向量维度不匹配: 期望 {expected}, 实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("向量索引为空，请先构建索引")]
    IndexUnavailable,

    #[error("记录不存在: {0}")]
    NotFound(i64),

    #[error("无效的查询: {0:?}")]
    MalformedQuery(String),

    #[error("向量索引文件损坏: {0}")]
    CorruptIndex(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    /// 是否为外部服务或图片本身导致的单项失败，这类错误不应中断批量任务
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            Self::UnreadableImage(_)
                | Self::DescriptorUnavailable(_)
                | Self::EmbeddingUnavailable(_)
                | Self::DimensionMismatch { .. }
        )
    }

    /// 从 sqlx 错误中识别唯一约束冲突
    pub(crate) fn from_insert(err: sqlx::Error, path: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::DuplicateKey(path.to_owned())
            }
            _ => Self::Database(err),
        }
    }
}
