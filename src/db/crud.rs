use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Executor, QueryBuilder, Sqlite, SqlitePool};

use super::{DescribedRecord, ImageRecord, ImageRow, Metadata};
use crate::error::{CatalogError, Result};

/// SQLite 单条语句的绑定参数数量有限，批量查询时按此大小分块
const BATCH_CHUNK: usize = 500;

/// 检查路径是否已存在
pub async fn exists<'c, E>(executor: E, path: &str) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image WHERE path = ?")
        .bind(path)
        .fetch_one(executor)
        .await?;
    Ok(count > 0)
}

/// 添加图片记录，返回新分配的 ID
///
/// 路径重复时返回 [`CatalogError::DuplicateKey`]，由唯一约束保证，不依赖调用方的检查
pub async fn add_image<'c, E>(
    executor: E,
    path: &str,
    metadata: &Metadata,
    description: &str,
    created_at: DateTime<Utc>,
) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar(
        r#"
        INSERT INTO image (path, metadata, description, created_at)
        VALUES (?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(path)
    .bind(Json(metadata))
    .bind(description)
    .bind(created_at)
    .fetch_one(executor)
    .await
    .map_err(|e| CatalogError::from_insert(e, path))
}

/// 根据 ID 获取图片记录
pub async fn get_image<'c, E>(executor: E, id: i64) -> Result<ImageRecord>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, ImageRow>(
        "SELECT id, path, metadata, description, created_at FROM image WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.map(Into::into).ok_or(CatalogError::NotFound(id))
}

/// 批量获取图片记录，结果按 `ids` 的顺序排列，已不存在的 ID 会被跳过
pub async fn get_images_batch(executor: &SqlitePool, ids: &[i64]) -> Result<Vec<ImageRecord>> {
    let mut found = HashMap::with_capacity(ids.len());

    for chunk in ids.chunks(BATCH_CHUNK) {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, path, metadata, description, created_at FROM image WHERE id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = builder.build_query_as::<ImageRow>().fetch_all(executor).await?;
        found.extend(rows.into_iter().map(|row| (row.id, ImageRecord::from(row))));
    }

    Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
}

/// 按索引时间倒序分页列出图片记录
///
/// `limit` 为 `None` 时返回 `offset` 之后的全部记录
pub async fn list_images<'c, E>(
    executor: E,
    limit: Option<usize>,
    offset: usize,
) -> Result<Vec<ImageRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, ImageRow>(
        r#"
        SELECT id, path, metadata, description, created_at
        FROM image
        ORDER BY created_at DESC, id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(sql_limit(limit))
    .bind(offset as i64)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// 与 [`list_images`] 相同，但只列出描述匹配全文查询表达式的记录
pub async fn list_images_matching<'c, E>(
    executor: E,
    match_expr: &str,
    limit: Option<usize>,
    offset: usize,
) -> Result<Vec<ImageRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, ImageRow>(
        r#"
        SELECT image.id, image.path, image.metadata, image.description, image.created_at
        FROM image
        JOIN image_fts ON image_fts.rowid = image.id
        WHERE image_fts MATCH ?
        ORDER BY image.created_at DESC, image.id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(match_expr)
    .bind(sql_limit(limit))
    .bind(offset as i64)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// 查询图片记录总数
pub async fn count_images<'c, E>(executor: E) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image").fetch_one(executor).await?;
    Ok(count as u64)
}

/// 获取所有描述非空的记录，按 ID 升序
pub async fn described_records<'c, E>(executor: E) -> Result<Vec<DescribedRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, DescribedRecord>(
        "SELECT id, description FROM image WHERE description != '' ORDER BY id ASC",
    )
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// 获取所有记录的 ID 和路径，用于清理已删除的文件
pub async fn all_paths<'c, E>(executor: E) -> Result<Vec<(i64, String)>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, (i64, String)>("SELECT id, path FROM image ORDER BY id ASC")
        .fetch_all(executor)
        .await?;
    Ok(rows)
}

/// 删除图片记录，返回是否确实删除了一条记录
pub async fn delete_image<'c, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM image WHERE id = ?").bind(id).execute(executor).await?;
    Ok(result.rows_affected() > 0)
}

fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|n| n as i64).unwrap_or(-1)
}
