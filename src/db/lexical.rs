//! 基于 SQLite FTS5 的描述全文索引
//!
//! 全文索引与图片表位于同一个数据库中，`image_fts.rowid` 即图片 ID。
//! 索引不通过触发器维护，而是由 [`crate::Catalog`] 在写入记录的同一事务中显式更新。

use serde::Serialize;
use sqlx::{Executor, Sqlite, SqliteConnection};
use unicode_segmentation::UnicodeSegmentation;

use super::DescribedRecord;
use crate::error::{CatalogError, Result};

/// 全文检索命中结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexicalHit {
    pub id: i64,
    /// 相关度，越大越相关
    pub score: f64,
}

/// 将用户输入转换为 FTS5 查询表达式
///
/// 输入按 Unicode 单词切分，每个词作为独立短语加引号，避免 FTS5 语法字符被解释。
/// 多个词之间为隐式 AND。不包含任何单词的输入视为无效查询。
pub fn match_expression(query: &str) -> Result<String> {
    let terms = query
        .unicode_words()
        .map(|word| format!("\"{}\"", word.replace('"', "\"\"")))
        .collect::<Vec<_>>();
    if terms.is_empty() {
        return Err(CatalogError::MalformedQuery(query.to_owned()));
    }
    Ok(terms.join(" "))
}

/// 写入或替换指定 ID 的描述
pub async fn index(conn: &mut SqliteConnection, id: i64, description: &str) -> Result<()> {
    sqlx::query("DELETE FROM image_fts WHERE rowid = ?").bind(id).execute(&mut *conn).await?;
    sqlx::query("INSERT INTO image_fts (rowid, description) VALUES (?, ?)")
        .bind(id)
        .bind(description)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// 删除指定 ID 的索引项
pub async fn remove<'c, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result =
        sqlx::query("DELETE FROM image_fts WHERE rowid = ?").bind(id).execute(executor).await?;
    Ok(result.rows_affected() > 0)
}

/// 全文检索，按相关度降序返回，相关度相同时按 ID 升序
pub async fn query<'c, E>(executor: E, text: &str, limit: Option<usize>) -> Result<Vec<LexicalHit>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let expr = match_expression(text)?;
    let limit = limit.map(|n| n as i64).unwrap_or(-1);

    // bm25() 越小越相关
    let rows = sqlx::query_as::<_, (i64, f64)>(
        r#"
        SELECT rowid, bm25(image_fts) AS rank
        FROM image_fts
        WHERE image_fts MATCH ?
        ORDER BY rank ASC, rowid ASC
        LIMIT ?
        "#,
    )
    .bind(&expr)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|(id, rank)| LexicalHit { id, score: -rank }).collect())
}

/// 描述非空但缺少全文索引的记录
pub async fn unindexed_records<'c, E>(executor: E) -> Result<Vec<DescribedRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, DescribedRecord>(
        r#"
        SELECT id, description FROM image
        WHERE description != '' AND id NOT IN (SELECT rowid FROM image_fts)
        ORDER BY id ASC
        "#,
    )
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// 全文索引中对应记录已不存在或描述为空的 ID
pub async fn stale_ids<'c, E>(executor: E) -> Result<Vec<i64>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT rowid FROM image_fts
        WHERE rowid NOT IN (SELECT id FROM image WHERE description != '')
        ORDER BY rowid ASC
        "#,
    )
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::{Metadata, crud, init_memory_db};

    async fn insert(db: &crate::db::Database, path: &str, description: &str) -> i64 {
        let mut tx = db.begin().await.unwrap();
        let id = crud::add_image(&mut *tx, path, &Metadata::new(), description, Utc::now())
            .await
            .unwrap();
        if !description.is_empty() {
            index(&mut tx, id, description).await.unwrap();
        }
        tx.commit().await.unwrap();
        id
    }

    #[test]
    fn test_match_expression() {
        assert_eq!(match_expression("sunset beach").unwrap(), r#""sunset" "beach""#);
        assert_eq!(match_expression("  red, car!  ").unwrap(), r#""red" "car""#);
        assert!(matches!(match_expression("  ?! "), Err(CatalogError::MalformedQuery(_))));
        assert!(matches!(match_expression(""), Err(CatalogError::MalformedQuery(_))));
    }

    #[tokio::test]
    async fn test_query_ranking() {
        let db = init_memory_db().await.unwrap();
        let a = insert(&db, "/a.jpg", "a sunset over the beach with sunset colors").await;
        let b = insert(&db, "/b.jpg", "a city street at night").await;
        let c = insert(&db, "/c.jpg", "sunset at the beach").await;
        let d = insert(&db, "/d.jpg", "sunset at the beach").await;

        let hits = query(&db, "sunset beach", None).await.unwrap();
        let ids = hits.iter().map(|h| h.id).collect::<Vec<_>>();
        assert_eq!(ids.len(), 3);
        assert!(!ids.contains(&b));
        // 相同描述得分相同，按 ID 升序
        let pos_c = ids.iter().position(|&id| id == c).unwrap();
        let pos_d = ids.iter().position(|&id| id == d).unwrap();
        assert_eq!(pos_c + 1, pos_d);
        assert!(ids.contains(&a));
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }

        // 重复查询结果一致
        assert_eq!(query(&db, "sunset beach", None).await.unwrap(), hits);
        assert_eq!(query(&db, "sunset beach", Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_case_insensitive() {
        let db = init_memory_db().await.unwrap();
        let a = insert(&db, "/a.jpg", "A Red Car").await;
        let hits = query(&db, "red CAR", None).await.unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![a]);
    }

    #[tokio::test]
    async fn test_index_replaces_and_remove() {
        let db = init_memory_db().await.unwrap();
        let a = insert(&db, "/a.jpg", "mountain lake").await;

        let mut conn = db.acquire().await.unwrap();
        index(&mut conn, a, "desert road").await.unwrap();
        drop(conn);

        assert!(query(&db, "lake", None).await.unwrap().is_empty());
        assert_eq!(query(&db, "desert", None).await.unwrap().len(), 1);

        assert!(remove(&db, a).await.unwrap());
        assert!(!remove(&db, a).await.unwrap());
        assert!(query(&db, "desert", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unindexed_and_stale() {
        let db = init_memory_db().await.unwrap();
        let a = insert(&db, "/a.jpg", "forest").await;
        let b = crud::add_image(&db, "/b.jpg", &Metadata::new(), "river", Utc::now())
            .await
            .unwrap();
        insert(&db, "/c.jpg", "").await;

        let missing = unindexed_records(&db).await.unwrap();
        assert_eq!(missing.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b]);

        crud::delete_image(&db, a).await.unwrap();
        assert_eq!(stale_ids(&db).await.unwrap(), vec![a]);
    }
}
