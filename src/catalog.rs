use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use indicatif::ProgressBar;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tokio::task::spawn_blocking;

use crate::config::ConfDir;
use crate::db::{self, Database, DescribedRecord, ImageRecord, Metadata, crud, lexical};
use crate::error::{CatalogError, Result};
use crate::metrics;
use crate::service::{Describer, Embedder, MetadataExtractor, check_embeddings, shrink_image};
use crate::vector::VectorIndex;

/// 每次请求嵌入服务的描述数量
const EMBED_BATCH: usize = 32;

/// 单个路径的入库结果
#[derive(Debug)]
pub enum IngestOutcome {
    /// 路径已存在，没有产生任何修改
    Skipped,
    /// 记录已提交，`vector_pending` 表示向量尚未写入，需要之后补齐
    Indexed { id: i64, vector_pending: bool },
    Failed(CatalogError),
}

impl IngestOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Indexed { vector_pending: false, .. } => "indexed",
            Self::Indexed { vector_pending: true, .. } => "pending",
            Self::Failed(_) => "failed",
        }
    }
}

/// 批量入库的汇总
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub indexed: usize,
    /// 已入库但向量尚未写入的数量，包含在 `indexed` 中
    pub vector_pending: usize,
    pub skipped: usize,
    pub failed: Vec<(PathBuf, CatalogError)>,
}

impl BatchSummary {
    pub fn record(&mut self, path: impl Into<PathBuf>, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Skipped => self.skipped += 1,
            IngestOutcome::Indexed { vector_pending, .. } => {
                self.indexed += 1;
                if vector_pending {
                    self.vector_pending += 1;
                }
            }
            IngestOutcome::Failed(e) => self.failed.push((path.into(), e)),
        }
    }

    pub fn total(&self) -> usize {
        self.indexed + self.skipped + self.failed.len()
    }
}

/// 一致性修复的结果
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// 补建的全文索引条目
    pub lexical_added: usize,
    /// 删除的多余全文索引条目
    pub lexical_removed: usize,
    /// 删除的多余向量
    pub vectors_removed: usize,
    /// 补齐的向量
    pub vectors_added: usize,
    /// 嵌入服务不可用，仍未补齐的向量
    pub vectors_pending: usize,
}

/// 语义搜索结果
#[derive(Debug, Clone)]
pub struct SemanticSearch {
    /// 本次搜索使用的向量索引版本
    pub version: u64,
    /// `(记录, 平方距离)`，按距离升序
    pub results: Vec<(ImageRecord, f32)>,
}

/// 按规范路径加锁，避免同一路径被并发处理
#[derive(Default)]
struct PathLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    async fn lock(&self, path: &str) -> PathGuard<'_> {
        let lock = {
            let mut locks = self.inner.lock().expect("failed to acquire path locks");
            // 等待中被取消的任务不会经过 PathGuard::drop，留下的条目只剩表中一个引用
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(path.to_owned()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        PathGuard { locks: self, path: path.to_owned(), lock, guard: Some(guard) }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().expect("failed to acquire path locks").len()
    }
}

struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.inner.lock().expect("failed to acquire path locks");
        // 只剩表中和自己持有的引用时，说明没有其他等待者
        if Arc::strong_count(&self.lock) <= 2 {
            locks.remove(&self.path);
        }
    }
}

pub struct CatalogBuilder {
    conf_dir: ConfDir,
    max_image_size: u32,
    concurrency: usize,
}

impl CatalogBuilder {
    pub fn new(conf_dir: ConfDir) -> Self {
        Self { conf_dir, max_image_size: 1024, concurrency: num_cpus::get() }
    }

    /// 发送给描述服务前，图片最长边的最大像素数，0 表示不缩放
    pub fn max_image_size(mut self, max_image_size: u32) -> Self {
        self.max_image_size = max_image_size;
        self
    }

    /// 批量入库时的并发数
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn open(
        self,
        describer: Arc<dyn Describer>,
        extractor: Arc<dyn MetadataExtractor>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Catalog> {
        tokio::fs::create_dir_all(self.conf_dir.path()).await?;
        let db = db::init_db(self.conf_dir.database()).await?;
        let vectors = VectorIndex::open(self.conf_dir.vector_index())?;
        metrics::set_vector_count(vectors.len());

        Ok(Catalog {
            db,
            vectors,
            describer,
            extractor,
            embedder,
            locks: PathLocks::default(),
            max_image_size: self.max_image_size,
            concurrency: self.concurrency,
        })
    }
}

/// 图片目录
///
/// 协调图片记录、全文索引和向量索引三处存储：
/// - 记录与全文索引在同一个事务中提交，提交即入库成功
/// - 向量在提交后写入，失败时记录为待补齐，由 [`Catalog::reconcile`] 处理
pub struct Catalog {
    db: Database,
    vectors: VectorIndex,
    describer: Arc<dyn Describer>,
    extractor: Arc<dyn MetadataExtractor>,
    embedder: Arc<dyn Embedder>,
    locks: PathLocks,
    max_image_size: u32,
    concurrency: usize,
}

impl Catalog {
    /// 添加单张图片，已存在的路径会被跳过
    pub async fn ingest(&self, path: impl AsRef<Path>) -> IngestOutcome {
        let path = path.as_ref();
        let outcome = match self.try_ingest(path).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_per_item() {
                    warn!("添加图片失败: {}: {}", path.display(), e);
                } else {
                    error!("添加图片失败: {}: {}", path.display(), e);
                }
                IngestOutcome::Failed(e)
            }
        };
        metrics::inc_ingest_count(outcome.label());
        outcome
    }

    async fn try_ingest(&self, path: &Path) -> Result<IngestOutcome> {
        let canonical = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| CatalogError::UnreadableImage(format!("{}: {}", path.display(), e)))?;
        let key = canonical.to_string_lossy().into_owned();

        if crud::exists(&self.db, &key).await? {
            return Ok(IngestOutcome::Skipped);
        }
        let _guard = self.locks.lock(&key).await;
        // 等待锁期间可能已被其他任务添加
        if crud::exists(&self.db, &key).await? {
            return Ok(IngestOutcome::Skipped);
        }

        let data: Arc<[u8]> = tokio::fs::read(&canonical)
            .await
            .map_err(|e| CatalogError::UnreadableImage(format!("{}: {}", key, e)))?
            .into();

        let metadata = match self.extract(data.clone()).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("提取元数据失败: {}: {}", key, e);
                Metadata::new()
            }
        };

        let description = match self.describe(data).await {
            Ok(description) => description,
            Err(e) => {
                warn!("生成描述失败: {}: {}", key, e);
                String::new()
            }
        };

        let vector = if description.is_empty() {
            None
        } else {
            match self.embed_one(&description).await {
                Ok(vector) => {
                    self.vectors.check_dim(&vector)?;
                    Some(vector)
                }
                Err(e) => {
                    warn!("计算向量失败，稍后补齐: {}: {}", key, e);
                    None
                }
            }
        };

        let mut tx = self.db.begin().await?;
        let id =
            match crud::add_image(&mut *tx, &key, &metadata, &description, Utc::now()).await {
                Ok(id) => id,
                Err(CatalogError::DuplicateKey(_)) => return Ok(IngestOutcome::Skipped),
                Err(e) => return Err(e),
            };
        if !description.is_empty() {
            lexical::index(&mut tx, id, &description).await?;
        }
        tx.commit().await?;

        let vector_pending = match vector {
            Some(vector) => match self.vectors.upsert(id, &vector) {
                Ok(()) => false,
                Err(e) => {
                    warn!("写入向量失败，稍后补齐: {}: {}", key, e);
                    true
                }
            },
            None => !description.is_empty(),
        };

        debug!("已添加图片: {} => {}", id, key);
        Ok(IngestOutcome::Indexed { id, vector_pending })
    }

    /// 并发添加多张图片，单张图片的失败不会中断其余图片
    ///
    /// 完成后将向量索引写入文件。
    pub async fn ingest_batch<I, P>(&self, paths: I, pb: Option<&ProgressBar>) -> Result<BatchSummary>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut summary = BatchSummary::default();
        let mut results = futures::stream::iter(paths)
            .map(|path| async move {
                let outcome = self.ingest(path.as_ref()).await;
                (path, outcome)
            })
            .buffer_unordered(self.concurrency);

        while let Some((path, outcome)) = results.next().await {
            let path = path.as_ref();
            if let Some(pb) = pb {
                match &outcome {
                    IngestOutcome::Skipped => pb.set_message(format!("跳过已添加图片: {}", path.display())),
                    IngestOutcome::Indexed { .. } => pb.set_message(path.display().to_string()),
                    IngestOutcome::Failed(e) => pb.println(format!("添加失败: {}: {}", path.display(), e)),
                }
                pb.inc(1);
            }
            summary.record(path, outcome);
        }

        self.flush()?;
        Ok(summary)
    }

    /// 全文检索，按相关度降序返回 `(记录, 相关度)`
    pub async fn search_lexical(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<(ImageRecord, f64)>> {
        let start = Instant::now();
        let hits = lexical::query(&self.db, query, limit).await?;
        let ids = hits.iter().map(|hit| hit.id).collect::<Vec<_>>();
        let mut records = crud::get_images_batch(&self.db, &ids)
            .await?
            .into_iter()
            .map(|record| (record.id, record))
            .collect::<HashMap<_, _>>();

        let results = hits
            .into_iter()
            .filter_map(|hit| records.remove(&hit.id).map(|record| (record, hit.score)))
            .collect();
        metrics::observe_search_duration("lexical", start.elapsed().as_secs_f64());
        Ok(results)
    }

    /// 语义搜索，返回距离查询文本最近的 k 条记录
    pub async fn search_semantic(&self, query: &str, k: usize) -> Result<SemanticSearch> {
        if self.vectors.is_empty() {
            return Err(CatalogError::IndexUnavailable);
        }
        if query.trim().is_empty() {
            return Err(CatalogError::MalformedQuery(query.to_owned()));
        }

        let start = Instant::now();
        let vector = self.embed_one(query).await?;
        let search = self.vectors.search(&vector, k)?;
        let ids = search.neighbors.iter().map(|n| n.id).collect::<Vec<_>>();
        let mut records = crud::get_images_batch(&self.db, &ids)
            .await?
            .into_iter()
            .map(|record| (record.id, record))
            .collect::<HashMap<_, _>>();

        let results = search
            .neighbors
            .into_iter()
            .filter_map(|n| records.remove(&n.id).map(|record| (record, n.distance)))
            .collect();
        let elapsed = start.elapsed().as_secs_f64();
        debug!("语义搜索耗时: {:.2}ms", elapsed * 1000.);
        metrics::observe_search_duration("semantic", elapsed);
        Ok(SemanticSearch { version: search.version, results })
    }

    /// 按添加时间倒序分页列出记录，`filter` 不为空时只列出描述匹配的记录
    pub async fn list(
        &self,
        limit: Option<usize>,
        offset: usize,
        filter: Option<&str>,
    ) -> Result<Vec<ImageRecord>> {
        match filter {
            Some(filter) => {
                let expr = lexical::match_expression(filter)?;
                crud::list_images_matching(&self.db, &expr, limit, offset).await
            }
            None => crud::list_images(&self.db, limit, offset).await,
        }
    }

    pub async fn get(&self, id: i64) -> Result<ImageRecord> {
        crud::get_image(&self.db, id).await
    }

    pub async fn count(&self) -> Result<u64> {
        crud::count_images(&self.db).await
    }

    pub fn vector_count(&self) -> usize {
        self.vectors.len()
    }

    pub fn vector_version(&self) -> u64 {
        self.vectors.version()
    }

    /// 修复三处存储之间的不一致
    ///
    /// 补建缺失的全文索引，删除多余的全文索引和向量，并为缺少向量的记录计算向量。
    /// 嵌入服务不可用时保留待补齐状态，不视为错误。
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let unindexed = lexical::unindexed_records(&self.db).await?;
        if !unindexed.is_empty() {
            let mut tx = self.db.begin().await?;
            for record in &unindexed {
                lexical::index(&mut tx, record.id, &record.description).await?;
            }
            tx.commit().await?;
        }
        report.lexical_added = unindexed.len();

        for id in lexical::stale_ids(&self.db).await? {
            if lexical::remove(&self.db, id).await? {
                report.lexical_removed += 1;
            }
        }

        let described = crud::described_records(&self.db).await?;
        let live = described.iter().map(|r| r.id).collect::<HashSet<_>>();
        let orphans = self
            .vectors
            .snapshot()
            .ids()
            .iter()
            .copied()
            .filter(|id| !live.contains(id))
            .collect::<Vec<_>>();
        for id in orphans {
            if self.vectors.remove(id) {
                report.vectors_removed += 1;
            }
        }

        let (added, pending) = self.embed_missing(described).await?;
        report.vectors_added = added;
        report.vectors_pending = pending;

        self.flush()?;
        if report != ReconcileReport::default() {
            info!("一致性修复完成: {:?}", report);
        }
        Ok(report)
    }

    /// 重新计算所有描述的向量，构建完成后一次性替换旧索引，返回新的索引版本
    ///
    /// 任意一批向量计算失败时放弃本次重建，旧索引保持不变。
    pub async fn rebuild_vectors(&self, pb: Option<&ProgressBar>) -> Result<u64> {
        let records = crud::described_records(&self.db).await?;
        info!("重建向量索引: {} 条描述", records.len());
        if let Some(pb) = pb {
            pb.set_length(records.len() as u64);
        }

        let mut entries = Vec::with_capacity(records.len());
        for chunk in records.chunks(EMBED_BATCH) {
            entries.extend(self.embed_records(chunk).await?);
            if let Some(pb) = pb {
                pb.inc(chunk.len() as u64);
            }
        }
        let version = self.vectors.rebuild(entries)?;

        // 重建期间新添加的记录
        let described = crud::described_records(&self.db).await?;
        self.embed_missing(described).await?;

        self.flush()?;
        info!("向量索引已重建: 版本 {}, 共 {} 条", version, self.vectors.len());
        Ok(version)
    }

    /// 删除文件已不存在的记录，同时删除对应的全文索引和向量，返回被删除的路径
    pub async fn prune(&self) -> Result<Vec<String>> {
        let mut removed = vec![];
        for (id, path) in crud::all_paths(&self.db).await? {
            if tokio::fs::try_exists(&path).await.unwrap_or(true) {
                continue;
            }
            let _guard = self.locks.lock(&path).await;

            let mut tx = self.db.begin().await?;
            lexical::remove(&mut *tx, id).await?;
            let deleted = crud::delete_image(&mut *tx, id).await?;
            tx.commit().await?;
            self.vectors.remove(id);

            if deleted {
                info!("已删除记录: {} => {}", id, path);
                removed.push(path);
            }
        }
        self.flush()?;
        Ok(removed)
    }

    /// 将向量索引的修改写入文件
    pub fn flush(&self) -> Result<()> {
        self.vectors.flush()?;
        metrics::set_vector_count(self.vectors.len());
        Ok(())
    }

    async fn extract(&self, data: Arc<[u8]>) -> Result<Metadata> {
        let extractor = self.extractor.clone();
        spawn_blocking(move || extractor.extract(&data)).await.map_err(join_error)?
    }

    async fn describe(&self, data: Arc<[u8]>) -> Result<String> {
        let max_size = self.max_image_size;
        let shrunk = {
            let data = data.clone();
            spawn_blocking(move || shrink_image(&data, max_size)).await.map_err(join_error)?
        };
        let shrunk = match shrunk {
            Ok(shrunk) => shrunk,
            Err(e) => {
                debug!("缩放图片失败，使用原图: {}", e);
                None
            }
        };

        let image = shrunk.as_deref().unwrap_or(&data[..]);
        self.describer.describe(image).await
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_owned()];
        let mut vectors = self.embedder.embed(&texts).await?;
        check_embeddings(texts.len(), &vectors)?;
        Ok(vectors.swap_remove(0))
    }

    async fn embed_records(&self, records: &[DescribedRecord]) -> Result<Vec<(i64, Vec<f32>)>> {
        let texts = records.iter().map(|r| r.description.clone()).collect::<Vec<_>>();
        let vectors = self.embedder.embed(&texts).await?;
        check_embeddings(texts.len(), &vectors)?;
        Ok(records.iter().map(|r| r.id).zip(vectors).collect())
    }

    /// 为缺少向量的记录计算向量，返回 `(补齐数量, 仍待补齐数量)`
    async fn embed_missing(&self, described: Vec<DescribedRecord>) -> Result<(usize, usize)> {
        let snapshot = self.vectors.snapshot();
        let missing =
            described.into_iter().filter(|r| !snapshot.contains(r.id)).collect::<Vec<_>>();
        if missing.is_empty() {
            return Ok((0, 0));
        }
        info!("补齐向量: {} 条", missing.len());

        let mut added = 0;
        for chunk in missing.chunks(EMBED_BATCH) {
            let entries = match self.embed_records(chunk).await {
                Ok(entries) => entries,
                Err(e @ CatalogError::DimensionMismatch { .. }) => return Err(e),
                Err(e) => {
                    warn!("嵌入服务不可用，剩余向量稍后补齐: {}", e);
                    break;
                }
            };
            for (id, vector) in entries {
                self.vectors.upsert(id, &vector)?;
                added += 1;
            }
        }
        Ok((added, missing.len() - added))
    }
}

fn join_error(e: tokio::task::JoinError) -> CatalogError {
    CatalogError::Io(std::io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_path_lock_serializes_and_cleans_up() {
        let locks = Arc::new(PathLocks::default());
        let guard = locks.lock("/a").await;
        assert_eq!(locks.len(), 1);

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("/a").await;
            })
        };
        // 不同路径互不阻塞
        drop(locks.lock("/b").await);

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_path_lock_cancelled_waiter() {
        let locks = PathLocks::default();
        let guard = locks.lock("/a").await;

        let mut waiter = Box::pin(locks.lock("/a"));
        assert!(futures::poll!(waiter.as_mut()).is_pending());
        drop(guard);
        // 锁已释放但等待者在被唤醒前就被取消
        drop(waiter);
        assert_eq!(locks.len(), 1);

        let guard = locks.lock("/b").await;
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn test_batch_summary() {
        let mut summary = BatchSummary::default();
        summary.record("/a", IngestOutcome::Indexed { id: 1, vector_pending: false });
        summary.record("/b", IngestOutcome::Indexed { id: 2, vector_pending: true });
        summary.record("/c", IngestOutcome::Skipped);
        summary.record("/d", IngestOutcome::Failed(CatalogError::UnreadableImage("x".into())));
        assert_eq!(summary.indexed, 2);
        assert_eq!(summary.vector_pending, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.total(), 4);
    }
}
