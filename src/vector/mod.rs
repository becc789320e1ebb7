pub mod distance;
pub mod flat;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

pub use flat::FlatIndex;
use log::{debug, info};
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: i64,
    /// 平方欧氏距离
    pub distance: f32,
}

/// 一次向量搜索的结果
#[derive(Debug, Clone)]
pub struct VectorSearch {
    /// 搜索所使用的索引版本
    pub version: u64,
    /// 按距离升序排列的结果
    pub neighbors: Vec<Neighbor>,
}

/// 向量索引
///
/// 内部持有一个不可变的 [`FlatIndex`] 快照，读者拿到快照后不再持有锁，
/// 写入时写时复制，重建时整体替换，因此搜索结果永远来自同一个版本。
pub struct VectorIndex {
    path: PathBuf,
    current: RwLock<Arc<FlatIndex>>,
    /// 内存中的修改尚未写入文件
    dirty: AtomicBool,
}

impl VectorIndex {
    /// 打开向量索引，文件不存在时创建一个空索引
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let index = if path.exists() {
            debug!("读取向量索引: {}", path.display());
            let index = FlatIndex::load(&path)?;
            info!("已加载向量: {}，维度: {:?}", index.len(), index.dim());
            index
        } else {
            FlatIndex::new()
        };
        Ok(Self { path, current: RwLock::new(Arc::new(index)), dirty: AtomicBool::new(false) })
    }

    /// 获取当前版本的只读快照
    pub fn snapshot(&self) -> Arc<FlatIndex> {
        self.current.read().expect("failed to acquire rw lock").clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn dim(&self) -> Option<usize> {
        self.snapshot().dim()
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.snapshot().contains(id)
    }

    pub fn check_dim(&self, vector: &[f32]) -> Result<()> {
        self.snapshot().check_dim(vector)
    }

    /// 添加或替换指定 ID 的向量
    pub fn upsert(&self, id: i64, vector: &[f32]) -> Result<()> {
        let mut current = self.current.write().expect("failed to acquire rw lock");
        Arc::make_mut(&mut *current).upsert(id, vector)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// 删除指定 ID 的向量
    pub fn remove(&self, id: i64) -> bool {
        let mut current = self.current.write().expect("failed to acquire rw lock");
        if !current.contains(id) {
            return false;
        }
        Arc::make_mut(&mut *current).remove(id);
        self.dirty.store(true, Ordering::Release);
        true
    }

    /// 搜索最近的 k 个向量
    pub fn search(&self, query: &[f32], k: usize) -> Result<VectorSearch> {
        let snapshot = self.snapshot();
        let start = Instant::now();
        let neighbors = snapshot
            .search(query, k)?
            .into_iter()
            .map(|(id, distance)| Neighbor { id, distance })
            .collect();
        debug!("向量搜索耗时: {:.2}ms", start.elapsed().as_secs_f32() * 1000.);
        Ok(VectorSearch { version: snapshot.version(), neighbors })
    }

    /// 使用给定的全部向量重建索引，返回新版本号
    ///
    /// 新索引在锁外构建完成后一次性替换，搜索要么看到旧版本，要么看到新版本。
    /// 维度由新向量决定，为空时沿用旧维度。
    pub fn rebuild<I>(&self, entries: I) -> Result<u64>
    where
        I: IntoIterator<Item = (i64, Vec<f32>)>,
    {
        let previous = self.snapshot();
        let mut index = FlatIndex::from_entries(entries, previous.dim())?;

        let mut current = self.current.write().expect("failed to acquire rw lock");
        let version = current.version().max(previous.version()) + 1;
        index.set_version(version);
        *current = Arc::new(index);
        self.dirty.store(true, Ordering::Release);
        Ok(version)
    }

    /// 将修改写入文件，没有修改时不做任何事，返回是否写入
    pub fn flush(&self) -> Result<bool> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let snapshot = self.snapshot();
        if let Err(e) = snapshot.save(&self.path) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        debug!("向量索引已保存: {} 条", snapshot.len());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_snapshot_isolated_from_writes() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(dir.path().join("vectors.bin")).unwrap();
        index.upsert(1, &[0., 0.]).unwrap();

        let snapshot = index.snapshot();
        index.upsert(2, &[1., 0.]).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_rebuild_bumps_version() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(dir.path().join("vectors.bin")).unwrap();
        index.upsert(1, &[0., 0.]).unwrap();
        let before = index.version();

        let version = index.rebuild(vec![(5, vec![1., 1.]), (6, vec![2., 2.])]).unwrap();
        assert!(version > before);
        let result = index.search(&[0., 0.], 5).unwrap();
        assert_eq!(result.version, version);
        assert_eq!(result.neighbors.iter().map(|n| n.id).collect::<Vec<_>>(), vec![5, 6]);
    }

    #[test]
    fn test_flush_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        {
            let index = VectorIndex::open(&path).unwrap();
            assert!(!index.flush().unwrap());
            index.upsert(1, &[0., 0., 1.]).unwrap();
            index.upsert(2, &[0., 1., 0.]).unwrap();
            assert!(index.remove(1));
            assert!(index.flush().unwrap());
            assert!(!index.flush().unwrap());
        }
        let index = VectorIndex::open(&path).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.dim(), Some(3));
        assert!(index.contains(2));
    }
}
