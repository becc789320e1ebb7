//! 精确搜索的平面向量索引，以及它的文件格式
//!
//! ```text
//! 偏移     大小      类型        说明
//! 0x00     8         [u8; 8]     魔数 "IMCVEC01"
//! 0x08     4         u32 LE      D: 向量维度，空索引且维度未确定时为 0
//! 0x0C     8         u64 LE      N: 向量数量
//! 0x14     N*(8+D*4) (i64, [f32]) 每个向量的 ID 和数据，小端序
//! ```

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::distance::knn_l2;
use crate::error::{CatalogError, Result};

/// 魔数、维度和数量三个字段的总长度
const HEADER_SIZE: u64 = 8 + 4 + 8;

pub const MAGIC: [u8; 8] = *b"IMCVEC01";

#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    /// 向量维度，在第一次写入时确定
    dim: Option<usize>,
    /// 每行向量对应的 ID
    ids: Vec<i64>,
    /// 按行展开的向量数据
    data: Vec<f32>,
    /// ID => 行号
    slots: HashMap<i64, usize>,
    /// 每次修改递增
    version: u64,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dim(dim: usize) -> Self {
        Self { dim: Some(dim), ..Self::default() }
    }

    /// 从 `(ID, 向量)` 列表构建索引，维度取自第一个向量，列表为空时使用 `fallback_dim`
    pub fn from_entries<I>(entries: I, fallback_dim: Option<usize>) -> Result<Self>
    where
        I: IntoIterator<Item = (i64, Vec<f32>)>,
    {
        let mut entries = entries.into_iter().peekable();
        let dim = entries.peek().map(|(_, v)| v.len()).or(fallback_dim);
        let mut index = Self { dim, ..Self::default() };
        for (id, vector) in entries {
            index.upsert(id, &vector)?;
        }
        Ok(index)
    }

    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(super) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn contains(&self, id: i64) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&[f32]> {
        let dim = self.dim?;
        self.slots.get(&id).map(|&slot| &self.data[slot * dim..(slot + 1) * dim])
    }

    /// 检查向量维度是否与索引一致，维度未确定时任意非空向量都合法
    pub fn check_dim(&self, vector: &[f32]) -> Result<()> {
        match self.dim {
            Some(dim) if dim != vector.len() => {
                Err(CatalogError::DimensionMismatch { expected: dim, actual: vector.len() })
            }
            None if vector.is_empty() => {
                Err(CatalogError::DimensionMismatch { expected: 1, actual: 0 })
            }
            _ => Ok(()),
        }
    }

    /// 添加或替换指定 ID 的向量
    pub fn upsert(&mut self, id: i64, vector: &[f32]) -> Result<()> {
        self.check_dim(vector)?;
        let dim = *self.dim.get_or_insert(vector.len());

        match self.slots.get(&id) {
            Some(&slot) => self.data[slot * dim..(slot + 1) * dim].copy_from_slice(vector),
            None => {
                self.slots.insert(id, self.ids.len());
                self.ids.push(id);
                self.data.extend_from_slice(vector);
            }
        }
        self.version += 1;
        Ok(())
    }

    /// 删除指定 ID 的向量，返回是否确实删除
    pub fn remove(&mut self, id: i64) -> bool {
        let (Some(slot), Some(dim)) = (self.slots.remove(&id), self.dim) else {
            return false;
        };

        // 将最后一行移动到被删除的位置
        let last = self.ids.len() - 1;
        if slot != last {
            let moved = self.ids[last];
            self.ids[slot] = moved;
            self.data.copy_within(last * dim..(last + 1) * dim, slot * dim);
            self.slots.insert(moved, slot);
        }
        self.ids.truncate(last);
        self.data.truncate(last * dim);
        self.version += 1;
        true
    }

    /// 搜索最近的 k 个向量，返回 `(ID, 平方距离)`，按距离升序
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f32)>> {
        let Some(dim) = self.dim else {
            return Ok(vec![]);
        };
        if query.len() != dim {
            return Err(CatalogError::DimensionMismatch { expected: dim, actual: query.len() });
        }
        Ok(knn_l2(query, &self.data, &self.ids, k))
    }

    /// 保存到文件，先写入临时文件再重命名，避免中途崩溃留下损坏的文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = tmp_path(path);

        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let dim = self.dim.unwrap_or(0);
        writer.write_all(&MAGIC)?;
        writer.write_u32::<LittleEndian>(dim as u32)?;
        writer.write_u64::<LittleEndian>(self.ids.len() as u64)?;
        for (id, vector) in self.ids.iter().zip(self.data.chunks_exact(dim.max(1))) {
            writer.write_i64::<LittleEndian>(*id)?;
            for &x in vector {
                writer.write_f32::<LittleEndian>(x)?;
            }
        }
        writer.flush()
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader, len).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
                CatalogError::CorruptIndex(format!("{}: {}", path.display(), e))
            }
            _ => CatalogError::Io(e),
        })
    }

    fn read_from<R: Read>(reader: &mut R, len: u64) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "魔数不匹配"));
        }

        let dim = reader.read_u32::<LittleEndian>()?;
        let count = reader.read_u64::<LittleEndian>()?;
        // 头部声明的大小必须与文件长度一致，之后才能按 count 预分配
        let expected = (dim as u64)
            .checked_mul(4)
            .and_then(|size| size.checked_add(8))
            .and_then(|size| size.checked_mul(count))
            .and_then(|size| size.checked_add(HEADER_SIZE));
        if expected != Some(len) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("文件长度 {len} 与头部声明的 {count} 个 {dim} 维向量不符"),
            ));
        }
        let (dim, count) = (dim as usize, count as usize);
        if dim == 0 {
            if count != 0 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "维度为 0 但存在向量"));
            }
            return Ok(Self::new());
        }

        let mut index = Self::with_dim(dim);
        index.ids.reserve(count);
        index.data.reserve(count * dim);
        let mut vector = vec![0f32; dim];
        for _ in 0..count {
            let id = reader.read_i64::<LittleEndian>()?;
            reader.read_f32_into::<LittleEndian>(&mut vector)?;
            if index.contains(id) {
                return Err(io::Error::new(io::ErrorKind::InvalidData, format!("重复的 ID: {id}")));
            }
            index.slots.insert(id, index.ids.len());
            index.ids.push(id);
            index.data.extend_from_slice(&vector);
        }
        Ok(index)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn sample() -> FlatIndex {
        let mut index = FlatIndex::new();
        index.upsert(1, &[0., 0.]).unwrap();
        index.upsert(2, &[1., 0.]).unwrap();
        index.upsert(3, &[10., 10.]).unwrap();
        index
    }

    #[test]
    fn test_search_distance() {
        let index = sample();
        assert_eq!(index.search(&[0., 0.], 2).unwrap(), vec![(1, 0.), (2, 1.)]);
    }

    #[test]
    fn test_dimension_fixed_by_first_vector() {
        let mut index = FlatIndex::new();
        assert_eq!(index.dim(), None);
        index.upsert(1, &[1., 2., 3.]).unwrap();
        assert_eq!(index.dim(), Some(3));

        let err = index.upsert(2, &[1., 2.]).unwrap_err();
        assert!(matches!(err, CatalogError::DimensionMismatch { expected: 3, actual: 2 }));
        let err = index.search(&[1.], 1).unwrap_err();
        assert!(matches!(err, CatalogError::DimensionMismatch { expected: 3, actual: 1 }));
        assert!(FlatIndex::new().upsert(1, &[]).is_err());
    }

    #[test]
    fn test_upsert_replaces() {
        let mut index = sample();
        index.upsert(3, &[0.5, 0.]).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.get(3), Some(&[0.5, 0.][..]));
        assert_eq!(index.search(&[0., 0.], 2).unwrap(), vec![(1, 0.), (3, 0.25)]);
    }

    #[test]
    fn test_remove() {
        let mut index = sample();
        let version = index.version();
        assert!(index.remove(1));
        assert!(!index.remove(1));
        assert!(index.version() > version);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(3), Some(&[10., 10.][..]));
        assert_eq!(index.search(&[0., 0.], 3).unwrap(), vec![(2, 1.), (3, 200.)]);

        assert!(index.remove(3));
        assert!(index.remove(2));
        assert!(index.is_empty());
        assert_eq!(index.dim(), Some(2));
    }

    #[test]
    fn test_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let index = sample();
        index.save(&path).unwrap();
        assert!(!tmp_path(&path).exists());

        let loaded = FlatIndex::load(&path).unwrap();
        assert_eq!(loaded.dim(), Some(2));
        assert_eq!(loaded.ids(), index.ids());
        assert_eq!(loaded.get(2), Some(&[1., 0.][..]));
        assert_eq!(loaded.search(&[0., 0.], 2).unwrap(), index.search(&[0., 0.], 2).unwrap());
    }

    #[test]
    fn test_save_load_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        FlatIndex::new().save(&path).unwrap();
        let loaded = FlatIndex::load(&path).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dim(), None);
    }

    #[test]
    fn test_load_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");

        std::fs::write(&path, b"NOTMAGIC").unwrap();
        assert!(matches!(FlatIndex::load(&path), Err(CatalogError::CorruptIndex(_))));

        // 截断的文件
        sample().save(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(FlatIndex::load(&path), Err(CatalogError::CorruptIndex(_))));

        // 多余的尾部数据
        let mut padded = bytes.clone();
        padded.extend_from_slice(&[0; 4]);
        std::fs::write(&path, &padded).unwrap();
        assert!(matches!(FlatIndex::load(&path), Err(CatalogError::CorruptIndex(_))));

        let missing = dir.path().join("missing.bin");
        assert!(matches!(FlatIndex::load(&missing), Err(CatalogError::Io(_))));
    }

    #[test]
    fn test_load_oversized_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");

        for count in [1u64 << 40, u64::MAX] {
            let mut bytes = MAGIC.to_vec();
            bytes.write_u32::<LittleEndian>(384).unwrap();
            bytes.write_u64::<LittleEndian>(count).unwrap();
            bytes.extend_from_slice(&[0; 64]);
            std::fs::write(&path, &bytes).unwrap();
            assert!(matches!(FlatIndex::load(&path), Err(CatalogError::CorruptIndex(_))));
        }
    }
}
