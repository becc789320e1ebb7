use std::cmp::Ordering;

use rayon::prelude::*;

/// 向量数量超过该值时使用 rayon 并行计算距离
const PARALLEL_THRESHOLD: usize = 4096;

/// 平方欧氏距离
#[inline(always)]
pub fn l2_squared(va: &[f32], vb: &[f32]) -> f32 {
    debug_assert_eq!(va.len(), vb.len());
    let mut sum = 0.;
    for (a, b) in va.iter().zip(vb) {
        let d = a - b;
        sum += d * d;
    }
    sum
}

/// 按距离升序比较，距离相同时按 ID 升序，保证结果与插入顺序无关
#[inline]
fn by_distance_then_id(a: &(i64, f32), b: &(i64, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
}

/// 暴力搜索距离 `query` 最近的 k 个向量
///
/// 参数：
/// - query: 查询向量
/// - data: 按行展开的向量数据，每行长度与 query 相同
/// - ids: 每行向量对应的 ID
/// - k: 返回的最近邻居数量
///
/// 返回 `(ID, 平方距离)`，按距离升序
pub fn knn_l2(query: &[f32], data: &[f32], ids: &[i64], k: usize) -> Vec<(i64, f32)> {
    let dim = query.len();
    assert!(dim > 0, "dimension must be positive");
    assert_eq!(data.len(), ids.len() * dim, "data and ids length mismatch");

    if k == 0 || ids.is_empty() {
        return vec![];
    }

    let mut all: Vec<(i64, f32)> = if ids.len() >= PARALLEL_THRESHOLD {
        data.par_chunks_exact(dim)
            .zip(ids.par_iter())
            .map(|(v, &id)| (id, l2_squared(query, v)))
            .collect()
    } else {
        data.chunks_exact(dim).zip(ids).map(|(v, &id)| (id, l2_squared(query, v))).collect()
    };

    if k < all.len() {
        all.select_nth_unstable_by(k - 1, by_distance_then_id);
        all.truncate(k);
    }
    all.sort_unstable_by(by_distance_then_id);
    all
}
