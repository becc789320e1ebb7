use std::sync::LazyLock;

use prometheus::*;

static METRIC_INGEST_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "imcatalog_ingest_count",
        "count of ingested images by outcome",
        &["outcome"]
    )
    .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "imcatalog_search_duration",
        "duration of a search in seconds",
        &["kind"]
    )
    .unwrap()
});

static METRIC_VECTOR_COUNT: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("imcatalog_vector_count", "number of vectors in the index").unwrap()
});

/// 增加入库结果计数，`outcome` 为 skipped / indexed / pending / failed
pub fn inc_ingest_count(outcome: &str) {
    METRIC_INGEST_COUNT.with_label_values(&[outcome]).inc();
}

/// 记录一次搜索耗时，`kind` 为 lexical / semantic
pub fn observe_search_duration(kind: &str, seconds: f64) {
    METRIC_SEARCH_DURATION.with_label_values(&[kind]).observe(seconds);
}

pub fn set_vector_count(count: usize) {
    METRIC_VECTOR_COUNT.set(count as i64);
}

/// 以 prometheus 文本格式导出所有指标
pub fn encode_text() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    Ok(encoder.encode_to_string(&gather())?)
}
