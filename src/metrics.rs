use std::sync::LazyLock;

use prometheus::*;

static METRIC_INDEXED_VECTORS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("imvec_indexed_vectors", "count of vectors upserted to the index")
        .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "imvec_search_duration",
        "duration of the per-image search in seconds",
        &["top_k"]
    )
    .unwrap()
});

static METRIC_DELETED_IMAGES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "imvec_deleted_images",
        "count of the image delete requests",
        &["result"]
    )
    .unwrap()
});

static METRIC_STORE_RETRIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "imvec_store_retries",
        "count of the retried vector store writes",
        &["operation"]
    )
    .unwrap()
});

pub fn inc_indexed_vectors(count: usize) {
    METRIC_INDEXED_VECTORS.inc_by(count as u64);
}

pub fn observe_search_duration(top_k: usize, duration: f32) {
    METRIC_SEARCH_DURATION.with_label_values(&[to_fixed_k(top_k)]).observe(duration as f64);
}

/// `result` 为 `ok`、`compensated` 或 `inconsistent`
pub fn inc_deleted_images(result: &str) {
    METRIC_DELETED_IMAGES.with_label_values(&[result]).inc();
}

pub fn inc_store_retries(operation: &str) {
    METRIC_STORE_RETRIES.with_label_values(&[operation]).inc();
}

/// 将 top_k 调整到几个固定值，避免标签过多
fn to_fixed_k(top_k: usize) -> &'static str {
    match top_k {
        0..=6 => "6",
        7..=10 => "10",
        11..=50 => "50",
        _ => "50+",
    }
}
