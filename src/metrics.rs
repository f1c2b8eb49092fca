use std::sync::LazyLock;

use log::warn;
use prometheus::*;

use crate::similarity::Method;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("artsearch_search_count", "count of similarity searches", &["method"])
        .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "artsearch_search_duration",
        "duration of the per-query catalog scan in seconds",
        &["method"]
    )
    .unwrap()
});

static METRIC_SEARCH_MAX_SCORE: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "artsearch_search_max_score",
        "best score of the per-query result list",
        &["method"],
        (1..=20).map(|x| x as f64 * 0.05).collect()
    )
    .unwrap()
});

static METRIC_EXTRACT_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "artsearch_extract_count",
        "count of processed catalog items",
        &["status"]
    )
    .unwrap()
});

static METRIC_EXTRACT_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "artsearch_extract_duration",
        "duration of the per-image feature extraction in seconds",
        &["size"]
    )
    .unwrap()
});

pub fn inc_search_count(method: Method) {
    METRIC_SEARCH_COUNT.with_label_values(&[&method.to_string()]).inc();
}

pub fn observe_search_duration(method: Method, duration: f32) {
    METRIC_SEARCH_DURATION.with_label_values(&[&method.to_string()]).observe(duration as f64);
}

pub fn observe_search_max_score(method: Method, score: f32) {
    METRIC_SEARCH_MAX_SCORE.with_label_values(&[&method.to_string()]).observe(score as f64);
}

/// `status` 为 succeeded、skipped 或 failed
pub fn inc_extract_count(status: &str) {
    METRIC_EXTRACT_COUNT.with_label_values(&[status]).inc();
}

pub fn observe_extract_duration(size: (u32, u32), duration: f32) {
    METRIC_EXTRACT_DURATION.with_label_values(&[to_fixed_size(size)]).observe(duration as f64);
}

/// 将当前所有指标推送到 Pushgateway，`auth` 格式为 username:password
pub fn push_metrics(url: &str, instance: &str, auth: Option<&str>) {
    let auth = auth.and_then(|s| s.split_once(':')).map(|(username, password)| {
        BasicAuthentication { username: username.to_string(), password: password.to_string() }
    });
    let r = prometheus::push_metrics(
        "artsearch",
        labels! {
            "instance".to_string() => instance.to_string(),
        },
        url,
        prometheus::gather(),
        auth,
    );
    if let Err(e) = r {
        warn!("推送指标失败: {e}");
    }
}

/// 将图像面积范围调整到几个固定值
fn to_fixed_size((width, height): (u32, u32)) -> &'static str {
    let area = width as u64 * height as u64;
    if area <= 256 * 256 {
        "256"
    } else if area <= 512 * 512 {
        "512"
    } else if area <= 1024 * 1024 {
        "1024"
    } else if area <= 2048 * 2048 {
        "2048"
    } else if area <= 4096 * 4096 {
        "4096"
    } else {
        "4096+"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_fixed_size() {
        assert_eq!(to_fixed_size((10, 10)), "256");
        assert_eq!(to_fixed_size((512, 512)), "512");
        assert_eq!(to_fixed_size((513, 512)), "1024");
        assert_eq!(to_fixed_size((100_000, 100_000)), "4096+");
    }
}
