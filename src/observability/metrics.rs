//! Prometheusメトリクス定義。
use prometheus::{
    Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Registry,
    register_counter_vec_with_registry, register_counter_with_registry,
    register_gauge_with_registry,
};
use std::sync::Arc;

/// Pipeline stage label used on the duration histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embedding,
    Features,
    Clustering,
    Scoring,
    Diversity,
    Selection,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Embedding => "embedding",
            Stage::Features => "features",
            Stage::Clustering => "clustering",
            Stage::Scoring => "scoring",
            Stage::Diversity => "diversity",
            Stage::Selection => "selection",
        }
    }
}

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub runs_total: Counter,
    pub run_failures: CounterVec,
    pub items_scored: Counter,
    pub selections_total: Counter,
    pub risk_filter_relaxations: Counter,
    pub clustering_cache_hits: Counter,

    // ヒストグラム
    pub stage_duration: HistogramVec,

    // ゲージ
    pub exposure_entropy: Gauge,
    pub top1_dominance: Gauge,
    pub silhouette: Gauge,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    ///
    /// # Errors
    /// 同名のメトリクスが既に登録されている場合はエラーを返す。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        let stage_duration = HistogramVec::new(
            HistogramOpts::new(
                "promotion_stage_duration_seconds",
                "Wall time spent in each pipeline stage",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["stage"],
        )?;
        registry.register(Box::new(stage_duration.clone()))?;

        Ok(Self {
            runs_total: register_counter_with_registry!(
                "promotion_runs_total",
                "Total number of pipeline runs",
                registry
            )?,
            run_failures: register_counter_vec_with_registry!(
                "promotion_run_failures_total",
                "Pipeline runs that failed, by error kind",
                &["kind"],
                registry
            )?,
            items_scored: register_counter_with_registry!(
                "promotion_items_scored_total",
                "Total number of items given a promotion failure score",
                registry
            )?,
            selections_total: register_counter_with_registry!(
                "promotion_selections_total",
                "Total number of hybrid selections",
                registry
            )?,
            risk_filter_relaxations: register_counter_with_registry!(
                "promotion_risk_filter_relaxations_total",
                "Selections where too few items passed the risk threshold",
                registry
            )?,
            clustering_cache_hits: register_counter_with_registry!(
                "promotion_clustering_cache_hits_total",
                "Runs that reused a cached cluster assignment",
                registry
            )?,
            stage_duration,
            exposure_entropy: register_gauge_with_registry!(
                "promotion_exposure_entropy_bits",
                "Entropy of the last cluster exposure distribution",
                registry
            )?,
            top1_dominance: register_gauge_with_registry!(
                "promotion_top1_dominance_ratio",
                "Share of the most exposed cluster in the last run",
                registry
            )?,
            silhouette: register_gauge_with_registry!(
                "promotion_cluster_silhouette",
                "Silhouette score of the last clustering",
                registry
            )?,
        })
    }

    /// Observe a stage duration in seconds.
    pub fn observe_stage(&self, stage: Stage, seconds: f64) {
        self.stage_duration
            .with_label_values(&[stage.as_str()])
            .observe(seconds);
    }

    pub fn record_failure(&self, kind: &str) {
        self.run_failures.with_label_values(&[kind]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn registers_on_private_registry() {
        let registry = Arc::new(Registry::new());
        let metrics = Metrics::new(Arc::clone(&registry)).expect("register");

        metrics.runs_total.inc();
        metrics.observe_stage(Stage::Clustering, 0.25);
        metrics.record_failure("schema");

        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .expect("encode");
        let text = String::from_utf8(buffer).expect("utf8");
        assert!(text.contains("promotion_runs_total 1"));
        assert!(text.contains("promotion_stage_duration_seconds_count{stage=\"clustering\"} 1"));
        assert!(text.contains("promotion_run_failures_total{kind=\"schema\"} 1"));
    }

    #[test]
    fn stages_have_distinct_labels() {
        let registry = Arc::new(Registry::new());
        let metrics = Metrics::new(registry).expect("register");

        metrics.observe_stage(Stage::Embedding, 0.5);
        metrics.observe_stage(Stage::Features, 0.01);

        for stage in ["embedding", "features"] {
            let count = metrics
                .stage_duration
                .with_label_values(&[stage])
                .get_sample_count();
            assert_eq!(count, 1, "{stage}");
        }
    }

    #[test]
    fn double_registration_fails() {
        let registry = Arc::new(Registry::new());
        let _first = Metrics::new(Arc::clone(&registry)).expect("first");
        assert!(Metrics::new(registry).is_err());
    }
}
