//! End-to-end run of the promotion pipeline.
//!
//! Feature Matrix → Clustering → Risk Scoring → Diversity Health run once per
//! batch and produce an immutable [`PipelineArtifacts`]. Selections are then
//! computed per strategy against the shared artifacts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ndarray::ArrayView2;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, instrument};

use super::cluster::{
    ClusterAssigner, ClusterAssignment, ClusteringCache, KMeansClusterAssigner, fingerprint,
};
use super::config::{MonitorConfig, PipelineConfig};
use super::diversity::assess_diversity;
use super::embedding::Embedder;
use super::features::{FeatureMatrix, build_feature_matrix};
use super::risk::RiskScorer;
use super::select::{HybridSelector, PromotionSelector};
use super::strategy::validate_preset;
use super::types::{
    DiversityReport, ItemRecord, RiskMonitor, ScoredCatalog, SelectionResult, StrategyPreset,
};
use crate::observability::metrics::{Metrics, Stage};
use crate::util::error::PipelineError;

/// Promotion pipeline bound to one validated configuration.
pub struct PromotionPipeline {
    config: PipelineConfig,
    cache: Arc<ClusteringCache>,
    assigner: KMeansClusterAssigner,
    scorer: RiskScorer,
    metrics: Option<Arc<Metrics>>,
}

impl PromotionPipeline {
    /// # Errors
    /// Returns [`PipelineError::Configuration`] for an invalid configuration.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::with_cache(config, Arc::new(ClusteringCache::new()))
    }

    /// Share clustering results with other pipelines through `cache`.
    ///
    /// # Errors
    /// Returns [`PipelineError::Configuration`] for an invalid configuration.
    pub fn with_cache(
        config: PipelineConfig,
        cache: Arc<ClusteringCache>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            assigner: KMeansClusterAssigner::with_cache(config.clustering, Arc::clone(&cache)),
            scorer: RiskScorer::new(config.risk),
            config,
            cache,
            metrics: None,
        })
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Embed the item descriptions with `embedder`, then [`run`](Self::run).
    ///
    /// # Errors
    /// Propagates embedding and pipeline errors.
    pub fn run_with_embedder(
        &self,
        items: Vec<ItemRecord>,
        embedder: &dyn Embedder,
    ) -> Result<Arc<PipelineArtifacts>, PipelineError> {
        let documents: Vec<String> = items.iter().map(|item| item.description.clone()).collect();
        let embeddings = self.timed(Stage::Embedding, || embedder.embed(&documents))?;
        self.run(items, embeddings.view())
    }

    /// Run every stage over one batch.
    ///
    /// # Errors
    /// - [`PipelineError::InsufficientData`] for an empty batch or too few
    ///   distinct rows for `k` clusters.
    /// - [`PipelineError::Alignment`] when `embeddings` is not row-aligned.
    /// - [`PipelineError::Schema`] when a structural column is empty.
    #[instrument(skip_all, fields(items = items.len()))]
    pub fn run(
        &self,
        items: Vec<ItemRecord>,
        embeddings: ArrayView2<'_, f64>,
    ) -> Result<Arc<PipelineArtifacts>, PipelineError> {
        if let Some(metrics) = &self.metrics {
            metrics.runs_total.inc();
        }
        self.run_stages(items, embeddings).inspect_err(|error| {
            if let Some(metrics) = &self.metrics {
                metrics.record_failure(error.kind().as_str());
            }
        })
    }

    fn run_stages(
        &self,
        items: Vec<ItemRecord>,
        embeddings: ArrayView2<'_, f64>,
    ) -> Result<Arc<PipelineArtifacts>, PipelineError> {
        let started = Instant::now();

        let features = self.timed(Stage::Features, || {
            build_feature_matrix(&items, embeddings)
        })?;

        let cache_hit = self
            .cache
            .contains(fingerprint(&features, &self.config.clustering));
        let clustering = self.timed(Stage::Clustering, || self.assigner.assign(&features))?;
        if cache_hit {
            info!("reusing cached cluster assignment");
        }

        let scores = self.timed(Stage::Scoring, || {
            self.scorer.score(&items, &features, &clustering)
        })?;
        let diversity = self.timed(Stage::Diversity, || {
            assess_diversity(&clustering.labels, &self.config.diversity)
        })?;

        if let Some(metrics) = &self.metrics {
            if cache_hit {
                metrics.clustering_cache_hits.inc();
            }
            metrics.items_scored.inc_by(scores.len() as f64);
            metrics.exposure_entropy.set(diversity.entropy);
            metrics.top1_dominance.set(diversity.top1_dominance);
            if let Some(silhouette) = clustering.silhouette {
                metrics.silhouette.set(silhouette);
            }
        }

        info!(
            items = items.len(),
            k = clustering.k,
            inertia = clustering.inertia,
            silhouette = ?clustering.silhouette,
            entropy = diversity.entropy,
            diversity_risk = %diversity.risk,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "promotion pipeline run complete"
        );

        Ok(Arc::new(PipelineArtifacts {
            items,
            features,
            clustering,
            scores,
            diversity,
            selector: HybridSelector::new(self.config.exploration),
            monitor: self.config.monitor,
            metrics: self.metrics.clone(),
        }))
    }

    fn timed<T>(&self, stage: Stage, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = f();
        if let Some(metrics) = &self.metrics {
            metrics.observe_stage(stage, started.elapsed().as_secs_f64());
        }
        out
    }
}

/// Read-only output of one pipeline run.
#[derive(Debug)]
pub struct PipelineArtifacts {
    items: Vec<ItemRecord>,
    features: FeatureMatrix,
    clustering: Arc<ClusterAssignment>,
    scores: ScoredCatalog,
    diversity: DiversityReport,
    selector: HybridSelector,
    monitor: MonitorConfig,
    metrics: Option<Arc<Metrics>>,
}

impl PipelineArtifacts {
    #[must_use]
    pub fn items(&self) -> &[ItemRecord] {
        &self.items
    }

    #[must_use]
    pub fn features(&self) -> &FeatureMatrix {
        &self.features
    }

    #[must_use]
    pub fn clustering(&self) -> &ClusterAssignment {
        &self.clustering
    }

    #[must_use]
    pub fn scores(&self) -> &ScoredCatalog {
        &self.scores
    }

    #[must_use]
    pub fn diversity(&self) -> &DiversityReport {
        &self.diversity
    }

    /// Hybrid selection for one strategy. A zero budget yields an empty result.
    ///
    /// # Errors
    /// Returns [`PipelineError::Configuration`] for an invalid preset.
    pub fn select(
        &self,
        strategy: &StrategyPreset,
        budget: usize,
    ) -> Result<SelectionResult, PipelineError> {
        validate_preset(strategy)?;
        let started = Instant::now();
        let result = self
            .selector
            .select(&self.scores, &self.diversity, strategy, budget);

        if let Some(metrics) = &self.metrics {
            metrics.selections_total.inc();
            if result.risk_filter_relaxed {
                metrics.risk_filter_relaxations.inc();
            }
            metrics.observe_stage(Stage::Selection, started.elapsed().as_secs_f64());
        }
        info!(
            strategy = %strategy.name,
            budget,
            selected = result.len(),
            n_exploit = result.n_exploit,
            n_explore = result.n_explore,
            risk_filter_relaxed = result.risk_filter_relaxed,
            "selection complete"
        );
        Ok(result)
    }

    /// Independent selections for several strategies, computed in parallel.
    /// Results keep the order of `strategies`.
    ///
    /// # Errors
    /// Returns the first invalid preset's [`PipelineError::Configuration`].
    pub fn select_presets(
        &self,
        strategies: &[StrategyPreset],
        budget: usize,
    ) -> Result<Vec<SelectionResult>, PipelineError> {
        strategies.iter().try_for_each(validate_preset)?;
        strategies
            .par_iter()
            .map(|strategy| self.select(strategy, budget))
            .collect()
    }

    /// Items at or above `threshold`, riskiest first, capped at the
    /// configured monitor limit.
    #[must_use]
    pub fn risk_monitor(&self, threshold: f64) -> RiskMonitor {
        self.scores.risk_monitor(threshold, self.monitor.limit)
    }

    /// Presentation snapshot of the run plus the given selections.
    #[must_use]
    pub fn report(&self, selections: Vec<SelectionResult>) -> PipelineReport {
        PipelineReport {
            generated_at: Utc::now(),
            items: self.items.len(),
            clustering: ClusteringSummary {
                k: self.clustering.k,
                inertia: self.clustering.inertia,
                iterations: self.clustering.iterations,
                silhouette: self.clustering.silhouette,
                cluster_sizes: self.clustering.cluster_sizes(),
            },
            diversity: self.diversity.clone(),
            risk_monitor: self.risk_monitor(self.monitor.risk_threshold),
            selections,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusteringSummary {
    pub k: usize,
    pub inertia: f64,
    pub iterations: usize,
    pub silhouette: Option<f64>,
    pub cluster_sizes: BTreeMap<usize, usize>,
}

/// Serializable run summary written by the binary.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub generated_at: DateTime<Utc>,
    pub items: usize,
    pub clustering: ClusteringSummary,
    pub diversity: DiversityReport,
    pub risk_monitor: RiskMonitor,
    pub selections: Vec<SelectionResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::synthetic_catalog;
    use crate::pipeline::config::ClusteringConfig;
    use crate::pipeline::strategy::StrategyBook;
    use crate::pipeline::types::ExplorationBias;
    use ndarray::Array2;
    use prometheus::Registry;

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            clustering: ClusteringConfig {
                restarts: 4,
                ..ClusteringConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn run_produces_aligned_artifacts() {
        let catalog = synthetic_catalog(120, 6, 42);
        let pipeline = PromotionPipeline::new(fast_config()).expect("pipeline");

        let artifacts = pipeline
            .run(catalog.items, catalog.embeddings.view())
            .expect("run");

        assert_eq!(artifacts.items().len(), 120);
        assert_eq!(artifacts.features().nrows(), 120);
        assert_eq!(artifacts.clustering().labels.len(), 120);
        assert_eq!(artifacts.scores().len(), 120);
        assert!(artifacts.clustering().labels.iter().all(|&l| l < 4));
        let share_sum: f64 = artifacts.diversity().distribution.values().sum();
        assert!((share_sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rerun_is_identical() {
        let catalog = synthetic_catalog(80, 6, 3);
        let strategy = StrategyPreset::new("Balanced", 0.6, ExplorationBias::Medium);

        let run = || {
            let pipeline = PromotionPipeline::new(fast_config()).expect("pipeline");
            let artifacts = pipeline
                .run(catalog.items.clone(), catalog.embeddings.view())
                .expect("run");
            let selection = artifacts.select(&strategy, 10).expect("select");
            (artifacts.clustering().labels.clone(), artifacts.scores().clone(), selection)
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn shared_cache_reuses_clustering() {
        let catalog = synthetic_catalog(60, 6, 11);
        let cache = Arc::new(ClusteringCache::new());
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(registry).expect("metrics"));

        let pipeline = PromotionPipeline::with_cache(fast_config(), Arc::clone(&cache))
            .expect("pipeline")
            .with_metrics(Arc::clone(&metrics));
        let first = pipeline
            .run(catalog.items.clone(), catalog.embeddings.view())
            .expect("first");
        let second = pipeline
            .run(catalog.items, catalog.embeddings.view())
            .expect("second");

        assert_eq!(cache.len(), 1);
        assert_eq!(first.clustering(), second.clustering());
        assert_eq!(metrics.clustering_cache_hits.get(), 1.0);
        assert_eq!(metrics.runs_total.get(), 2.0);
    }

    #[test]
    fn select_presets_keeps_order_and_is_independent() {
        let catalog = synthetic_catalog(100, 6, 5);
        let pipeline = PromotionPipeline::new(fast_config()).expect("pipeline");
        let artifacts = pipeline
            .run(catalog.items, catalog.embeddings.view())
            .expect("run");
        let book = StrategyBook::builtin();

        let parallel = artifacts.select_presets(book.presets(), 10).expect("select");
        let names: Vec<&str> = parallel.iter().map(|r| r.strategy.as_str()).collect();
        assert_eq!(names, book.names());
        for (preset, result) in book.presets().iter().zip(&parallel) {
            assert_eq!(result, &artifacts.select(preset, 10).expect("sequential"));
            assert!(result.len() <= 10);
        }
    }

    #[test]
    fn invalid_preset_is_configuration_error() {
        let catalog = synthetic_catalog(40, 6, 9);
        let pipeline = PromotionPipeline::new(fast_config()).expect("pipeline");
        let artifacts = pipeline
            .run(catalog.items, catalog.embeddings.view())
            .expect("run");
        let broken = StrategyPreset::new("Broken", 0.0, ExplorationBias::Low);

        let err = artifacts.select(&broken, 5).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn misaligned_embeddings_fail_and_are_counted() {
        let catalog = synthetic_catalog(30, 6, 1);
        let metrics = Arc::new(Metrics::new(Arc::new(Registry::new())).expect("metrics"));
        let pipeline = PromotionPipeline::new(fast_config())
            .expect("pipeline")
            .with_metrics(Arc::clone(&metrics));

        let err = pipeline
            .run(catalog.items, Array2::<f64>::zeros((29, 6)).view())
            .unwrap_err();

        assert!(matches!(err, PipelineError::Alignment { .. }));
        assert_eq!(
            metrics.run_failures.with_label_values(&["alignment"]).get(),
            1.0
        );
    }

    #[test]
    fn select_presets_reports_the_first_invalid_preset() {
        let catalog = synthetic_catalog(40, 6, 9);
        let pipeline = PromotionPipeline::new(fast_config()).expect("pipeline");
        let artifacts = pipeline
            .run(catalog.items, catalog.embeddings.view())
            .expect("run");
        let mut presets = StrategyBook::builtin().presets().to_vec();
        presets.push(StrategyPreset::new("FirstBroken", 0.0, ExplorationBias::Low));
        presets.push(StrategyPreset::new("SecondBroken", 1.5, ExplorationBias::High));

        for _ in 0..8 {
            let err = artifacts.select_presets(&presets, 5).unwrap_err();
            assert!(err.to_string().contains("FirstBroken"), "{err}");
        }
    }

    #[test]
    fn embedding_and_feature_build_are_timed_separately() {
        struct FixedEmbedder(Array2<f64>);

        impl Embedder for FixedEmbedder {
            fn embed(&self, documents: &[String]) -> Result<Array2<f64>, PipelineError> {
                assert_eq!(documents.len(), self.0.nrows());
                Ok(self.0.clone())
            }
        }

        let catalog = synthetic_catalog(40, 6, 13);
        let metrics = Arc::new(Metrics::new(Arc::new(Registry::new())).expect("metrics"));
        let pipeline = PromotionPipeline::new(fast_config())
            .expect("pipeline")
            .with_metrics(Arc::clone(&metrics));

        pipeline
            .run_with_embedder(catalog.items, &FixedEmbedder(catalog.embeddings))
            .expect("run");

        for stage in [Stage::Embedding, Stage::Features, Stage::Clustering] {
            let samples = metrics
                .stage_duration
                .with_label_values(&[stage.as_str()])
                .get_sample_count();
            assert_eq!(samples, 1, "{}", stage.as_str());
        }
    }

    #[test]
    fn risk_monitor_uses_the_given_threshold() {
        let catalog = synthetic_catalog(60, 6, 4);
        let pipeline = PromotionPipeline::new(fast_config()).expect("pipeline");
        let artifacts = pipeline
            .run(catalog.items, catalog.embeddings.view())
            .expect("run");

        let everything = artifacts.risk_monitor(0.0);
        assert_eq!(everything.at_risk, 60);
        assert_eq!(everything.top.len(), 20);
        assert!(
            everything
                .top
                .windows(2)
                .all(|pair| pair[0].promotion_failure_score >= pair[1].promotion_failure_score)
        );

        let strict = artifacts.risk_monitor(0.6);
        let expected = artifacts
            .scores()
            .items
            .iter()
            .filter(|item| item.promotion_failure_score >= 0.6)
            .count();
        assert_eq!(strict.at_risk, expected);
        assert!(strict.top.iter().all(|item| item.promotion_failure_score >= 0.6));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = fast_config();
        config.clustering.k = 1;
        assert!(matches!(
            PromotionPipeline::new(config),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn report_serializes() {
        let catalog = synthetic_catalog(50, 6, 2);
        let pipeline = PromotionPipeline::new(fast_config()).expect("pipeline");
        let artifacts = pipeline
            .run(catalog.items, catalog.embeddings.view())
            .expect("run");
        let selection = artifacts
            .select(&StrategyBook::builtin().presets()[0], 5)
            .expect("select");

        let report = artifacts.report(vec![selection]);
        let json = serde_json::to_value(&report).expect("serialize");

        assert_eq!(json["items"], 50);
        assert_eq!(json["selections"][0]["strategy"], "Conservative");
        assert_eq!(json["risk_monitor"]["threshold"], 0.6);
        let listed = json["risk_monitor"]["top"].as_array().map_or(0, Vec::len);
        let at_risk = report.risk_monitor.at_risk;
        assert_eq!(listed, at_risk.min(20));
        assert!(json["diversity"]["risk"].is_string());
    }
}
