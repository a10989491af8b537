//! Promotion failure risk scoring.
//!
//! This module combines three per-item sub-scores into one bounded score:
//! - **Duration**: longer content asks for more commitment; movies carry an
//!   extra multiplicative penalty
//! - **Cluster atypicality**: distance from the item's own cluster mean
//! - **Delay**: gap between release and platform listing
//!
//! Each sub-score is min-max normalized over the current batch after missing
//! inputs are imputed with the batch median.

use ndarray::{Array1, ArrayView2};
use tracing::info;

use super::cluster::ClusterAssignment;
use super::config::RiskConfig;
use super::features::FeatureMatrix;
use super::types::{ItemRecord, ScoredCatalog, ScoredItem};
use crate::util::error::PipelineError;
use crate::util::kmeans::distance_sq;
use crate::util::stats::{impute_median, min_max_normalize};

/// Scores every item of a clustered batch.
#[derive(Debug, Clone, Default)]
pub struct RiskScorer {
    config: RiskConfig,
}

impl RiskScorer {
    #[must_use]
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Compute the scored, clustered item table.
    ///
    /// # Errors
    /// - [`PipelineError::Configuration`] for invalid weights.
    /// - [`PipelineError::Alignment`] when the feature matrix or the label
    ///   vector does not have one row per item.
    pub fn score(
        &self,
        items: &[ItemRecord],
        features: &FeatureMatrix,
        assignment: &ClusterAssignment,
    ) -> Result<ScoredCatalog, PipelineError> {
        self.config.validate()?;
        if features.nrows() != items.len() {
            return Err(PipelineError::alignment(
                "feature matrix",
                items.len(),
                features.nrows(),
            ));
        }
        if assignment.labels.len() != items.len() {
            return Err(PipelineError::alignment(
                "cluster labels",
                items.len(),
                assignment.labels.len(),
            ));
        }

        let duration = duration_risk(items, self.config.movie_penalty);
        let cluster = cluster_distance_risk(features.values(), &assignment.labels);
        let delay = delay_risk(items);
        let weights = self.config.weights;

        let scored: Vec<ScoredItem> = items
            .iter()
            .enumerate()
            .map(|(row, item)| {
                let combined = weights.duration * duration[row]
                    + weights.cluster * cluster[row]
                    + weights.delay * delay[row];
                ScoredItem {
                    row,
                    id: item.id.clone(),
                    title: item.title.clone(),
                    cluster_id: assignment.labels[row],
                    duration_risk: duration[row],
                    cluster_risk: cluster[row],
                    delay_risk: delay[row],
                    promotion_failure_score: combined.clamp(0.0, 1.0),
                }
            })
            .collect();

        let mean = scored
            .iter()
            .map(|s| s.promotion_failure_score)
            .sum::<f64>()
            / scored.len().max(1) as f64;
        info!(items = scored.len(), mean_score = mean, "promotion risk scored");

        Ok(ScoredCatalog { items: scored })
    }
}

/// Normalized duration with the movie penalty, clipped to [0, 1].
#[must_use]
pub fn duration_risk(items: &[ItemRecord], movie_penalty: f64) -> Vec<f64> {
    let raw: Vec<Option<f64>> = items.iter().map(|item| item.duration_value).collect();
    normalized_or_zero(&raw)
        .into_iter()
        .zip(items)
        .map(|(norm, item)| {
            let factor = if item.is_movie() {
                1.0 + movie_penalty
            } else {
                1.0
            };
            (norm * factor).clamp(0.0, 1.0)
        })
        .collect()
}

/// Normalized release-to-listing delay.
#[must_use]
pub fn delay_risk(items: &[ItemRecord]) -> Vec<f64> {
    let raw: Vec<Option<f64>> = items.iter().map(|item| item.delay_years).collect();
    normalized_or_zero(&raw)
        .into_iter()
        .map(|v| v.clamp(0.0, 1.0))
        .collect()
}

/// Euclidean distance of every row from the mean of its own cluster.
#[must_use]
pub fn cluster_distances(data: ArrayView2<'_, f64>, labels: &[usize]) -> Vec<f64> {
    let k = labels.iter().copied().max().map_or(0, |m| m + 1);
    let mut sums = vec![Array1::<f64>::zeros(data.ncols()); k];
    let mut counts = vec![0usize; k];
    for (row, &label) in data.rows().into_iter().zip(labels) {
        sums[label] += &row;
        counts[label] += 1;
    }
    let centroids: Vec<Array1<f64>> = sums
        .into_iter()
        .zip(&counts)
        .map(|(sum, &count)| if count > 0 { sum / count as f64 } else { sum })
        .collect();

    data.rows()
        .into_iter()
        .zip(labels)
        .map(|(row, &label)| distance_sq(row, centroids[label].view()).sqrt())
        .collect()
}

/// Cluster distances min-max normalized over the batch.
#[must_use]
pub fn cluster_distance_risk(data: ArrayView2<'_, f64>, labels: &[usize]) -> Vec<f64> {
    min_max_normalize(&cluster_distances(data, labels))
}

fn normalized_or_zero(raw: &[Option<f64>]) -> Vec<f64> {
    impute_median(raw).map_or_else(|| vec![0.0; raw.len()], |filled| min_max_normalize(&filled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::RiskWeights;
    use crate::pipeline::types::DurationUnit;
    use ndarray::{Array2, array};

    fn movie(id: &str, minutes: Option<f64>, delay: Option<f64>) -> ItemRecord {
        ItemRecord {
            id: id.to_string(),
            title: id.to_string(),
            duration_value: minutes,
            duration_unit: DurationUnit::Minutes,
            delay_years: delay,
            ..ItemRecord::default()
        }
    }

    fn show(id: &str, seasons: Option<f64>, delay: Option<f64>) -> ItemRecord {
        ItemRecord {
            duration_unit: DurationUnit::Seasons,
            ..movie(id, seasons, delay)
        }
    }

    fn assignment(labels: Vec<usize>) -> ClusterAssignment {
        ClusterAssignment {
            k: labels.iter().max().map_or(1, |m| m + 1),
            labels,
            centroids: Array2::zeros((0, 0)),
            inertia: 0.0,
            iterations: 1,
            silhouette: None,
        }
    }

    #[test]
    fn movie_penalty_raises_and_reclips() {
        let items = vec![
            movie("m1", Some(0.0), None),
            movie("m2", Some(50.0), None),
            show("s1", Some(50.0), None),
            movie("m3", Some(100.0), None),
        ];
        let risk = duration_risk(&items, 0.3);
        assert!((risk[1] - 0.65).abs() < 1e-12);
        assert!((risk[2] - 0.5).abs() < 1e-12);
        assert!((risk[3] - 1.0).abs() < 1e-12);
        assert!(risk[0].abs() < 1e-12);
    }

    #[test]
    fn missing_delay_uses_median_before_scaling() {
        let items = vec![
            movie("a", Some(90.0), Some(0.0)),
            movie("b", Some(90.0), None),
            movie("c", Some(90.0), Some(10.0)),
            movie("d", Some(90.0), Some(4.0)),
        ];
        let risk = delay_risk(&items);
        assert!((risk[1] - 0.4).abs() < 1e-12);
        assert_eq!(risk[2], 1.0);
    }

    #[test]
    fn centroid_point_has_zero_distance_and_minimum_risk() {
        // cluster 0 mean is [1, 1], which is row 1 itself
        let data = array![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [10.0, 10.0], [14.0, 10.0]];
        let labels = [0, 0, 0, 1, 1];

        let distances = cluster_distances(data.view(), &labels);
        assert_eq!(distances[1], 0.0);

        let risk = cluster_distance_risk(data.view(), &labels);
        let min = risk.iter().copied().fold(f64::INFINITY, f64::min);
        assert_eq!(risk[1], min);
        assert_eq!(risk[1], 0.0);
        assert_eq!(risk.iter().copied().fold(0.0, f64::max), 1.0);
    }

    #[test]
    fn combined_score_is_bounded_and_weighted() {
        let items = vec![
            movie("a", Some(30.0), Some(0.0)),
            movie("b", Some(200.0), Some(40.0)),
            show("c", Some(1.0), Some(2.0)),
        ];
        let features = FeatureMatrix::new(array![[0.0], [1.0], [5.0]], 0);
        let catalog = RiskScorer::default()
            .score(&items, &features, &assignment(vec![0, 0, 1]))
            .expect("score");

        assert_eq!(catalog.len(), 3);
        for item in &catalog.items {
            assert!((0.0..=1.0).contains(&item.promotion_failure_score));
            let expected =
                0.4 * item.duration_risk + 0.4 * item.cluster_risk + 0.2 * item.delay_risk;
            assert!((item.promotion_failure_score - expected.min(1.0)).abs() < 1e-12);
        }
        assert_eq!(catalog.items[2].cluster_id, 1);
    }

    #[test]
    fn matrix_row_mismatch_is_alignment_error() {
        let items = vec![movie("a", Some(30.0), Some(0.0))];
        let features = FeatureMatrix::new(array![[0.0], [1.0]], 0);
        let err = RiskScorer::default()
            .score(&items, &features, &assignment(vec![0]))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Alignment {
                artifact: "feature matrix",
                ..
            }
        ));
    }

    #[test]
    fn invalid_weights_are_configuration_error() {
        let scorer = RiskScorer::new(RiskConfig {
            weights: RiskWeights {
                duration: 0.6,
                cluster: 0.6,
                delay: 0.2,
            },
            movie_penalty: 0.3,
        });
        let items = vec![movie("a", Some(30.0), Some(0.0))];
        let features = FeatureMatrix::new(array![[0.0]], 0);
        let err = scorer
            .score(&items, &features, &assignment(vec![0]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
