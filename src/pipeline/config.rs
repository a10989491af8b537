//! Stage configuration for the promotion pipeline.
//!
//! Every threshold, weight and ratio the algorithms use lives here with its
//! default, so policy changes never touch algorithm code.

use serde::{Deserialize, Serialize};

use crate::util::error::PipelineError;
use crate::util::kmeans::KMeansParams;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Configuration for the whole pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub clustering: ClusteringConfig,
    pub risk: RiskConfig,
    pub diversity: DiversityThresholds,
    pub exploration: ExplorationPolicy,
    pub embedding: EmbeddingConfig,
    pub monitor: MonitorConfig,
}

impl PipelineConfig {
    /// Validate every section.
    ///
    /// # Errors
    /// Returns [`PipelineError::Configuration`] naming the first violation.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.clustering.validate()?;
        self.risk.validate()?;
        self.diversity.validate()?;
        self.exploration.validate()?;
        self.embedding.validate()?;
        self.monitor.validate()
    }
}

/// Configuration for the cluster assigner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Number of clusters (default: 4).
    pub k: usize,
    /// Seed for centroid initialization (default: 42).
    pub seed: u64,
    /// Independent restarts; the lowest-inertia fit wins (default: 20).
    pub restarts: usize,
    /// Iteration cap per restart (default: 300).
    pub max_iterations: usize,
}

impl ClusteringConfig {
    /// # Errors
    /// Returns [`PipelineError::Configuration`] when `k < 2` or a count is zero.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.k < 2 {
            return Err(PipelineError::Configuration(format!(
                "cluster count must be at least 2, got {}",
                self.k
            )));
        }
        if self.restarts == 0 {
            return Err(PipelineError::Configuration(
                "kmeans restarts must be positive".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(PipelineError::Configuration(
                "kmeans max iterations must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn kmeans_params(&self) -> KMeansParams {
        KMeansParams {
            k: self.k,
            max_iterations: self.max_iterations,
            restarts: self.restarts,
            seed: self.seed,
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            k: 4,
            seed: 42,
            restarts: 20,
            max_iterations: 300,
        }
    }
}

/// Weights of the three risk sub-scores. Non-negative, summing to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub duration: f64,
    pub cluster: f64,
    pub delay: f64,
}

impl RiskWeights {
    /// # Errors
    /// Returns [`PipelineError::Configuration`] for a negative or non-finite
    /// weight, or weights that do not sum to 1.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, weight) in [
            ("duration", self.duration),
            ("cluster", self.cluster),
            ("delay", self.delay),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(PipelineError::Configuration(format!(
                    "{name} weight must be a non-negative number, got {weight}"
                )));
            }
        }
        let sum = self.duration + self.cluster + self.delay;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(PipelineError::Configuration(format!(
                "risk weights must sum to 1, got {sum}"
            )));
        }
        Ok(())
    }
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            duration: 0.4,
            cluster: 0.4,
            delay: 0.2,
        }
    }
}

/// Configuration for the promotion risk scorer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub weights: RiskWeights,
    /// Multiplicative duration penalty for movies (default: 0.3).
    pub movie_penalty: f64,
}

impl RiskConfig {
    /// # Errors
    /// Returns [`PipelineError::Configuration`] for invalid weights or a
    /// negative penalty.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.weights.validate()?;
        if !self.movie_penalty.is_finite() || self.movie_penalty < 0.0 {
            return Err(PipelineError::Configuration(format!(
                "movie penalty must be non-negative, got {}",
                self.movie_penalty
            )));
        }
        Ok(())
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            movie_penalty: 0.3,
        }
    }
}

/// Top-1 dominance thresholds for the diversity risk label.
///
/// Both bounds are exclusive: dominance equal to `high` is still MEDIUM.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiversityThresholds {
    /// Dominance above this is at least MEDIUM (default: 0.45).
    pub medium: f64,
    /// Dominance above this is HIGH (default: 0.65).
    pub high: f64,
}

impl DiversityThresholds {
    /// # Errors
    /// Returns [`PipelineError::Configuration`] unless `0 < medium < high < 1`.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0 < self.medium && self.medium < self.high && self.high < 1.0) {
            return Err(PipelineError::Configuration(format!(
                "diversity thresholds must satisfy 0 < medium < high < 1, got medium={} high={}",
                self.medium, self.high
            )));
        }
        Ok(())
    }
}

impl Default for DiversityThresholds {
    fn default() -> Self {
        Self {
            medium: 0.45,
            high: 0.65,
        }
    }
}

/// Exploration ratios per bias; MEDIUM adapts to the diversity risk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExplorationPolicy {
    /// Ratio for HIGH bias (default: 0.40).
    pub high_bias: f64,
    /// Ratio for LOW bias (default: 0.10).
    pub low_bias: f64,
    /// MEDIUM bias under HIGH diversity risk (default: 0.35).
    pub adaptive_high_risk: f64,
    /// MEDIUM bias under MEDIUM diversity risk (default: 0.25).
    pub adaptive_medium_risk: f64,
    /// MEDIUM bias under LOW diversity risk (default: 0.10).
    pub adaptive_low_risk: f64,
}

impl ExplorationPolicy {
    /// # Errors
    /// Returns [`PipelineError::Configuration`] if a ratio is outside [0, 1].
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, ratio) in [
            ("high_bias", self.high_bias),
            ("low_bias", self.low_bias),
            ("adaptive_high_risk", self.adaptive_high_risk),
            ("adaptive_medium_risk", self.adaptive_medium_risk),
            ("adaptive_low_risk", self.adaptive_low_risk),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(PipelineError::Configuration(format!(
                    "exploration ratio {name} must be within [0, 1], got {ratio}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for ExplorationPolicy {
    fn default() -> Self {
        Self {
            high_bias: 0.40,
            low_bias: 0.10,
            adaptive_high_risk: 0.35,
            adaptive_medium_risk: 0.25,
            adaptive_low_risk: 0.10,
        }
    }
}

/// Configuration for the TF-IDF + truncated SVD text embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Output width (default: 50).
    pub dimensions: usize,
    /// Vocabulary cap (default: 5000).
    pub max_features: usize,
    /// Minimum document frequency of a term (default: 2).
    pub min_df: usize,
    /// Power iterations of the randomized range finder (default: 5).
    pub power_iterations: usize,
    pub seed: u64,
}

impl EmbeddingConfig {
    /// # Errors
    /// Returns [`PipelineError::Configuration`] when a size is zero.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.dimensions == 0 || self.max_features == 0 || self.min_df == 0 {
            return Err(PipelineError::Configuration(format!(
                "embedding sizes must be positive, got dimensions={} max_features={} min_df={}",
                self.dimensions, self.max_features, self.min_df
            )));
        }
        Ok(())
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: 50,
            max_features: 5000,
            min_df: 2,
            power_iterations: 5,
            seed: 42,
        }
    }
}

/// Threshold view over the scored catalog included in the run report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Scores at or above this count as at-risk (default: 0.60).
    pub risk_threshold: f64,
    /// At-risk items listed in the report (default: 20).
    pub limit: usize,
}

impl MonitorConfig {
    /// # Errors
    /// Returns [`PipelineError::Configuration`] for a threshold outside
    /// [0, 1] or a zero limit.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.risk_threshold) {
            return Err(PipelineError::Configuration(format!(
                "monitor risk threshold must be within [0, 1], got {}",
                self.risk_threshold
            )));
        }
        if self.limit == 0 {
            return Err(PipelineError::Configuration(
                "monitor limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            risk_threshold: 0.60,
            limit: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let weights = RiskWeights {
            duration: 0.5,
            cluster: 0.4,
            delay: 0.2,
        };
        assert!(matches!(
            weights.validate(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn negative_weight_is_rejected_even_if_sum_is_one() {
        let weights = RiskWeights {
            duration: 1.2,
            cluster: -0.4,
            delay: 0.2,
        };
        let err = weights.validate().unwrap_err();
        assert!(err.to_string().contains("cluster weight"));
    }

    #[test]
    fn single_cluster_is_rejected() {
        let config = ClusteringConfig {
            k: 1,
            ..ClusteringConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn thresholds_must_be_ordered() {
        let inverted = DiversityThresholds {
            medium: 0.7,
            high: 0.6,
        };
        assert!(inverted.validate().is_err());
        let saturated = DiversityThresholds {
            medium: 0.4,
            high: 1.0,
        };
        assert!(saturated.validate().is_err());
    }

    #[test]
    fn exploration_ratio_out_of_range_is_rejected() {
        let policy = ExplorationPolicy {
            high_bias: 1.5,
            ..ExplorationPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn monitor_threshold_must_be_a_probability() {
        let monitor = MonitorConfig {
            risk_threshold: 1.2,
            ..MonitorConfig::default()
        };
        assert!(monitor.validate().is_err());
        let empty = MonitorConfig {
            limit: 0,
            ..MonitorConfig::default()
        };
        assert!(empty.validate().is_err());
    }
}
