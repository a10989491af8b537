//! Core type definitions shared across the promotion pipeline.
//!
//! Every stage returns one of these values and never mutates what it was
//! given, so artifacts can be shared read-only across concurrent selections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unit of the duration magnitude.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    /// Feature-length content measured in minutes.
    Minutes,
    /// Episodic content measured in seasons.
    Seasons,
    #[default]
    Unknown,
}

impl DurationUnit {
    /// Map the alphabetic token of a raw duration string (`"min"`, `"Seasons"`).
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_lowercase().as_str() {
            "min" | "mins" | "minute" | "minutes" => Self::Minutes,
            "season" | "seasons" => Self::Seasons,
            _ => Self::Unknown,
        }
    }
}

/// One catalog entry as consumed by the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub duration_value: Option<f64>,
    #[serde(default)]
    pub duration_unit: DurationUnit,
    pub release_year: Option<f64>,
    pub genre_count: Option<f64>,
    /// Years between release and platform listing, restricted to [0, 50].
    pub delay_years: Option<f64>,
}

impl ItemRecord {
    #[must_use]
    pub fn is_movie(&self) -> bool {
        self.duration_unit == DurationUnit::Minutes
    }
}

/// Three-level risk label shared by diversity health and exploration bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiversityRisk {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for DiversityRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiversityRisk::Low => write!(f, "LOW"),
            DiversityRisk::Medium => write!(f, "MEDIUM"),
            DiversityRisk::High => write!(f, "HIGH"),
        }
    }
}

/// How aggressively a strategy explores under-exposed clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExplorationBias {
    Low,
    /// Adapts the exploration ratio to the measured diversity risk.
    Medium,
    High,
}

impl std::fmt::Display for ExplorationBias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExplorationBias::Low => write!(f, "LOW"),
            ExplorationBias::Medium => write!(f, "MEDIUM"),
            ExplorationBias::High => write!(f, "HIGH"),
        }
    }
}

impl std::str::FromStr for ExplorationBias {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Ok(ExplorationBias::Low),
            "MEDIUM" => Ok(ExplorationBias::Medium),
            "HIGH" => Ok(ExplorationBias::High),
            _ => Err(format!("unknown exploration bias: {s}")),
        }
    }
}

/// Per-item output of the risk scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    /// Position in the item table.
    pub row: usize,
    pub id: String,
    pub title: String,
    pub cluster_id: usize,
    pub duration_risk: f64,
    pub cluster_risk: f64,
    pub delay_risk: f64,
    /// Combined score in [0, 1]; higher is riskier to promote.
    pub promotion_failure_score: f64,
}

/// The scored, clustered item table in original row order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoredCatalog {
    pub items: Vec<ScoredItem>,
}

impl ScoredCatalog {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn cluster_ids(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.cluster_id).collect()
    }

    /// Items ordered from riskiest to safest (row order on ties).
    #[must_use]
    pub fn riskiest(&self, limit: usize) -> Vec<&ScoredItem> {
        let mut ranked: Vec<&ScoredItem> = self.items.iter().collect();
        ranked.sort_by(|a, b| {
            b.promotion_failure_score
                .total_cmp(&a.promotion_failure_score)
                .then(a.row.cmp(&b.row))
        });
        ranked.truncate(limit);
        ranked
    }

    /// Items scoring at or above `threshold`: the total count and the
    /// riskiest `limit` of them.
    #[must_use]
    pub fn risk_monitor(&self, threshold: f64, limit: usize) -> RiskMonitor {
        let at_risk: Vec<&ScoredItem> = self
            .riskiest(self.items.len())
            .into_iter()
            .take_while(|item| item.promotion_failure_score >= threshold)
            .collect();
        RiskMonitor {
            threshold,
            at_risk: at_risk.len(),
            top: at_risk.into_iter().take(limit).cloned().collect(),
        }
    }
}

/// 閾値以上のリスクを持つ作品の一覧。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMonitor {
    pub threshold: f64,
    /// Number of items with a score at or above `threshold`.
    pub at_risk: usize,
    /// Riskiest at-risk items, highest score first.
    pub top: Vec<ScoredItem>,
}

/// Immutable snapshot of cluster exposure health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiversityReport {
    /// Cluster id → share of items, ordered by id.
    pub distribution: BTreeMap<usize, f64>,
    /// Cluster id → item count, ordered by id.
    pub counts: BTreeMap<usize, usize>,
    /// Shannon entropy of `distribution`, in bits.
    pub entropy: f64,
    pub top1_dominance: f64,
    pub top2_dominance: f64,
    pub risk: DiversityRisk,
}

impl DiversityReport {
    /// Most exposed cluster; the lowest id wins a tie.
    #[must_use]
    pub fn dominant_cluster(&self) -> Option<usize> {
        self.distribution
            .iter()
            .fold(None::<(usize, f64)>, |best, (&id, &share)| match best {
                Some((_, best_share)) if share <= best_share => best,
                _ => Some((id, share)),
            })
            .map(|(id, _)| id)
    }

    /// Cluster ids from least to most exposed (ascending id on ties).
    #[must_use]
    pub fn exposure_ranking(&self) -> Vec<usize> {
        let mut ranked: Vec<(usize, f64)> =
            self.distribution.iter().map(|(&id, &p)| (id, p)).collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().map(|(id, _)| id).collect()
    }
}

/// Named strategy preset chosen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPreset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Maximum promotion-failure score allowed through the safety filter.
    pub risk_threshold: f64,
    pub exploration_bias: ExplorationBias,
}

impl StrategyPreset {
    #[must_use]
    pub fn new(name: impl Into<String>, risk_threshold: f64, bias: ExplorationBias) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            risk_threshold,
            exploration_bias: bias,
        }
    }
}

/// Which allocation an item was selected through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPool {
    /// Lowest-risk items of the dominant cluster.
    Exploit,
    /// Lowest-risk items of under-exposed clusters.
    Explore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedItem {
    pub row: usize,
    pub id: String,
    pub title: String,
    pub cluster_id: usize,
    pub promotion_failure_score: f64,
    pub pool: SelectionPool,
}

/// Outcome of one hybrid selection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub strategy: String,
    pub budget: usize,
    pub risk_threshold: f64,
    pub exploration_bias: ExplorationBias,
    pub exploration_ratio: f64,
    pub n_exploit: usize,
    pub n_explore: usize,
    pub dominant_cluster: Option<usize>,
    /// True when fewer than `budget` items passed the risk filter and the
    /// whole catalog was used instead.
    pub risk_filter_relaxed: bool,
    pub items: Vec<SelectedItem>,
}

impl SelectionResult {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Check if the whole budget was filled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.items.len() >= self.budget
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.id.as_str()).collect()
    }
}
