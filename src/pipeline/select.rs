//! Hybrid exploit/explore selection.
//!
//! The selector splits a promotion budget between two pools:
//!
//! 1. **Exploit** - lowest-risk items of the most exposed cluster
//! 2. **Explore** - lowest-risk items of the other clusters, least exposed
//!    cluster first
//!
//! ## Risk filter relaxation
//!
//! Items scoring above the strategy threshold are dropped first. When fewer
//! than `budget` items survive, the filter is abandoned for the call and the
//! result carries `risk_filter_relaxed = true`.

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use super::config::ExplorationPolicy;
use super::types::{
    DiversityReport, DiversityRisk, ExplorationBias, ScoredCatalog, ScoredItem, SelectedItem,
    SelectionPool, SelectionResult, StrategyPreset,
};

/// Absorbs representation error in `budget * ratio` (180 * 0.35 is 62.999...).
const FLOOR_EPSILON: f64 = 1e-9;

/// Trait for promotion set selection.
pub trait PromotionSelector: Send + Sync {
    /// Select up to `budget` items from the scored catalog.
    ///
    /// # Arguments
    ///
    /// * `catalog` - Scored, clustered items in table order.
    /// * `diversity` - Exposure report computed over the same catalog.
    /// * `strategy` - Risk threshold and exploration bias.
    /// * `budget` - Maximum number of items to return.
    fn select(
        &self,
        catalog: &ScoredCatalog,
        diversity: &DiversityReport,
        strategy: &StrategyPreset,
        budget: usize,
    ) -> SelectionResult;
}

/// Default implementation of hybrid selection.
#[derive(Debug, Clone, Default)]
pub struct HybridSelector {
    policy: ExplorationPolicy,
}

impl HybridSelector {
    /// Create a new selector with the given exploration policy.
    #[must_use]
    pub fn new(policy: ExplorationPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &ExplorationPolicy {
        &self.policy
    }
}

impl PromotionSelector for HybridSelector {
    fn select(
        &self,
        catalog: &ScoredCatalog,
        diversity: &DiversityReport,
        strategy: &StrategyPreset,
        budget: usize,
    ) -> SelectionResult {
        select_hybrid(catalog, diversity, strategy, budget, &self.policy)
    }
}

/// Exploration ratio for a bias under the measured diversity risk.
#[must_use]
pub fn resolve_exploration_ratio(
    bias: ExplorationBias,
    risk: DiversityRisk,
    policy: &ExplorationPolicy,
) -> f64 {
    match bias {
        ExplorationBias::High => policy.high_bias,
        ExplorationBias::Low => policy.low_bias,
        ExplorationBias::Medium => match risk {
            DiversityRisk::High => policy.adaptive_high_risk,
            DiversityRisk::Medium => policy.adaptive_medium_risk,
            DiversityRisk::Low => policy.adaptive_low_risk,
        },
    }
}

/// Split `budget` into `(n_exploit, n_explore)`.
#[must_use]
pub fn split_budget(budget: usize, ratio: f64) -> (usize, usize) {
    let raw = (budget as f64 * ratio.clamp(0.0, 1.0) + FLOOR_EPSILON).floor();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let n_explore = (raw as usize).min(budget);
    (budget - n_explore, n_explore)
}

fn select_hybrid(
    catalog: &ScoredCatalog,
    diversity: &DiversityReport,
    strategy: &StrategyPreset,
    budget: usize,
    policy: &ExplorationPolicy,
) -> SelectionResult {
    let ratio = resolve_exploration_ratio(strategy.exploration_bias, diversity.risk, policy);
    let (n_exploit, n_explore) = split_budget(budget, ratio);
    let dominant = diversity.dominant_cluster();

    // Level 0: risk-filtered candidates
    let safe: Vec<&ScoredItem> = catalog
        .items
        .iter()
        .filter(|item| item.promotion_failure_score <= strategy.risk_threshold)
        .collect();

    // Level 1: whole catalog
    let relaxed = safe.len() < budget;
    let candidates: Vec<&ScoredItem> = if relaxed {
        warn!(
            strategy = %strategy.name,
            threshold = strategy.risk_threshold,
            passing = safe.len(),
            budget,
            "risk filter relaxed: too few items pass the threshold"
        );
        catalog.items.iter().collect()
    } else {
        safe
    };

    let exploit = dominant.map_or_else(Vec::new, |cluster| {
        let mut pool: Vec<&ScoredItem> = candidates
            .iter()
            .copied()
            .filter(|item| item.cluster_id == cluster)
            .collect();
        sort_by_risk(&mut pool);
        pool.truncate(n_exploit);
        pool
    });

    let mut explore: Vec<&ScoredItem> = Vec::new();
    for cluster in diversity.exposure_ranking() {
        if Some(cluster) == dominant {
            continue;
        }
        if explore.len() >= n_explore {
            break;
        }
        let mut pool: Vec<&ScoredItem> = candidates
            .iter()
            .copied()
            .filter(|item| item.cluster_id == cluster)
            .collect();
        sort_by_risk(&mut pool);
        explore.extend(pool);
    }
    explore.truncate(n_explore);

    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut items: Vec<SelectedItem> = exploit
        .into_iter()
        .map(|item| (item, SelectionPool::Exploit))
        .chain(explore.into_iter().map(|item| (item, SelectionPool::Explore)))
        .filter(|(item, _)| seen.insert(item.id.as_str()))
        .map(|(item, pool)| SelectedItem {
            row: item.row,
            id: item.id.clone(),
            title: item.title.clone(),
            cluster_id: item.cluster_id,
            promotion_failure_score: item.promotion_failure_score,
            pool,
        })
        .collect();
    items.truncate(budget);

    debug!(
        strategy = %strategy.name,
        budget,
        ratio,
        n_exploit,
        n_explore,
        selected = items.len(),
        "hybrid selection complete"
    );

    SelectionResult {
        strategy: strategy.name.clone(),
        budget,
        risk_threshold: strategy.risk_threshold,
        exploration_bias: strategy.exploration_bias,
        exploration_ratio: ratio,
        n_exploit,
        n_explore,
        dominant_cluster: dominant,
        risk_filter_relaxed: relaxed,
        items,
    }
}

fn sort_by_risk(pool: &mut [&ScoredItem]) {
    pool.sort_by(|a, b| {
        a.promotion_failure_score
            .total_cmp(&b.promotion_failure_score)
            .then(a.row.cmp(&b.row))
    });
}
