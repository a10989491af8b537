//! Thematic clustering of the feature matrix.
//!
//! Wraps the seeded multi-restart K-Means in [`crate::util::kmeans`] with the
//! input checks, the silhouette diagnostic and an optional at-most-once cache
//! keyed by a fingerprint of the matrix and the clustering configuration.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use ndarray::{Array2, ArrayView2};
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tracing::{debug, info};
use xxhash_rust::xxh3::Xxh3;

use super::config::ClusteringConfig;
use super::features::FeatureMatrix;
use crate::util::error::PipelineError;
use crate::util::kmeans::{KMeans, distance_sq};

/// Cluster labels and fit diagnostics for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterAssignment {
    pub k: usize,
    /// Label per feature row, in [0, k).
    pub labels: Vec<usize>,
    #[serde(skip)]
    pub centroids: Array2<f64>,
    pub inertia: f64,
    pub iterations: usize,
    /// Mean silhouette coefficient; `None` when fewer than two clusters are
    /// populated.
    pub silhouette: Option<f64>,
}

impl ClusterAssignment {
    /// Item count per cluster id.
    #[must_use]
    pub fn cluster_sizes(&self) -> BTreeMap<usize, usize> {
        let mut sizes = BTreeMap::new();
        for &label in &self.labels {
            *sizes.entry(label).or_insert(0) += 1;
        }
        sizes
    }
}

/// Trait for assigning feature rows to clusters.
pub trait ClusterAssigner: Send + Sync {
    /// Partition the rows of `features` into clusters.
    ///
    /// # Errors
    /// Returns [`PipelineError::InsufficientData`] when the matrix is empty or
    /// has fewer distinct rows than requested clusters.
    fn assign(&self, features: &FeatureMatrix) -> Result<Arc<ClusterAssignment>, PipelineError>;
}

/// Default K-Means based assigner.
pub struct KMeansClusterAssigner {
    config: ClusteringConfig,
    cache: Option<Arc<ClusteringCache>>,
}

impl KMeansClusterAssigner {
    #[must_use]
    pub fn new(config: ClusteringConfig) -> Self {
        Self {
            config,
            cache: None,
        }
    }

    /// Share fitted assignments through `cache`.
    #[must_use]
    pub fn with_cache(config: ClusteringConfig, cache: Arc<ClusteringCache>) -> Self {
        Self {
            config,
            cache: Some(cache),
        }
    }

    fn fit(&self, features: &FeatureMatrix) -> Result<ClusterAssignment, PipelineError> {
        let data = features.values();
        if data.nrows() == 0 {
            return Err(PipelineError::InsufficientData(
                "feature matrix is empty".to_string(),
            ));
        }
        let distinct = count_distinct_rows(data);
        if distinct < self.config.k {
            return Err(PipelineError::InsufficientData(format!(
                "{distinct} distinct feature rows cannot form {} clusters",
                self.config.k
            )));
        }

        let params = self.config.kmeans_params();
        let model = KMeans::fit(data, &params).ok_or_else(|| {
            PipelineError::InsufficientData("kmeans produced no solution".to_string())
        })?;
        let silhouette = silhouette_score(data, &model.assignments);

        info!(
            items = data.nrows(),
            k = self.config.k,
            restart = model.restart,
            iterations = model.iterations,
            inertia = model.inertia,
            silhouette = ?silhouette,
            "kmeans clustering finished"
        );

        Ok(ClusterAssignment {
            k: self.config.k,
            labels: model.assignments,
            centroids: model.centroids,
            inertia: model.inertia,
            iterations: model.iterations,
            silhouette,
        })
    }
}

impl Default for KMeansClusterAssigner {
    fn default() -> Self {
        Self::new(ClusteringConfig::default())
    }
}

impl ClusterAssigner for KMeansClusterAssigner {
    fn assign(&self, features: &FeatureMatrix) -> Result<Arc<ClusterAssignment>, PipelineError> {
        match &self.cache {
            Some(cache) => {
                let key = fingerprint(features, &self.config);
                cache.get_or_try_insert(key, || self.fit(features))
            }
            None => self.fit(features).map(Arc::new),
        }
    }
}

/// At-most-once store of clustering results, one slot per fingerprint.
///
/// The first caller for a fingerprint computes the value; concurrent callers
/// for the same fingerprint block on the slot and then share the result.
///
/// The cache is unbounded: slots live until [`remove`](Self::remove) or
/// [`clear`](Self::clear). Long-lived owners that see many distinct batches
/// should clear it between batches.
#[derive(Debug, Default)]
pub struct ClusteringCache {
    slots: RwLock<FxHashMap<u64, Arc<OnceCell<Arc<ClusterAssignment>>>>>,
}

impl ClusteringCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the value for `key`, computing it with `compute` if the slot is
    /// still empty. A failed computation leaves the slot empty.
    ///
    /// # Errors
    /// Propagates the error returned by `compute`.
    pub fn get_or_try_insert<F>(
        &self,
        key: u64,
        compute: F,
    ) -> Result<Arc<ClusterAssignment>, PipelineError>
    where
        F: FnOnce() -> Result<ClusterAssignment, PipelineError>,
    {
        let existing = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => Arc::clone(
                self.slots
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(key)
                    .or_default(),
            ),
        };

        if slot.get().is_some() {
            debug!(key, "clustering cache hit");
        }
        slot.get_or_try_init(|| compute().map(Arc::new)).cloned()
    }

    /// Check if `key` already holds a computed assignment.
    #[must_use]
    pub fn contains(&self, key: u64) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .is_some_and(|slot| slot.get().is_some())
    }

    /// Number of populated slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the slot for `key`. Returns whether a slot was present.
    /// Callers already holding the assignment keep their `Arc`.
    pub fn remove(&self, key: u64) -> bool {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
            .is_some()
    }

    /// Drop every slot.
    pub fn clear(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let dropped = slots.len();
        slots.clear();
        debug!(dropped, "clustering cache cleared");
    }
}

/// XXH3 fingerprint of the matrix contents and the clustering parameters.
#[must_use]
pub fn fingerprint(features: &FeatureMatrix, config: &ClusteringConfig) -> u64 {
    let mut hasher = Xxh3::new();
    let data = features.values();
    hasher.update(&(data.nrows() as u64).to_le_bytes());
    hasher.update(&(data.ncols() as u64).to_le_bytes());
    for value in data {
        hasher.update(&value.to_bits().to_le_bytes());
    }
    for part in [
        config.k as u64,
        config.seed,
        config.restarts as u64,
        config.max_iterations as u64,
    ] {
        hasher.update(&part.to_le_bytes());
    }
    hasher.digest()
}

fn count_distinct_rows(data: ArrayView2<'_, f64>) -> usize {
    data.rows()
        .into_iter()
        .map(|row| {
            row.iter()
                // -0.0 and 0.0 are the same point
                .map(|&v| if v == 0.0 { 0u64 } else { v.to_bits() })
                .collect::<Vec<u64>>()
        })
        .collect::<FxHashSet<_>>()
        .len()
}

/// Mean silhouette coefficient with Euclidean distance.
///
/// Rows in singleton clusters score 0. Returns `None` unless
/// `2 <= populated clusters <= n - 1`.
#[must_use]
pub fn silhouette_score(data: ArrayView2<'_, f64>, labels: &[usize]) -> Option<f64> {
    let n = data.nrows();
    if n != labels.len() {
        return None;
    }
    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        members.entry(label).or_default().push(i);
    }
    if members.len() < 2 || members.len() >= n {
        return None;
    }

    // collected before summing so the reduction order is fixed
    let coefficients: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| {
            let own = labels[i];
            let own_members = &members[&own];
            if own_members.len() < 2 {
                return 0.0;
            }
            let mean_distance = |indices: &[usize]| -> f64 {
                let sum: f64 = indices
                    .iter()
                    .filter(|&&j| j != i)
                    .map(|&j| distance_sq(data.row(i), data.row(j)).sqrt())
                    .sum();
                let count = indices.iter().filter(|&&j| j != i).count();
                sum / count as f64
            };
            let a = mean_distance(own_members);
            let b = members
                .iter()
                .filter(|(label, _)| **label != own)
                .map(|(_, indices)| mean_distance(indices))
                .fold(f64::INFINITY, f64::min);
            let denom = a.max(b);
            if denom > 0.0 { (b - a) / denom } else { 0.0 }
        })
        .collect();

    Some(coefficients.iter().sum::<f64>() / n as f64)
}
