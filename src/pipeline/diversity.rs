//! Discovery diversity health.
//!
//! Item share per cluster stands in for promotion exposure. The report carries
//! the distribution, its entropy, the top-1/top-2 dominance ratios and a
//! three-level risk label derived from top-1 dominance.

use std::collections::BTreeMap;

use tracing::info;

use super::config::DiversityThresholds;
use super::types::{DiversityReport, DiversityRisk};
use crate::util::error::PipelineError;
use crate::util::stats::entropy_bits;

/// Share of items per cluster, keyed and ordered by cluster id.
///
/// # Errors
/// Returns [`PipelineError::InsufficientData`] for an empty label vector.
pub fn exposure_distribution(labels: &[usize]) -> Result<BTreeMap<usize, f64>, PipelineError> {
    let counts = cluster_counts(labels);
    if counts.is_empty() {
        return Err(PipelineError::InsufficientData(
            "no cluster labels to assess".to_string(),
        ));
    }
    let total = labels.len() as f64;
    Ok(counts
        .into_iter()
        .map(|(id, count)| (id, count as f64 / total))
        .collect())
}

/// Summed share of the `top_k` most exposed clusters.
#[must_use]
pub fn dominance_ratio(distribution: &BTreeMap<usize, f64>, top_k: usize) -> f64 {
    let mut shares: Vec<f64> = distribution.values().copied().collect();
    shares.sort_by(|a, b| b.total_cmp(a));
    shares.into_iter().take(top_k).sum()
}

/// Classify top-1 dominance. Both thresholds are exclusive lower bounds.
#[must_use]
pub fn classify_diversity_risk(
    top1_dominance: f64,
    thresholds: &DiversityThresholds,
) -> DiversityRisk {
    if top1_dominance > thresholds.high {
        DiversityRisk::High
    } else if top1_dominance > thresholds.medium {
        DiversityRisk::Medium
    } else {
        DiversityRisk::Low
    }
}

/// Build the immutable diversity report for a label vector.
///
/// # Errors
/// - [`PipelineError::Configuration`] for invalid thresholds.
/// - [`PipelineError::InsufficientData`] for an empty label vector.
pub fn assess_diversity(
    labels: &[usize],
    thresholds: &DiversityThresholds,
) -> Result<DiversityReport, PipelineError> {
    thresholds.validate()?;
    let distribution = exposure_distribution(labels)?;
    let counts = cluster_counts(labels);

    let entropy = entropy_bits(distribution.values());
    let top1_dominance = dominance_ratio(&distribution, 1);
    let top2_dominance = dominance_ratio(&distribution, 2);
    let risk = classify_diversity_risk(top1_dominance, thresholds);

    info!(
        clusters = distribution.len(),
        entropy,
        top1_dominance,
        top2_dominance,
        diversity_risk = %risk,
        "diversity health assessed"
    );

    Ok(DiversityReport {
        distribution,
        counts,
        entropy,
        top1_dominance,
        top2_dominance,
        risk,
    })
}

fn cluster_counts(labels: &[usize]) -> BTreeMap<usize, usize> {
    let mut counts = BTreeMap::new();
    for &label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn labels_from_counts(counts: &[usize]) -> Vec<usize> {
        counts
            .iter()
            .enumerate()
            .flat_map(|(id, &n)| std::iter::repeat_n(id, n))
            .collect()
    }

    #[test]
    fn distribution_sums_to_one() {
        let labels = labels_from_counts(&[3, 5, 1, 7]);
        let distribution = exposure_distribution(&labels).expect("non-empty");
        let sum: f64 = distribution.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(distribution.values().all(|&p| p >= 0.0));
        assert_eq!(distribution.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn skewed_four_cluster_scenario() {
        let labels = labels_from_counts(&[70, 10, 10, 10]);
        let report = assess_diversity(&labels, &DiversityThresholds::default()).expect("report");

        let expected_entropy = -(0.7f64 * 0.7f64.log2() + 3.0 * 0.1 * 0.1f64.log2());
        assert!((report.entropy - expected_entropy).abs() < 1e-9);
        assert!((report.entropy - 1.3568).abs() < 1e-3);
        assert!((report.top1_dominance - 0.70).abs() < 1e-12);
        assert!((report.top2_dominance - 0.80).abs() < 1e-12);
        assert_eq!(report.risk, DiversityRisk::High);
        assert_eq!(report.dominant_cluster(), Some(0));
        assert_eq!(report.counts[&0], 70);
    }

    #[rstest]
    #[case(0.70, DiversityRisk::High)]
    #[case(0.66, DiversityRisk::High)]
    #[case(0.65, DiversityRisk::Medium)]
    #[case(0.50, DiversityRisk::Medium)]
    #[case(0.46, DiversityRisk::Medium)]
    #[case(0.45, DiversityRisk::Low)]
    #[case(0.30, DiversityRisk::Low)]
    fn risk_label_boundaries(#[case] dominance: f64, #[case] expected: DiversityRisk) {
        assert_eq!(
            classify_diversity_risk(dominance, &DiversityThresholds::default()),
            expected
        );
    }

    #[test]
    fn thresholds_are_configurable() {
        let strict = DiversityThresholds {
            medium: 0.2,
            high: 0.3,
        };
        assert_eq!(classify_diversity_risk(0.31, &strict), DiversityRisk::High);
    }

    #[test]
    fn single_cluster_top2_equals_top1() {
        let report =
            assess_diversity(&[2, 2, 2], &DiversityThresholds::default()).expect("report");
        assert_eq!(report.top1_dominance, 1.0);
        assert_eq!(report.top2_dominance, 1.0);
        assert_eq!(report.entropy, 0.0);
    }

    #[test]
    fn empty_labels_are_insufficient_data() {
        let err = assess_diversity(&[], &DiversityThresholds::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientData(_)));
    }

    #[test]
    fn repeated_assessment_is_identical() {
        let labels = labels_from_counts(&[4, 9, 2]);
        let a = assess_diversity(&labels, &DiversityThresholds::default()).expect("a");
        let b = assess_diversity(&labels, &DiversityThresholds::default()).expect("b");
        assert_eq!(a, b);
        assert_eq!(a.entropy.to_bits(), b.entropy.to_bits());
    }
}
