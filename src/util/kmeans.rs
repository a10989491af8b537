use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Parameters for a seeded multi-restart K-Means run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeansParams {
    pub k: usize,
    pub max_iterations: usize,
    pub restarts: usize,
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            k: 4,
            max_iterations: 300,
            restarts: 20,
            seed: 42,
        }
    }
}

/// Lloyd's K-Means over the rows of a dense matrix.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub centroids: Array2<f64>,
    pub assignments: Vec<usize>,
    /// Sum of squared distances from each row to its centroid.
    pub inertia: f64,
    pub iterations: usize,
    /// Index of the restart that produced this solution.
    pub restart: usize,
}

impl KMeans {
    /// Runs `params.restarts` independent K-Means fits and keeps the one with
    /// the lowest inertia (earliest restart on ties).
    ///
    /// Restart `r` is seeded with `params.seed + r`, so the outcome does not
    /// depend on how rayon schedules the restarts.
    ///
    /// Returns `None` for empty input or `k == 0`.
    #[must_use]
    pub fn fit(data: ArrayView2<'_, f64>, params: &KMeansParams) -> Option<Self> {
        if data.nrows() == 0 || params.k == 0 {
            return None;
        }
        let restarts = params.restarts.max(1);

        (0..restarts)
            .into_par_iter()
            .map(|restart| {
                let seed = params.seed.wrapping_add(restart as u64);
                let run = fit_once(data, params.k, params.max_iterations, seed, restart);
                tracing::debug!(
                    restart,
                    inertia = run.inertia,
                    iterations = run.iterations,
                    "kmeans restart finished"
                );
                run
            })
            .min_by(|a, b| {
                a.inertia
                    .total_cmp(&b.inertia)
                    .then(a.restart.cmp(&b.restart))
            })
    }
}

fn fit_once(
    data: ArrayView2<'_, f64>,
    k: usize,
    max_iterations: usize,
    seed: u64,
    restart: usize,
) -> KMeans {
    let k = k.min(data.nrows());
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = init_plus_plus(data, k, &mut rng);

    let (mut assignments, mut distances) = assign(data, &centroids);
    let mut iterations = 1;

    while iterations < max_iterations {
        // M-step: move centroids to the mean of their members
        update_centroids(data, &assignments, &distances, &mut centroids);

        // E-step: assign rows to the nearest centroid
        let (new_assignments, new_distances) = assign(data, &centroids);
        iterations += 1;
        let changed = new_assignments != assignments;
        assignments = new_assignments;
        distances = new_distances;

        if !changed {
            break;
        }
    }

    KMeans {
        centroids,
        assignments,
        inertia: distances.iter().sum(),
        iterations,
        restart,
    }
}

/// k-means++ seeding: first centre uniform, then D²-weighted sampling.
fn init_plus_plus(data: ArrayView2<'_, f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = data.nrows();
    let mut centroids = Array2::zeros((k, data.ncols()));
    let first = rng.random_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));

    let mut nearest: Vec<f64> = data
        .rows()
        .into_iter()
        .map(|row| distance_sq(row, data.row(first)))
        .collect();

    for c in 1..k {
        let total: f64 = nearest.iter().sum();
        let chosen = if total > 0.0 {
            let target = rng.random::<f64>() * total;
            let mut acc = 0.0;
            nearest
                .iter()
                .position(|&d| {
                    acc += d;
                    acc > target
                })
                .unwrap_or(n - 1)
        } else {
            rng.random_range(0..n)
        };
        centroids.row_mut(c).assign(&data.row(chosen));
        for (i, row) in data.rows().into_iter().enumerate() {
            let d = distance_sq(row, data.row(chosen));
            if d < nearest[i] {
                nearest[i] = d;
            }
        }
    }

    centroids
}

fn assign(data: ArrayView2<'_, f64>, centroids: &Array2<f64>) -> (Vec<usize>, Vec<f64>) {
    let mut assignments = Vec::with_capacity(data.nrows());
    let mut distances = Vec::with_capacity(data.nrows());
    for point in data.rows() {
        let mut min_dist_sq = f64::INFINITY;
        let mut best_cluster = 0;
        for (j, centroid) in centroids.rows().into_iter().enumerate() {
            let dist_sq = distance_sq(point, centroid);
            if dist_sq < min_dist_sq {
                min_dist_sq = dist_sq;
                best_cluster = j;
            }
        }
        assignments.push(best_cluster);
        distances.push(min_dist_sq);
    }
    (assignments, distances)
}

fn update_centroids(
    data: ArrayView2<'_, f64>,
    assignments: &[usize],
    distances: &[f64],
    centroids: &mut Array2<f64>,
) {
    let k = centroids.nrows();
    let mut sums = Array2::<f64>::zeros(centroids.raw_dim());
    let mut counts = vec![0usize; k];

    for (i, &cluster) in assignments.iter().enumerate() {
        let mut sum = sums.row_mut(cluster);
        sum += &data.row(i);
        counts[cluster] += 1;
    }

    // Empty clusters take the rows farthest from their current centroid.
    let mut donors: Vec<usize> = (0..assignments.len()).collect();
    donors.sort_by(|&a, &b| distances[b].total_cmp(&distances[a]).then(a.cmp(&b)));
    let mut donors = donors.into_iter();

    for j in 0..k {
        if counts[j] > 0 {
            let mean = &sums.row(j) / counts[j] as f64;
            centroids.row_mut(j).assign(&mean);
        } else if let Some(donor) = donors.next() {
            centroids.row_mut(j).assign(&data.row(donor));
        }
    }
}

pub(crate) fn distance_sq(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_blobs() -> Array2<f64> {
        array![
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [10.0, 10.0],
            [10.1, 10.0],
            [10.0, 10.1],
        ]
    }

    #[test]
    fn separates_two_blobs() {
        let data = two_blobs();
        let params = KMeansParams {
            k: 2,
            ..KMeansParams::default()
        };
        let model = KMeans::fit(data.view(), &params).expect("non-empty input");

        assert_eq!(model.assignments[0], model.assignments[1]);
        assert_eq!(model.assignments[1], model.assignments[2]);
        assert_eq!(model.assignments[3], model.assignments[4]);
        assert_eq!(model.assignments[4], model.assignments[5]);
        assert_ne!(model.assignments[0], model.assignments[3]);
        assert!(model.inertia < 0.1);
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let data = two_blobs();
        let params = KMeansParams {
            k: 3,
            restarts: 8,
            ..KMeansParams::default()
        };
        let a = KMeans::fit(data.view(), &params).expect("fit");
        let b = KMeans::fit(data.view(), &params).expect("fit");

        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.restart, b.restart);
        assert_eq!(a.inertia.to_bits(), b.inertia.to_bits());
    }

    #[test]
    fn empty_input_yields_none() {
        let data = Array2::<f64>::zeros((0, 3));
        assert!(KMeans::fit(data.view(), &KMeansParams::default()).is_none());
    }

    #[test]
    fn k_larger_than_rows_is_clamped() {
        let data = array![[1.0], [2.0]];
        let params = KMeansParams {
            k: 5,
            ..KMeansParams::default()
        };
        let model = KMeans::fit(data.view(), &params).expect("fit");
        assert_eq!(model.centroids.nrows(), 2);
        assert!(model.assignments.iter().all(|&c| c < 2));
    }
}
