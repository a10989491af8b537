//! TF-IDF + truncated SVD text embedding.
//!
//! Descriptions are normalized, turned into a unigram + bigram TF-IDF matrix
//! held in CSR form, and projected onto the leading singular directions with
//! a seeded randomized SVD. The output always has exactly
//! `EmbeddingConfig::dimensions` columns.

use std::sync::Arc;

use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rustc_hash::{FxHashMap, FxHashSet};
use sprs::{CsMat, TriMat};
use tracing::{debug, info};

use super::config::EmbeddingConfig;
use super::text::{BasicTextNormalizer, TextNormalizer};
use crate::util::error::PipelineError;

const OVERSAMPLING: usize = 10;
const JACOBI_MAX_SWEEPS: usize = 100;
const JACOBI_TOLERANCE: f64 = 1e-22;

/// Maps a document corpus to a row-aligned dense block.
pub trait Embedder: Send + Sync {
    /// # Errors
    /// Returns [`PipelineError`] when the corpus cannot be embedded.
    fn embed(&self, documents: &[String]) -> Result<Array2<f64>, PipelineError>;
}

/// Fitted TF-IDF vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    terms: Vec<String>,
    index: FxHashMap<String, usize>,
    idf: Vec<f64>,
}

impl Vocabulary {
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    #[must_use]
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    #[must_use]
    pub fn idf(&self, term: &str) -> Option<f64> {
        self.index.get(term).map(|&i| self.idf[i])
    }
}

pub struct TfidfSvdEmbedder {
    config: EmbeddingConfig,
    normalizer: Arc<dyn TextNormalizer>,
}

impl TfidfSvdEmbedder {
    #[must_use]
    pub fn new(config: EmbeddingConfig) -> Self {
        Self::with_normalizer(config, Arc::new(BasicTextNormalizer))
    }

    #[must_use]
    pub fn with_normalizer(config: EmbeddingConfig, normalizer: Arc<dyn TextNormalizer>) -> Self {
        Self { config, normalizer }
    }

    /// Tokenize every document and expand to unigram + bigram terms.
    #[must_use]
    pub fn terms(&self, documents: &[String]) -> Vec<Vec<String>> {
        documents
            .iter()
            .map(|doc| with_bigrams(self.normalizer.normalize(doc)))
            .collect()
    }

    /// Build the vocabulary from tokenized documents.
    #[must_use]
    pub fn fit_vocabulary(&self, corpus: &[Vec<String>]) -> Vocabulary {
        // 1. 文書頻度（DF）とコーパス全体の出現回数を数える
        let mut doc_freq: FxHashMap<&str, usize> = FxHashMap::default();
        let mut term_freq: FxHashMap<&str, usize> = FxHashMap::default();
        for doc in corpus {
            let mut seen: FxHashSet<&str> = FxHashSet::default();
            for term in doc {
                *term_freq.entry(term.as_str()).or_insert(0) += 1;
                if seen.insert(term.as_str()) {
                    *doc_freq.entry(term.as_str()).or_insert(0) += 1;
                }
            }
        }

        // 2. min_df 未満を除外し、出現回数の多い順に max_features 件を残す
        let mut candidates: Vec<(&str, usize, usize)> = doc_freq
            .iter()
            .filter(|&(_, &df)| df >= self.config.min_df)
            .map(|(&term, &df)| (term, term_freq.get(term).copied().unwrap_or(0), df))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        candidates.truncate(self.config.max_features);

        // 3. 列順は語彙のアルファベット順
        candidates.sort_by(|a, b| a.0.cmp(b.0));

        // IDF(t) = ln((N + 1) / (DF(t) + 1)) + 1
        let n = corpus.len() as f64;
        let terms: Vec<String> = candidates.iter().map(|(t, _, _)| (*t).to_string()).collect();
        let idf: Vec<f64> = candidates
            .iter()
            .map(|&(_, _, df)| ((n + 1.0) / (df as f64 + 1.0)).ln() + 1.0)
            .collect();
        let index = terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();

        debug!(
            documents = corpus.len(),
            unique_terms = doc_freq.len(),
            vocabulary = terms.len(),
            "tfidf vocabulary fitted"
        );

        Vocabulary { terms, index, idf }
    }

    /// Row-normalized TF-IDF matrix in CSR form.
    #[must_use]
    pub fn tfidf_matrix(&self, corpus: &[Vec<String>], vocabulary: &Vocabulary) -> CsMat<f64> {
        let mut triplets = TriMat::new((corpus.len(), vocabulary.len()));
        for (row, doc) in corpus.iter().enumerate() {
            let mut counts: FxHashMap<usize, f64> = FxHashMap::default();
            for term in doc {
                if let Some(&col) = vocabulary.index.get(term) {
                    *counts.entry(col).or_insert(0.0) += 1.0;
                }
            }
            let mut entries: Vec<(usize, f64)> = counts
                .into_iter()
                .map(|(col, tf)| (col, tf * vocabulary.idf[col]))
                .collect();
            entries.sort_by_key(|&(col, _)| col);
            let norm = entries.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                for (col, value) in entries {
                    triplets.add_triplet(row, col, value / norm);
                }
            }
        }
        triplets.to_csr()
    }
}

impl Default for TfidfSvdEmbedder {
    fn default() -> Self {
        Self::new(EmbeddingConfig::default())
    }
}

impl Embedder for TfidfSvdEmbedder {
    fn embed(&self, documents: &[String]) -> Result<Array2<f64>, PipelineError> {
        self.config.validate()?;
        if documents.is_empty() {
            return Err(PipelineError::InsufficientData(
                "no documents to embed".to_string(),
            ));
        }

        let corpus = self.terms(documents);
        let vocabulary = self.fit_vocabulary(&corpus);
        let matrix = self.tfidf_matrix(&corpus, &vocabulary);
        let projected = truncated_svd(
            &matrix,
            self.config.dimensions,
            self.config.power_iterations,
            self.config.seed,
        );

        let mut block = Array2::<f64>::zeros((documents.len(), self.config.dimensions));
        for ((row, col), value) in projected.indexed_iter() {
            block[[row, col]] = *value;
        }

        info!(
            documents = documents.len(),
            vocabulary = vocabulary.len(),
            components = projected.ncols(),
            dimensions = self.config.dimensions,
            "text embeddings computed"
        );
        Ok(block)
    }
}

fn with_bigrams(tokens: Vec<String>) -> Vec<String> {
    let bigrams: Vec<String> = tokens
        .windows(2)
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .collect();
    let mut terms = tokens;
    terms.extend(bigrams);
    terms
}

/// Project `matrix` onto at most `components` leading singular directions,
/// returning `U * S` (rows × rank).
///
/// Randomized range finder with power iterations, followed by an exact
/// eigen-decomposition of the small `B Bᵀ` matrix.
#[must_use]
pub fn truncated_svd(
    matrix: &CsMat<f64>,
    components: usize,
    power_iterations: usize,
    seed: u64,
) -> Array2<f64> {
    let (rows, cols) = matrix.shape();
    let rank = components.min(rows).min(cols);
    if rank == 0 || matrix.nnz() == 0 {
        return Array2::zeros((rows, 0));
    }
    let sketch = (rank + OVERSAMPLING).min(rows).min(cols);

    let mut rng = StdRng::seed_from_u64(seed);
    let omega = Array2::from_shape_fn((cols, sketch), |_| standard_normal(&mut rng));

    let mut q = orthonormalize(sparse_mul(matrix, &omega));
    for _ in 0..power_iterations {
        let z = orthonormalize(sparse_t_mul(matrix, &q));
        q = orthonormalize(sparse_mul(matrix, &z));
    }

    // B = Qᵀ A  (sketch × cols)
    let b = sparse_t_mul(matrix, &q).reversed_axes();
    let gram = b.dot(&b.t());
    let (eigenvalues, eigenvectors) = jacobi_eigen(gram);

    let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
    order.sort_by(|&i, &j| eigenvalues[j].total_cmp(&eigenvalues[i]).then(i.cmp(&j)));

    let mut projected = Array2::<f64>::zeros((rows, rank));
    for (out_col, &k) in order.iter().take(rank).enumerate() {
        let sigma = eigenvalues[k].max(0.0).sqrt();
        let mut column: Array1<f64> = q.dot(&eigenvectors.column(k)) * sigma;
        // 符号を固定: 絶対値最大の成分を正にする
        let pivot = column
            .iter()
            .copied()
            .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
        if pivot < 0.0 {
            column.mapv_inplace(|v| -v);
        }
        projected.column_mut(out_col).assign(&column);
    }
    projected
}

/// `A * X` for CSR `A`.
fn sparse_mul(matrix: &CsMat<f64>, dense: &Array2<f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((matrix.rows(), dense.ncols()));
    for (row, vector) in matrix.outer_iterator().enumerate() {
        let mut target = out.row_mut(row);
        for (col, &value) in vector.iter() {
            target.scaled_add(value, &dense.row(col));
        }
    }
    out
}

/// `Aᵀ * X` for CSR `A`.
fn sparse_t_mul(matrix: &CsMat<f64>, dense: &Array2<f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((matrix.cols(), dense.ncols()));
    for (row, vector) in matrix.outer_iterator().enumerate() {
        let source = dense.row(row);
        for (col, &value) in vector.iter() {
            out.row_mut(col).scaled_add(value, &source);
        }
    }
    out
}

/// Modified Gram-Schmidt on the columns. Degenerate columns become zero.
fn orthonormalize(mut m: Array2<f64>) -> Array2<f64> {
    for j in 0..m.ncols() {
        for i in 0..j {
            let projection = m.column(i).dot(&m.column(j));
            let basis = m.column(i).to_owned();
            m.column_mut(j).scaled_add(-projection, &basis);
        }
        let norm = m.column(j).dot(&m.column(j)).sqrt();
        if norm > 1e-12 {
            m.column_mut(j).mapv_inplace(|v| v / norm);
        } else {
            m.column_mut(j).fill(0.0);
        }
    }
    m
}

/// Cyclic Jacobi eigen-decomposition of a symmetric matrix.
///
/// Returns eigenvalues and eigenvectors as columns, in input order.
fn jacobi_eigen(mut a: Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);
    for _ in 0..JACOBI_MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|p| ((p + 1)..n).map(move |q| (p, q)))
            .map(|(p, q)| a[[p, q]] * a[[p, q]])
            .sum();
        if off < JACOBI_TOLERANCE {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }
    ((0..n).map(|i| a[[i, i]]).collect(), v)
}

/// Box-Muller transform.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}
