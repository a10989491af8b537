//! Feature matrix construction.
//!
//! Rows are items in table order; columns are the text-embedding block
//! followed by the standardized structural columns.

use ndarray::{Array2, ArrayView2, Axis};
use tracing::debug;

use super::types::ItemRecord;
use crate::util::error::PipelineError;
use crate::util::stats::{impute_median, standardize};

/// Structural numeric columns appended after the embedding block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralColumn {
    ReleaseYear,
    Duration,
    GenreCount,
    DelayYears,
}

impl StructuralColumn {
    pub const ALL: [StructuralColumn; 4] = [
        StructuralColumn::ReleaseYear,
        StructuralColumn::Duration,
        StructuralColumn::GenreCount,
        StructuralColumn::DelayYears,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            StructuralColumn::ReleaseYear => "release_year",
            StructuralColumn::Duration => "duration_value",
            StructuralColumn::GenreCount => "genre_count",
            StructuralColumn::DelayYears => "delay_years",
        }
    }

    fn extract(self, item: &ItemRecord) -> Option<f64> {
        match self {
            StructuralColumn::ReleaseYear => item.release_year,
            StructuralColumn::Duration => item.duration_value,
            StructuralColumn::GenreCount => item.genre_count,
            StructuralColumn::DelayYears => item.delay_years,
        }
    }
}

/// Dense per-item feature matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    values: Array2<f64>,
    embedding_dims: usize,
}

impl FeatureMatrix {
    /// Wrap an already assembled matrix whose first `embedding_dims` columns
    /// are text dimensions.
    #[must_use]
    pub fn new(values: Array2<f64>, embedding_dims: usize) -> Self {
        let embedding_dims = embedding_dims.min(values.ncols());
        Self {
            values,
            embedding_dims,
        }
    }

    #[must_use]
    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    #[must_use]
    pub fn embedding_dims(&self) -> usize {
        self.embedding_dims
    }

    #[must_use]
    pub fn structural_dims(&self) -> usize {
        self.values.ncols() - self.embedding_dims
    }
}

/// Merge the embedding block with median-imputed, standardized structural
/// columns.
///
/// # Errors
/// - [`PipelineError::InsufficientData`] for an empty item table.
/// - [`PipelineError::Alignment`] if the embedding block has a different row
///   count.
/// - [`PipelineError::Schema`] if a structural column has no value in the
///   whole batch.
pub fn build_feature_matrix(
    items: &[ItemRecord],
    embeddings: ArrayView2<'_, f64>,
) -> Result<FeatureMatrix, PipelineError> {
    if items.is_empty() {
        return Err(PipelineError::InsufficientData(
            "item table is empty".to_string(),
        ));
    }
    if embeddings.nrows() != items.len() {
        return Err(PipelineError::alignment(
            "embedding block",
            items.len(),
            embeddings.nrows(),
        ));
    }

    let mut structural = Array2::<f64>::zeros((items.len(), StructuralColumn::ALL.len()));
    for (col, column) in StructuralColumn::ALL.iter().enumerate() {
        let raw: Vec<Option<f64>> = items.iter().map(|item| column.extract(item)).collect();
        let filled = impute_median(&raw).ok_or_else(|| {
            PipelineError::schema(column.name(), "no numeric value present in the batch")
        })?;
        let missing = raw.iter().filter(|v| v.is_none()).count();
        debug!(column = column.name(), missing, "imputed structural column");

        for (row, value) in standardize(&filled).into_iter().enumerate() {
            structural[[row, col]] = value;
        }
    }

    let values = ndarray::concatenate(Axis(1), &[embeddings.view(), structural.view()])
        .map_err(|_| {
            PipelineError::alignment("structural block", embeddings.nrows(), structural.nrows())
        })?;

    Ok(FeatureMatrix::new(values, embeddings.ncols()))
}
