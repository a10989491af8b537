//! パイプラインのエラー分類。

use thiserror::Error;

/// All four variants are deterministic input or configuration faults. They
/// are returned to the caller as-is and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// A required column is absent or carries no usable value.
    #[error("schema error in column `{column}`: {reason}")]
    Schema { column: String, reason: String },
    /// Two row-aligned artifacts disagree on their row count.
    #[error("alignment error: {artifact} has {actual} rows but the item table has {expected}")]
    Alignment {
        artifact: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Empty input, or fewer distinct rows than requested clusters.
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    /// Invalid weights, thresholds, cluster counts or budgets.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub(crate) fn schema(column: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            column: column.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn alignment(artifact: &'static str, expected: usize, actual: usize) -> Self {
        Self::Alignment {
            artifact,
            expected,
            actual,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema { .. } => ErrorKind::Schema,
            Self::Alignment { .. } => ErrorKind::Alignment,
            Self::InsufficientData(_) => ErrorKind::InsufficientData,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

/// エラーの種類。メトリクスのラベルや終了コードに使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Schema,
    Alignment,
    InsufficientData,
    Configuration,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Alignment => "alignment",
            Self::InsufficientData => "insufficient_data",
            Self::Configuration => "configuration",
        }
    }

    /// Process exit code used by the batch binary.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Schema => 65,
            Self::Alignment => 70,
            Self::InsufficientData => 66,
            Self::Configuration => 78,
        }
    }
}

/// `anyhow` でラップされたエラーからパイプラインのエラー種別を取り出す。
#[must_use]
pub fn classify_error(error: &anyhow::Error) -> Option<ErrorKind> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .map(PipelineError::kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn classify_finds_wrapped_pipeline_error() {
        let result: Result<(), PipelineError> =
            Err(PipelineError::InsufficientData("empty catalog".to_string()));
        let error = result.context("pipeline run failed").unwrap_err();

        assert_eq!(classify_error(&error), Some(ErrorKind::InsufficientData));
    }

    #[test]
    fn classify_ignores_foreign_errors() {
        let error = anyhow::anyhow!("disk full");
        assert_eq!(classify_error(&error), None);
    }

    #[test]
    fn alignment_message_names_artifact() {
        let error = PipelineError::alignment("feature matrix", 10, 9);
        assert_eq!(
            error.to_string(),
            "alignment error: feature matrix has 9 rows but the item table has 10"
        );
        assert_eq!(error.kind().as_str(), "alignment");
    }
}
