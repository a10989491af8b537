use std::{env, num::NonZeroUsize, path::PathBuf};

use thiserror::Error;

use crate::observability::tracing::LogFormat;
use crate::pipeline::config::{
    ClusteringConfig, DiversityThresholds, EmbeddingConfig, ExplorationPolicy, MonitorConfig,
    PipelineConfig, RiskConfig, RiskWeights,
};
use crate::util::error::PipelineError;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pipeline: PipelineConfig,
    budget: NonZeroUsize,
    strategies_path: Option<PathBuf>,
    log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から設定値を読み込む。未設定の値はすべて既定値になる。
    ///
    /// # Errors
    /// 値のパースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let clustering = ClusteringConfig {
            k: parse_usize("PROMOTION_CLUSTER_COUNT", 4)?,
            seed: parse_u64("PROMOTION_KMEANS_SEED", 42)?,
            restarts: parse_usize("PROMOTION_KMEANS_RESTARTS", 20)?,
            max_iterations: parse_usize("PROMOTION_KMEANS_MAX_ITERATIONS", 300)?,
        };
        let risk = RiskConfig {
            weights: RiskWeights {
                duration: parse_f64("PROMOTION_WEIGHT_DURATION", 0.4)?,
                cluster: parse_f64("PROMOTION_WEIGHT_CLUSTER", 0.4)?,
                delay: parse_f64("PROMOTION_WEIGHT_DELAY", 0.2)?,
            },
            movie_penalty: parse_f64("PROMOTION_MOVIE_PENALTY", 0.3)?,
        };
        let diversity = DiversityThresholds {
            medium: parse_f64("PROMOTION_DIVERSITY_MEDIUM_THRESHOLD", 0.45)?,
            high: parse_f64("PROMOTION_DIVERSITY_HIGH_THRESHOLD", 0.65)?,
        };
        let defaults = EmbeddingConfig::default();
        let embedding = EmbeddingConfig {
            dimensions: parse_usize("PROMOTION_EMBEDDING_DIMENSIONS", defaults.dimensions)?,
            max_features: parse_usize("PROMOTION_TFIDF_MAX_FEATURES", defaults.max_features)?,
            min_df: parse_usize("PROMOTION_TFIDF_MIN_DF", defaults.min_df)?,
            ..defaults
        };
        let monitor_defaults = MonitorConfig::default();
        let monitor = MonitorConfig {
            risk_threshold: parse_f64(
                "PROMOTION_MONITOR_RISK_THRESHOLD",
                monitor_defaults.risk_threshold,
            )?,
            limit: parse_usize("PROMOTION_MONITOR_LIMIT", monitor_defaults.limit)?,
        };

        let budget = parse_non_zero_usize("PROMOTION_BUDGET", 10)?;
        let strategies_path = optional_path("PROMOTION_STRATEGIES_PATH");
        let log_format = parse_log_format("PROMOTION_LOG_FORMAT", LogFormat::Json)?;

        Ok(Self {
            pipeline: PipelineConfig {
                clustering,
                risk,
                diversity,
                exploration: ExplorationPolicy::default(),
                embedding,
                monitor,
            },
            budget,
            strategies_path,
            log_format,
        })
    }

    /// Semantic checks on the parsed values.
    ///
    /// # Errors
    /// Returns [`PipelineError::Configuration`] naming the first violation.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.pipeline.validate()
    }

    #[must_use]
    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    #[must_use]
    pub fn budget(&self) -> NonZeroUsize {
        self.budget
    }

    #[must_use]
    pub fn strategies_path(&self) -> Option<&std::path::Path> {
        self.strategies_path.as_deref()
    }

    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

fn optional_path(name: &'static str) -> Option<PathBuf> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => Some(PathBuf::from(raw.trim())),
        _ => None,
    }
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let parsed = parse_usize(name, default)?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim().parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim().parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let value = raw.trim().parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if !value.is_finite() {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("value must be finite"),
        });
    }
    Ok(value)
}

fn parse_log_format(name: &'static str, default: LogFormat) -> Result<LogFormat, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.parse::<LogFormat>()
                .map_err(|message| ConfigError::Invalid {
                    name,
                    source: anyhow::anyhow!(message),
                })
        }
        _ => Ok(default),
    }
}
