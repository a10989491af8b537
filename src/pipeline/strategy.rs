use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use super::types::{ExplorationBias, StrategyPreset};
use crate::util::error::PipelineError;

/// Named presets offered to the caller. Loaded from YAML or built in.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StrategyBook {
    strategies: Vec<StrategyPreset>,
}

impl StrategyBook {
    /// Conservative / Balanced / Exploratory.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            strategies: vec![
                StrategyPreset {
                    name: "Conservative".to_string(),
                    description: "Low-risk items, mostly from the dominant theme".to_string(),
                    risk_threshold: 0.35,
                    exploration_bias: ExplorationBias::Low,
                },
                StrategyPreset {
                    name: "Balanced".to_string(),
                    description: "Moderate risk, exploration adapted to diversity health"
                        .to_string(),
                    risk_threshold: 0.60,
                    exploration_bias: ExplorationBias::Medium,
                },
                StrategyPreset {
                    name: "Exploratory".to_string(),
                    description: "Higher risk tolerance, strong push into niche clusters"
                        .to_string(),
                    risk_threshold: 0.75,
                    exploration_bias: ExplorationBias::High,
                },
            ],
        }
    }

    /// Validate and wrap a preset list.
    ///
    /// # Errors
    /// Returns [`PipelineError::Configuration`] for an empty list, a duplicate
    /// name or a threshold outside (0, 1].
    pub fn new(strategies: Vec<StrategyPreset>) -> Result<Self, PipelineError> {
        let book = Self { strategies };
        book.validate()?;
        Ok(book)
    }

    /// Load from the YAML file at `path` when given, otherwise the built-ins.
    ///
    /// # Errors
    /// Returns [`StrategyFileError`] when the file cannot be read, parsed or
    /// validated.
    pub fn load(path: Option<&Path>) -> Result<Self, StrategyFileError> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Ok(Self::builtin()),
        }
    }

    fn load_from_path(path: &Path) -> Result<Self, StrategyFileError> {
        let contents = fs::read_to_string(path).map_err(|source| StrategyFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let book: Self =
            serde_yaml::from_str(&contents).map_err(|source| StrategyFileError::Deserialize {
                path: path.to_path_buf(),
                source,
            })?;
        book.validate().map_err(|source| StrategyFileError::Invalid {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(
            path = %path.display(),
            strategies = book.strategies.len(),
            "loaded strategy presets"
        );
        Ok(book)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.strategies.is_empty() {
            return Err(PipelineError::Configuration(
                "at least one strategy preset is required".to_string(),
            ));
        }
        for (index, preset) in self.strategies.iter().enumerate() {
            validate_preset(preset)?;
            if self.strategies[..index]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&preset.name))
            {
                return Err(PipelineError::Configuration(format!(
                    "duplicate strategy preset `{}`",
                    preset.name
                )));
            }
        }
        Ok(())
    }

    /// Case-insensitive lookup by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StrategyPreset> {
        self.strategies
            .iter()
            .find(|preset| preset.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Like [`get`](Self::get), failing with the list of known names.
    ///
    /// # Errors
    /// Returns [`PipelineError::Configuration`] for an unknown name.
    pub fn require(&self, name: &str) -> Result<&StrategyPreset, PipelineError> {
        self.get(name).ok_or_else(|| {
            PipelineError::Configuration(format!(
                "unknown strategy `{name}`; expected one of: {}",
                self.names().join(", ")
            ))
        })
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|p| p.name.as_str()).collect()
    }

    #[must_use]
    pub fn presets(&self) -> &[StrategyPreset] {
        &self.strategies
    }
}

impl Default for StrategyBook {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Check a single preset.
///
/// # Errors
/// Returns [`PipelineError::Configuration`] for a blank name or a threshold
/// outside (0, 1].
pub fn validate_preset(preset: &StrategyPreset) -> Result<(), PipelineError> {
    if preset.name.trim().is_empty() {
        return Err(PipelineError::Configuration(
            "strategy name must not be blank".to_string(),
        ));
    }
    let threshold = preset.risk_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(PipelineError::Configuration(format!(
            "strategy `{}` risk threshold must be within (0, 1], got {threshold}",
            preset.name
        )));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StrategyFileError {
    #[error("failed to read strategy file at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse strategy file at {path}: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid strategy file at {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: PipelineError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixtures_path() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/strategies.yaml")
    }

    #[test]
    fn builtin_presets_match_documented_values() {
        let book = StrategyBook::builtin();
        assert_eq!(book.names(), vec!["Conservative", "Balanced", "Exploratory"]);

        let balanced = book.get("balanced").expect("case-insensitive lookup");
        assert_eq!(balanced.risk_threshold, 0.60);
        assert_eq!(balanced.exploration_bias, ExplorationBias::Medium);
        assert_eq!(
            book.get("Exploratory").map(|p| p.exploration_bias),
            Some(ExplorationBias::High)
        );
    }

    #[test]
    fn load_without_path_uses_builtins() {
        let book = StrategyBook::load(None).expect("builtins");
        assert_eq!(book, StrategyBook::builtin());
    }

    #[test]
    fn load_reads_yaml_fixture() {
        let book = StrategyBook::load(Some(&fixtures_path())).expect("should parse fixture");
        assert_eq!(book.presets().len(), 4);
        let niche = book.require("Niche Boost").expect("fixture preset");
        assert_eq!(niche.risk_threshold, 0.9);
        assert_eq!(niche.exploration_bias, ExplorationBias::High);
    }

    #[test]
    fn load_rejects_out_of_range_threshold() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "strategies:\n  - name: Reckless\n    risk_threshold: 1.5\n    exploration_bias: HIGH"
        )
        .expect("write");

        let err = StrategyBook::load(Some(file.path())).unwrap_err();
        assert!(matches!(
            err,
            StrategyFileError::Invalid {
                source: PipelineError::Configuration(_),
                ..
            }
        ));
    }

    #[test]
    fn load_errors_for_missing_file() {
        let missing = fixtures_path().with_file_name("does-not-exist.yaml");
        let err = StrategyBook::load(Some(&missing)).unwrap_err();
        match err {
            StrategyFileError::Io { path, .. } => {
                assert!(path.ends_with("does-not-exist.yaml"));
            }
            _ => panic!("expected Io error"),
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let preset = StrategyPreset::new("Same", 0.5, ExplorationBias::Low);
        let err = StrategyBook::new(vec![preset.clone(), preset]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn unknown_strategy_lists_known_names() {
        let err = StrategyBook::builtin().require("Wild").unwrap_err();
        assert!(err.to_string().contains("Conservative, Balanced, Exploratory"));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let preset = StrategyPreset::new("Closed", 0.0, ExplorationBias::Low);
        assert!(validate_preset(&preset).is_err());
    }
}
