use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{error, info};

use promotion_engine::{
    config::{Config, ConfigError},
    ingest::{CatalogFormat, load_catalog_as},
    observability::Telemetry,
    pipeline::{
        PromotionPipeline, embedding::TfidfSvdEmbedder, strategy::StrategyBook,
        types::StrategyPreset,
    },
    util::error::{ErrorKind, PipelineError, classify_error},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Raw catalog: JSON Lines, or CSV with a header row
    #[arg(long, env = "PROMOTION_CATALOG")]
    catalog: PathBuf,

    /// Catalog format (default: from the file extension)
    #[arg(long, value_enum)]
    format: Option<CatalogFormat>,

    /// Strategy preset to select with
    #[arg(long, default_value = "Balanced")]
    strategy: String,

    /// Run every preset in the strategy book instead of `--strategy`
    #[arg(long)]
    all_strategies: bool,

    /// Promotion budget (overrides PROMOTION_BUDGET)
    #[arg(long)]
    budget: Option<usize>,

    /// Report items scoring at or above this (overrides PROMOTION_MONITOR_RISK_THRESHOLD)
    #[arg(long)]
    risk_threshold: Option<f64>,

    /// Write the JSON report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Dump Prometheus metrics to stderr after the run
    #[arg(long)]
    print_metrics: bool,
}

fn main() -> ExitCode {
    std::panic::set_hook(Box::new(|panic_info| {
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");
        let location = panic_info
            .location()
            .map(|location| format!("{}:{}", location.file(), location.line()));
        error!(message, location = location.as_deref(), "panic occurred");
    }));

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let kind = classify_error(&error).or_else(|| {
                error
                    .chain()
                    .any(|cause| cause.is::<ConfigError>())
                    .then_some(ErrorKind::Configuration)
            });
            error!(
                error = %format!("{error:#}"),
                kind = kind.map_or("internal", ErrorKind::as_str),
                "promotion run failed"
            );
            eprintln!("error: {error:#}");
            let code = kind.map_or(1, ErrorKind::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let telemetry =
        Telemetry::new(config.log_format()).context("failed to initialise telemetry")?;
    let mut pipeline_config = config.pipeline().clone();
    if let Some(threshold) = cli.risk_threshold {
        pipeline_config.monitor.risk_threshold = threshold;
    }
    pipeline_config.validate().context("invalid configuration")?;

    let budget = match cli.budget {
        Some(0) => bail!(PipelineError::Configuration(
            "--budget must be greater than zero".to_string()
        )),
        Some(budget) => budget,
        None => config.budget().get(),
    };

    let book = StrategyBook::load(config.strategies_path())
        .context("failed to load strategy presets")?;
    let presets: Vec<StrategyPreset> = if cli.all_strategies {
        book.presets().to_vec()
    } else {
        vec![book.require(&cli.strategy)?.clone()]
    };

    let format = cli
        .format
        .unwrap_or_else(|| CatalogFormat::from_path(&cli.catalog));
    let items = load_catalog_as(&cli.catalog, format)
        .with_context(|| format!("failed to ingest {}", cli.catalog.display()))?;
    info!(items = items.len(), budget, strategies = presets.len(), "starting promotion run");

    let embedder = TfidfSvdEmbedder::new(pipeline_config.embedding);
    let pipeline = PromotionPipeline::new(pipeline_config)?
        .with_metrics(telemetry.metrics().clone());
    let artifacts = pipeline.run_with_embedder(items, &embedder)?;
    let selections = artifacts.select_presets(&presets, budget)?;
    let report = artifacts.report(selections);

    let rendered = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, rendered + "\n")
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{rendered}").context("failed to write report to stdout")?;
        }
    }

    if cli.print_metrics {
        eprint!("{}", telemetry.render_prometheus());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_selection_flags() {
        let cli = Cli::try_parse_from([
            "promotion-engine",
            "--catalog",
            "catalog.jsonl",
            "--strategy",
            "Exploratory",
            "--budget",
            "5",
            "--print-metrics",
        ])
        .expect("parse");
        assert_eq!(cli.catalog, PathBuf::from("catalog.jsonl"));
        assert_eq!(cli.strategy, "Exploratory");
        assert_eq!(cli.budget, Some(5));
        assert!(cli.print_metrics);
        assert!(!cli.all_strategies);
    }

    #[test]
    fn cli_parses_format_and_risk_threshold() {
        let cli = Cli::try_parse_from([
            "promotion-engine",
            "--catalog",
            "netflix.txt",
            "--format",
            "csv",
            "--risk-threshold",
            "0.45",
        ])
        .expect("parse");
        assert_eq!(cli.format, Some(CatalogFormat::Csv));
        assert_eq!(cli.risk_threshold, Some(0.45));
    }

    #[test]
    fn strategy_defaults_to_balanced() {
        let cli = Cli::try_parse_from(["promotion-engine", "--catalog", "c.jsonl"]).expect("parse");
        assert_eq!(cli.strategy, "Balanced");
        assert!(cli.output.is_none());
        assert!(cli.format.is_none());
        assert!(cli.risk_threshold.is_none());
    }
}
