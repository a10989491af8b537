/// 合成カタログ（数千件）での性能ベンチマーク。
use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use promotion_engine::analysis::synthetic_catalog;
use promotion_engine::pipeline::PromotionPipeline;
use promotion_engine::pipeline::config::{ClusteringConfig, EmbeddingConfig, PipelineConfig};
use promotion_engine::pipeline::embedding::{Embedder, TfidfSvdEmbedder};
use promotion_engine::pipeline::strategy::StrategyBook;

fn bench_config() -> PipelineConfig {
    PipelineConfig {
        clustering: ClusteringConfig {
            restarts: 5,
            ..ClusteringConfig::default()
        },
        ..PipelineConfig::default()
    }
}

fn bench_embedding(c: &mut Criterion) {
    let catalog = synthetic_catalog(2_000, 8, 42);
    let documents: Vec<String> = catalog
        .items
        .iter()
        .map(|item| item.description.clone())
        .collect();
    let embedder = TfidfSvdEmbedder::new(EmbeddingConfig::default());

    c.bench_function("tfidf_svd_2k_docs", |b| {
        b.iter(|| {
            let embeddings = embedder.embed(&documents).expect("embed");
            black_box(embeddings.dim());
        });
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let catalog = synthetic_catalog(5_000, 16, 7);

    c.bench_function("pipeline_run_5k_items", |b| {
        b.iter(|| {
            // fresh pipeline per iteration so the clustering cache never hits
            let pipeline = PromotionPipeline::new(bench_config()).expect("pipeline");
            let artifacts = pipeline
                .run(catalog.items.clone(), catalog.embeddings.view())
                .expect("run");
            black_box(artifacts.scores().len());
        });
    });
}

fn bench_selection(c: &mut Criterion) {
    let catalog = synthetic_catalog(5_000, 16, 7);
    let pipeline = PromotionPipeline::new(bench_config()).expect("pipeline");
    let artifacts = pipeline
        .run(catalog.items, catalog.embeddings.view())
        .expect("run");
    let book = StrategyBook::builtin();

    c.bench_function("select_all_presets_budget_100", |b| {
        b.iter(|| {
            let selections = artifacts
                .select_presets(book.presets(), 100)
                .expect("select");
            black_box(selections.len());
        });
    });
}

criterion_group!(benches, bench_embedding, bench_pipeline, bench_selection);
criterion_main!(benches);
