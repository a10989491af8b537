pub mod cluster;
pub mod config;
pub mod diversity;
pub mod embedding;
pub mod features;
pub mod orchestrator;
pub mod risk;
pub mod select;
pub mod strategy;
pub mod text;
pub mod types;

pub use orchestrator::{PipelineArtifacts, PipelineReport, PromotionPipeline};
