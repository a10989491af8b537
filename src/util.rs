pub mod error;
pub mod kmeans;
pub mod stats;
