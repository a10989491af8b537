#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::similar_names
)]

pub mod analysis;
pub mod config;
pub mod ingest;
pub mod observability;
pub mod pipeline;
pub mod util;
