pub mod api;
pub mod http;
pub mod meli;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod pricing;

pub use pipeline::{PipelineError, PipelineErrorKind, PricingPipeline, PricingReport};
