// src/pipeline/mod.rs

pub mod event_bus;
pub mod metrics;
pub mod orchestrator;

pub use orchestrator::ActivityPipeline;
