pub mod contact_scan;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod prompts;

pub use orchestrator::{CapabilityIds, Pipeline, PipelineSettings};
