pub mod aggregate;
pub mod inference;
pub mod orchestrator;
pub mod progress;
pub mod sampler;
pub mod scratch;
