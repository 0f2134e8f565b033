pub mod audit;
pub mod checks;
pub mod config;
pub mod error;
pub mod gate;
pub mod git;
pub mod hooks;
pub mod message;
pub mod observability;
pub mod pipeline;
pub mod presets;
pub mod validation;

pub use config::GateConfig;
pub use error::GateFailure;
pub use gate::{CommitGate, GateOutcome};
pub use pipeline::{CheckRegistry, PipelineExecutor, PipelineResult, RunReport};
