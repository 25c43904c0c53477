//! Command implementations for the Podium CLI.

pub mod models;
pub mod pipeline;
pub mod serve;

pub use models::ModelsCommand;

use podium_core::PipelineError;

/// Process exit code for a failed command: the stage taxonomy for pipeline
/// failures, 1 for anything else.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<PipelineError>().map_or(1, PipelineError::exit_code)
}
