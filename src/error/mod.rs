pub mod step_error;
pub mod workflow_error;

pub use step_error::{StepError, StepErrorKind};
pub use workflow_error::WorkflowError;

/// Convenience alias for workflow-level results.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
