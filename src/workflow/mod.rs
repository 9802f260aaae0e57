pub mod escalation;
pub mod lock;
pub mod orchestrator;
pub mod types;
pub mod validation;

pub use escalation::EscalationHandler;
pub use lock::{WorkingCopyGuard, WorkingCopyLocks};
pub use orchestrator::WorkflowOrchestrator;
pub use types::{RunReport, StageError, VerificationResult, WorkflowState, WorkflowStatus};
pub use validation::{ValidationDecision, ValidationHandler, ValidationOutcome};
