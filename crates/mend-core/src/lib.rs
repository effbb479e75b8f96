pub mod issue;
pub mod phase;
pub mod transition;

pub use issue::{now_rfc3339, Issue};
pub use phase::{FailureKind, PhaseKind, WorkflowPhase};
pub use transition::{transition, Action, ActionKind, TransitionError};
