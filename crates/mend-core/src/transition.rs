use thiserror::Error;

use crate::phase::{FailureKind, PhaseKind, WorkflowPhase};

/// A requested workflow step, carrying the data the target phase needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    StartAnalysis {
        session_id: String,
    },
    CompleteAnalysis {
        proposal_ref: String,
    },
    /// Gates `StartFix` eligibility at the caller; the phase itself is
    /// unchanged.
    Approve,
    StartFix {
        fix_session_id: String,
        workspace: String,
        branch: String,
    },
    CompleteFix,
    Fail {
        error: String,
    },
    /// Administrative escape hatch: back to `Pending`, discarding session
    /// linkage. Legal from any phase.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    StartAnalysis,
    CompleteAnalysis,
    Approve,
    StartFix,
    CompleteFix,
    Fail,
    Reset,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::StartAnalysis { .. } => ActionKind::StartAnalysis,
            Action::CompleteAnalysis { .. } => ActionKind::CompleteAnalysis,
            Action::Approve => ActionKind::Approve,
            Action::StartFix { .. } => ActionKind::StartFix,
            Action::CompleteFix => ActionKind::CompleteFix,
            Action::Fail { .. } => ActionKind::Fail,
            Action::Reset => ActionKind::Reset,
        }
    }
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::StartAnalysis => "start_analysis",
            ActionKind::CompleteAnalysis => "complete_analysis",
            ActionKind::Approve => "approve",
            ActionKind::StartFix => "start_fix",
            ActionKind::CompleteFix => "complete_fix",
            ActionKind::Fail => "fail",
            ActionKind::Reset => "reset",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// Policy violation, not a bug: the caller maps this to a conflict
    /// response. Never silently ignored or auto-corrected.
    #[error("action \"{action}\" is not legal from phase \"{from}\"")]
    Invalid { from: PhaseKind, action: ActionKind },
}

/// Pure decision logic: the next phase for `(current, action)`, or why not.
///
/// No I/O, no side effects. Callers persist the result themselves and are
/// responsible for making the read-validate-write step atomic per issue.
pub fn transition(
    current: &WorkflowPhase,
    action: Action,
) -> Result<WorkflowPhase, TransitionError> {
    use WorkflowPhase as P;

    let from = current.kind();
    let action_kind = action.kind();

    let next = match (current, action) {
        // Restarting analysis is always allowed after any failure,
        // regardless of which phase failed.
        (P::Pending | P::Failed { .. }, Action::StartAnalysis { session_id }) => {
            P::Analyzing { session_id }
        }
        (P::Analyzing { session_id }, Action::CompleteAnalysis { proposal_ref }) => P::Proposed {
            session_id: session_id.clone(),
            proposal_ref,
        },
        (P::Proposed { .. }, Action::Approve) => current.clone(),
        (
            P::Proposed { session_id, .. },
            Action::StartFix {
                fix_session_id,
                workspace,
                branch,
            },
        ) => P::Fixing {
            analysis_session_id: session_id.clone(),
            fix_session_id,
            workspace,
            branch,
        },
        (
            P::Fixing {
                analysis_session_id,
                fix_session_id,
                workspace,
                branch,
            },
            Action::CompleteFix,
        ) => P::Fixed {
            analysis_session_id: analysis_session_id.clone(),
            fix_session_id: fix_session_id.clone(),
            workspace: workspace.clone(),
            branch: branch.clone(),
        },
        (P::Analyzing { session_id }, Action::Fail { error }) => P::Failed {
            from: FailureKind::Analyzing,
            session_id: session_id.clone(),
            error,
        },
        (P::Fixing { fix_session_id, .. }, Action::Fail { error }) => P::Failed {
            from: FailureKind::Fixing,
            session_id: fix_session_id.clone(),
            error,
        },
        (_, Action::Reset) => P::Pending,
        _ => {
            return Err(TransitionError::Invalid {
                from,
                action: action_kind,
            })
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_phases() -> Vec<WorkflowPhase> {
        vec![
            WorkflowPhase::Pending,
            WorkflowPhase::Analyzing {
                session_id: "a1".into(),
            },
            WorkflowPhase::Proposed {
                session_id: "a1".into(),
                proposal_ref: "proposal/42".into(),
            },
            WorkflowPhase::Fixing {
                analysis_session_id: "a1".into(),
                fix_session_id: "f1".into(),
                workspace: "/tmp/wt".into(),
                branch: "mend/issue-42".into(),
            },
            WorkflowPhase::Fixed {
                analysis_session_id: "a1".into(),
                fix_session_id: "f1".into(),
                workspace: "/tmp/wt".into(),
                branch: "mend/issue-42".into(),
            },
            WorkflowPhase::Failed {
                from: FailureKind::Analyzing,
                session_id: "a1".into(),
                error: "boom".into(),
            },
        ]
    }

    fn all_actions() -> Vec<Action> {
        vec![
            Action::StartAnalysis {
                session_id: "s9".into(),
            },
            Action::CompleteAnalysis {
                proposal_ref: "proposal/42".into(),
            },
            Action::Approve,
            Action::StartFix {
                fix_session_id: "f9".into(),
                workspace: "/tmp/wt".into(),
                branch: "mend/issue-42".into(),
            },
            Action::CompleteFix,
            Action::Fail {
                error: "boom".into(),
            },
            Action::Reset,
        ]
    }

    fn is_legal(from: PhaseKind, action: ActionKind) -> bool {
        use ActionKind as A;
        use PhaseKind as P;
        matches!(
            (from, action),
            (P::Pending | P::Failed, A::StartAnalysis)
                | (P::Analyzing, A::CompleteAnalysis)
                | (P::Proposed, A::Approve)
                | (P::Proposed, A::StartFix)
                | (P::Fixing, A::CompleteFix)
                | (P::Analyzing | P::Fixing, A::Fail)
                | (_, A::Reset)
        )
    }

    #[test]
    fn exhaustive_legality_table() {
        for phase in all_phases() {
            for action in all_actions() {
                let expected = is_legal(phase.kind(), action.kind());
                let result = transition(&phase, action.clone());
                assert_eq!(
                    result.is_ok(),
                    expected,
                    "phase {:?} action {:?} => {:?}",
                    phase.kind(),
                    action.kind(),
                    result
                );
                if let Err(TransitionError::Invalid { from, action: a }) = result {
                    assert_eq!(from, phase.kind());
                    assert_eq!(a, action.kind());
                }
            }
        }
    }

    #[test]
    fn start_analysis_from_pending() {
        let next = transition(
            &WorkflowPhase::Pending,
            Action::StartAnalysis {
                session_id: "s1".into(),
            },
        )
        .unwrap();
        assert_eq!(
            next,
            WorkflowPhase::Analyzing {
                session_id: "s1".into()
            }
        );
    }

    #[test]
    fn start_analysis_allowed_after_fix_failure() {
        let failed = WorkflowPhase::Failed {
            from: FailureKind::Fixing,
            session_id: "f1".into(),
            error: "agent crash".into(),
        };
        let next = transition(
            &failed,
            Action::StartAnalysis {
                session_id: "s3".into(),
            },
        )
        .unwrap();
        assert_eq!(
            next,
            WorkflowPhase::Analyzing {
                session_id: "s3".into()
            }
        );
    }

    #[test]
    fn complete_analysis_carries_session() {
        let analyzing = WorkflowPhase::Analyzing {
            session_id: "s1".into(),
        };
        let next = transition(
            &analyzing,
            Action::CompleteAnalysis {
                proposal_ref: "proposal/42".into(),
            },
        )
        .unwrap();
        assert_eq!(
            next,
            WorkflowPhase::Proposed {
                session_id: "s1".into(),
                proposal_ref: "proposal/42".into(),
            }
        );
    }

    #[test]
    fn approve_leaves_phase_unchanged() {
        let proposed = WorkflowPhase::Proposed {
            session_id: "s1".into(),
            proposal_ref: "proposal/42".into(),
        };
        let next = transition(&proposed, Action::Approve).unwrap();
        assert_eq!(next, proposed);
    }

    #[test]
    fn start_fix_carries_analysis_session() {
        let proposed = WorkflowPhase::Proposed {
            session_id: "s1".into(),
            proposal_ref: "proposal/42".into(),
        };
        let next = transition(
            &proposed,
            Action::StartFix {
                fix_session_id: "f1".into(),
                workspace: "/tmp/wt".into(),
                branch: "mend/issue-42".into(),
            },
        )
        .unwrap();
        assert_eq!(
            next,
            WorkflowPhase::Fixing {
                analysis_session_id: "s1".into(),
                fix_session_id: "f1".into(),
                workspace: "/tmp/wt".into(),
                branch: "mend/issue-42".into(),
            }
        );
    }

    #[test]
    fn complete_fix_preserves_all_fields() {
        let fixing = WorkflowPhase::Fixing {
            analysis_session_id: "s1".into(),
            fix_session_id: "f1".into(),
            workspace: "/tmp/wt".into(),
            branch: "mend/issue-42".into(),
        };
        let next = transition(&fixing, Action::CompleteFix).unwrap();
        assert_eq!(
            next,
            WorkflowPhase::Fixed {
                analysis_session_id: "s1".into(),
                fix_session_id: "f1".into(),
                workspace: "/tmp/wt".into(),
                branch: "mend/issue-42".into(),
            }
        );
    }

    #[test]
    fn fail_records_prior_kind_and_failing_session() {
        let analyzing = WorkflowPhase::Analyzing {
            session_id: "s1".into(),
        };
        let next = transition(
            &analyzing,
            Action::Fail {
                error: "timeout".into(),
            },
        )
        .unwrap();
        assert_eq!(
            next,
            WorkflowPhase::Failed {
                from: FailureKind::Analyzing,
                session_id: "s1".into(),
                error: "timeout".into(),
            }
        );

        let fixing = WorkflowPhase::Fixing {
            analysis_session_id: "s1".into(),
            fix_session_id: "f1".into(),
            workspace: "/tmp/wt".into(),
            branch: "mend/issue-42".into(),
        };
        let next = transition(
            &fixing,
            Action::Fail {
                error: "agent crash".into(),
            },
        )
        .unwrap();
        assert_eq!(
            next,
            WorkflowPhase::Failed {
                from: FailureKind::Fixing,
                session_id: "f1".into(),
                error: "agent crash".into(),
            }
        );
    }

    #[test]
    fn reset_from_every_phase() {
        for phase in all_phases() {
            let next = transition(&phase, Action::Reset).unwrap();
            assert_eq!(next, WorkflowPhase::Pending);
        }
    }

    #[test]
    fn double_start_analysis_is_a_conflict() {
        let analyzing = WorkflowPhase::Analyzing {
            session_id: "s1".into(),
        };
        let err = transition(
            &analyzing,
            Action::StartAnalysis {
                session_id: "s2".into(),
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Invalid {
                from: PhaseKind::Analyzing,
                action: ActionKind::StartAnalysis,
            }
        );
    }

    #[test]
    fn fail_then_retry_scenario() {
        let analyzing = WorkflowPhase::Analyzing {
            session_id: "s1".into(),
        };
        let failed = transition(
            &analyzing,
            Action::Fail {
                error: "timeout".into(),
            },
        )
        .unwrap();
        let retried = transition(
            &failed,
            Action::StartAnalysis {
                session_id: "s3".into(),
            },
        )
        .unwrap();
        assert_eq!(
            retried,
            WorkflowPhase::Analyzing {
                session_id: "s3".into()
            }
        );
    }
}
