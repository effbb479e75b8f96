use serde::{Deserialize, Serialize};

/// Current step of an issue's remediation workflow.
///
/// Replaced wholesale on every transition — no partial mutation. Session
/// ids are back-references into the orchestrator's table, never owning
/// handles; after a process restart they may dangle until the recovery
/// sweep runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum WorkflowPhase {
    Pending,
    Analyzing {
        session_id: String,
    },
    Proposed {
        session_id: String,
        proposal_ref: String,
    },
    Fixing {
        analysis_session_id: String,
        fix_session_id: String,
        workspace: String,
        branch: String,
    },
    Fixed {
        analysis_session_id: String,
        fix_session_id: String,
        workspace: String,
        branch: String,
    },
    Failed {
        from: FailureKind,
        session_id: String,
        error: String,
    },
}

/// Payload-free discriminant of [`WorkflowPhase`], used for filters,
/// conditional updates, and error messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Pending,
    Analyzing,
    Proposed,
    Fixing,
    Fixed,
    Failed,
}

impl PhaseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseKind::Pending => "pending",
            PhaseKind::Analyzing => "analyzing",
            PhaseKind::Proposed => "proposed",
            PhaseKind::Fixing => "fixing",
            PhaseKind::Fixed => "fixed",
            PhaseKind::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PhaseKind::Pending),
            "analyzing" => Some(PhaseKind::Analyzing),
            "proposed" => Some(PhaseKind::Proposed),
            "fixing" => Some(PhaseKind::Fixing),
            "fixed" => Some(PhaseKind::Fixed),
            "failed" => Some(PhaseKind::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The phase an operation was in when it failed. Only phases with a
/// running agent session can fail, so only those two are representable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Analyzing,
    Fixing,
}

impl FailureKind {
    pub fn as_phase_kind(self) -> PhaseKind {
        match self {
            FailureKind::Analyzing => PhaseKind::Analyzing,
            FailureKind::Fixing => PhaseKind::Fixing,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_phase_kind().as_str())
    }
}

impl WorkflowPhase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            WorkflowPhase::Pending => PhaseKind::Pending,
            WorkflowPhase::Analyzing { .. } => PhaseKind::Analyzing,
            WorkflowPhase::Proposed { .. } => PhaseKind::Proposed,
            WorkflowPhase::Fixing { .. } => PhaseKind::Fixing,
            WorkflowPhase::Fixed { .. } => PhaseKind::Fixed,
            WorkflowPhase::Failed { .. } => PhaseKind::Failed,
        }
    }

    /// Session id of the operation currently in flight, if any.
    /// This is what the recovery sweep checks against the live table.
    pub fn active_session_id(&self) -> Option<&str> {
        match self {
            WorkflowPhase::Analyzing { session_id } => Some(session_id),
            WorkflowPhase::Fixing { fix_session_id, .. } => Some(fix_session_id),
            _ => None,
        }
    }

    /// All session ids referenced by this phase, for teardown on reset.
    pub fn referenced_session_ids(&self) -> Vec<&str> {
        match self {
            WorkflowPhase::Pending => vec![],
            WorkflowPhase::Analyzing { session_id } => vec![session_id],
            WorkflowPhase::Proposed { session_id, .. } => vec![session_id],
            WorkflowPhase::Fixing {
                analysis_session_id,
                fix_session_id,
                ..
            }
            | WorkflowPhase::Fixed {
                analysis_session_id,
                fix_session_id,
                ..
            } => vec![analysis_session_id, fix_session_id],
            WorkflowPhase::Failed { session_id, .. } => vec![session_id],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_json_roundtrip() {
        let phase = WorkflowPhase::Failed {
            from: FailureKind::Fixing,
            session_id: "fix-3-1700000000".into(),
            error: "timeout".into(),
        };
        let json = serde_json::to_string(&phase).unwrap();
        let restored: WorkflowPhase = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, phase);
    }

    #[test]
    fn phase_tag_is_snake_case() {
        let json = serde_json::to_value(WorkflowPhase::Analyzing {
            session_id: "s1".into(),
        })
        .unwrap();
        assert_eq!(json["phase"], "analyzing");
        assert_eq!(json["session_id"], "s1");
    }

    #[test]
    fn kind_parse_roundtrip() {
        for kind in [
            PhaseKind::Pending,
            PhaseKind::Analyzing,
            PhaseKind::Proposed,
            PhaseKind::Fixing,
            PhaseKind::Fixed,
            PhaseKind::Failed,
        ] {
            assert_eq!(PhaseKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(PhaseKind::parse("bogus"), None);
    }

    #[test]
    fn active_session_only_for_running_phases() {
        let fixing = WorkflowPhase::Fixing {
            analysis_session_id: "a1".into(),
            fix_session_id: "f1".into(),
            workspace: "/tmp/w".into(),
            branch: "mend/issue-1".into(),
        };
        assert_eq!(fixing.active_session_id(), Some("f1"));
        assert_eq!(WorkflowPhase::Pending.active_session_id(), None);
        let proposed = WorkflowPhase::Proposed {
            session_id: "a1".into(),
            proposal_ref: "proposal/1".into(),
        };
        assert_eq!(proposed.active_session_id(), None);
    }
}
