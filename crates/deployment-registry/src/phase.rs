//! Component lifecycle phases and the transition rules between them.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a deployed component.
///
/// Not every kind uses every phase; `Frozen` is reserved for consensus
/// nodes and is only reachable through the coordinated network freeze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentPhase {
    /// Component exists in the registry but nothing has been installed
    Requested,
    /// Underlying chart/resources are installed
    Deployed,
    /// Node-local setup has completed
    Configured,
    /// Process is running and readiness checks passed
    Started,
    /// Process was stopped as part of a restart cycle
    Stopped,
    /// Consensus frozen via the coordinated freeze operation
    Frozen,
    /// Terminal phase, set by the destroy pipeline
    Removed,
}

impl ComponentPhase {
    /// Whether `to` is reachable from `self` in the raw transition table.
    ///
    /// This includes the coordinated-only transitions (`Started -> Frozen`
    /// and `* -> Removed`); callers that expose per-component phase changes
    /// must additionally reject those (see `DeploymentState::change_phase`).
    pub fn can_transition(self, to: ComponentPhase) -> bool {
        use ComponentPhase::*;

        match (self, to) {
            // Removal is reachable from anywhere, but only via destroy
            (Removed, Removed) => false,
            (_, Removed) => true,

            (Requested, Deployed) => true,
            (Deployed, Configured) => true,
            (Configured, Started) => true,

            // Restart cycles
            (Started, Stopped) => true,
            (Stopped, Started) => true,

            // Coordinated freeze and thaw
            (Started, Frozen) => true,
            (Frozen, Started) => true,

            _ => false,
        }
    }

    /// Whether this phase may only be entered through a coordinated
    /// registry operation rather than a per-component phase change.
    pub fn is_coordinated(self) -> bool {
        matches!(self, ComponentPhase::Frozen | ComponentPhase::Removed)
    }

    /// Whether the phase is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, ComponentPhase::Removed)
    }
}

impl std::fmt::Display for ComponentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ComponentPhase::Requested => "requested",
            ComponentPhase::Deployed => "deployed",
            ComponentPhase::Configured => "configured",
            ComponentPhase::Started => "started",
            ComponentPhase::Stopped => "stopped",
            ComponentPhase::Frozen => "frozen",
            ComponentPhase::Removed => "removed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::ComponentPhase::*;

    #[test]
    fn test_forward_path() {
        assert!(Requested.can_transition(Deployed));
        assert!(Deployed.can_transition(Configured));
        assert!(Configured.can_transition(Started));
    }

    #[test]
    fn test_no_phase_skipping() {
        assert!(!Requested.can_transition(Started));
        assert!(!Requested.can_transition(Configured));
        assert!(!Deployed.can_transition(Started));
    }

    #[test]
    fn test_restart_cycles() {
        assert!(Started.can_transition(Stopped));
        assert!(Stopped.can_transition(Started));
        assert!(Started.can_transition(Frozen));
        assert!(Frozen.can_transition(Started));
        assert!(!Stopped.can_transition(Frozen));
    }

    #[test]
    fn test_removed_is_terminal() {
        assert!(Requested.can_transition(Removed));
        assert!(Started.can_transition(Removed));
        assert!(Frozen.can_transition(Removed));
        assert!(!Removed.can_transition(Removed));
        assert!(!Removed.can_transition(Started));
    }

    #[test]
    fn test_no_backward_transitions() {
        assert!(!Deployed.can_transition(Requested));
        assert!(!Started.can_transition(Configured));
        assert!(!Configured.can_transition(Deployed));
    }
}
