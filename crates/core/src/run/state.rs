use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lifecycle state of an agent run.
///
/// `Pending` is the only initial state; `Stopped` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Pending,
    Running,
    Paused,
    Stopped,
    Error,
}

impl RunState {
    /// Check if the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Check if the run may still dispatch tools
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Stopped)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Stopped)
                | (Paused, Stopped)
                | (Running, Error)
                | (Paused, Error)
        )
    }

    /// Validate a transition, returning the new state
    pub fn transition(self, next: RunState) -> Result<RunState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_pending() {
        assert_eq!(RunState::default(), RunState::Pending);
    }

    #[test]
    fn test_lifecycle() {
        let state = RunState::Pending.transition(RunState::Running).unwrap();
        let state = state.transition(RunState::Paused).unwrap();
        let state = state.transition(RunState::Running).unwrap();
        let state = state.transition(RunState::Stopped).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [RunState::Stopped, RunState::Error] {
            for next in [
                RunState::Pending,
                RunState::Running,
                RunState::Paused,
                RunState::Stopped,
                RunState::Error,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_error_only_from_active() {
        assert!(RunState::Running.can_transition_to(RunState::Error));
        assert!(RunState::Paused.can_transition_to(RunState::Error));
        assert!(!RunState::Pending.can_transition_to(RunState::Error));
        assert!(matches!(
            RunState::Pending.transition(RunState::Paused),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&RunState::Stopped).unwrap(),
            "\"stopped\""
        );
        assert_eq!(RunState::Paused.to_string(), "paused");
    }
}
