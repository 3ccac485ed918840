use serde::{Deserialize, Serialize};

/// Lifecycle state of a PTY session. `Stopped` and `Error` are terminal;
/// a session object in a terminal state is replaced, never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Running,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_stopped_and_error() {
        assert!(!SessionStatus::Idle.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Stopped.is_terminal());
        assert!(SessionStatus::Error.is_terminal());
    }

    #[test]
    fn status_serialization_is_stable_for_persistence() {
        let serialized = serde_json::to_string(&SessionStatus::Running).expect("serialize status");
        assert_eq!(serialized, "\"running\"");
        let parsed: SessionStatus = serde_json::from_str("\"stopped\"").expect("parse status");
        assert_eq!(parsed, SessionStatus::Stopped);
    }
}
