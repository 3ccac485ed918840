use agentmux_core::{ProjectId, SessionStatus};
use agentmux_runtime::Engine;

/// Routing policy for typed input across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    #[default]
    Solo,
    Broadcast,
    Chain,
}

impl DispatchMode {
    /// `Alt-M` cycle order.
    pub fn next(self) -> Self {
        match self {
            Self::Solo => Self::Broadcast,
            Self::Broadcast => Self::Chain,
            Self::Chain => Self::Solo,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Broadcast => "broadcast",
            Self::Chain => "chain",
        }
    }
}

/// Session ids typed input should reach. Solo targets the focused session;
/// broadcast and chain fan out to every running session (chain differs only
/// in how turns are advanced, not in raw keystroke routing).
pub fn route_targets(
    mode: DispatchMode,
    focused: Option<&ProjectId>,
    engine: &Engine,
) -> Vec<ProjectId> {
    match mode {
        DispatchMode::Solo => focused
            .filter(|id| engine.session_status(id) == SessionStatus::Running)
            .cloned()
            .into_iter()
            .collect(),
        DispatchMode::Broadcast | DispatchMode::Chain => engine
            .list_sessions()
            .into_iter()
            .filter(|session| session.status() == SessionStatus::Running)
            .map(|session| session.id().clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_cycles_solo_broadcast_chain() {
        let mut mode = DispatchMode::Solo;
        mode = mode.next();
        assert_eq!(mode, DispatchMode::Broadcast);
        mode = mode.next();
        assert_eq!(mode, DispatchMode::Chain);
        mode = mode.next();
        assert_eq!(mode, DispatchMode::Solo);
    }

    #[test]
    fn solo_routes_nowhere_without_a_running_focus() {
        let state = tempfile::tempdir().expect("state dir");
        let engine = Engine::new(state.path());
        let focused = ProjectId::new("nope");

        assert!(route_targets(DispatchMode::Solo, Some(&focused), &engine).is_empty());
        assert!(route_targets(DispatchMode::Broadcast, None, &engine).is_empty());
    }
}
