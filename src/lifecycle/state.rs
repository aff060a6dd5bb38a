//! Server lifecycle states.

use std::fmt;
use std::net::SocketAddr;

/// Where the server is in its lifecycle.
///
/// ```text
/// Starting ──bind ok──▶ Running ──shutdown──▶ Draining ──close returned──▶ Terminated
///    │                     │                                                  ▲
///    └──bind failed──▶ FailedToBind    └────────serve loop failed─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Starting,
    Running,
    Draining,
    Terminated,
    FailedToBind,
}

impl LifecycleState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Terminated | LifecycleState::FailedToBind)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, FailedToBind)
                | (Running, Draining)
                | (Running, Terminated)
                | (Draining, Terminated)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Terminated => "terminated",
            LifecycleState::FailedToBind => "failed_to_bind",
        };
        f.write_str(name)
    }
}

/// Published view of a manager: current state and, once bound, the listen address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    pub local_addr: Option<SocketAddr>,
}

impl Default for LifecycleStatus {
    fn default() -> Self {
        Self {
            state: LifecycleState::Starting,
            local_addr: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    const ALL: [LifecycleState; 5] = [Starting, Running, Draining, Terminated, FailedToBind];

    #[test]
    fn terminal_states_have_no_exits() {
        for from in ALL.iter().copied().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn legal_paths() {
        assert!(Starting.can_transition_to(Running));
        assert!(Starting.can_transition_to(FailedToBind));
        assert!(Running.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Terminated));
        assert!(Running.can_transition_to(Terminated));

        assert!(!Starting.can_transition_to(Draining));
        assert!(!Draining.can_transition_to(Running));
        assert!(!Running.can_transition_to(FailedToBind));
    }
}
