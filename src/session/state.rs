use serde::{Deserialize, Serialize};
use std::fmt;

/// Orchestrator lifecycle
///
/// ```text
///   Idle -> Starting -> Active -> Stopping -> Saved
///              |           \________/
///              v
///            Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Active,
    Stopping,
    Saved,
    Failed,
}

impl SessionState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Saved => "saved",
            Self::Failed => "failed",
        }
    }

    /// A session is underway (start in flight, live, or saving)
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Starting | Self::Active | Self::Stopping)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Saved | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_and_terminal_are_disjoint() {
        for state in [
            SessionState::Idle,
            SessionState::Starting,
            SessionState::Active,
            SessionState::Stopping,
            SessionState::Saved,
            SessionState::Failed,
        ] {
            assert!(!(state.is_busy() && state.is_terminal()), "{state}");
        }
        assert!(!SessionState::Idle.is_busy());
    }
}
