//! Role and Leadership Gate
//!
//! Process-wide exposure of the elected role. Writes funnel through the
//! election state machine; the startup sequencer and the HTTP handlers
//! only read.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Role of this process in the election
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Waiting behind a smaller candidate node
    Follower,
    /// Owns the smallest candidate node
    Leader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "FOLLOWER"),
            Role::Leader => write!(f, "LEADER"),
        }
    }
}

/// Single atomic flag gating the service endpoint. Readers tolerate
/// staleness of at most one evaluation cycle, so no further locking is
/// needed.
#[derive(Debug, Default)]
pub struct LeadershipGate {
    leader: AtomicBool,
}

impl LeadershipGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current role; defaults to Follower until the first election result
    pub fn role(&self) -> Role {
        if self.is_leader() {
            Role::Leader
        } else {
            Role::Follower
        }
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    /// Flip the gate; only the election machinery may call this
    pub(crate) fn transition(&self, role: Role) {
        self.leader.store(role == Role::Leader, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_defaults_to_follower() {
        let gate = LeadershipGate::new();
        assert!(!gate.is_leader());
        assert_eq!(gate.role(), Role::Follower);
    }

    #[test]
    fn test_gate_transitions() {
        let gate = LeadershipGate::new();
        gate.transition(Role::Leader);
        assert!(gate.is_leader());
        gate.transition(Role::Follower);
        assert_eq!(gate.role(), Role::Follower);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Leader.to_string(), "LEADER");
        assert_eq!(Role::Follower.to_string(), "FOLLOWER");
    }
}
