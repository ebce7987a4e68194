//! Shared node lifecycle flags, read by the status service and written by the
//! control loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use vigil_core::types::NodeState;

/// Cheap cloneable handle to the node's flag set.
///
/// Whole-state transitions are a single atomic store, so readers never see a
/// half-applied change.
#[derive(Debug, Clone, Default)]
pub struct NodeStatus {
    flags: Arc<AtomicU8>,
}

impl NodeStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole flag set with the canonical flags of `state`.
    pub fn transition(&self, state: NodeState) {
        let previous = NodeState::from_flags(self.flags.swap(state.flags(), Ordering::SeqCst));
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "node state");
        }
    }

    /// Current state, derived from the flags with fixed precedence.
    pub fn snapshot(&self) -> NodeState {
        NodeState::from_flags(self.flags.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::{FLAG_LISTENING, FLAG_RECORDING, FLAG_SPEAKING};

    #[test]
    fn starts_initializing() {
        assert_eq!(NodeStatus::new().snapshot(), NodeState::Initializing);
    }

    #[test]
    fn transition_replaces_all_flags() {
        let status = NodeStatus::new();
        status.flags.store(FLAG_LISTENING | FLAG_SPEAKING, Ordering::SeqCst);
        status.transition(NodeState::Recording);
        assert_eq!(status.flags.load(Ordering::SeqCst), FLAG_RECORDING);
        status.transition(NodeState::Listening);
        assert_eq!(status.snapshot(), NodeState::Listening);
    }

    #[test]
    fn snapshot_follows_precedence() {
        let status = NodeStatus::new();
        for (flags, state) in [
            (FLAG_LISTENING, NodeState::Listening),
            (FLAG_LISTENING | FLAG_RECORDING, NodeState::Recording),
            (FLAG_LISTENING | FLAG_SPEAKING, NodeState::Speaking),
            (FLAG_RECORDING | FLAG_SPEAKING, NodeState::Recording),
        ] {
            status.flags.store(flags, Ordering::SeqCst);
            assert_eq!(status.snapshot(), state);
        }
    }

    #[test]
    fn clones_share_flags() {
        let status = NodeStatus::new();
        let reader = status.clone();
        status.transition(NodeState::Speaking);
        assert_eq!(reader.snapshot(), NodeState::Speaking);
    }
}
