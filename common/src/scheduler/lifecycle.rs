// Node lifecycle state machine: Init -> Running <-> Paused -> Stopped

use crate::errors::LifecycleError;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    Init = 0,
    Running = 1,
    Paused = 2,
    Stopped = 3,
}

impl NodeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => NodeState::Init,
            1 => NodeState::Running,
            2 => NodeState::Paused,
            _ => NodeState::Stopped,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Init => write!(f, "init"),
            NodeState::Running => write!(f, "running"),
            NodeState::Paused => write!(f, "paused"),
            NodeState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Atomic holder of a node's state; every transition is a compare-and-swap
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(NodeState::Init as u8),
        }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn start(&self) -> Result<(), LifecycleError> {
        self.transition("start", &[NodeState::Init], NodeState::Running)
    }

    pub fn pause(&self) -> Result<(), LifecycleError> {
        self.transition("pause", &[NodeState::Running], NodeState::Paused)
    }

    pub fn resume(&self) -> Result<(), LifecycleError> {
        self.transition("resume", &[NodeState::Paused], NodeState::Running)
    }

    /// Returns the state the node was stopped from
    pub fn stop(&self) -> Result<NodeState, LifecycleError> {
        self.transition_from(
            "stop",
            &[NodeState::Running, NodeState::Paused],
            NodeState::Stopped,
        )
    }

    fn transition(
        &self,
        action: &'static str,
        from: &[NodeState],
        to: NodeState,
    ) -> Result<(), LifecycleError> {
        self.transition_from(action, from, to).map(|_| ())
    }

    fn transition_from(
        &self,
        action: &'static str,
        from: &[NodeState],
        to: NodeState,
    ) -> Result<NodeState, LifecycleError> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let state = NodeState::from_u8(current);
            if !from.contains(&state) {
                return Err(LifecycleError::InvalidTransition {
                    action,
                    state: state.to_string(),
                });
            }
            match self.state.compare_exchange(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(state),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_full_lifecycle() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), NodeState::Init);

        lifecycle.start().unwrap();
        lifecycle.pause().unwrap();
        lifecycle.resume().unwrap();
        assert_eq!(lifecycle.stop().unwrap(), NodeState::Running);
        assert_eq!(lifecycle.state(), NodeState::Stopped);
    }

    #[test]
    fn test_stop_from_paused() {
        let lifecycle = Lifecycle::new();
        lifecycle.start().unwrap();
        lifecycle.pause().unwrap();
        assert_eq!(lifecycle.stop().unwrap(), NodeState::Paused);
    }

    #[test]
    fn test_invalid_transitions_leave_state_unchanged() {
        let lifecycle = Lifecycle::new();

        let err = lifecycle.resume().unwrap_err();
        assert_eq!(err.to_string(), "Cannot resume scheduler node in state init");
        assert!(lifecycle.pause().is_err());
        assert!(lifecycle.stop().is_err());
        assert_eq!(lifecycle.state(), NodeState::Init);

        lifecycle.start().unwrap();
        assert!(lifecycle.start().is_err());
        assert!(lifecycle.resume().is_err());
        assert_eq!(lifecycle.state(), NodeState::Running);

        lifecycle.stop().unwrap();
        assert!(lifecycle.start().is_err());
        assert!(lifecycle.stop().is_err());
        assert_eq!(lifecycle.state(), NodeState::Stopped);
    }

    #[test]
    fn test_concurrent_start_succeeds_once() {
        let lifecycle = Arc::new(Lifecycle::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                std::thread::spawn(move || lifecycle.start().is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }
}
