//! Generic state machine
//!
//! Both the pipeline and the review resolution loop are driven through a
//! [`StateMachine`]: every move is checked against an explicit transition
//! table, logged, and kept in a trace so the path a run took can be stored
//! alongside its result.

use std::fmt::Debug;

use crate::{Error, Result};

/// Interface shared by the workflow state machines
pub trait Workflow {
    /// The state type for this workflow
    type State: Clone + PartialEq + Debug;

    /// Get the current state
    fn current(&self) -> &Self::State;

    /// Check if a transition to the given state is valid
    fn can_transition_to(&self, state: &Self::State) -> bool;

    /// Attempt to transition to a new state
    ///
    /// Returns an error if the transition is not valid.
    fn transition_to(&mut self, state: Self::State) -> Result<()>;

    /// Whether the current state is terminal
    fn is_finished(&self) -> bool;
}

/// Table-driven state machine
#[derive(Debug, Clone)]
pub struct StateMachine<S: Clone + PartialEq + Debug> {
    name: &'static str,
    current: S,
    valid_transitions: Vec<(S, S)>,
    terminal: Vec<S>,
    trace: Vec<S>,
}

impl<S: Clone + PartialEq + Debug> StateMachine<S> {
    /// Create a machine in `initial` state; `name` labels its log lines
    pub fn new(name: &'static str, initial: S) -> Self {
        Self {
            name,
            trace: vec![initial.clone()],
            current: initial,
            valid_transitions: Vec::new(),
            terminal: Vec::new(),
        }
    }

    /// Add a valid transition from one state to another
    pub fn add_transition(mut self, from: S, to: S) -> Self {
        self.valid_transitions.push((from, to));
        self
    }

    /// Add multiple valid transitions
    pub fn add_transitions(mut self, transitions: impl IntoIterator<Item = (S, S)>) -> Self {
        self.valid_transitions.extend(transitions);
        self
    }

    /// Mark states with no way out
    pub fn terminal_states(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.terminal.extend(states);
        self
    }

    /// Every state visited, starting with the initial one
    pub fn trace(&self) -> &[S] {
        &self.trace
    }

    fn is_valid_transition(&self, from: &S, to: &S) -> bool {
        self.valid_transitions
            .iter()
            .any(|(f, t)| f == from && t == to)
    }
}

impl<S: Clone + PartialEq + Debug> Workflow for StateMachine<S> {
    type State = S;

    fn current(&self) -> &S {
        &self.current
    }

    fn can_transition_to(&self, state: &S) -> bool {
        !self.is_finished() && self.is_valid_transition(&self.current, state)
    }

    fn transition_to(&mut self, state: S) -> Result<()> {
        if !self.can_transition_to(&state) {
            return Err(Error::Other(format!(
                "{}: invalid transition from {:?} to {:?}",
                self.name, self.current, state
            )));
        }

        tracing::info!(
            machine = self.name,
            from = ?self.current,
            to = ?state,
            "State transition"
        );

        self.trace.push(state.clone());
        self.current = state;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.terminal.contains(&self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestState {
        Start,
        Middle,
        End,
    }

    fn machine() -> StateMachine<TestState> {
        StateMachine::new("test", TestState::Start)
            .add_transition(TestState::Start, TestState::Middle)
            .add_transition(TestState::Middle, TestState::End)
            .add_transition(TestState::End, TestState::Start)
            .terminal_states([TestState::End])
    }

    #[test]
    fn test_valid_transition() {
        let mut sm = machine();
        assert_eq!(sm.current(), &TestState::Start);
        assert!(sm.can_transition_to(&TestState::Middle));
        assert!(!sm.can_transition_to(&TestState::End));

        sm.transition_to(TestState::Middle).unwrap();
        assert_eq!(sm.current(), &TestState::Middle);
        assert!(!sm.is_finished());
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut sm = machine();
        assert!(sm.transition_to(TestState::End).is_err());
        assert_eq!(sm.current(), &TestState::Start);
        assert_eq!(sm.trace(), &[TestState::Start]);
    }

    #[test]
    fn test_terminal_state_blocks_further_moves() {
        let mut sm = machine();
        sm.transition_to(TestState::Middle).unwrap();
        sm.transition_to(TestState::End).unwrap();
        assert!(sm.is_finished());

        // End -> Start is in the table but End is terminal
        assert!(!sm.can_transition_to(&TestState::Start));
        assert_eq!(
            sm.trace(),
            &[TestState::Start, TestState::Middle, TestState::End]
        );
    }

    #[test]
    fn test_add_transitions_bulk() {
        let sm = StateMachine::new("bulk", TestState::Start).add_transitions(vec![
            (TestState::Start, TestState::Middle),
            (TestState::Middle, TestState::End),
        ]);
        assert!(sm.can_transition_to(&TestState::Middle));
    }
}
