//! Query job state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a query job as seen by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Job accepted by the engine
    Submitted,

    /// Waiting for the job to finish
    Polling,

    /// Cancellation acknowledged, outcome not known yet
    CancelSent,

    /// Final result fetched or classified
    Resolved,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::CancelSent => "cancel_sent",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State machine for managing a job lifecycle
pub struct JobStateMachine {
    current_state: JobState,
    state_history: Vec<(JobState, DateTime<Utc>)>,
}

impl JobStateMachine {
    /// Create a new state machine for a freshly submitted job
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            current_state: JobState::Submitted,
            state_history: vec![(JobState::Submitted, now)],
        }
    }

    /// Get the current state
    pub fn current_state(&self) -> JobState {
        self.current_state
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: JobState) -> Result<(), String> {
        if !self.is_valid_transition(new_state) {
            return Err(format!(
                "Invalid transition from {:?} to {:?}",
                self.current_state, new_state
            ));
        }

        self.current_state = new_state;
        self.state_history.push((new_state, Utc::now()));

        Ok(())
    }

    fn is_valid_transition(&self, new_state: JobState) -> bool {
        use JobState::*;

        matches!(
            (self.current_state, new_state),
            (Submitted, Polling) | (Polling, CancelSent | Resolved) | (CancelSent, Resolved)
        )
    }

    /// Whether cancellation was acknowledged at some point
    pub fn cancel_sent(&self) -> bool {
        self.state_history
            .iter()
            .any(|(state, _)| *state == JobState::CancelSent)
    }

    /// Get the state history
    pub fn history(&self) -> &[(JobState, DateTime<Utc>)] {
        &self.state_history
    }
}

impl Default for JobStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
