//! State machine contract shared by every tracked entity
//!
//! Each entity kind supplies a small enum implementing [`EntityState`]: its
//! initial state, its terminal states and its table of legal transitions.
//! [`StateMachine`] applies transitions atomically and suppresses
//! re-announcement of the current state.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{LifecycleError, Result};

/// A finite set of entity states with a transition table
pub trait EntityState: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// State every new entity starts in
    fn initial() -> Self;

    /// No transition out of a terminal state is legal
    fn is_terminal(&self) -> bool;

    /// Whether `self -> next` appears in the transition table
    fn can_transition_to(&self, next: &Self) -> bool;
}

/// What to do with a transition the state table does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Apply it anyway and log a diagnostic
    #[default]
    Lenient,
    /// Reject it with [`LifecycleError::IllegalTransition`]
    Strict,
}

impl std::str::FromStr for TransitionPolicy {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(LifecycleError::config(format!(
                "Unknown transition policy: {}",
                other
            ))),
        }
    }
}

/// A transition that was actually applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange<S> {
    /// State before the transition
    pub old_state: S,
    /// State after the transition
    pub new_state: S,
    /// Protocol-supplied reason, if any
    pub reason: Option<String>,
    /// Whether the state table allowed this transition
    pub legal: bool,
    /// When the transition was applied
    pub timestamp: DateTime<Utc>,
}

impl<S: EntityState> StateChange<S> {
    /// True when the entity entered a terminal state
    pub fn is_terminal(&self) -> bool {
        self.new_state.is_terminal()
    }
}

/// Holds the current state of one entity and applies transitions to it
#[derive(Debug)]
pub struct StateMachine<S> {
    entity: String,
    state: Mutex<S>,
    policy: TransitionPolicy,
}

impl<S: EntityState> StateMachine<S> {
    /// Create a machine in `S::initial()`
    pub fn new(entity: impl Into<String>, policy: TransitionPolicy) -> Self {
        Self::with_state(entity, S::initial(), policy)
    }

    /// Create a machine in an explicit starting state
    pub fn with_state(entity: impl Into<String>, state: S, policy: TransitionPolicy) -> Self {
        Self {
            entity: entity.into(),
            state: Mutex::new(state),
            policy,
        }
    }

    /// Label used in diagnostics
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Current state
    pub fn current(&self) -> S {
        *self.state.lock()
    }

    /// Policy applied to illegal transitions
    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Move to `next`
    ///
    /// Returns `Ok(None)` when `next` is already the current state, so
    /// repeated signals never produce a second notification. Returns the
    /// applied change otherwise; the caller is responsible for publishing it.
    pub fn transition(&self, next: S, reason: Option<String>) -> Result<Option<StateChange<S>>> {
        let mut state = self.state.lock();
        let current = *state;

        if current == next {
            debug!(entity = %self.entity, state = %current, "Ignoring re-announcement of current state");
            return Ok(None);
        }

        let legal = current.can_transition_to(&next);
        if !legal {
            match self.policy {
                TransitionPolicy::Strict => {
                    warn!(entity = %self.entity, from = %current, to = %next, "Rejected illegal transition");
                    return Err(LifecycleError::illegal_transition(&self.entity, current, next));
                }
                TransitionPolicy::Lenient => {
                    warn!(entity = %self.entity, from = %current, to = %next, "Applying illegal transition");
                }
            }
        }

        *state = next;
        debug!(entity = %self.entity, "State: {} -> {}", current, next);

        Ok(Some(StateChange {
            old_state: current,
            new_state: next,
            reason,
            legal,
            timestamp: Utc::now(),
        }))
    }
}
