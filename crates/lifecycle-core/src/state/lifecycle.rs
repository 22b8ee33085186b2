//! Per-entity lifecycle component
//!
//! `Lifecycle` bundles what every tracked entity needs: a state machine, a
//! broadcaster for its state changes, per-entity serialization of
//! notifications and a completion signal fired on the first terminal state.
//! Entities hold one by value instead of inheriting listener plumbing.

use std::cell::RefCell;
use std::collections::VecDeque;

use parking_lot::ReentrantMutex;

use crate::completion::Completion;
use crate::errors::Result;
use crate::events::{BroadcastOutcome, EventBroadcaster, ListenerRef};
use crate::state::machine::{EntityState, StateChange, StateMachine, TransitionPolicy};

/// Fan-out bookkeeping, only touched while holding the delivery lock
#[derive(Debug)]
struct Delivery<S> {
    /// A fan-out is running on the lock-holding thread
    active: bool,
    /// Changes applied by listeners during that fan-out, oldest first
    queued: VecDeque<StateChange<S>>,
}

/// State machine plus notification plumbing for one entity
#[derive(Debug)]
pub struct Lifecycle<S> {
    machine: StateMachine<S>,
    listeners: EventBroadcaster<StateChange<S>>,
    // Serializes transition+broadcast per entity. Re-entrant so a listener
    // can drive the same entity again from the delivering thread; such
    // changes are queued and published once the running fan-out ends.
    delivery: ReentrantMutex<RefCell<Delivery<S>>>,
    terminated: Completion,
}

impl<S: EntityState> Lifecycle<S> {
    /// Create a lifecycle in `S::initial()`
    pub fn new(entity: impl Into<String>, policy: TransitionPolicy) -> Self {
        Self::with_state(entity, S::initial(), policy)
    }

    /// Create a lifecycle starting in `state`
    pub fn with_state(entity: impl Into<String>, state: S, policy: TransitionPolicy) -> Self {
        let terminated = Completion::new();
        if state.is_terminal() {
            terminated.complete();
        }
        Self {
            machine: StateMachine::with_state(entity, state, policy),
            listeners: EventBroadcaster::new("lifecycle"),
            delivery: ReentrantMutex::new(RefCell::new(Delivery {
                active: false,
                queued: VecDeque::new(),
            })),
            terminated,
        }
    }

    /// Current state
    pub fn state(&self) -> S {
        self.machine.current()
    }

    /// Whether the entity has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Label used in diagnostics
    pub fn entity(&self) -> &str {
        self.machine.entity()
    }

    /// Policy applied to illegal transitions
    pub fn policy(&self) -> TransitionPolicy {
        self.machine.policy()
    }

    /// Move to `next` and notify listeners
    ///
    /// Returns `Ok(false)` without notifying anyone when `next` equals the
    /// current state.
    pub fn transition(&self, next: S) -> Result<bool> {
        self.transition_with_reason(next, None)
    }

    /// Move to `next`, attaching a reason to the published change
    pub fn transition_with_reason(&self, next: S, reason: Option<String>) -> Result<bool> {
        Ok(self.apply(next, reason)?.is_some())
    }

    /// Move to `next` and return the published change together with the
    /// fan-out result
    ///
    /// When called by a listener of this entity while its fan-out is
    /// running, the change is applied at once but published only after
    /// every listener has seen the current change. The returned outcome is
    /// then empty.
    pub fn apply(
        &self,
        next: S,
        reason: Option<String>,
    ) -> Result<Option<(StateChange<S>, BroadcastOutcome)>> {
        let serial = self.delivery.lock();

        let Some(change) = self.machine.transition(next, reason)? else {
            return Ok(None);
        };

        let nested = serial.borrow().active;
        if nested {
            serial.borrow_mut().queued.push_back(change.clone());
            return Ok(Some((change, BroadcastOutcome::default())));
        }

        serial.borrow_mut().active = true;
        let outcome = self.publish(&change);
        loop {
            let queued = serial.borrow_mut().queued.pop_front();
            let Some(queued) = queued else {
                break;
            };
            self.publish(&queued);
        }
        serial.borrow_mut().active = false;

        Ok(Some((change, outcome)))
    }

    fn publish(&self, change: &StateChange<S>) -> BroadcastOutcome {
        let outcome = self.listeners.broadcast(change);
        if change.is_terminal() {
            self.terminated.complete();
        }
        outcome
    }

    /// Run `f` with the current state while no transition can be published
    ///
    /// Used by owners that must observe the state and register themselves
    /// without a transition slipping in between.
    pub fn exclusive<R>(&self, f: impl FnOnce(S) -> R) -> R {
        let _serial = self.delivery.lock();
        f(self.state())
    }

    /// Register a state change listener
    pub fn subscribe(&self, listener: ListenerRef<StateChange<S>>) -> bool {
        self.listeners.subscribe(listener)
    }

    /// Remove a state change listener
    pub fn unsubscribe(&self, listener: &ListenerRef<StateChange<S>>) -> bool {
        self.listeners.unsubscribe(listener)
    }

    /// Broadcaster carrying this entity's state changes
    pub fn listeners(&self) -> &EventBroadcaster<StateChange<S>> {
        &self.listeners
    }

    /// Signal completed when the entity first reaches a terminal state
    pub fn termination(&self) -> &Completion {
        &self.terminated
    }
}
