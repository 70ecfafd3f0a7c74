//! Per-turn state machine.

use agent_primitives::OwnerId;
use thiserror::Error;
use tracing::debug;

/// Phases a turn moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// Waiting for the plan.
    Planning,
    /// Executing the step with this ordinal.
    ExecutingStep(usize),
    /// Answer composed; no further steps run.
    Terminated,
}

impl TurnPhase {
    /// Returns `true` once the turn has terminated.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Events driving [`TurnPhase`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    /// The plan is available; execution starts at the given step.
    PlanReady(usize),
    /// Move on to the given step.
    Advance(usize),
    /// A terminal step ran or the plan is exhausted.
    Finish,
}

/// Tracks the phase of one turn.
#[derive(Debug, Clone, Copy)]
pub struct Turn {
    owner: OwnerId,
    phase: TurnPhase,
}

impl Turn {
    /// Starts a turn in [`TurnPhase::Planning`].
    #[must_use]
    pub const fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            phase: TurnPhase::Planning,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Applies `event`.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::InvalidTransition`] when the event is not allowed
    /// from the current phase, including moving backwards between steps.
    pub fn transition(&mut self, event: TurnEvent) -> Result<TurnPhase, PhaseError> {
        let next = match (self.phase, event) {
            (TurnPhase::Planning, TurnEvent::PlanReady(step)) => Some(TurnPhase::ExecutingStep(step)),
            (TurnPhase::ExecutingStep(current), TurnEvent::Advance(step)) if step > current => {
                Some(TurnPhase::ExecutingStep(step))
            }
            (_, TurnEvent::Finish) => Some(TurnPhase::Terminated),
            _ => None,
        };

        let Some(next) = next else {
            return Err(PhaseError::InvalidTransition {
                owner: self.owner,
                from: self.phase,
                event,
            });
        };

        if next != self.phase {
            debug!(owner = %self.owner, from = ?self.phase, to = ?next, "turn transition");
            self.phase = next;
        }
        Ok(self.phase)
    }
}

/// Errors emitted by [`Turn::transition`].
#[derive(Debug, Error)]
pub enum PhaseError {
    /// Transition not permitted from the current phase.
    #[error("invalid turn transition from {from:?} via {event:?} for owner {owner}")]
    InvalidTransition {
        /// Owner of the turn.
        owner: OwnerId,
        /// Phase before the attempted transition.
        from: TurnPhase,
        /// Rejected event.
        event: TurnEvent,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_to_termination() {
        let mut turn = Turn::new(OwnerId::new(7));
        assert_eq!(turn.phase(), TurnPhase::Planning);
        turn.transition(TurnEvent::PlanReady(1)).unwrap();
        turn.transition(TurnEvent::Advance(2)).unwrap();
        assert_eq!(turn.phase(), TurnPhase::ExecutingStep(2));
        turn.transition(TurnEvent::Finish).unwrap();
        assert!(turn.phase().is_terminal());
        turn.transition(TurnEvent::Finish).unwrap();
        assert!(turn.phase().is_terminal());
    }

    #[test]
    fn steps_only_move_forward() {
        let mut turn = Turn::new(OwnerId::new(7));
        assert!(turn.transition(TurnEvent::Advance(1)).is_err());
        turn.transition(TurnEvent::PlanReady(2)).unwrap();
        let err = turn.transition(TurnEvent::Advance(2)).unwrap_err();
        assert!(matches!(err, PhaseError::InvalidTransition { from: TurnPhase::ExecutingStep(2), .. }));
    }

    #[test]
    fn terminated_turn_rejects_further_steps() {
        let mut turn = Turn::new(OwnerId::new(1));
        turn.transition(TurnEvent::Finish).unwrap();
        assert!(turn.transition(TurnEvent::PlanReady(1)).is_err());
    }
}
