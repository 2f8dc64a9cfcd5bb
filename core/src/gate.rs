//! Per-turn confirmation state machine.
//!
//! ```text
//! AwaitingQuery -> Resolving -> AwaitingConfirmation -> Completed | Refused
//!                            -> Completed | Refused
//! ```
//!
//! A confirmed payload can still be refused when its date no longer qualifies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    AwaitingQuery,
    Resolving,
    AwaitingConfirmation,
    Completed,
    Refused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    Begin,
    Complete,
    Refuse,
    RequireConfirmation,
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action:?} while {from:?}")]
pub struct GateError {
    pub from: GateState,
    pub action: GateAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationGate {
    state: GateState,
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self {
            state: GateState::AwaitingQuery,
        }
    }

    /// Gate for a confirm/cancel request that arrives with a pending payload.
    pub fn resume() -> Self {
        Self {
            state: GateState::AwaitingConfirmation,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn begin(&mut self) -> Result<(), GateError> {
        self.transition(GateAction::Begin, &[GateState::AwaitingQuery], GateState::Resolving)
    }

    /// Direct completion (found or created without confirmation).
    pub fn complete(&mut self) -> Result<(), GateError> {
        self.transition(GateAction::Complete, &[GateState::Resolving], GateState::Completed)
    }

    pub fn refuse(&mut self) -> Result<(), GateError> {
        self.transition(
            GateAction::Refuse,
            &[GateState::Resolving, GateState::AwaitingConfirmation],
            GateState::Refused,
        )
    }

    pub fn require_confirmation(&mut self) -> Result<(), GateError> {
        self.transition(
            GateAction::RequireConfirmation,
            &[GateState::Resolving],
            GateState::AwaitingConfirmation,
        )
    }

    pub fn confirm(&mut self) -> Result<(), GateError> {
        self.transition(
            GateAction::Confirm,
            &[GateState::AwaitingConfirmation],
            GateState::Completed,
        )
    }

    pub fn cancel(&mut self) -> Result<(), GateError> {
        self.transition(
            GateAction::Cancel,
            &[GateState::AwaitingConfirmation],
            GateState::Refused,
        )
    }

    fn transition(
        &mut self,
        action: GateAction,
        allowed: &[GateState],
        to: GateState,
    ) -> Result<(), GateError> {
        if !allowed.contains(&self.state) {
            return Err(GateError {
                from: self.state,
                action,
            });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_path_completes() {
        let mut gate = ConfirmationGate::new();
        gate.begin().expect("begin");
        gate.require_confirmation().expect("await");
        assert_eq!(gate.state(), GateState::AwaitingConfirmation);
        gate.confirm().expect("confirm");
        assert_eq!(gate.state(), GateState::Completed);
        assert!(gate.refuse().is_err());
    }

    #[test]
    fn cancel_refuses_without_completion() {
        let mut gate = ConfirmationGate::resume();
        gate.cancel().expect("cancel");
        assert_eq!(gate.state(), GateState::Refused);
        assert!(gate.confirm().is_err());
    }

    #[test]
    fn pending_confirmation_can_be_refused() {
        let mut gate = ConfirmationGate::resume();
        gate.refuse().expect("refuse");
        assert_eq!(gate.state(), GateState::Refused);
        assert!(gate.cancel().is_err());
    }

    #[test]
    fn confirm_is_rejected_outside_awaiting_confirmation() {
        let mut gate = ConfirmationGate::new();
        let err = gate.confirm().expect_err("cannot confirm before resolving");
        assert_eq!(err.from, GateState::AwaitingQuery);
        assert_eq!(err.action, GateAction::Confirm);

        gate.begin().expect("begin");
        assert!(gate.cancel().is_err());
        gate.complete().expect("complete");
        assert!(gate.begin().is_err());
    }
}
