use serde::{Deserialize, Serialize};

use crate::error::GuardError;
use crate::model::story::WorkItemId;

/// Push lifecycle of the current batch of test cases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PushState {
    #[default]
    NotSubmitted,
    Submitting { parent_id: WorkItemId },
    Submitted { parent_id: WorkItemId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushDecision {
    Allowed,
    /// This exact batch already went to this parent.
    NeedsConfirmation,
    InFlight,
}

/// Tracker creates are not idempotent, so an unchanged batch needs explicit
/// confirmation before it goes to the same parent twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionGuard {
    state: PushState,
}

impl SubmissionGuard {
    pub fn state(&self) -> &PushState {
        &self.state
    }

    pub fn check(&self, parent_id: WorkItemId) -> PushDecision {
        match &self.state {
            PushState::NotSubmitted => PushDecision::Allowed,
            PushState::Submitting { .. } => PushDecision::InFlight,
            PushState::Submitted { parent_id: last } if *last == parent_id => {
                PushDecision::NeedsConfirmation
            }
            PushState::Submitted { .. } => PushDecision::Allowed,
        }
    }

    pub fn begin(&mut self, parent_id: WorkItemId, confirmed: bool) -> Result<(), GuardError> {
        match self.check(parent_id) {
            PushDecision::InFlight => return Err(GuardError::InFlight),
            PushDecision::NeedsConfirmation if !confirmed => {
                return Err(GuardError::ConfirmationRequired { parent_id })
            }
            PushDecision::Allowed | PushDecision::NeedsConfirmation => {}
        }
        self.state = PushState::Submitting { parent_id };
        Ok(())
    }

    /// End of a batch. Only a batch that created something counts as submitted.
    pub fn finish(&mut self, success_count: usize) {
        if let PushState::Submitting { parent_id } = self.state {
            self.state = if success_count > 0 {
                PushState::Submitted { parent_id }
            } else {
                PushState::NotSubmitted
            };
        }
    }

    pub fn mark_edited(&mut self) {
        if matches!(self.state, PushState::Submitted { .. }) {
            self.state = PushState::NotSubmitted;
        }
    }

    /// Forget a push whose process went away mid-batch.
    pub fn abandon(&mut self) {
        if matches!(self.state, PushState::Submitting { .. }) {
            self.state = PushState::NotSubmitted;
        }
    }

    pub fn reset(&mut self) {
        self.state = PushState::NotSubmitted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARENT: WorkItemId = WorkItemId(100);

    fn submitted() -> SubmissionGuard {
        let mut guard = SubmissionGuard::default();
        guard.begin(PARENT, false).unwrap();
        guard.finish(2);
        guard
    }

    #[test]
    fn fresh_batch_can_be_pushed() {
        let guard = SubmissionGuard::default();
        assert_eq!(guard.check(PARENT), PushDecision::Allowed);
    }

    #[test]
    fn successful_push_moves_to_submitted() {
        assert_eq!(
            submitted().state(),
            &PushState::Submitted { parent_id: PARENT }
        );
    }

    #[test]
    fn no_success_returns_to_not_submitted() {
        let mut guard = SubmissionGuard::default();
        guard.begin(PARENT, false).unwrap();
        guard.finish(0);
        assert_eq!(guard.state(), &PushState::NotSubmitted);
        assert_eq!(guard.check(PARENT), PushDecision::Allowed);
    }

    #[test]
    fn repeat_push_requires_confirmation() {
        let mut guard = submitted();
        assert_eq!(guard.check(PARENT), PushDecision::NeedsConfirmation);
        assert_eq!(
            guard.begin(PARENT, false),
            Err(GuardError::ConfirmationRequired { parent_id: PARENT })
        );
        assert_eq!(guard.state(), &PushState::Submitted { parent_id: PARENT });
    }

    #[test]
    fn confirmed_repeat_push_proceeds() {
        let mut guard = submitted();
        guard.begin(PARENT, true).unwrap();
        assert_eq!(guard.state(), &PushState::Submitting { parent_id: PARENT });
    }

    #[test]
    fn edit_after_push_clears_confirmation() {
        let mut guard = submitted();
        guard.mark_edited();
        assert_eq!(guard.check(PARENT), PushDecision::Allowed);
        assert!(guard.begin(PARENT, false).is_ok());
    }

    #[test]
    fn different_parent_needs_no_confirmation() {
        let guard = submitted();
        assert_eq!(guard.check(WorkItemId(200)), PushDecision::Allowed);
    }

    #[test]
    fn push_in_flight_blocks_another() {
        let mut guard = SubmissionGuard::default();
        guard.begin(PARENT, false).unwrap();
        assert_eq!(guard.check(PARENT), PushDecision::InFlight);
        assert_eq!(guard.begin(PARENT, true), Err(GuardError::InFlight));
        assert_eq!(guard.begin(WorkItemId(5), true), Err(GuardError::InFlight));
    }

    #[test]
    fn edit_during_push_does_not_unblock() {
        let mut guard = SubmissionGuard::default();
        guard.begin(PARENT, false).unwrap();
        guard.mark_edited();
        assert_eq!(guard.check(PARENT), PushDecision::InFlight);
    }

    #[test]
    fn abandon_releases_stale_push() {
        let mut guard = SubmissionGuard::default();
        guard.begin(PARENT, false).unwrap();
        guard.abandon();
        assert_eq!(guard.state(), &PushState::NotSubmitted);
    }

    #[test]
    fn finish_outside_push_is_ignored() {
        let mut guard = submitted();
        guard.finish(0);
        assert_eq!(guard.state(), &PushState::Submitted { parent_id: PARENT });
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_string(&submitted()).unwrap();
        assert_eq!(json, r#"{"state":{"state":"submitted","parent_id":100}}"#);
    }
}
