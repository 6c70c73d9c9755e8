//! Per-plugin activation records

use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use std::fmt;

use lab_core::Error;

use crate::plugin::Service;

/// Outcome shared by every caller waiting on one activation
pub(crate) type ActivationOutcome = lab_core::Result<Option<Service>>;

/// In-flight activation that later requests attach to
pub(crate) type SharedActivation = Shared<BoxFuture<'static, ActivationOutcome>>;

/// Activation state of a plugin
///
/// `Registered -> Resolving -> Activating -> Activated`, with `Failed`
/// reachable from `Resolving` or `Activating`. `Deactivating` is transient
/// between `Activated` and `Registered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    Registered,
    Resolving,
    Activating,
    Activated,
    Failed,
    Deactivating,
}

impl ActivationState {
    /// True while an activation is running
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ActivationState::Resolving | ActivationState::Activating)
    }
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivationState::Registered => "registered",
            ActivationState::Resolving => "resolving",
            ActivationState::Activating => "activating",
            ActivationState::Activated => "activated",
            ActivationState::Failed => "failed",
            ActivationState::Deactivating => "deactivating",
        };
        f.write_str(name)
    }
}

/// Engine-internal record, created the first time a plugin is requested
pub(crate) struct ActivationRecord {
    pub(crate) state: ActivationState,
    /// Resolved value once `Activated`
    pub(crate) service: Option<Service>,
    /// Set while `Resolving` or `Activating`
    pub(crate) in_flight: Option<SharedActivation>,
    /// Set once `Failed`
    pub(crate) failure: Option<Error>,
}

impl Default for ActivationRecord {
    fn default() -> Self {
        Self {
            state: ActivationState::Registered,
            service: None,
            in_flight: None,
            failure: None,
        }
    }
}

impl ActivationRecord {
    pub(crate) fn begin(&mut self, in_flight: SharedActivation) {
        self.state = ActivationState::Resolving;
        self.in_flight = Some(in_flight);
    }

    pub(crate) fn succeed(&mut self, service: Option<Service>) {
        self.state = ActivationState::Activated;
        self.service = service;
        self.in_flight = None;
        self.failure = None;
    }

    pub(crate) fn fail(&mut self, error: Error) {
        self.state = ActivationState::Failed;
        self.service = None;
        self.in_flight = None;
        self.failure = Some(error);
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::FutureExt;

    #[test]
    fn test_record_transitions() {
        let mut record = ActivationRecord::default();
        assert_eq!(record.state, ActivationState::Registered);

        let pending: BoxFuture<'static, ActivationOutcome> = async { Ok(None) }.boxed();
        record.begin(pending.shared());
        assert!(record.state.is_in_flight());
        assert!(record.in_flight.is_some());

        record.succeed(Some(Service::new(3u8)));
        assert_eq!(record.state, ActivationState::Activated);
        assert!(record.in_flight.is_none());
        assert!(record.service.is_some());

        record.reset();
        assert_eq!(record.state, ActivationState::Registered);
        assert!(record.service.is_none());

        record.fail(Error::not_found("x"));
        assert_eq!(record.state, ActivationState::Failed);
        assert!(record.failure.is_some());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ActivationState::Deactivating.to_string(), "deactivating");
        assert_eq!(
            serde_json::to_string(&ActivationState::Activated).unwrap(),
            r#""activated""#
        );
    }
}
