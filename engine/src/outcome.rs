//! Remote failure taxonomy and mutation outcomes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a remote call failed.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum RemoteFailure {
    /// Create hit an existing item, or update hit a missing one
    #[error("condition failed")]
    ConditionFailed,

    /// The item is not present remotely
    #[error("not found")]
    NotFound,

    /// The payload was refused; retrying cannot help
    #[error("rejected: {0}")]
    Rejected(String),

    /// Network, timeout or unknown failure
    #[error("transient failure: {0}")]
    Transient(String),
}

/// How a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureClass {
    /// Drives the create/update fallback
    Condition,
    /// Never retried
    Permanent,
    /// Retried on a later pass or retry tick
    Transient,
}

impl RemoteFailure {
    pub fn class(&self) -> FailureClass {
        match self {
            RemoteFailure::ConditionFailed | RemoteFailure::NotFound => FailureClass::Condition,
            RemoteFailure::Rejected(_) => FailureClass::Permanent,
            RemoteFailure::Transient(_) => FailureClass::Transient,
        }
    }

    /// Whether a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() != FailureClass::Permanent
    }
}

/// Why a mutation function refused or rolled back a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message", rename_all = "camelCase")]
pub enum RejectReason {
    /// No owner signed in; nothing was changed
    OwnerMissing,
    /// The local schema or the remote store refused the payload
    Validation(String),
    /// The action is only allowed online
    RequiresConnection,
    /// The edit failed remotely and the previous value was restored
    Reverted(String),
}

/// Result of a mutation function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "camelCase")]
pub enum MutationOutcome {
    /// Applied locally and confirmed remotely
    Applied,
    /// Applied locally; the remote write is queued for retry
    Queued,
    Rejected(RejectReason),
}

impl MutationOutcome {
    /// Whether the change is visible in the local store.
    pub fn is_visible(&self) -> bool {
        matches!(self, MutationOutcome::Applied | MutationOutcome::Queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classification() {
        assert_eq!(RemoteFailure::ConditionFailed.class(), FailureClass::Condition);
        assert_eq!(RemoteFailure::NotFound.class(), FailureClass::Condition);
        assert_eq!(
            RemoteFailure::Rejected("bad".into()).class(),
            FailureClass::Permanent
        );
        assert_eq!(
            RemoteFailure::Transient("timeout".into()).class(),
            FailureClass::Transient
        );
        assert!(!RemoteFailure::Rejected("bad".into()).is_retryable());
        assert!(RemoteFailure::Transient("timeout".into()).is_retryable());
    }

    #[test]
    fn outcome_visibility() {
        assert!(MutationOutcome::Applied.is_visible());
        assert!(MutationOutcome::Queued.is_visible());
        assert!(!MutationOutcome::Rejected(RejectReason::OwnerMissing).is_visible());
    }

    #[test]
    fn outcome_wire_format() {
        let json = serde_json::to_value(MutationOutcome::Rejected(RejectReason::Validation(
            "calories must be a number".into(),
        )))
        .unwrap();
        assert_eq!(
            json,
            json!({
                "status": "rejected",
                "detail": {"reason": "validation", "message": "calories must be a number"}
            })
        );

        let json = serde_json::to_value(RemoteFailure::Transient("timeout".into())).unwrap();
        assert_eq!(json, json!({"kind": "transient", "message": "timeout"}));
    }
}
