use models::ObjectKey;
use std::collections::BTreeMap;

/// Error of a reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The external system couldn't be reached.
    #[error("external system is unavailable")]
    UpstreamUnavailable(#[source] upstream::Error),
    /// The external system responded, but not as expected.
    #[error("external system responded unexpectedly")]
    UpstreamProtocolError(#[source] upstream::Error),
    /// An external record lacks a field which its identity requires.
    /// This is a defect of the external system and is not retried.
    #[error("alert is missing its {label:?} label (labels: {labels:?})")]
    DataContractViolation {
        label: &'static str,
        labels: BTreeMap<String, String>,
    },
    /// An object was modified concurrently.
    #[error(transparent)]
    StoreConflict(store::Error),
    #[error(transparent)]
    Store(store::Error),
    /// Some items of a batch failed, and were skipped.
    #[error("{failed} of {total} items failed to sync")]
    PartialSync { failed: usize, total: usize },
    /// A local object can't be applied to the external system.
    #[error("{key} is invalid: {reason}")]
    InvalidResource { key: ObjectKey, reason: String },
}

impl ReconcileError {
    /// Terminal errors aren't fixed by retrying the same request.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ReconcileError::DataContractViolation { .. } | ReconcileError::InvalidResource { .. }
        )
    }
}

impl From<upstream::Error> for ReconcileError {
    fn from(err: upstream::Error) -> Self {
        if err.is_transport() {
            ReconcileError::UpstreamUnavailable(err)
        } else {
            ReconcileError::UpstreamProtocolError(err)
        }
    }
}

impl From<store::Error> for ReconcileError {
    fn from(err: store::Error) -> Self {
        if err.is_conflict() {
            ReconcileError::StoreConflict(err)
        } else {
            ReconcileError::Store(err)
        }
    }
}
