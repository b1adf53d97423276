mod alerts;
mod silences;

pub use alerts::{alert_name, AlertReconciler};
pub use silences::{validate_spec, DriftPolicy, SilenceReconciler};

use crate::ReconcileError;
use store::Operation;

/// Summary of a synchronization of all objects.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Objects which are being deleted, and were left alone.
    pub skipped: usize,
    pub failed: usize,
}

impl SyncSummary {
    fn record(&mut self, op: Operation) {
        match op {
            Operation::Created => self.created += 1,
            Operation::Updated => self.updated += 1,
            Operation::Unchanged => self.unchanged += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.skipped + self.failed
    }
}

fn retry_after(err: &ReconcileError, failures: u32) -> Option<std::time::Duration> {
    err.is_retryable().then(|| automations::backoff(failures))
}
