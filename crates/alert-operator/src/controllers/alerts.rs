use super::SyncSummary;
use crate::ReconcileError;
use automations::{Action, Reconciler, Request};
use chrono::SecondsFormat;
use models::{Alert, AlertStatus};
use sha2::{Digest, Sha256};
use store::{Operation, Store};
use upstream::{prometheus::AlertRecord, AlertSource};

const ALERTNAME_LABEL: &str = "alertname";

/// AlertReconciler mirrors the active alerts of an AlertSource as Alert objects.
pub struct AlertReconciler<S, A> {
    store: S,
    source: A,
    namespace: String,
}

/// Name of the Alert object which mirrors `record`.
///
/// Alerts have no stable identifier of their own, so one is derived from the
/// `alertname` label and the time at which the alert became active, which is
/// rendered as an RFC 3339 UTC timestamp and hashed. The same alert therefore
/// maps to the same name across queries, while re-fired alerts get new names.
pub fn alert_name(record: &AlertRecord) -> Result<String, ReconcileError> {
    let alertname = match record.labels.get(ALERTNAME_LABEL) {
        Some(alertname) if !alertname.is_empty() => alertname,
        _ => {
            return Err(ReconcileError::DataContractViolation {
                label: ALERTNAME_LABEL,
                labels: record.labels.clone(),
            })
        }
    };
    let digest = Sha256::digest(rfc3339(record).as_bytes());

    Ok(format!("{alertname}-{}", hex::encode(&digest[..8])))
}

fn rfc3339(record: &AlertRecord) -> String {
    record.active_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl<S, A> AlertReconciler<S, A>
where
    S: Store<Alert>,
    A: AlertSource,
{
    pub fn new(store: S, source: A, namespace: impl Into<String>) -> Self {
        Self {
            store,
            source,
            namespace: namespace.into(),
        }
    }

    /// Create or update an Alert for every active alert of the source.
    /// Alerts which fail to sync don't prevent the sync of other alerts,
    /// but are reported as a PartialSync error once all alerts are attempted.
    /// Alerts which are no longer active are not removed.
    #[tracing::instrument(skip_all, fields(namespace = %self.namespace))]
    pub async fn sync_all(&self) -> Result<SyncSummary, ReconcileError> {
        let records = self.source.active_alerts().await?;

        // Derive all names before writing anything, so that a malformed
        // response has no partial effect.
        let named = records
            .iter()
            .map(|record| Ok((alert_name(record)?, record)))
            .collect::<Result<Vec<_>, ReconcileError>>()?;

        let mut summary = SyncSummary::default();

        for (name, record) in named {
            match self.sync_one(&name, record).await {
                Ok(op) => {
                    tracing::debug!(%name, ?op, "synced alert");
                    summary.record(op);
                }
                Err(err) => {
                    tracing::warn!(%name, error = ?anyhow::Error::new(err), "failed to sync alert (will continue)");
                    summary.failed += 1;
                }
            }
        }
        tracing::info!(
            alerts = records.len(),
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed,
            "synced alerts"
        );

        if summary.failed != 0 {
            return Err(ReconcileError::PartialSync {
                failed: summary.failed,
                total: summary.total(),
            });
        }
        Ok(summary)
    }

    async fn sync_one(&self, name: &str, record: &AlertRecord) -> Result<Operation, ReconcileError> {
        let (alert, op) = store::create_or_update(
            &self.store,
            Alert::new(&self.namespace, name),
            |_: &mut Alert| (),
        )
        .await?;

        let status = AlertStatus {
            state: record.state.to_string(),
            annotations: record.annotations.clone(),
            labels: record.labels.clone(),
            since: rfc3339(record),
            value: record.value.clone(),
        };
        if alert.status == status {
            return Ok(op);
        }

        let mut next = alert;
        next.status = status;
        self.store.update_status(&next).await?;

        Ok(match op {
            Operation::Unchanged => Operation::Updated,
            op => op,
        })
    }
}

impl<S, A> Reconciler for AlertReconciler<S, A>
where
    S: Store<Alert> + 'static,
    A: AlertSource + 'static,
{
    const NAME: &'static str = "alerts";

    type Error = ReconcileError;

    async fn reconcile<'s>(&'s self, request: &'s Request) -> Result<Action, ReconcileError> {
        match request {
            Request::SyncAll => {
                self.sync_all().await?;
                Ok(Action::Done)
            }
            // Individual alerts have no desired state to reconcile.
            Request::Object(_) => Ok(Action::Done),
        }
    }

    fn retry_after(&self, error: &ReconcileError, failures: u32) -> Option<std::time::Duration> {
        super::retry_after(error, failures)
    }
}
