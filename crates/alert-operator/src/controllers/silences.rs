use super::SyncSummary;
use crate::ReconcileError;
use automations::{Action, Reconciler, Request};
use chrono::{DateTime, Utc};
use models::{
    Matcher, ObjectKey, Resource, Silence, SilenceSpec, SilenceStatus, FINALIZER, SILENCE_ID_LABEL,
};
use std::collections::{HashMap, HashSet};
use store::{Operation, Store};
use upstream::{
    alertmanager::{self, PostableSilence, SilenceRecord, SilenceState},
    SilenceService,
};

/// State recorded for a linked silence which the silence service no longer knows.
const STATE_MISSING: &str = "missing";

/// DriftPolicy decides what happens when a Silence and its remote silence differ.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DriftPolicy {
    /// Leave the remote silence as-is. Periodic syncs overwrite the Silence
    /// with the remote silence.
    #[default]
    Ignore,
    /// Update the remote silence to match its Silence.
    Update,
    /// Expire the remote silence, and create a new one matching its Silence.
    Recreate,
}

/// SilenceReconciler keeps Silence objects and the silences of a
/// SilenceService in sync, in both directions:
///
/// * Sync-all requests mirror every remote silence into a Silence.
/// * Silences authored locally are created remotely.
/// * Deleted Silences have their remote silence expired before they're
///   released for erasure, using a finalizer.
pub struct SilenceReconciler<S, C> {
    store: S,
    service: C,
    namespace: String,
    created_by: String,
    drift_policy: DriftPolicy,
}

impl<S, C> SilenceReconciler<S, C>
where
    S: Store<Silence>,
    C: SilenceService,
{
    pub fn new(store: S, service: C, namespace: impl Into<String>) -> Self {
        Self {
            store,
            service,
            namespace: namespace.into(),
            created_by: "alert-operator".to_string(),
            drift_policy: DriftPolicy::default(),
        }
    }

    pub fn with_drift_policy(self, drift_policy: DriftPolicy) -> Self {
        Self {
            drift_policy,
            ..self
        }
    }

    /// Author recorded for created remote silences which don't name one.
    pub fn with_created_by(self, created_by: impl Into<String>) -> Self {
        Self {
            created_by: created_by.into(),
            ..self
        }
    }

    /// Mirror every remote silence into a Silence of the namespace.
    ///
    /// A remote silence is mirrored into the Silence which is linked to it,
    /// or otherwise into a Silence named by its ID. Silences being deleted
    /// are left alone. Unless the drift policy is `Ignore`, linked Silences
    /// are instead the desired state of their remote silence, and are
    /// converged. Remote silences which match a Silence that is still
    /// awaiting its link are deferred to a later sync.
    /// The first failure aborts the sync.
    #[tracing::instrument(skip_all, fields(namespace = %self.namespace))]
    pub async fn pull_sync(&self) -> Result<SyncSummary, ReconcileError> {
        let remote = self.service.list_silences().await?;
        let local = self.store.list(&self.namespace).await?;

        // Names of local Silences, and the remote silence each is linked to.
        let taken: HashMap<String, String> = local
            .iter()
            .filter_map(|silence| {
                Some((silence.metadata.name.clone(), linked_id(silence)?.to_string()))
            })
            .collect();

        // Silences which hold the finalizer, but aren't linked to an active
        // remote silence, may be part-way through creating one. A remote
        // silence may exist before the Silence records its ID.
        let active: HashSet<&str> = remote
            .iter()
            .filter(|record| record.status.state != SilenceState::Expired)
            .map(|record| record.id.as_str())
            .collect();
        let pushing: Vec<Silence> = local
            .iter()
            .filter(|silence| {
                silence.metadata.has_finalizer(FINALIZER)
                    && !silence.metadata.is_deleting()
                    && linked_id(silence).map_or(true, |id| !active.contains(id))
            })
            .cloned()
            .collect();

        let mut summary = SyncSummary::default();
        let mut linked: HashMap<String, Silence> = HashMap::new();

        for silence in local {
            let Some(id) = linked_id(&silence).map(str::to_string) else {
                continue;
            };
            let Some(other) = linked.remove(&id) else {
                linked.insert(id, silence);
                continue;
            };
            // Prefer the Silence whose status records the link.
            let (keep, duplicate) = if !silence.status.silence_id.is_empty()
                && other.status.silence_id.is_empty()
            {
                (silence, other)
            } else {
                (other, silence)
            };
            tracing::warn!(
                %id,
                key = %keep.key(),
                duplicate = %duplicate.key(),
                "multiple silences are linked to the same remote silence (ignoring duplicate)"
            );
            summary.skipped += 1;
            linked.insert(id, keep);
        }
        let now = Utc::now();

        for record in &remote {
            let current = linked.remove(&record.id);

            if current.as_ref().is_some_and(|c| c.metadata.is_deleting()) {
                summary.skipped += 1;
                continue;
            }
            let result = match current {
                Some(current) if self.drift_policy != DriftPolicy::Ignore => {
                    self.converge(current, record).await
                }
                Some(current) => self.mirror(&current.metadata.name, record).await,
                // A re-created remote silence leaves its Silence named by the previous ID.
                None if taken.get(&record.id).is_some_and(|id| *id != record.id) => {
                    tracing::debug!(id = %record.id, "silence of this name is linked to another remote silence");
                    summary.skipped += 1;
                    continue;
                }
                None if record.status.state != SilenceState::Expired
                    && pushing.iter().any(|p| !drifted(&p.spec, record, now)) =>
                {
                    tracing::debug!(id = %record.id, "remote silence may be an in-flight creation (deferring)");
                    summary.skipped += 1;
                    continue;
                }
                None => self.mirror(&record.id, record).await,
            };
            tally(&mut summary, result)?;
        }

        // Remaining Silences are linked to remote silences which no longer exist.
        for (id, current) in linked {
            if current.metadata.is_deleting() {
                summary.skipped += 1;
                continue;
            }
            tracing::debug!(key = %current.key(), %id, "linked silence is not known remotely");
            tally(&mut summary, self.missing(current).await)?;
        }

        tracing::info!(
            remote = remote.len(),
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            invalid = summary.failed,
            "synced silences"
        );
        Ok(summary)
    }

    /// Reconcile the Silence having `key`.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_object(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let silence = match self.store.get(key).await {
            Ok(silence) => silence,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        if silence.metadata.is_deleting() {
            return self.finalize(silence).await;
        }

        match linked_id(&silence).map(str::to_string) {
            None => self.push_create(silence).await,
            Some(id) => match self.service.get_silence(&id).await {
                Ok(remote) => self.converge(silence, &remote).await.map(|_| ()),
                Err(err) if err.is_not_found() => self.missing(silence).await.map(|_| ()),
                Err(err) => Err(err.into()),
            },
        }
    }

    // Mirror `record` into the Silence having `name`, creating it if required.
    async fn mirror(&self, name: &str, record: &SilenceRecord) -> Result<Operation, ReconcileError> {
        let spec = spec_from_remote(record);
        let expired = record.status.state == SilenceState::Expired;

        let (silence, op) = store::create_or_update(
            &self.store,
            Silence::new(&self.namespace, name, spec.clone()),
            |silence: &mut Silence| {
                if silence.metadata.is_deleting() {
                    return;
                }
                silence.spec = spec;
                silence.metadata.set_label(SILENCE_ID_LABEL, &record.id);

                // Only silences which may still be active must be expired upon deletion.
                if expired {
                    silence.metadata.remove_finalizer(FINALIZER);
                } else {
                    silence.metadata.add_finalizer(FINALIZER);
                }
            },
        )
        .await?;

        if silence.metadata.is_deleting() {
            return Ok(Operation::Unchanged);
        }
        let status_changed = self
            .set_status(silence, &record.id, record.status.state.as_str())
            .await?;

        Ok(match op {
            Operation::Unchanged if status_changed => Operation::Updated,
            op => op,
        })
    }

    // Bring the remote silence of `silence` in line with it, as permitted
    // by the drift policy, and refresh the observed remote state.
    async fn converge(
        &self,
        silence: Silence,
        remote: &SilenceRecord,
    ) -> Result<Operation, ReconcileError> {
        let now = Utc::now();
        let key = silence.key();

        if drifted(&silence.spec, remote, now) {
            match self.drift_policy {
                DriftPolicy::Ignore => {
                    tracing::info!(%key, id = %remote.id, "silence differs from its remote silence (ignoring)");
                }
                DriftPolicy::Update => {
                    validate(&silence, now)?;
                    let id = self.post(&silence, Some(remote.id.clone())).await?;
                    tracing::info!(%key, previous = %remote.id, %id, "updated drifted remote silence");

                    self.link(silence, &id, now).await?;
                    return Ok(Operation::Updated);
                }
                DriftPolicy::Recreate => {
                    validate(&silence, now)?;
                    self.expire(&remote.id).await?;
                    let id = self.post(&silence, None).await?;
                    tracing::info!(%key, previous = %remote.id, %id, "re-created drifted remote silence");

                    self.link(silence, &id, now).await?;
                    return Ok(Operation::Updated);
                }
            }
        }

        let silence = if remote.status.state == SilenceState::Expired {
            self.release(silence).await?
        } else {
            silence
        };

        Ok(
            if self
                .set_status(silence, &remote.id, remote.status.state.as_str())
                .await?
            {
                Operation::Updated
            } else {
                Operation::Unchanged
            },
        )
    }

    // Handle a linked Silence whose remote silence doesn't exist.
    async fn missing(&self, silence: Silence) -> Result<Operation, ReconcileError> {
        let key = silence.key();
        let previous = linked_id(&silence).unwrap_or_default().to_string();

        if self.drift_policy == DriftPolicy::Ignore {
            if silence.status.state != STATE_MISSING {
                tracing::warn!(%key, id = %previous, "remote silence no longer exists");
            }
            let silence = self.release(silence).await?;

            return Ok(if self.set_status(silence, &previous, STATE_MISSING).await? {
                Operation::Updated
            } else {
                Operation::Unchanged
            });
        }

        let now = Utc::now();
        if let Err(err) = validate(&silence, now) {
            // No remote silence exists which must be expired upon deletion.
            self.release(silence).await?;
            return Err(err);
        }

        let silence = self.retain(silence).await?;
        let id = self.post(&silence, None).await?;
        tracing::info!(%key, %previous, %id, "re-created missing remote silence");

        self.link(silence, &id, now).await?;
        Ok(Operation::Updated)
    }

    // Create the remote silence of a locally-authored Silence.
    async fn push_create(&self, silence: Silence) -> Result<(), ReconcileError> {
        let now = Utc::now();
        let key = silence.key();
        validate(&silence, now)?;

        // The finalizer must be held before the remote silence can exist.
        let silence = self.retain(silence).await?;

        let id = self.post(&silence, None).await?;
        tracing::info!(%key, %id, "created remote silence");

        self.link(silence, &id, now).await
    }

    // Expire the remote silence of a Silence being deleted, and then
    // release its finalizer.
    async fn finalize(&self, silence: Silence) -> Result<(), ReconcileError> {
        if !silence.metadata.has_finalizer(FINALIZER) {
            return Ok(());
        }
        let key = silence.key();

        if let Some(id) = linked_id(&silence) {
            self.expire(id).await?;
            tracing::info!(%key, %id, "expired remote silence of deleted silence");
        }
        self.release(silence).await?;

        Ok(())
    }

    // Expire the remote silence `id`. Silences which no longer exist,
    // or which have already expired, count as success.
    async fn expire(&self, id: &str) -> Result<(), ReconcileError> {
        let err = match self.service.delete_silence(id).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => err,
        };

        // Some services refuse to expire an already-expired silence.
        match self.service.get_silence(id).await {
            Ok(remote) if remote.status.state == SilenceState::Expired => Ok(()),
            Err(get_err) if get_err.is_not_found() => Ok(()),
            _ => Err(err.into()),
        }
    }

    async fn post(&self, silence: &Silence, id: Option<String>) -> Result<String, ReconcileError> {
        let spec = &silence.spec;

        let created_by = if spec.created_by.is_empty() {
            self.created_by.clone()
        } else {
            spec.created_by.clone()
        };

        Ok(self
            .service
            .post_silence(&PostableSilence {
                id,
                comment: spec.comment.clone(),
                created_by,
                starts_at: spec.starts_at,
                ends_at: spec.ends_at,
                matchers: remote_matchers(spec),
            })
            .await?)
    }

    // Record that `silence` is linked to the remote silence `id`.
    // Status is written first, as it alone identifies the remote silence
    // should the label update fail.
    async fn link(&self, silence: Silence, id: &str, now: DateTime<Utc>) -> Result<(), ReconcileError> {
        let key = silence.key();
        let state = SilenceState::at(silence.spec.starts_at, silence.spec.ends_at, now);
        self.set_status(silence, id, state.as_str()).await?;

        let mut current = self.store.get(&key).await?;
        if current.metadata.labels.get(SILENCE_ID_LABEL).map(String::as_str) != Some(id) {
            current.metadata.set_label(SILENCE_ID_LABEL, id);
            self.store.update(&current).await?;
        }
        Ok(())
    }

    // Write the status of `silence`, returning whether it changed.
    // Status is owned by this reconciler, and is written unconditionally.
    async fn set_status(
        &self,
        silence: Silence,
        id: &str,
        state: &str,
    ) -> Result<bool, ReconcileError> {
        let status = SilenceStatus {
            silence_id: id.to_string(),
            state: state.to_string(),
        };
        if silence.status == status {
            return Ok(false);
        }

        let mut next = silence;
        next.status = status;
        next.metadata.resource_version = None;
        self.store.update_status(&next).await?;

        Ok(true)
    }

    async fn retain(&self, silence: Silence) -> Result<Silence, ReconcileError> {
        let mut next = silence;
        if !next.metadata.add_finalizer(FINALIZER) {
            return Ok(next);
        }
        Ok(self.store.update(&next).await?)
    }

    async fn release(&self, silence: Silence) -> Result<Silence, ReconcileError> {
        let mut next = silence;
        if !next.metadata.remove_finalizer(FINALIZER) {
            return Ok(next);
        }
        Ok(self.store.update(&next).await?)
    }
}

impl<S, C> Reconciler for SilenceReconciler<S, C>
where
    S: Store<Silence> + 'static,
    C: SilenceService + 'static,
{
    const NAME: &'static str = "silences";

    type Error = ReconcileError;

    async fn reconcile<'s>(&'s self, request: &'s Request) -> Result<Action, ReconcileError> {
        match request {
            Request::SyncAll => {
                self.pull_sync().await?;
            }
            Request::Object(key) => {
                self.reconcile_object(key).await?;
            }
        }
        Ok(Action::Done)
    }

    fn retry_after(&self, error: &ReconcileError, failures: u32) -> Option<std::time::Duration> {
        super::retry_after(error, failures)
    }
}

fn tally(
    summary: &mut SyncSummary,
    result: Result<Operation, ReconcileError>,
) -> Result<(), ReconcileError> {
    match result {
        Ok(op) => summary.record(op),
        // An invalid local Silence doesn't block the sync of others.
        Err(ReconcileError::InvalidResource { key, reason }) => {
            tracing::warn!(%key, %reason, "silence cannot be applied to its remote silence");
            summary.failed += 1;
        }
        Err(err) => return Err(err),
    }
    Ok(())
}

/// ID of the remote silence linked to `silence`, if any.
fn linked_id(silence: &Silence) -> Option<&str> {
    if !silence.status.silence_id.is_empty() {
        return Some(&silence.status.silence_id);
    }
    silence
        .metadata
        .labels
        .get(SILENCE_ID_LABEL)
        .map(String::as_str)
        .filter(|id| !id.is_empty())
}

fn spec_from_remote(record: &SilenceRecord) -> SilenceSpec {
    let mut spec = SilenceSpec {
        comment: record.comment.clone(),
        created_by: record.created_by.clone(),
        starts_at: record.starts_at,
        ends_at: record.ends_at,
        ..Default::default()
    };
    spec.set_matchers(record.matchers.iter().map(|m| Matcher {
        name: m.name.clone(),
        value: m.value.clone(),
        is_regex: m.is_regex,
        is_equal: m.is_equal,
    }));
    spec
}

fn remote_matchers(spec: &SilenceSpec) -> Vec<alertmanager::Matcher> {
    spec.matchers()
        .into_iter()
        .map(|m| alertmanager::Matcher {
            name: m.name,
            value: m.value,
            is_regex: m.is_regex,
            is_equal: m.is_equal,
        })
        .collect()
}

/// Validate that `spec` can be created as a remote silence at `now`.
pub fn validate_spec(spec: &SilenceSpec, now: DateTime<Utc>) -> Result<(), String> {
    if spec.match_labels.is_empty() && spec.match_expressions.is_empty() {
        Err("at least one matcher is required".to_string())
    } else if spec.match_labels.keys().any(String::is_empty)
        || spec.match_expressions.iter().any(|m| m.name.is_empty())
    {
        Err("matcher names must not be empty".to_string())
    } else if spec.ends_at <= spec.starts_at {
        Err("endsAt must be after startsAt".to_string())
    } else if spec.ends_at <= now {
        Err("endsAt must be in the future".to_string())
    } else {
        Ok(())
    }
}

fn validate(silence: &Silence, now: DateTime<Utc>) -> Result<(), ReconcileError> {
    validate_spec(&silence.spec, now).map_err(|reason| ReconcileError::InvalidResource {
        key: silence.key(),
        reason,
    })
}

// A remote silence has drifted if its matchers, comment, or end differ.
// Its start is compared only while it's in the future, because the silence
// service moves past starts up to the time of creation.
// Times are compared at millisecond precision.
fn drifted(spec: &SilenceSpec, remote: &SilenceRecord, now: DateTime<Utc>) -> bool {
    let mut matchers = remote.matchers.clone();
    matchers.sort();
    matchers.dedup();

    remote_matchers(spec) != matchers
        || spec.comment != remote.comment
        || spec.ends_at.timestamp_millis() != remote.ends_at.timestamp_millis()
        || (spec.starts_at > now
            && spec.starts_at.timestamp_millis() != remote.starts_at.timestamp_millis())
}
