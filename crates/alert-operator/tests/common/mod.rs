#![allow(dead_code)]

use chrono::{DateTime, Utc};
use models::{ObjectKey, Resource};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use store::Store as _;
use upstream::{
    alertmanager::{Matcher, PostableSilence, SilenceRecord, SilenceState, SilenceStatus},
    prometheus::{AlertRecord, AlertState},
    AlertSource, Error, SilenceService,
};

pub fn url(path: &str) -> url::Url {
    format!("http://fake{path}").parse().unwrap()
}

pub fn transport_error(path: &str) -> Error {
    Error::Transport {
        url: url(path),
        source: reqwest::Client::new()
            .get("http://[::1")
            .build()
            .unwrap_err(),
    }
}

pub fn status_error(path: &str, code: u16, body: &str) -> Error {
    Error::Status {
        url: url(path),
        status: reqwest::StatusCode::from_u16(code).unwrap(),
        body: body.to_string(),
    }
}

pub fn alert(name: &str, active_at: &str, value: &str) -> AlertRecord {
    AlertRecord {
        labels: BTreeMap::from([("alertname".to_string(), name.to_string())]),
        annotations: BTreeMap::new(),
        state: AlertState::Firing,
        active_at: active_at.parse().unwrap(),
        value: value.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Transport,
    Protocol,
}

/// AlertSource which returns canned alerts.
#[derive(Default)]
pub struct FakeAlertSource {
    pub alerts: Mutex<Vec<AlertRecord>>,
    pub failure: Mutex<Option<Failure>>,
}

impl FakeAlertSource {
    pub fn new(alerts: Vec<AlertRecord>) -> Self {
        Self {
            alerts: Mutex::new(alerts),
            failure: Mutex::new(None),
        }
    }

    pub fn set(&self, alerts: Vec<AlertRecord>) {
        *self.alerts.lock().unwrap() = alerts;
    }

    pub fn fail(&self, failure: Option<Failure>) {
        *self.failure.lock().unwrap() = failure;
    }
}

#[async_trait::async_trait]
impl AlertSource for FakeAlertSource {
    async fn active_alerts(&self) -> Result<Vec<AlertRecord>, Error> {
        match *self.failure.lock().unwrap() {
            Some(Failure::Transport) => return Err(transport_error("/api/v1/alerts")),
            Some(Failure::Protocol) => {
                return Err(Error::Unsuccessful {
                    url: url("/api/v1/alerts"),
                    status: "error".to_string(),
                    error: "query failed".to_string(),
                })
            }
            None => (),
        }
        Ok(self.alerts.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct SilencesState {
    pub silences: BTreeMap<String, SilenceRecord>,
    pub next_id: u32,
    /// Log of calls made to the service.
    pub calls: Vec<String>,
    pub fail_list: bool,
    pub fail_delete: bool,
    /// When set, each POST signals the first Notify once the silence is
    /// stored, and then awaits the second before returning.
    pub post_gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

/// SilenceService which holds silences in memory, and behaves like
/// Alertmanager: deleted silences are expired rather than removed.
#[derive(Default)]
pub struct FakeSilenceService {
    pub state: Mutex<SilencesState>,
}

impl FakeSilenceService {
    pub fn insert(&self, id: &str, state: SilenceState, comment: &str, matchers: Vec<Matcher>) {
        let now = Utc::now();
        let (starts_at, ends_at) = match state {
            SilenceState::Active => (now - chrono::Duration::hours(1), now + chrono::Duration::hours(1)),
            SilenceState::Pending => (now + chrono::Duration::hours(1), now + chrono::Duration::hours(2)),
            SilenceState::Expired => (now - chrono::Duration::hours(2), now - chrono::Duration::hours(1)),
        };

        self.state.lock().unwrap().silences.insert(
            id.to_string(),
            SilenceRecord {
                id: id.to_string(),
                status: SilenceStatus { state },
                updated_at: Some(now),
                comment: comment.to_string(),
                created_by: "ops".to_string(),
                starts_at,
                ends_at,
                matchers,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<SilenceRecord> {
        self.state.lock().unwrap().silences.get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        self.state.lock().unwrap().silences.remove(id);
    }

    pub fn calls(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().unwrap().calls)
    }

    pub fn ids(&self) -> Vec<String> {
        self.state.lock().unwrap().silences.keys().cloned().collect()
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut SilencesState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

fn not_found(id: &str) -> Error {
    Error::NotFound {
        url: url(&format!("/api/v2/silence/{id}")),
    }
}

impl FakeSilenceService {
    fn store_posted(
        &self,
        silence: &PostableSilence,
    ) -> Result<(String, Option<(Arc<Notify>, Arc<Notify>)>), Error> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("post {}", silence.id.as_deref().unwrap_or("new")));

        let now = Utc::now();
        let id = match &silence.id {
            Some(id) if state.silences.contains_key(id) => id.clone(),
            Some(id) => return Err(not_found(id)),
            None => {
                state.next_id += 1;
                format!("silence-{}", state.next_id)
            }
        };

        state.silences.insert(
            id.clone(),
            SilenceRecord {
                id: id.clone(),
                status: SilenceStatus {
                    state: SilenceState::at(silence.starts_at, silence.ends_at, now),
                },
                updated_at: Some(now),
                comment: silence.comment.clone(),
                created_by: silence.created_by.clone(),
                // Past starts are moved up to the time of creation.
                starts_at: silence.starts_at.max(now),
                ends_at: silence.ends_at,
                matchers: silence.matchers.clone(),
            },
        );
        Ok((id, state.post_gate.clone()))
    }
}

#[async_trait::async_trait]
impl SilenceService for FakeSilenceService {
    async fn list_silences(&self) -> Result<Vec<SilenceRecord>, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("list".to_string());

        if state.fail_list {
            return Err(status_error("/api/v2/silences", 500, "internal error"));
        }
        Ok(state.silences.values().cloned().collect())
    }

    async fn get_silence(&self, id: &str) -> Result<SilenceRecord, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("get {id}"));

        state.silences.get(id).cloned().ok_or_else(|| not_found(id))
    }

    async fn post_silence(&self, silence: &PostableSilence) -> Result<String, Error> {
        let (id, gate) = self.store_posted(silence)?;

        if let Some((posted, release)) = gate {
            posted.notify_one();
            release.notified().await;
        }
        Ok(id)
    }

    async fn delete_silence(&self, id: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete {id}"));

        if state.fail_delete {
            return Err(status_error("/api/v2/silence", 500, "internal error"));
        }
        let Some(silence) = state.silences.get_mut(id) else {
            return Err(not_found(id));
        };
        // Alertmanager refuses to expire an already-expired silence.
        if silence.status.state == SilenceState::Expired {
            return Err(status_error("/api/v2/silence", 500, "silence already expired"));
        }
        silence.status.state = SilenceState::Expired;
        silence.ends_at = Utc::now();
        Ok(())
    }
}

/// Store which fails writes of objects having chosen names,
/// and otherwise delegates to a MemoryStore.
pub struct FlakyStore<R: Resource> {
    pub inner: store::MemoryStore<R>,
    pub fail_names: Mutex<HashSet<String>>,
}

impl<R: Resource> FlakyStore<R> {
    pub fn new(inner: store::MemoryStore<R>, fail_names: &[&str]) -> Self {
        Self {
            inner,
            fail_names: Mutex::new(fail_names.iter().map(|n| n.to_string()).collect()),
        }
    }

    fn check(&self, obj: &R) -> Result<(), store::Error> {
        if self.fail_names.lock().unwrap().contains(&obj.metadata().name) {
            return Err(store::Error::Invalid {
                kind: R::KIND,
                key: obj.key(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<R: Resource> store::Store<R> for FlakyStore<R> {
    async fn get(&self, key: &ObjectKey) -> Result<R, store::Error> {
        self.inner.get(key).await
    }
    async fn list(&self, namespace: &str) -> Result<Vec<R>, store::Error> {
        self.inner.list(namespace).await
    }
    async fn create(&self, obj: &R) -> Result<R, store::Error> {
        self.check(obj)?;
        self.inner.create(obj).await
    }
    async fn update(&self, obj: &R) -> Result<R, store::Error> {
        self.check(obj)?;
        self.inner.update(obj).await
    }
    async fn update_status(&self, obj: &R) -> Result<R, store::Error> {
        self.check(obj)?;
        self.inner.update_status(obj).await
    }
    async fn delete(&self, key: &ObjectKey) -> Result<(), store::Error> {
        self.inner.delete(key).await
    }
}

pub fn hours_from_now(hours: i64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::hours(hours)
}
