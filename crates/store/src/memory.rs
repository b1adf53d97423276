use super::{Error, Store};
use models::{ObjectKey, Resource};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// MemoryStore is an in-process Store of resources of kind `R`.
/// Clones share the same underlying objects.
///
/// Every write which changes an object notifies all watchers with its key.
pub struct MemoryStore<R: Resource> {
    inner: Arc<Mutex<Inner<R>>>,
}

struct Inner<R> {
    objects: BTreeMap<ObjectKey, R>,
    last_version: u64,
    watchers: Vec<mpsc::UnboundedSender<ObjectKey>>,
}

impl<R: Resource> Clone for MemoryStore<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Resource> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                objects: BTreeMap::new(),
                last_version: 0,
                watchers: Vec::new(),
            })),
        }
    }

    /// Watch for changes to objects of the store. The returned channel first
    /// receives the keys of all current objects, followed by the key of each
    /// object as it's created, updated, or deleted.
    pub fn watch(&self) -> mpsc::UnboundedReceiver<ObjectKey> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();

        for key in inner.objects.keys() {
            let _ = tx.send(key.clone());
        }
        inner.watchers.push(tx);

        rx
    }

    /// Number of objects currently held, including those being deleted.
    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: Resource> Inner<R> {
    fn next_version(&mut self) -> Option<u64> {
        self.last_version += 1;
        Some(self.last_version)
    }

    fn notify(&mut self, key: &ObjectKey) {
        self.watchers.retain(|tx| tx.send(key.clone()).is_ok());
    }

    fn current(&self, key: &ObjectKey) -> Result<&R, Error> {
        self.objects.get(key).ok_or_else(|| Error::NotFound {
            kind: R::KIND,
            key: key.clone(),
        })
    }

    fn check_version(current: &R, obj: &R) -> Result<(), Error> {
        let actual = current.metadata().resource_version.unwrap_or_default();

        match obj.metadata().resource_version {
            Some(expected) if expected != actual => Err(Error::Conflict {
                kind: R::KIND,
                key: obj.key(),
                expected,
                actual,
            }),
            _ => Ok(()),
        }
    }

    fn create(&mut self, obj: &R) -> Result<R, Error> {
        let key = obj.key();

        if key.name.is_empty() || key.namespace.is_empty() {
            return Err(Error::Invalid {
                kind: R::KIND,
                key,
                reason: "name and namespace are required".to_string(),
            });
        }
        if self.objects.contains_key(&key) {
            return Err(Error::AlreadyExists { kind: R::KIND, key });
        }

        let mut stored = obj.clone();
        *stored.status_mut() = Default::default();

        let version = self.next_version();
        let meta = stored.metadata_mut();
        meta.resource_version = version;
        meta.creation_timestamp = Some(chrono::Utc::now());
        meta.deletion_timestamp = None;

        tracing::debug!(kind = R::KIND, %key, ?version, "created object");
        self.objects.insert(key.clone(), stored.clone());
        self.notify(&key);

        Ok(stored)
    }

    fn update(&mut self, obj: &R) -> Result<R, Error> {
        let key = obj.key();
        let current = self.current(&key)?;
        Self::check_version(current, obj)?;

        let mut next = obj.clone();
        *next.status_mut() = current.status().clone();
        {
            let (meta, current) = (next.metadata_mut(), current.metadata());
            meta.resource_version = current.resource_version;
            meta.creation_timestamp = current.creation_timestamp;
            meta.deletion_timestamp = current.deletion_timestamp;
        }

        if next.metadata().is_deleting() && next.metadata().finalizers.is_empty() {
            tracing::debug!(kind = R::KIND, %key, "erased object after its last finalizer was removed");
            self.objects.remove(&key);
            self.notify(&key);
            return Ok(next);
        }
        if &next == current {
            return Ok(next);
        }

        let version = self.next_version();
        next.metadata_mut().resource_version = version;

        tracing::debug!(kind = R::KIND, %key, ?version, "updated object");
        self.objects.insert(key.clone(), next.clone());
        self.notify(&key);

        Ok(next)
    }

    fn update_status(&mut self, obj: &R) -> Result<R, Error> {
        let key = obj.key();
        let current = self.current(&key)?;
        Self::check_version(current, obj)?;

        if current.status() == obj.status() {
            return Ok(current.clone());
        }
        let mut next = current.clone();
        *next.status_mut() = obj.status().clone();

        let version = self.next_version();
        next.metadata_mut().resource_version = version;

        tracing::debug!(kind = R::KIND, %key, ?version, "updated object status");
        self.objects.insert(key.clone(), next.clone());
        self.notify(&key);

        Ok(next)
    }

    fn delete(&mut self, key: &ObjectKey) -> Result<(), Error> {
        let current = self.current(key)?;

        if current.metadata().finalizers.is_empty() {
            tracing::debug!(kind = R::KIND, %key, "erased object");
            self.objects.remove(key);
        } else if current.metadata().is_deleting() {
            return Ok(()); // Deletion was already requested.
        } else {
            let mut next = current.clone();
            let version = self.next_version();
            let meta = next.metadata_mut();
            meta.deletion_timestamp = Some(chrono::Utc::now());
            meta.resource_version = version;

            tracing::debug!(kind = R::KIND, %key, finalizers = ?meta.finalizers, "marked object for deletion");
            self.objects.insert(key.clone(), next);
        }
        self.notify(key);

        Ok(())
    }
}

#[async_trait::async_trait]
impl<R: Resource> Store<R> for MemoryStore<R> {
    async fn get(&self, key: &ObjectKey) -> Result<R, Error> {
        self.lock().current(key).cloned()
    }

    async fn list(&self, namespace: &str) -> Result<Vec<R>, Error> {
        Ok(self
            .lock()
            .objects
            .values()
            .filter(|obj| obj.metadata().namespace == namespace)
            .cloned()
            .collect())
    }

    async fn create(&self, obj: &R) -> Result<R, Error> {
        self.lock().create(obj)
    }

    async fn update(&self, obj: &R) -> Result<R, Error> {
        self.lock().update(obj)
    }

    async fn update_status(&self, obj: &R) -> Result<R, Error> {
        self.lock().update_status(obj)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), Error> {
        self.lock().delete(key)
    }
}
