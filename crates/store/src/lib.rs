//! The resource store consumed by reconcilers.
//!
//! A store is a key-addressed CRUD interface over resources of a single kind,
//! with optimistic concurrency and a status sub-document which is written
//! separately from the rest of the object. Deletion of an object that still
//! carries finalizers only marks it with a deletion timestamp. It's erased
//! once an update removes its last finalizer.
use models::{ObjectKey, Resource};

mod memory;

pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} {key} was not found")]
    NotFound { kind: &'static str, key: ObjectKey },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },
    #[error("{kind} {key} was modified concurrently (wrote resourceVersion {expected}, but current is {actual})")]
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },
    #[error("invalid {kind} {key}: {reason}")]
    Invalid {
        kind: &'static str,
        key: ObjectKey,
        reason: String,
    },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. } | Error::AlreadyExists { .. })
    }
}

/// Store of resources of kind `R`.
#[async_trait::async_trait]
pub trait Store<R: Resource>: Send + Sync {
    /// Fetch the object having `key`.
    async fn get(&self, key: &ObjectKey) -> Result<R, Error>;

    /// List all objects of the namespace, ordered on name.
    async fn list(&self, namespace: &str) -> Result<Vec<R>, Error>;

    /// Create a new object. Its status is not written, and begins as default.
    /// Returns the object as stored.
    async fn create(&self, obj: &R) -> Result<R, Error>;

    /// Update an existing object, leaving its stored status unchanged.
    /// Returns the object as stored, which may have been erased if the
    /// update removed the final finalizer of an object being deleted.
    async fn update(&self, obj: &R) -> Result<R, Error>;

    /// Update only the status of an existing object.
    async fn update_status(&self, obj: &R) -> Result<R, Error>;

    /// Request deletion of the object having `key`.
    async fn delete(&self, key: &ObjectKey) -> Result<(), Error>;
}

/// Operation performed by `create_or_update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Created,
    Updated,
    Unchanged,
}

/// Fetch the object keyed by `obj`, apply `mutate`, and write it back if it
/// changed. If the object doesn't exist, then `mutate` is applied to `obj`
/// which is then created. Repeated calls with the same mutation converge
/// and write nothing further.
pub async fn create_or_update<R, S, F>(
    store: &S,
    obj: R,
    mutate: F,
) -> Result<(R, Operation), Error>
where
    R: Resource,
    S: Store<R> + ?Sized,
    F: FnOnce(&mut R) + Send,
{
    let current = match store.get(&obj.key()).await {
        Ok(current) => current,
        Err(err) if err.is_not_found() => {
            let mut obj = obj;
            mutate(&mut obj);
            let created = store.create(&obj).await?;
            return Ok((created, Operation::Created));
        }
        Err(err) => return Err(err),
    };

    let mut next = current.clone();
    mutate(&mut next);

    if next == current {
        Ok((current, Operation::Unchanged))
    } else {
        Ok((store.update(&next).await?, Operation::Updated))
    }
}
