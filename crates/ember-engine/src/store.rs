//! Storage port and unit of work.
//!
//! The engine sees storage as namespaced JSON documents: `(kind, key) ->
//! body`. A [`Ledger`] stages every write of one operation in an overlay,
//! serves reads from the overlay first and hands the batch to
//! [`Store::apply`] on [`Ledger::commit`]. Dropping a ledger without
//! committing discards the batch.

use std::collections::BTreeMap;

use ember_types::entities::Entity;

use crate::{AccrualError, Result};

/// Failure reported by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend-specific failure.
    #[error("backend: {0}")]
    Backend(String),

    /// A batch could not be applied.
    #[error("apply failed: {0}")]
    Apply(String),
}

/// One staged document write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub kind: &'static str,
    pub key: String,
    pub body: String,
}

/// Keyed document storage with atomic batch writes.
pub trait Store {
    /// Load one document.
    fn fetch(&self, kind: &str, key: &str) -> std::result::Result<Option<String>, StoreError>;

    /// All documents of a kind as `(key, body)`, ordered by key.
    fn scan(&self, kind: &str) -> std::result::Result<Vec<(String, String)>, StoreError>;

    /// Apply all writes or none of them.
    fn apply(&mut self, writes: Vec<Write>) -> std::result::Result<(), StoreError>;
}

/// In-memory [`Store`].
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    docs: BTreeMap<(String, String), String>,
    batches: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches applied so far.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl Store for MemoryStore {
    fn fetch(&self, kind: &str, key: &str) -> std::result::Result<Option<String>, StoreError> {
        Ok(self.docs.get(&(kind.to_string(), key.to_string())).cloned())
    }

    fn scan(&self, kind: &str) -> std::result::Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .docs
            .range((kind.to_string(), String::new())..)
            .take_while(|((k, _), _)| k == kind)
            .map(|((_, key), body)| (key.clone(), body.clone()))
            .collect())
    }

    fn apply(&mut self, writes: Vec<Write>) -> std::result::Result<(), StoreError> {
        for write in writes {
            self.docs
                .insert((write.kind.to_string(), write.key), write.body);
        }
        self.batches += 1;
        Ok(())
    }
}

/// Unit of work over a [`Store`].
pub struct Ledger<'s, S: Store + ?Sized> {
    store: &'s mut S,
    staged: BTreeMap<(&'static str, String), String>,
}

impl<'s, S: Store + ?Sized> Ledger<'s, S> {
    pub fn new(store: &'s mut S) -> Self {
        Self {
            store,
            staged: BTreeMap::new(),
        }
    }

    /// Load a record if it exists. Staged writes shadow stored ones.
    pub fn get<E: Entity>(&self, key: &str) -> Result<Option<E>> {
        let body = match self.staged.get(&(E::KIND, key.to_string())) {
            Some(body) => Some(body.clone()),
            None => self.store.fetch(E::KIND, key)?,
        };
        body.map(|b| serde_json::from_str(&b).map_err(AccrualError::from))
            .transpose()
    }

    /// Load a record that must exist.
    ///
    /// # Errors
    ///
    /// [`AccrualError::MissingEntity`] if absent.
    pub fn load<E: Entity>(&self, key: &str) -> Result<E> {
        self.get(key)?.ok_or_else(|| AccrualError::MissingEntity {
            kind: E::KIND,
            key: key.to_string(),
        })
    }

    /// Load a record or build it with `create` (not staged until [`Ledger::put`]).
    pub fn get_or<E: Entity>(&self, key: &str, create: impl FnOnce() -> E) -> Result<E> {
        Ok(self.get(key)?.unwrap_or_else(create))
    }

    /// Stage a record write.
    pub fn put<E: Entity>(&mut self, entity: &E) -> Result<()> {
        let body = serde_json::to_string(entity)?;
        self.staged.insert((E::KIND, entity.key()), body);
        Ok(())
    }

    /// All records of a kind, staged versions included, ordered by key.
    pub fn scan<E: Entity>(&self) -> Result<Vec<E>> {
        let mut merged: BTreeMap<String, String> =
            self.store.scan(E::KIND)?.into_iter().collect();
        for ((kind, key), body) in self.staged.range((E::KIND, String::new())..) {
            if *kind != E::KIND {
                break;
            }
            merged.insert(key.clone(), body.clone());
        }
        merged
            .values()
            .map(|b| serde_json::from_str(b).map_err(AccrualError::from))
            .collect()
    }

    /// Number of staged writes.
    pub fn pending(&self) -> usize {
        self.staged.len()
    }

    /// Apply every staged write in one batch.
    pub fn commit(self) -> Result<usize> {
        let writes: Vec<Write> = self
            .staged
            .into_iter()
            .map(|((kind, key), body)| Write { kind, key, body })
            .collect();
        let count = writes.len();
        if count > 0 {
            self.store.apply(writes)?;
        }
        tracing::trace!(writes = count, "ledger committed");
        Ok(count)
    }
}
