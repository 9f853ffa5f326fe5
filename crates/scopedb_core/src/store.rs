//! The shared root store.

use crate::config::StoreConfig;
use crate::entity::{EntityHandle, EntityId, EntityRecord};
use crate::error::CommitResult;
use crate::observer::{ChangeEvent, Notifier};
use crate::transaction::{run_block, Transaction};
use crate::types::{SequenceNumber, TransactionId, TypeName};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// A committed entity with the sequence of the commit that produced it.
#[derive(Debug, Clone)]
pub(crate) struct CommittedEntity {
    pub(crate) record: EntityRecord,
    pub(crate) sequence: SequenceNumber,
}

/// Shared internals behind a [`RootStore`] handle.
pub(crate) struct StoreInner {
    /// Store configuration.
    pub(crate) config: StoreConfig,
    /// Committed entities. The write lock is the serialization point for
    /// commits; sibling transactions interact only through it.
    pub(crate) committed: RwLock<HashMap<EntityId, CommittedEntity>>,
    /// Next commit sequence number.
    pub(crate) next_seq: AtomicU64,
    /// Latest committed sequence number.
    pub(crate) committed_seq: AtomicU64,
    /// Next transaction ID.
    next_txn: AtomicU64,
    /// Observer registries and the delivery thread.
    pub(crate) notifier: Notifier,
}

impl StoreInner {
    pub(crate) fn next_txn_id(&self) -> TransactionId {
        TransactionId::new(self.next_txn.fetch_add(1, Ordering::SeqCst))
    }
}

/// The shared, in-memory object store that transactions merge into.
///
/// `RootStore` is a cheap-to-clone handle; clones share the same store.
/// All mutation goes through [`RootStore::begin`]: the store itself exposes
/// only reads and observer registration.
///
/// # Example
///
/// ```
/// use scopedb_core::RootStore;
///
/// let store = RootStore::new();
/// let outcome = store.begin(|txn| {
///     let _task = txn.create("tasks", b"write the report".to_vec());
///     let result = txn.commit_and_wait();
///     assert!(result.is_ok());
/// });
/// assert!(outcome.is_some());
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Clone)]
pub struct RootStore {
    inner: Arc<StoreInner>,
}

impl RootStore {
    /// Creates an empty store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates an empty store with the given configuration.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                committed: RwLock::new(HashMap::new()),
                next_seq: AtomicU64::new(1),
                committed_seq: AtomicU64::new(0),
                next_txn: AtomicU64::new(1),
                notifier: Notifier::spawn(),
            }),
        }
    }

    /// Begins a top-level transaction.
    ///
    /// The mutation block runs on a dedicated, serialized execution context
    /// (a fresh named worker thread); the caller blocks until the block
    /// finishes. Returns the transaction's commit result, or `None` if the
    /// block exited without committing (the pending changes are discarded
    /// and a diagnostic is logged when any existed).
    pub fn begin<F>(&self, f: F) -> Option<CommitResult>
    where
        F: FnOnce(&mut Transaction) + Send,
    {
        let id = self.inner.next_txn_id();
        run_block(Arc::clone(&self.inner), id, Vec::new(), 0, f)
    }

    /// Returns the committed payload for a handle's entity.
    #[must_use]
    pub fn get(&self, handle: &EntityHandle) -> Option<Vec<u8>> {
        self.get_by_id(handle.id())
    }

    /// Returns the committed payload for an entity.
    #[must_use]
    pub fn get_by_id(&self, id: EntityId) -> Option<Vec<u8>> {
        self.inner
            .committed
            .read()
            .get(&id)
            .map(|entity| entity.record.payload.clone())
    }

    /// Returns the committed record for an entity.
    #[must_use]
    pub fn get_record(&self, id: EntityId) -> Option<EntityRecord> {
        self.inner
            .committed
            .read()
            .get(&id)
            .map(|entity| entity.record.clone())
    }

    /// Checks whether an entity exists.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.inner.committed.read().contains_key(&id)
    }

    /// Returns the number of committed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.committed.read().len()
    }

    /// Checks whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.committed.read().is_empty()
    }

    /// Returns the number of committed entities of one type.
    #[must_use]
    pub fn count_of_type(&self, type_name: impl Into<TypeName>) -> usize {
        let type_name = type_name.into();
        self.inner
            .committed
            .read()
            .values()
            .filter(|entity| entity.record.type_name == type_name)
            .count()
    }

    /// Returns the latest committed sequence number.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        SequenceNumber::new(self.inner.committed_seq.load(Ordering::SeqCst))
    }

    /// Registers a callback observer.
    ///
    /// Observers receive each commit's events as one batch, in commit order,
    /// on a dedicated notifier thread. `commit_and_wait` does not return
    /// until every observer has processed the commit's batch.
    pub fn observe(&self, observer: impl Fn(&[ChangeEvent]) + Send + Sync + 'static) {
        self.inner.notifier.observe(observer);
    }

    /// Subscribes to the committed event stream.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.inner.notifier.subscribe()
    }
}

impl Default for RootStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RootStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootStore")
            .field("len", &self.len())
            .field("sequence", &self.sequence())
            .finish_non_exhaustive()
    }
}
