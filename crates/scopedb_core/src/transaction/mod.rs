//! Transaction lifecycle and scoped mutation.
//!
//! A [`Transaction`] is one unit of work against the store: it owns a
//! pending [`ChangeSet`], is bound to a dedicated serialized execution
//! context, and can be committed at most once. Child transactions commit
//! into their parent's pending set; only a top-level commit reaches the
//! root store.

mod changeset;
mod coordinator;

pub use changeset::{ChangeSet, PendingChange};

use crate::context::{run_serialized, Cancelled, ExecutionContext};
use crate::entity::{EntityHandle, EntityId, EntityRecord};
use crate::error::CommitResult;
use crate::observer::NotifyMode;
use crate::store::StoreInner;
use crate::transaction::coordinator::CommitCoordinator;
use crate::types::{SequenceNumber, TransactionId, TypeName};
use parking_lot::Mutex;
use std::panic::panic_any;
use std::sync::Arc;
use tracing::{debug, warn};

/// State of a transaction.
///
/// The only transitions are `Open → Committed` (explicit commit) and
/// `Open → Discarded` (block exit without commit, or cancellation). All
/// mutation operations are valid only while `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// The transaction accepts mutations and may commit.
    Open,
    /// The transaction committed; terminal.
    Committed,
    /// The transaction's block exited without committing; terminal.
    Discarded,
}

/// A scoped, serialized unit of work against the store.
///
/// Transactions are handed to mutation blocks by [`RootStore::begin`] and
/// [`Transaction::child`]; they cannot be constructed directly. Every
/// operation must run on the transaction's bound execution context and
/// panics otherwise (a precondition violation, not a recoverable error).
/// Likewise, any operation after a commit panics: a transaction
/// commits at most once, regardless of the first commit's outcome.
///
/// [`RootStore::begin`]: crate::RootStore::begin
pub struct Transaction {
    /// Transaction identity.
    id: TransactionId,
    /// The bound execution context.
    context: ExecutionContext,
    /// Root store internals, for entity resolution and top-level commits.
    store: Arc<StoreInner>,
    /// This transaction's pending changes. Shared so a child's coordinator
    /// can merge into it while this transaction is blocked in `child`.
    pending: Arc<Mutex<ChangeSet>>,
    /// Ancestor pending sets, nearest parent first. Empty for top-level
    /// transactions; the first entry is the commit target when non-empty.
    ancestors: Vec<Arc<Mutex<ChangeSet>>>,
    /// Nesting depth; 0 for top-level transactions.
    depth: usize,
    /// Current state.
    state: TransactionState,
    /// Result of the commit, once one happened.
    last_commit: Option<CommitResult>,
}

impl Transaction {
    /// Creates a transaction bound to the calling thread.
    ///
    /// Must be called on the worker thread that will run the mutation block.
    fn bind(
        id: TransactionId,
        store: Arc<StoreInner>,
        ancestors: Vec<Arc<Mutex<ChangeSet>>>,
        depth: usize,
        context_name: String,
    ) -> Self {
        Self {
            id,
            context: ExecutionContext::current(context_name),
            store,
            pending: Arc::new(Mutex::new(ChangeSet::new())),
            ancestors,
            depth,
            state: TransactionState::Open,
            last_commit: None,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks whether the transaction has committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.state == TransactionState::Committed
    }

    /// Returns the nesting depth (0 for top-level transactions).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the bound execution context.
    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Returns the number of pending changes.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns the result of this transaction's commit, if one happened.
    #[must_use]
    pub fn last_commit(&self) -> Option<&CommitResult> {
        self.last_commit.as_ref()
    }

    fn assert_open(&self, op: &str) {
        self.context.assert_current(op);
        assert!(
            self.state == TransactionState::Open,
            "{op} on a transaction that is no longer open (state: {:?})",
            self.state
        );
    }

    /// Creates a new entity of the given type in this transaction.
    ///
    /// The entity exists only in this transaction's pending state until a
    /// commit propagates it. Panics if the transaction is no longer open or
    /// the call is off-context.
    pub fn create(&mut self, type_name: impl Into<TypeName>, payload: Vec<u8>) -> EntityHandle {
        self.assert_open("create");
        let record = EntityRecord::new(EntityId::new(), type_name.into(), payload);
        let handle = EntityHandle::new(record.id, record.type_name.clone());
        self.pending.lock().record_create(record);
        handle
    }

    /// Tracks an existing entity for editing.
    ///
    /// Returns `None` if the entity cannot be resolved in this transaction's
    /// scope (never committed, deleted by an enclosing transaction, or of a
    /// different type than the handle claims). Panics if the transaction is
    /// no longer open or the call is off-context.
    pub fn edit(&mut self, handle: &EntityHandle) -> Option<EntityHandle> {
        self.assert_open("edit");
        self.track_edit(handle.id(), handle.type_name())
    }

    /// Tracks an existing entity for editing, resolved by stable identity.
    ///
    /// Same contract as [`Transaction::edit`], for callers that hold the
    /// entity's ID rather than a handle.
    pub fn edit_by_id(
        &mut self,
        type_name: impl Into<TypeName>,
        id: EntityId,
    ) -> Option<EntityHandle> {
        self.assert_open("edit_by_id");
        let type_name = type_name.into();
        self.track_edit(id, &type_name)
    }

    fn track_edit(&mut self, id: EntityId, expected_type: &TypeName) -> Option<EntityHandle> {
        // Already tracked in this transaction?
        {
            let pending = self.pending.lock();
            match pending.get(&id) {
                Some(
                    PendingChange::Created { record } | PendingChange::Edited { record, .. },
                ) => {
                    if record.type_name != *expected_type {
                        return None;
                    }
                    return Some(EntityHandle::new(id, record.type_name.clone()));
                }
                Some(PendingChange::Deleted { .. }) => return None,
                None => {}
            }
        }

        let (baseline, record) = self.resolve(id)?;
        if record.type_name != *expected_type {
            return None;
        }
        let handle = EntityHandle::new(id, record.type_name.clone());
        self.pending.lock().record_edit(baseline, record);
        Some(handle)
    }

    /// Resolves an entity through the scope chain: nearest ancestor's
    /// pending state first, then the root store's committed state.
    fn resolve(&self, id: EntityId) -> Option<(Option<SequenceNumber>, EntityRecord)> {
        for ancestor in &self.ancestors {
            let pending = ancestor.lock();
            match pending.get(&id) {
                Some(PendingChange::Created { record }) => return Some((None, record.clone())),
                Some(PendingChange::Edited { baseline, record }) => {
                    return Some((*baseline, record.clone()));
                }
                Some(PendingChange::Deleted { .. }) => return None,
                None => {}
            }
        }
        self.store
            .committed
            .read()
            .get(&id)
            .map(|entity| (Some(entity.sequence), entity.record.clone()))
    }

    /// Replaces the pending payload of a tracked entity.
    ///
    /// Panics if the handle's entity is not tracked by this transaction
    /// (create or edit it first), if the transaction is no longer open, or
    /// if the call is off-context.
    pub fn put(&mut self, handle: &EntityHandle, payload: Vec<u8>) {
        self.assert_open("put");
        let updated = self.pending.lock().set_payload(handle.id(), payload);
        assert!(
            updated,
            "put on {} entity {} that is not tracked by this transaction",
            handle.type_name(),
            handle.id()
        );
    }

    /// Marks an entity for deletion.
    ///
    /// Deleting an entity created earlier in this same uncommitted
    /// transaction erases it entirely: once committed, it is as if the
    /// entity never existed. Panics if the transaction is no longer open or
    /// the call is off-context.
    pub fn delete(&mut self, handle: &EntityHandle) {
        self.assert_open("delete");
        self.pending
            .lock()
            .record_delete(handle.id(), handle.type_name().clone());
    }

    /// Marks a sequence of entities for deletion; `None` entries are skipped.
    ///
    /// Equivalent to repeated [`Transaction::delete`] calls.
    pub fn delete_all<I>(&mut self, handles: I)
    where
        I: IntoIterator<Item = Option<EntityHandle>>,
    {
        self.assert_open("delete_all");
        let mut pending = self.pending.lock();
        for handle in handles.into_iter().flatten() {
            pending.record_delete(handle.id(), handle.type_name().clone());
        }
    }

    /// Returns the payload a handle's entity currently has in this
    /// transaction's view (pending changes shadow committed state).
    #[must_use]
    pub fn get(&self, handle: &EntityHandle) -> Option<Vec<u8>> {
        self.get_by_id(handle.id())
    }

    /// Returns an entity's payload in this transaction's view.
    #[must_use]
    pub fn get_by_id(&self, id: EntityId) -> Option<Vec<u8>> {
        self.context.assert_current("get");
        {
            let pending = self.pending.lock();
            match pending.get(&id) {
                Some(
                    PendingChange::Created { record } | PendingChange::Edited { record, .. },
                ) => return Some(record.payload.clone()),
                Some(PendingChange::Deleted { .. }) => return None,
                None => {}
            }
        }
        self.resolve(id).map(|(_, record)| record.payload)
    }

    /// Runs a child transaction whose commits target this transaction's
    /// pending state, not the root store.
    ///
    /// The child's block runs on its own serialized context; this
    /// transaction blocks until the block finishes, so parent and child
    /// never interleave. Returns the child's commit result, or `None` if
    /// the child was never committed. Panics if this transaction is no
    /// longer open or the call is off-context.
    pub fn child<F>(&mut self, f: F) -> Option<CommitResult>
    where
        F: FnOnce(&mut Transaction) + Send,
    {
        self.assert_open("child");
        let id = self.store.next_txn_id();
        let mut ancestors = Vec::with_capacity(self.ancestors.len() + 1);
        ancestors.push(Arc::clone(&self.pending));
        ancestors.extend(self.ancestors.iter().cloned());
        run_block(Arc::clone(&self.store), id, ancestors, self.depth + 1, f)
    }

    /// Commits this transaction, propagating its pending changes to the
    /// parent aggregate without waiting for observer notification.
    ///
    /// The merge itself is applied before this returns, so sibling readers
    /// see the new state, but observer callbacks may still be running.
    /// Panics if already committed or off-context; the commit-once state
    /// flips before the merge runs, so a second call always faults even
    /// when the first merge failed.
    pub fn commit(&mut self) -> CommitResult {
        self.finish(NotifyMode::Deferred, "commit")
    }

    /// Commits this transaction and blocks until every observer has
    /// processed the change.
    ///
    /// Same preconditions and commit-once behavior as
    /// [`Transaction::commit`]. Eliminates the window where a committed
    /// change is visible to readers but not yet observed; in exchange, an
    /// observer that itself commits-and-waits on the same store deadlocks.
    pub fn commit_and_wait(&mut self) -> CommitResult {
        self.finish(NotifyMode::Wait, "commit_and_wait")
    }

    fn finish(&mut self, mode: NotifyMode, op: &str) -> CommitResult {
        self.assert_open(op);
        // Commit-once: the state flips before the merge runs, so a second
        // commit faults regardless of this one's outcome.
        self.state = TransactionState::Committed;
        let changes = self.pending.lock().take();
        let result = match self.ancestors.first() {
            Some(parent) => CommitCoordinator::commit_to_parent(parent, changes),
            None => CommitCoordinator::commit_to_root(&self.store, changes, mode),
        };
        self.last_commit = Some(result.clone());
        result
    }

    /// Aborts the mutation block immediately; never returns.
    ///
    /// Unwinds to the block runner via a distinguished signal. Pending
    /// changes are discarded; no statement after this call executes. Panics
    /// (with an ordinary precondition fault) if the transaction is no
    /// longer open or the call is off-context; in particular, a committed
    /// transaction cannot be cancelled.
    pub fn cancel(&self) -> ! {
        self.assert_open("cancel");
        debug!(txn = %self.id, "cancelling transaction block");
        panic_any(Cancelled)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("depth", &self.depth)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// Runs a mutation block on a fresh serialized context and interprets its
/// exit: a committed transaction yields its result, an open one is
/// discarded (with a diagnostic when changes are dropped), a cancellation
/// is discarded quietly, and any other panic is propagated.
pub(crate) fn run_block<F>(
    store: Arc<StoreInner>,
    id: TransactionId,
    ancestors: Vec<Arc<Mutex<ChangeSet>>>,
    depth: usize,
    f: F,
) -> Option<CommitResult>
where
    F: FnOnce(&mut Transaction) + Send,
{
    let name = format!("{}-{}", store.config.thread_name, id.as_u64());
    let mut txn = run_serialized(&name, {
        let name = name.clone();
        move || {
            let mut txn = Transaction::bind(id, store, ancestors, depth, name);
            f(&mut txn);
            txn
        }
    })?;

    match txn.state {
        TransactionState::Committed => txn.last_commit,
        TransactionState::Open => {
            let dropped = txn.pending.lock().len();
            if dropped > 0 {
                warn!(
                    txn = %txn.id,
                    pending = dropped,
                    "transaction block exited without commit; discarding pending changes"
                );
            }
            txn.state = TransactionState::Discarded;
            None
        }
        TransactionState::Discarded => None,
    }
}
