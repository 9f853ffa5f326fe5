//! Commit coordination.
//!
//! The coordinator performs the save-and-propagate protocol for a
//! transaction that is ready to commit: merging its change set into the
//! parent aggregate (the root store, or an enclosing transaction's pending
//! set) and reporting the outcome. Root merges are all-or-nothing: the
//! whole set is validated before any of it is applied.

use crate::entity::EntityRecord;
use crate::error::{CommitError, CommitResult};
use crate::observer::{ChangeEvent, NotifyMode};
use crate::store::{CommittedEntity, StoreInner};
use crate::transaction::changeset::{ChangeSet, PendingChange};
use crate::types::SequenceNumber;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use tracing::debug;

/// Merges change sets into their parent aggregate.
pub(crate) struct CommitCoordinator;

impl CommitCoordinator {
    /// Merges `changes` into the root store and dispatches change events.
    ///
    /// The merge runs under the committed-map write lock, so it is fully
    /// applied and visible to sibling readers before this function returns,
    /// in both notification modes. With [`NotifyMode::Wait`] the call then
    /// blocks until every observer has processed the batch; an observer
    /// that itself commits-and-waits on the same store will deadlock, since
    /// the notifier cannot drain its queue while it is the one waiting.
    pub(crate) fn commit_to_root(
        store: &StoreInner,
        changes: ChangeSet,
        mode: NotifyMode,
    ) -> CommitResult {
        let mut committed = store.committed.write();

        // Validate phase: first violation rejects the whole set.
        for (id, change) in changes.iter() {
            match change {
                PendingChange::Created { record } => {
                    check_payload(store, record)?;
                    if committed.contains_key(id) {
                        return Err(CommitError::validation(
                            record.type_name.clone(),
                            *id,
                            "entity already exists",
                        ));
                    }
                }
                PendingChange::Edited { baseline, record } => {
                    check_payload(store, record)?;
                    match committed.get(id) {
                        None => {
                            return Err(CommitError::conflict(record.type_name.clone(), *id));
                        }
                        Some(current) => {
                            if let Some(baseline) = baseline {
                                if current.sequence != *baseline {
                                    return Err(CommitError::conflict(
                                        record.type_name.clone(),
                                        *id,
                                    ));
                                }
                            }
                        }
                    }
                }
                PendingChange::Deleted { .. } => {}
            }
        }

        // Apply phase: one sequence number for the whole commit.
        let sequence = SequenceNumber::new(store.next_seq.fetch_add(1, Ordering::SeqCst));
        let mut events = Vec::with_capacity(changes.len());
        for (id, change) in changes.into_changes() {
            match change {
                PendingChange::Created { record } => {
                    events.push(ChangeEvent::created(
                        sequence,
                        record.type_name.clone(),
                        id,
                        record.payload.clone(),
                    ));
                    committed.insert(id, CommittedEntity { record, sequence });
                }
                PendingChange::Edited { record, .. } => {
                    events.push(ChangeEvent::updated(
                        sequence,
                        record.type_name.clone(),
                        id,
                        record.payload.clone(),
                    ));
                    committed.insert(id, CommittedEntity { record, sequence });
                }
                PendingChange::Deleted { type_name } => {
                    // Deleting an entity that is already gone is a no-op.
                    if committed.remove(&id).is_some() {
                        events.push(ChangeEvent::deleted(sequence, type_name, id));
                    }
                }
            }
        }
        store.committed_seq.store(sequence.as_u64(), Ordering::SeqCst);
        debug!(%sequence, events = events.len(), "merged change set into root store");

        // Enqueue while still holding the write lock so delivery order
        // matches commit order, then release before blocking on the ack.
        let ack = store.notifier.enqueue(events, mode);
        drop(committed);
        if let Some(ack) = ack {
            let _ = ack.recv();
        }
        Ok(())
    }

    /// Merges a child's `changes` into its parent transaction's pending set.
    ///
    /// The parent is blocked for the child's whole block, so the lock is
    /// uncontended. Validation happens once, at the root; a nested merge
    /// cannot fail, and the notification mode only matters at the root.
    pub(crate) fn commit_to_parent(parent: &Mutex<ChangeSet>, changes: ChangeSet) -> CommitResult {
        parent.lock().merge_child(changes);
        Ok(())
    }
}

fn check_payload(store: &StoreInner, record: &EntityRecord) -> Result<(), CommitError> {
    if let Some(max) = store.config.max_payload_size {
        if record.payload.len() > max {
            return Err(CommitError::validation(
                record.type_name.clone(),
                record.id,
                format!("payload size {} exceeds maximum {max}", record.payload.len()),
            ));
        }
    }
    Ok(())
}
