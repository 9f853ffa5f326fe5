//! Pending change sets.

use crate::entity::{EntityId, EntityRecord};
use crate::types::{SequenceNumber, TypeName};
use std::collections::HashMap;

/// A pending change for one entity.
///
/// An entity has at most one pending change per change set; recording a new
/// change for the same entity replaces or folds into the existing one.
#[derive(Debug, Clone)]
pub enum PendingChange {
    /// The entity is created by this transaction.
    Created {
        /// The record to insert.
        record: EntityRecord,
    },
    /// An existing entity is edited.
    Edited {
        /// Committed sequence the edit was resolved against. `None` when the
        /// entity was resolved from an ancestor's pending state rather than
        /// the root store.
        baseline: Option<SequenceNumber>,
        /// The record as edited.
        record: EntityRecord,
    },
    /// The entity is deleted.
    Deleted {
        /// Type of the deleted entity.
        type_name: TypeName,
    },
}

/// Pending creations, edits, and deletions scoped to one transaction.
///
/// A change set is mutated only through its owning transaction's bound
/// execution context and is consumed exactly once, at commit time. An
/// abandoned transaction's set is dropped unread.
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// One pending change per entity.
    changes: HashMap<EntityId, PendingChange>,
}

impl ChangeSet {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pending changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Checks whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the pending change for an entity, if any.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&PendingChange> {
        self.changes.get(id)
    }

    /// Iterates over all pending changes.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &PendingChange)> {
        self.changes.iter()
    }

    /// Records a creation.
    pub fn record_create(&mut self, record: EntityRecord) {
        self.changes
            .insert(record.id, PendingChange::Created { record });
    }

    /// Records an edit.
    ///
    /// If the entity is already created in this set, the edit folds into the
    /// creation (the entity stays "created", with the new payload). If it is
    /// already edited, the original baseline is kept. A pending deletion is
    /// replaced by the edit.
    pub fn record_edit(&mut self, baseline: Option<SequenceNumber>, record: EntityRecord) {
        let id = record.id;
        let change = match self.changes.remove(&id) {
            Some(PendingChange::Created { .. }) => PendingChange::Created { record },
            Some(PendingChange::Edited {
                baseline: original, ..
            }) => PendingChange::Edited {
                baseline: original,
                record,
            },
            Some(PendingChange::Deleted { .. }) | None => {
                PendingChange::Edited { baseline, record }
            }
        };
        self.changes.insert(id, change);
    }

    /// Replaces the pending payload of a created or edited entity.
    ///
    /// Returns `false` if the entity is not tracked as created or edited.
    pub fn set_payload(&mut self, id: EntityId, payload: Vec<u8>) -> bool {
        match self.changes.get_mut(&id) {
            Some(PendingChange::Created { record } | PendingChange::Edited { record, .. }) => {
                record.payload = payload;
                true
            }
            _ => false,
        }
    }

    /// Records a deletion.
    ///
    /// Deleting an entity this set created removes the entry entirely: the
    /// net effect is as if the entity never existed.
    pub fn record_delete(&mut self, id: EntityId, type_name: TypeName) {
        match self.changes.get(&id) {
            Some(PendingChange::Created { .. }) => {
                self.changes.remove(&id);
            }
            _ => {
                self.changes.insert(id, PendingChange::Deleted { type_name });
            }
        }
    }

    /// Folds a committed child transaction's set into this one.
    ///
    /// Child edits of entities this set created stay creations; child deletes
    /// of entities this set created erase the entry; everything else overlays
    /// the corresponding entity's pending change.
    pub fn merge_child(&mut self, child: ChangeSet) {
        for (id, change) in child.changes {
            match change {
                PendingChange::Created { record } => self.record_create(record),
                PendingChange::Edited { baseline, record } => self.record_edit(baseline, record),
                PendingChange::Deleted { type_name } => self.record_delete(id, type_name),
            }
        }
    }

    /// Takes the pending changes, leaving the set empty.
    pub(crate) fn take(&mut self) -> ChangeSet {
        ChangeSet {
            changes: std::mem::take(&mut self.changes),
        }
    }

    /// Consumes the set, yielding its changes.
    pub fn into_changes(self) -> impl Iterator<Item = (EntityId, PendingChange)> {
        self.changes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(id: EntityId, payload: Vec<u8>) -> EntityRecord {
        EntityRecord::new(id, "tasks".into(), payload)
    }

    #[test]
    fn create_then_delete_is_net_noop() {
        let mut set = ChangeSet::new();
        let id = EntityId::new();
        set.record_create(record(id, vec![1]));
        set.record_delete(id, "tasks".into());
        assert!(set.is_empty());
    }

    #[test]
    fn edit_of_created_entity_stays_created() {
        let mut set = ChangeSet::new();
        let id = EntityId::new();
        set.record_create(record(id, vec![1]));
        set.record_edit(None, record(id, vec![2]));

        assert_eq!(set.len(), 1);
        match set.get(&id) {
            Some(PendingChange::Created { record }) => assert_eq!(record.payload, vec![2]),
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[test]
    fn edit_keeps_original_baseline() {
        let mut set = ChangeSet::new();
        let id = EntityId::new();
        set.record_edit(Some(SequenceNumber::new(3)), record(id, vec![1]));
        set.record_edit(Some(SequenceNumber::new(9)), record(id, vec![2]));

        match set.get(&id) {
            Some(PendingChange::Edited { baseline, record }) => {
                assert_eq!(*baseline, Some(SequenceNumber::new(3)));
                assert_eq!(record.payload, vec![2]);
            }
            other => panic!("expected Edited, got {other:?}"),
        }
    }

    #[test]
    fn delete_replaces_edit() {
        let mut set = ChangeSet::new();
        let id = EntityId::new();
        set.record_edit(Some(SequenceNumber::new(1)), record(id, vec![1]));
        set.record_delete(id, "tasks".into());

        assert!(matches!(set.get(&id), Some(PendingChange::Deleted { .. })));
    }

    #[test]
    fn set_payload_requires_tracked_entity() {
        let mut set = ChangeSet::new();
        let id = EntityId::new();
        assert!(!set.set_payload(id, vec![1]));

        set.record_create(record(id, vec![1]));
        assert!(set.set_payload(id, vec![2]));

        set.record_delete(id, "tasks".into());
        assert!(!set.set_payload(id, vec![3]));
    }

    #[test]
    fn merge_child_folds_edit_into_parent_create() {
        let mut parent = ChangeSet::new();
        let id = EntityId::new();
        parent.record_create(record(id, vec![1]));

        let mut child = ChangeSet::new();
        child.record_edit(None, record(id, vec![2]));
        parent.merge_child(child);

        match parent.get(&id) {
            Some(PendingChange::Created { record }) => assert_eq!(record.payload, vec![2]),
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[test]
    fn merge_child_delete_erases_parent_create() {
        let mut parent = ChangeSet::new();
        let id = EntityId::new();
        parent.record_create(record(id, vec![1]));

        let mut child = ChangeSet::new();
        child.record_delete(id, "tasks".into());
        parent.merge_child(child);

        assert!(parent.is_empty());
    }

    #[test]
    fn merge_child_overlays_disjoint_changes() {
        let mut parent = ChangeSet::new();
        let kept = EntityId::new();
        parent.record_create(record(kept, vec![1]));

        let mut child = ChangeSet::new();
        let added = EntityId::new();
        child.record_create(record(added, vec![2]));
        let deleted = EntityId::new();
        child.record_delete(deleted, "tasks".into());
        parent.merge_child(child);

        assert_eq!(parent.len(), 3);
        assert!(matches!(
            parent.get(&kept),
            Some(PendingChange::Created { .. })
        ));
        assert!(matches!(
            parent.get(&added),
            Some(PendingChange::Created { .. })
        ));
        assert!(matches!(
            parent.get(&deleted),
            Some(PendingChange::Deleted { .. })
        ));
    }

    // Model of the per-entity state machine, mirrored in the property test.
    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Expect {
        Absent,
        Created,
        Edited,
        Deleted,
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Create,
        Edit,
        Delete,
    }

    fn op_strategy() -> impl Strategy<Value = (usize, Op)> {
        (0..4usize, prop_oneof![Just(Op::Create), Just(Op::Edit), Just(Op::Delete)])
    }

    proptest! {
        #[test]
        fn one_entry_per_entity(ops in prop::collection::vec(op_strategy(), 1..64)) {
            let ids: Vec<EntityId> = (0..4).map(|_| EntityId::new()).collect();
            let mut set = ChangeSet::new();
            let mut expected = [Expect::Absent; 4];

            for (slot, op) in ops {
                let id = ids[slot];
                match op {
                    Op::Create => {
                        set.record_create(record(id, vec![slot as u8]));
                        expected[slot] = Expect::Created;
                    }
                    Op::Edit => {
                        set.record_edit(None, record(id, vec![slot as u8]));
                        expected[slot] = match expected[slot] {
                            Expect::Created => Expect::Created,
                            _ => Expect::Edited,
                        };
                    }
                    Op::Delete => {
                        set.record_delete(id, "tasks".into());
                        expected[slot] = match expected[slot] {
                            Expect::Created => Expect::Absent,
                            _ => Expect::Deleted,
                        };
                    }
                }
            }

            let live = expected.iter().filter(|e| **e != Expect::Absent).count();
            prop_assert_eq!(set.len(), live);

            for (slot, expect) in expected.iter().enumerate() {
                let entry = set.get(&ids[slot]);
                match expect {
                    Expect::Absent => prop_assert!(entry.is_none()),
                    Expect::Created => {
                        let is_created = matches!(entry, Some(PendingChange::Created { .. }));
                        prop_assert!(is_created);
                    }
                    Expect::Edited => {
                        let is_edited = matches!(entry, Some(PendingChange::Edited { .. }));
                        prop_assert!(is_edited);
                    }
                    Expect::Deleted => {
                        let is_deleted = matches!(entry, Some(PendingChange::Deleted { .. }));
                        prop_assert!(is_deleted);
                    }
                }
            }
        }
    }
}
