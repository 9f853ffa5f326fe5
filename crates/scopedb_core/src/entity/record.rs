//! Entity records and live handles.

use crate::entity::EntityId;
use crate::types::TypeName;

/// A typed entity with its payload.
///
/// Records are the unit staged in change sets and merged into the root
/// store. Payloads are opaque bytes; encoding is the caller's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    /// Stable identity of the entity.
    pub id: EntityId,
    /// Type of the entity.
    pub type_name: TypeName,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl EntityRecord {
    /// Creates a new record.
    #[must_use]
    pub fn new(id: EntityId, type_name: TypeName, payload: Vec<u8>) -> Self {
        Self {
            id,
            type_name,
            payload,
        }
    }
}

/// A live handle to an entity tracked by a transaction.
///
/// Handles are returned by [`Transaction::create`] and [`Transaction::edit`]
/// and are only meaningful on the execution context of the transaction that
/// issued them. Using a handle with a different transaction resolves the
/// entity by its stable identity, the same as [`Transaction::edit_by_id`].
///
/// [`Transaction::create`]: crate::Transaction::create
/// [`Transaction::edit`]: crate::Transaction::edit
/// [`Transaction::edit_by_id`]: crate::Transaction::edit_by_id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityHandle {
    id: EntityId,
    type_name: TypeName,
}

impl EntityHandle {
    pub(crate) fn new(id: EntityId, type_name: TypeName) -> Self {
        Self { id, type_name }
    }

    /// Returns the entity's stable identity.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Returns the entity's type.
    #[must_use]
    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_construction() {
        let id = EntityId::new();
        let record = EntityRecord::new(id, "users".into(), vec![1, 2, 3]);
        assert_eq!(record.id, id);
        assert_eq!(record.type_name.as_str(), "users");
        assert_eq!(record.payload, vec![1, 2, 3]);
    }

    #[test]
    fn handle_accessors() {
        let id = EntityId::new();
        let handle = EntityHandle::new(id, "users".into());
        assert_eq!(handle.id(), id);
        assert_eq!(handle.type_name().as_str(), "users");
    }
}
