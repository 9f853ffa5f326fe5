//! Error types for the commit path.
//!
//! Only operational failures are represented as errors. Precondition
//! violations (operating off-context, mutating after commit, committing
//! twice) are programmer errors and panic instead; see the crate docs.

use crate::entity::EntityId;
use crate::types::TypeName;
use thiserror::Error;

/// Result of committing a transaction.
///
/// Success carries no payload; failure carries the reason the merge was
/// rejected. A failed merge applies nothing.
pub type CommitResult = Result<(), CommitError>;

/// Reasons the root store can reject a merge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    /// A pending entity failed validation.
    #[error("validation failed for {type_name} entity {entity_id}: {reason}")]
    Validation {
        /// Type of the offending entity.
        type_name: TypeName,
        /// The offending entity.
        entity_id: EntityId,
        /// Description of the violation.
        reason: String,
    },

    /// A pending edit raced with another commit.
    ///
    /// The entity was changed or deleted by a sibling transaction after this
    /// transaction resolved it for editing.
    #[error("commit conflict on {type_name} entity {entity_id}")]
    Conflict {
        /// Type of the conflicting entity.
        type_name: TypeName,
        /// The conflicting entity.
        entity_id: EntityId,
    },
}

impl CommitError {
    /// Creates a validation error.
    pub fn validation(
        type_name: TypeName,
        entity_id: EntityId,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            type_name,
            entity_id,
            reason: reason.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(type_name: TypeName, entity_id: EntityId) -> Self {
        Self::Conflict {
            type_name,
            entity_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_the_entity() {
        let id = EntityId::new();
        let err = CommitError::validation("users".into(), id, "payload too large");
        let msg = err.to_string();
        assert!(msg.contains("users"));
        assert!(msg.contains("payload too large"));
    }

    #[test]
    fn conflict_is_comparable() {
        let id = EntityId::new();
        let a = CommitError::conflict("users".into(), id);
        let b = CommitError::conflict("users".into(), id);
        assert_eq!(a, b);
    }
}
