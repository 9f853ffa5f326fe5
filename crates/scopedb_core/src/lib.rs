//! Transaction lifecycle and commit coordination over a shared in-memory
//! object store.
//!
//! A [`RootStore`] holds the committed state. All mutation happens inside
//! transactions: [`RootStore::begin`] runs a mutation block on a dedicated
//! serialized execution context and hands it a [`Transaction`]. The block
//! stages creates, edits, and deletes in a pending [`ChangeSet`], then
//! either commits (at most once) or lets the changes be discarded.
//!
//! Commits propagate upward: a child transaction opened with
//! [`Transaction::child`] commits into its parent's pending set, and only
//! a top-level commit merges into the root store. Root merges are
//! all-or-nothing and assign one [`SequenceNumber`] per commit;
//! [`Transaction::commit_and_wait`] additionally blocks until every
//! registered observer has processed the change.
//!
//! ```
//! use scopedb_core::RootStore;
//!
//! let store = RootStore::new();
//! store.begin(|txn| {
//!     let task = txn.create("tasks", b"ship it".to_vec());
//!     txn.child(|draft| {
//!         draft.create("notes", b"double-check the dates".to_vec());
//!         draft.commit().unwrap();
//!     });
//!     assert_eq!(txn.get(&task), Some(b"ship it".to_vec()));
//!     txn.commit_and_wait().unwrap();
//! });
//! assert_eq!(store.len(), 2);
//! ```

mod config;
mod context;
mod entity;
mod error;
mod observer;
mod store;
mod transaction;
mod types;

pub use config::StoreConfig;
pub use context::ExecutionContext;
pub use entity::{EntityHandle, EntityId, EntityRecord};
pub use error::{CommitError, CommitResult};
pub use observer::{ChangeEvent, ChangeKind};
pub use store::RootStore;
pub use transaction::{ChangeSet, PendingChange, Transaction, TransactionState};
pub use types::{SequenceNumber, TransactionId, TypeName};
