//! Entity identity, records, and handles.

mod id;
mod record;

pub use id::EntityId;
pub use record::{EntityHandle, EntityRecord};
