//! Core infrastructure shared by the tierstore crates: the event system used
//! by every component for observability, the unified [`StorageError`] type
//! surfaced to callers, and the object metadata model.

pub mod error;
pub mod events;
pub mod object;

pub use error::{ErrorCode, StorageError, StorageResult};
pub use events::{EventListener, EventListeners, FnListener, StorageEvent};
pub use object::{ByteRange, ObjectMetadata};
