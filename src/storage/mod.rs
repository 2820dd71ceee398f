//! Collaborator contracts and in-memory reference implementations.
//!
//! The entity directory and relationship service are external to the
//! resolver; these traits are the seam, and the in-memory directory backs
//! tests and embedded use.

mod memory;
mod traits;

pub use memory::InMemoryDirectory;
pub use traits::{EntityDirectory, NoopRedirector, RedirectError, RelationshipRedirector, StorageError};
