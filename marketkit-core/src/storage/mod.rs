//! Durable storage for the session: the host-facing trait, the fixed keys,
//! and two ready-made backends.

pub mod error;
pub mod file;
pub(crate) mod keys;
pub mod memory;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::{KeyValueStore, KeyWrite};
