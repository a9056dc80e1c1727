//! Storage backends for the Pinhole URL shortener.
//!
//! [`InMemoryRepository`] keeps everything in process and is persisted with
//! [`SnapshotPersister`]. [`MySqlRepository`] is the networked alternative.

pub mod memory;
pub mod mysql;
pub mod snapshot;

pub use memory::InMemoryRepository;
pub use mysql::MySqlRepository;
pub use pinhole_core::{ReadRepository, Repository, StorageError};
pub use snapshot::{SnapshotError, SnapshotPersister};
