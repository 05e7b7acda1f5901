// ABOUTME: Persistence layer for wsjournal, handling the journal, replay, snapshots and collections.
// ABOUTME: Provides the Collection store, its mailbox actor, the storage manager, and env configuration.

pub mod actor;
pub mod collection;
pub mod config;
pub mod journal;
pub mod manager;
pub mod replay;
pub mod snapshot;

pub use actor::{ActorError, ActorOptions, CollectionHandle};
pub use collection::{Collection, CollectionError, CollectionOptions, Keys, SnapshotStats};
pub use config::{ConfigError, StoreConfig};
pub use journal::{Journal, JournalError};
pub use manager::{ManagerError, StorageManager};
pub use replay::{Replay, ReplayError, ReplayPolicy, ReplayReport, replay};
pub use snapshot::{SnapshotData, SnapshotError, load_snapshot, save_snapshot};
