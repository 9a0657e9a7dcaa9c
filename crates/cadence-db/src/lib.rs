//! Dual-store persistence engine for the Cadence music bot.
//!
//! Every record lives in two stores: an embedded SQLite file next to the
//! process (the primary) and a networked `PostgreSQL` database shared by all
//! processes (the replica). Hot-path reads and writes hit the primary and
//! fall back to the replica only when the primary fails; every write is then
//! replayed on the replica in the background so the two converge without the
//! caller waiting.
//!
//! # Architecture
//!
//! ```text
//! caller
//!     |
//!     +-- fallback::execute ------------> primary (SqlStore, SQLite)
//!     |                          else --> replica (SqlStore, PostgreSQL)
//!     |
//!     +-- WriteSync (writes only) ------> replica, detached FIFO worker
//!
//! boot / recovery
//!     |
//!     +-- FullResync ----> replica --(clear + batched insert)--> primary
//! ```
//!
//! # Modules
//!
//! - [`store`] -- The [`Store`] trait shared by both stores, plus row types
//! - [`sql`] -- Pooled SQL implementation over the `sqlx` `Any` driver
//! - [`memory`] -- In-memory implementation with switchable availability
//! - [`fallback`] -- Primary-then-replica execution
//! - [`write_sync`] -- Background replica replay queue
//! - [`resync`] -- Full replica-to-primary copy
//! - [`error`] -- Shared error types

pub mod error;
pub mod fallback;
pub mod memory;
pub mod resync;
pub mod sql;
pub mod store;
pub mod write_sync;

// Re-export primary types for convenience.
pub use error::{DbError, StorageError};
pub use fallback::Served;
pub use memory::MemoryStore;
pub use resync::{FullResync, RESYNC_BATCH_SIZE, ResyncReport, TableReport};
pub use sql::{Dialect, SqlStore, StoreConfig, StoreRole};
pub use store::{GuildUpdate, PlaylistRow, Record, Store, Table, WriteOutcome};
pub use write_sync::{SyncFailure, SyncStats, WriteSync};
