//! Guild cache, configuration, and the storage facade for the Cadence bot.
//!
//! Command handlers talk to [`BotStorage`] only. It decides per operation
//! whether to answer from the guild cache, from the primary with replica
//! fallback, or from the replica alone, and it keeps the cache in step
//! with every write it performs.
//!
//! # Modules
//!
//! - [`cache`] -- Bounded per-guild settings cache for the message hot path.
//! - [`config`] -- Configuration loading from `cadence-config.yaml` into
//!   strongly-typed structs.
//! - [`storage`] -- [`BotStorage`], the facade over both stores.
//! - [`error`] -- Startup errors.
//!
//! [`BotStorage`]: storage::BotStorage

pub mod cache;
pub mod config;
pub mod error;
pub mod storage;

pub use cache::{CachedGuild, GuildCache, GuildField};
pub use config::CadenceConfig;
pub use error::CoreError;
pub use storage::{BotStorage, StorageSettings};
