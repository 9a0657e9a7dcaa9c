//! Shared type definitions for the Cadence storage core.
//!
//! This crate is the single source of truth for the records the bot
//! persists: guild configuration, votes and premium grants, playlists,
//! liked songs and playback statistics. Both stores hold the same row
//! shapes, so these types are all a caller ever sees regardless of which
//! store answered.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for append-only entities
//! - [`enums`] -- Enumeration types stored as text
//! - [`structs`] -- Entity structs
//! - [`time`] -- Timestamp encoding shared by both stores

pub mod enums;
pub mod ids;
pub mod structs;
pub mod time;

// Re-export all public types at crate root for convenience.
pub use enums::{UnknownVariant, VoteKind};
pub use ids::{LikedSongId, PlaylistId, PlaylistTrackId, VoteId};
pub use structs::{
    GuildConfig, GuildPlays, LikedSong, Mode247, NewTrack, Playlist, PlaylistTrack,
    PremiumStatus, SetupDescriptor, TrackPlay, TrackStats, UserStats, UserVote,
};
pub use time::{is_storable, parse_timestamp, to_timestamp};
