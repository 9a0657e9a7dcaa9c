//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Append-only entities (playlists, playlist tracks, votes, liked songs)
//! carry strongly-typed ids so a playlist id can never be passed where a
//! track id is expected. All ids use UUID v7 (time-ordered), which keeps
//! the `TEXT` primary keys roughly insertion-ordered in both stores.
//!
//! Guild and user identifiers are Discord snowflakes and stay plain
//! strings; they are owned by the gateway, not by this crate.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a user playlist.
    PlaylistId
}

define_id! {
    /// Unique identifier for one track entry inside a playlist.
    PlaylistTrackId
}

define_id! {
    /// Unique identifier for a vote or premium grant row.
    VoteId
}

define_id! {
    /// Unique identifier for a liked-song row.
    LikedSongId
}
