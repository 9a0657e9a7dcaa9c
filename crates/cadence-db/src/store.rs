//! The store seam shared by the primary and the replica.
//!
//! [`Store`] is implemented by [`SqlStore`](crate::sql::SqlStore) (both the
//! embedded SQLite primary and the `PostgreSQL` replica) and by
//! [`MemoryStore`](crate::memory::MemoryStore). The dual-store machinery
//! ([`fallback`](crate::fallback), [`write_sync`](crate::write_sync),
//! [`resync`](crate::resync)) is generic over it and never knows which
//! backend it talks to.
//!
//! Methods return `impl Future + Send` rather than using `async fn` in the
//! trait so that replica operations can be moved into the background
//! write-sync worker.
//!
//! # Idempotence
//!
//! Every write that the write-sync worker may replay is idempotent when
//! called again with the same arguments:
//!
//! - [`Store::update_guild`] is an upsert of one field group.
//! - [`Store::backfill_guild`] only fills what is missing.
//! - [`Store::add_vote`] extends the active row of the same kind to the
//!   given expiry instead of inserting a second row.
//! - [`Store::like_song`] and [`Store::create_playlist`] report
//!   [`WriteOutcome::Conflict`] instead of inserting a duplicate.

use std::future::Future;

use cadence_types::{
    GuildConfig, GuildPlays, LikedSong, Mode247, NewTrack, Playlist, PlaylistId, PlaylistTrack,
    PlaylistTrackId, SetupDescriptor, TrackPlay, TrackStats, UserStats, UserVote, is_storable,
};
use chrono::{DateTime, Utc};

use crate::error::DbError;

/// Result of a conditional insert.
///
/// Conflicts are an expected outcome, not an error: callers switch on the
/// tag instead of matching on error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    /// The row was written.
    Written(T),
    /// A row with the same natural key already exists; nothing changed.
    Conflict,
}

impl<T> WriteOutcome<T> {
    /// Whether the row was written.
    pub const fn is_written(&self) -> bool {
        matches!(self, Self::Written(_))
    }

    /// The written value, if any.
    pub fn written(self) -> Option<T> {
        match self {
            Self::Written(value) => Some(value),
            Self::Conflict => None,
        }
    }
}

/// A single field-group change to a guild's configuration.
///
/// Applying an update upserts the guild row, so the first write to an
/// unknown guild creates it with every other field at its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuildUpdate {
    /// Set or clear the locale override.
    Locale(Option<String>),
    /// Set or clear the command prefix override.
    Prefix(Option<String>),
    /// Set or clear the default volume.
    DefaultVolume(Option<u8>),
    /// Set or clear the setup message location.
    Setup(Option<SetupDescriptor>),
    /// Replace the 24/7 mode settings.
    Mode247(Mode247),
    /// Toggle voice channel status updates.
    VoiceStatus(bool),
}

impl GuildUpdate {
    /// Apply the change to an in-memory row.
    pub fn apply(&self, config: &mut GuildConfig) {
        match self {
            Self::Locale(locale) => config.locale.clone_from(locale),
            Self::Prefix(prefix) => config.prefix.clone_from(prefix),
            Self::DefaultVolume(volume) => config.default_volume = *volume,
            Self::Setup(setup) => {
                config.setup_channel_id = setup.as_ref().map(|s| s.channel_id.clone());
                config.setup_message_id = setup.as_ref().map(|s| s.message_id.clone());
            }
            Self::Mode247(mode) => {
                config.enabled_247 = mode.enabled;
                config.channel_247_id.clone_from(&mode.voice_channel_id);
                config.text_247_id.clone_from(&mode.text_channel_id);
            }
            Self::VoiceStatus(enabled) => config.voice_status_enabled = *enabled,
        }
    }
}

/// The identity of a playlist without its tracks, as stored in the
/// `playlists` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRow {
    /// Playlist id.
    pub id: PlaylistId,
    /// Owner snowflake.
    pub user_id: String,
    /// Name, unique per owner.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl PlaylistRow {
    /// Attach a track list.
    pub fn with_tracks(self, tracks: Vec<PlaylistTrack>) -> Playlist {
        Playlist {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            created_at: self.created_at,
            tracks,
        }
    }
}

/// A table copied by the full resync, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// `guilds`
    Guilds,
    /// `user_votes`
    UserVotes,
    /// `playlists`
    Playlists,
    /// `playlist_tracks` (references `playlists`)
    PlaylistTracks,
    /// `liked_songs`
    LikedSongs,
    /// `track_stats`
    TrackStats,
    /// `user_stats`
    UserStats,
}

impl Table {
    /// Every table, parents before children.
    pub const ALL: [Self; 7] = [
        Self::Guilds,
        Self::UserVotes,
        Self::Playlists,
        Self::PlaylistTracks,
        Self::LikedSongs,
        Self::TrackStats,
        Self::UserStats,
    ];

    /// The SQL table name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Guilds => "guilds",
            Self::UserVotes => "user_votes",
            Self::Playlists => "playlists",
            Self::PlaylistTracks => "playlist_tracks",
            Self::LikedSongs => "liked_songs",
            Self::TrackStats => "track_stats",
            Self::UserStats => "user_stats",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of any table, used to copy tables between stores verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A `guilds` row.
    Guild(GuildConfig),
    /// A `user_votes` row.
    Vote(UserVote),
    /// A `playlists` row.
    Playlist(PlaylistRow),
    /// A `playlist_tracks` row.
    PlaylistTrack(PlaylistTrack),
    /// A `liked_songs` row.
    LikedSong(LikedSong),
    /// A `track_stats` row.
    TrackStats(TrackStats),
    /// A `user_stats` row.
    UserStats(UserStats),
}

impl Record {
    /// The table the row belongs to.
    pub const fn table(&self) -> Table {
        match self {
            Self::Guild(_) => Table::Guilds,
            Self::Vote(_) => Table::UserVotes,
            Self::Playlist(_) => Table::Playlists,
            Self::PlaylistTrack(_) => Table::PlaylistTracks,
            Self::LikedSong(_) => Table::LikedSongs,
            Self::TrackStats(_) => Table::TrackStats,
            Self::UserStats(_) => Table::UserStats,
        }
    }
}

/// Refuse vote times whose text encoding would not sort or decode.
pub(crate) fn check_vote_times(vote: &UserVote) -> Result<(), DbError> {
    if is_storable(vote.voted_at) && is_storable(vote.expires_at) {
        Ok(())
    } else {
        Err(DbError::InvalidRecord(format!(
            "user_votes: vote {} has a timestamp outside years 0-9999",
            vote.id
        )))
    }
}

/// Operations every backing store provides.
///
/// Stores are cheap to clone (they wrap pooled or shared handles) and a
/// clone talks to the same data.
pub trait Store: Clone + Send + Sync + 'static {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Apply pending schema migrations.
    fn migrate(&self) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Cheap round-trip to check the store is reachable.
    fn ping(&self) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Release pooled connections.
    fn close(&self) -> impl Future<Output = ()> + Send;

    // -- guilds ------------------------------------------------------------

    /// Load a guild's configuration row.
    fn get_guild(
        &self,
        guild_id: &str,
    ) -> impl Future<Output = Result<Option<GuildConfig>, DbError>> + Send;

    /// Upsert one field group of a guild row and return the full row.
    fn update_guild(
        &self,
        guild_id: &str,
        update: &GuildUpdate,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<GuildConfig, DbError>> + Send;

    /// Merge a guild row learned from the other store into this one.
    ///
    /// With `if_updated_at = None` the row is inserted only if the guild is
    /// absent. With `Some(t)`, a row last updated exactly at `t` keeps the
    /// overrides it has set (locale, prefix, volume, setup), takes `row`'s
    /// for the ones it lacks, and takes `row`'s 24/7 and voice status
    /// fields; a row updated at any other time is left alone. Returns
    /// whether a row was written.
    fn backfill_guild(
        &self,
        row: &GuildConfig,
        if_updated_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<bool, DbError>> + Send;

    /// Delete a guild row. Returns whether a row existed.
    fn delete_guild(&self, guild_id: &str) -> impl Future<Output = Result<bool, DbError>> + Send;

    // -- votes -------------------------------------------------------------

    /// Record a vote or premium grant.
    ///
    /// If the user already has an active row of the same kind at
    /// `vote.voted_at`, that row's expiry is moved to `vote.expires_at`
    /// and returned; otherwise `vote` is inserted as given.
    fn add_vote(&self, vote: &UserVote) -> impl Future<Output = Result<UserVote, DbError>> + Send;

    /// All rows of a user that are still active at `now`.
    fn active_votes(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<UserVote>, DbError>> + Send;

    // -- playlists ---------------------------------------------------------

    /// A user's playlists, oldest first, each with its tracks.
    fn playlists_for_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<Playlist>, DbError>> + Send;

    /// One playlist with its tracks.
    fn playlist_by_id(
        &self,
        id: PlaylistId,
    ) -> impl Future<Output = Result<Option<Playlist>, DbError>> + Send;

    /// Create an empty playlist; conflicts when the owner already has a
    /// playlist with that name.
    fn create_playlist(
        &self,
        row: &PlaylistRow,
    ) -> impl Future<Output = Result<WriteOutcome<Playlist>, DbError>> + Send;

    /// Append tracks in order. Returns the updated playlist, or `None` if
    /// the playlist does not exist.
    fn add_tracks(
        &self,
        id: PlaylistId,
        tracks: &[NewTrack],
    ) -> impl Future<Output = Result<Option<Playlist>, DbError>> + Send;

    /// Remove one track entry. Returns whether it existed.
    fn remove_track(
        &self,
        id: PlaylistId,
        track_id: PlaylistTrackId,
    ) -> impl Future<Output = Result<bool, DbError>> + Send;

    /// Delete a playlist and its tracks. Returns whether it existed.
    fn delete_playlist(&self, id: PlaylistId) -> impl Future<Output = Result<bool, DbError>> + Send;

    // -- liked songs -------------------------------------------------------

    /// Like a song; conflicts when the user already liked that url.
    fn like_song(
        &self,
        song: &LikedSong,
    ) -> impl Future<Output = Result<WriteOutcome<LikedSong>, DbError>> + Send;

    /// Remove a like. Returns whether it existed.
    fn unlike_song(
        &self,
        user_id: &str,
        url: &str,
    ) -> impl Future<Output = Result<bool, DbError>> + Send;

    /// A user's liked songs, most recent first.
    fn liked_songs(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<LikedSong>, DbError>> + Send;

    // -- statistics --------------------------------------------------------

    /// Delete track rows last played before `cutoff`, then count one play.
    fn record_track_play(
        &self,
        guild_id: &str,
        play: &TrackPlay,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<TrackStats, DbError>> + Send;

    /// Delete user rows last played before `cutoff`, then count one play.
    fn record_user_play(
        &self,
        guild_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<UserStats, DbError>> + Send;

    /// Most played tracks of a guild.
    fn top_tracks(
        &self,
        guild_id: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<TrackStats>, DbError>> + Send;

    /// Most active users of a guild.
    fn top_users(
        &self,
        guild_id: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<UserStats>, DbError>> + Send;

    /// Guilds with the most plays.
    fn top_guilds(&self, limit: u32)
    -> impl Future<Output = Result<Vec<GuildPlays>, DbError>> + Send;

    // -- bulk copy ---------------------------------------------------------

    /// Every row of a table.
    fn read_table(&self, table: Table)
    -> impl Future<Output = Result<Vec<Record>, DbError>> + Send;

    /// Delete every row of a table. Returns the number of rows removed.
    fn clear_table(&self, table: Table) -> impl Future<Output = Result<u64, DbError>> + Send;

    /// Insert rows verbatim, all or nothing. Returns the number inserted.
    fn insert_records(
        &self,
        records: &[Record],
    ) -> impl Future<Output = Result<u64, DbError>> + Send;
}
