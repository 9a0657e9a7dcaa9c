//! The storage facade used by command handlers.
//!
//! [`BotStorage`] is the single entry point for persistence. Callers ask for
//! domain values (a guild's prefix, a user's premium status, a playlist) and
//! never learn which store answered.
//!
//! # Routing
//!
//! | Operations | Path |
//! |------------|------|
//! | locale, prefix, default volume, setup | cache, then primary, else replica; writes replay on the replica |
//! | votes, premium | primary, else replica; writes replay on the replica |
//! | 24/7 mode, voice status, stats, playlists, liked songs | replica only |
//!
//! The replica-only operations are not on the per-message path, so they
//! trade availability for simplicity: a replica outage fails them with
//! [`StorageError::Store`].
//!
//! # Backfill
//!
//! The primary may lag the replica (a new file, or one that missed writes
//! while the replica was ahead). Whenever the replica answers a lookup the
//! primary had no row for, the row is copied into the primary in the
//! background. The first write that creates a guild row on the primary
//! likewise pulls the replica's other fields in, so a partial local row
//! never hides settings only the replica knows.

use cadence_db::{
    DbError, FullResync, GuildUpdate, PlaylistRow, ResyncReport, Served, SqlStore, Store,
    StorageError, StoreConfig, SyncFailure, SyncStats, WriteOutcome, WriteSync, fallback,
};
use cadence_types::{
    GuildConfig, GuildPlays, LikedSong, LikedSongId, Mode247, NewTrack, Playlist, PlaylistId,
    PlaylistTrackId, PremiumStatus, SetupDescriptor, TrackPlay, TrackStats, UserStats, UserVote,
    VoteId, VoteKind, is_storable,
};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;

use crate::cache::{CachedGuild, GuildCache};
use crate::config::{CadenceConfig, ConfigError, MAX_VOLUME};
use crate::error::CoreError;

/// Tunables of the facade, usually taken from [`CadenceConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// Prefix returned when a guild has none stored.
    pub default_prefix: String,
    /// Locale returned when a guild has none stored.
    pub default_locale: String,
    /// Volume returned when a guild has none stored.
    pub default_volume: u8,
    /// How long a vote grants premium.
    pub vote_duration: Duration,
    /// Rolling statistics window.
    pub stats_window: Duration,
    /// Guilds kept in the cache.
    pub cache_capacity: usize,
    /// Rows per resync batch.
    pub resync_batch_size: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self::from(&CadenceConfig::default())
    }
}

impl From<&CadenceConfig> for StorageSettings {
    fn from(config: &CadenceConfig) -> Self {
        Self {
            default_prefix: config.defaults.prefix.clone(),
            default_locale: config.defaults.locale.clone(),
            default_volume: config.defaults.volume,
            vote_duration: Duration::hours(i64::from(config.premium.vote_duration_hours)),
            stats_window: Duration::days(i64::from(config.stats.window_days)),
            cache_capacity: config.cache.capacity,
            resync_batch_size: config.resync.batch_size,
        }
    }
}

/// Storage facade over a primary and a replica store.
pub struct BotStorage<P, R> {
    primary: P,
    replica: R,
    cache: GuildCache,
    sync: WriteSync,
    settings: StorageSettings,
}

impl BotStorage<SqlStore, SqlStore> {
    /// Validate the configuration and open both SQL stores.
    ///
    /// The primary file is opened eagerly; the replica pool connects on
    /// first use. Call [`init`](Self::init) before serving traffic.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] for invalid configuration (including
    /// missing replica credentials) and [`CoreError::Store`] if the primary
    /// cannot be opened.
    pub async fn connect(config: &CadenceConfig) -> Result<Self, CoreError> {
        config.validate()?;

        let primary_config = StoreConfig::primary(&config.storage.primary.path)
            .with_max_connections(config.storage.primary.max_connections);
        let replica_config =
            StoreConfig::replica(&config.storage.replica.url, &config.storage.replica.auth_token)?
                .with_max_connections(config.storage.replica.max_connections)
                .with_connect_timeout(std::time::Duration::from_millis(
                    config.storage.replica.connect_timeout_ms,
                ));

        let parent = config.storage.primary.path.parent();
        if let Some(parent) = parent.filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(ConfigError::from)?;
        }

        let primary = SqlStore::connect(&primary_config).await?;
        let replica = SqlStore::connect(&replica_config).await?;

        Ok(Self::new(primary, replica, StorageSettings::from(config)))
    }
}

impl<P: Store, R: Store> BotStorage<P, R> {
    /// Assemble the facade from two opened stores.
    ///
    /// Spawns the write-sync worker, so this must run inside a Tokio
    /// runtime.
    pub fn new(primary: P, replica: R, settings: StorageSettings) -> Self {
        Self {
            cache: GuildCache::new(settings.cache_capacity),
            sync: WriteSync::new(),
            primary,
            replica,
            settings,
        }
    }

    /// Run migrations on both stores.
    ///
    /// A primary failure is fatal. A replica failure is only logged: every
    /// hot-path call can still be served by the primary, and the replica
    /// may come back later.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Store`] if the primary cannot be migrated.
    pub async fn init(&self) -> Result<(), CoreError> {
        self.primary.migrate().await?;

        if let Err(e) = self.replica.migrate().await {
            tracing::warn!(
                replica = self.replica.name(),
                error = %e,
                "Replica migration failed, continuing with primary only"
            );
        }

        tracing::info!("Storage initialized");
        Ok(())
    }

    /// Drain pending replica replays, then close both stores.
    pub async fn close(&self) {
        self.sync.close().await;
        self.primary.close().await;
        self.replica.close().await;
        tracing::info!("Storage closed");
    }

    /// The primary store.
    pub const fn primary(&self) -> &P {
        &self.primary
    }

    /// The replica store.
    pub const fn replica(&self) -> &R {
        &self.replica
    }

    /// The guild cache.
    pub const fn cache(&self) -> &GuildCache {
        &self.cache
    }

    /// The active settings.
    pub const fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    // =====================================================================
    // Guild settings (hot path: cache + dual store)
    // =====================================================================

    /// A guild's locale, or the default.
    pub async fn get_locale(&self, guild_id: &str) -> Result<String, StorageError> {
        if let Some(locale) = self.cache.locale(guild_id) {
            return Ok(locale);
        }
        Ok(self.load_guild(guild_id, "get_locale").await?.locale.unwrap_or_default())
    }

    /// Store a locale override.
    pub async fn set_locale(&self, guild_id: &str, locale: &str) -> Result<(), StorageError> {
        require_non_empty("locale", locale)?;
        self.write_guild(guild_id, &GuildUpdate::Locale(Some(locale.to_owned())), "set_locale")
            .await?;
        self.cache.set_locale(guild_id, locale);
        Ok(())
    }

    /// Remove the locale override.
    pub async fn reset_locale(&self, guild_id: &str) -> Result<(), StorageError> {
        self.write_guild(guild_id, &GuildUpdate::Locale(None), "reset_locale")
            .await?;
        self.cache.delete(guild_id);
        Ok(())
    }

    /// A guild's command prefix, or the default.
    pub async fn get_prefix(&self, guild_id: &str) -> Result<String, StorageError> {
        if let Some(prefix) = self.cache.prefix(guild_id) {
            return Ok(prefix);
        }
        Ok(self.load_guild(guild_id, "get_prefix").await?.prefix.unwrap_or_default())
    }

    /// Store a prefix override.
    pub async fn set_prefix(&self, guild_id: &str, prefix: &str) -> Result<(), StorageError> {
        require_non_empty("prefix", prefix)?;
        self.write_guild(guild_id, &GuildUpdate::Prefix(Some(prefix.to_owned())), "set_prefix")
            .await?;
        self.cache.set_prefix(guild_id, prefix);
        Ok(())
    }

    /// Remove the prefix override.
    pub async fn delete_prefix(&self, guild_id: &str) -> Result<(), StorageError> {
        self.write_guild(guild_id, &GuildUpdate::Prefix(None), "delete_prefix")
            .await?;
        self.cache.delete(guild_id);
        Ok(())
    }

    /// A guild's default volume, or the bot default.
    pub async fn get_default_volume(&self, guild_id: &str) -> Result<u8, StorageError> {
        if let Some(volume) = self.cache.default_volume(guild_id) {
            return Ok(volume);
        }
        let resolved = self.load_guild(guild_id, "get_default_volume").await?;
        Ok(resolved.default_volume.unwrap_or(self.settings.default_volume))
    }

    /// Store a default volume (0 to 200).
    pub async fn set_default_volume(&self, guild_id: &str, volume: u8) -> Result<(), StorageError> {
        if volume > MAX_VOLUME {
            return Err(StorageError::InvalidInput(format!(
                "volume {volume} exceeds {MAX_VOLUME}"
            )));
        }
        self.write_guild(guild_id, &GuildUpdate::DefaultVolume(Some(volume)), "set_default_volume")
            .await?;
        self.cache.set_default_volume(guild_id, volume);
        Ok(())
    }

    /// Where the guild's setup message lives, if one exists.
    pub async fn get_setup(&self, guild_id: &str) -> Result<Option<SetupDescriptor>, StorageError> {
        if let Some(setup) = self.cache.setup(guild_id) {
            return Ok(setup);
        }
        Ok(self.load_guild(guild_id, "get_setup").await?.setup.flatten())
    }

    /// Record the setup message location.
    pub async fn set_setup(
        &self,
        guild_id: &str,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), StorageError> {
        require_non_empty("channel_id", channel_id)?;
        require_non_empty("message_id", message_id)?;
        let setup = SetupDescriptor {
            channel_id: channel_id.to_owned(),
            message_id: message_id.to_owned(),
        };
        self.write_guild(guild_id, &GuildUpdate::Setup(Some(setup.clone())), "set_setup")
            .await?;
        self.cache.set_setup(guild_id, Some(setup));
        Ok(())
    }

    /// Forget the setup message.
    pub async fn delete_setup(&self, guild_id: &str) -> Result<(), StorageError> {
        self.write_guild(guild_id, &GuildUpdate::Setup(None), "delete_setup")
            .await?;
        self.cache.set_setup(guild_id, None);
        Ok(())
    }

    /// The full stored row of a guild, bypassing the cache for the read
    /// but refreshing it with what was found.
    pub async fn get_guild_config(
        &self,
        guild_id: &str,
    ) -> Result<Option<GuildConfig>, StorageError> {
        let row = self.read_guild(guild_id, "get_guild_config").await?;
        self.cache.populate(guild_id, self.resolve(row.as_ref()));
        Ok(row)
    }

    // =====================================================================
    // Votes and premium (dual store, uncached)
    // =====================================================================

    /// Record a bot-list vote. A second vote while one is active extends it.
    pub async fn add_user_vote(&self, user_id: &str) -> Result<UserVote, StorageError> {
        self.add_grant(user_id, VoteKind::Vote, self.settings.vote_duration, "add_user_vote")
            .await
    }

    /// Grant premium for `duration`. An active grant is extended instead of
    /// duplicated.
    pub async fn add_premium(
        &self,
        user_id: &str,
        duration: Duration,
    ) -> Result<UserVote, StorageError> {
        if duration <= Duration::zero() {
            return Err(StorageError::InvalidInput(
                "premium duration must be positive".to_owned(),
            ));
        }
        self.add_grant(user_id, VoteKind::Regular, duration, "add_premium")
            .await
    }

    /// The user's active vote and premium grant.
    ///
    /// A primary with no active votes is a miss: the replica is asked too,
    /// and whatever it knows is copied into the primary in the background.
    pub async fn get_premium_status(&self, user_id: &str) -> Result<PremiumStatus, StorageError> {
        let now = Utc::now();
        let (votes, served) = fallback::execute_read_through(
            async { self.primary.active_votes(user_id, now).await.map(non_empty) },
            async { self.replica.active_votes(user_id, now).await.map(non_empty) },
            "get_premium_status",
        )
        .await?;
        let votes = votes.unwrap_or_default();

        if served == Served::ReplicaAfterMiss {
            let primary = self.primary.clone();
            let missing = votes.clone();
            self.sync.schedule("backfill_votes", async move {
                for vote in &missing {
                    primary.add_vote(vote).await?;
                }
                Ok::<(), DbError>(())
            });
        }

        Ok(PremiumStatus::from_votes(&votes, now))
    }

    /// Whether any premium source is active for the user.
    pub async fn has_active_premium(&self, user_id: &str) -> Result<bool, StorageError> {
        Ok(self.get_premium_status(user_id).await?.is_active())
    }

    // =====================================================================
    // 24/7 mode and voice status (replica only)
    // =====================================================================

    /// A guild's 24/7 mode settings.
    pub async fn get_247_mode(&self, guild_id: &str) -> Result<Mode247, StorageError> {
        let row = self
            .on_replica(self.replica.get_guild(guild_id), "get_247_mode")
            .await?;
        Ok(row.map(|g| g.mode_247()).unwrap_or_default())
    }

    /// Replace a guild's 24/7 mode settings.
    pub async fn set_247_mode(&self, guild_id: &str, mode: Mode247) -> Result<Mode247, StorageError> {
        let row = self
            .on_replica(
                self.replica
                    .update_guild(guild_id, &GuildUpdate::Mode247(mode), Utc::now()),
                "set_247_mode",
            )
            .await?;
        Ok(row.mode_247())
    }

    /// Whether the voice channel status shows the current track.
    pub async fn get_voice_status(&self, guild_id: &str) -> Result<bool, StorageError> {
        let row = self
            .on_replica(self.replica.get_guild(guild_id), "get_voice_status")
            .await?;
        Ok(row.is_some_and(|g| g.voice_status_enabled))
    }

    /// Toggle voice channel status updates.
    pub async fn set_voice_status(&self, guild_id: &str, enabled: bool) -> Result<(), StorageError> {
        self.on_replica(
            self.replica
                .update_guild(guild_id, &GuildUpdate::VoiceStatus(enabled), Utc::now()),
            "set_voice_status",
        )
        .await?;
        Ok(())
    }

    // =====================================================================
    // Playback statistics (replica only)
    // =====================================================================

    /// Count one play of a track in a guild.
    pub async fn update_track_stats(
        &self,
        guild_id: &str,
        play: &TrackPlay,
    ) -> Result<TrackStats, StorageError> {
        let now = Utc::now();
        self.on_replica(
            self.replica
                .record_track_play(guild_id, play, now, self.stats_cutoff(now)),
            "update_track_stats",
        )
        .await
    }

    /// Count one play requested by a user in a guild.
    pub async fn update_user_stats(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<UserStats, StorageError> {
        let now = Utc::now();
        self.on_replica(
            self.replica
                .record_user_play(guild_id, user_id, now, self.stats_cutoff(now)),
            "update_user_stats",
        )
        .await
    }

    /// Most played tracks of a guild inside the window.
    pub async fn get_top_tracks(
        &self,
        guild_id: &str,
        limit: u32,
    ) -> Result<Vec<TrackStats>, StorageError> {
        self.on_replica(self.replica.top_tracks(guild_id, limit), "get_top_tracks")
            .await
    }

    /// Most active users of a guild inside the window.
    pub async fn get_top_users(
        &self,
        guild_id: &str,
        limit: u32,
    ) -> Result<Vec<UserStats>, StorageError> {
        self.on_replica(self.replica.top_users(guild_id, limit), "get_top_users")
            .await
    }

    /// Guilds with the most plays inside the window.
    pub async fn get_top_guilds(&self, limit: u32) -> Result<Vec<GuildPlays>, StorageError> {
        self.on_replica(self.replica.top_guilds(limit), "get_top_guilds")
            .await
    }

    // =====================================================================
    // Playlists (replica only)
    // =====================================================================

    /// All playlists of a user, oldest first, with tracks.
    pub async fn get_playlists(&self, user_id: &str) -> Result<Vec<Playlist>, StorageError> {
        self.on_replica(self.replica.playlists_for_user(user_id), "get_playlists")
            .await
    }

    /// One playlist with its tracks.
    pub async fn get_playlist_by_id(
        &self,
        id: PlaylistId,
    ) -> Result<Option<Playlist>, StorageError> {
        self.on_replica(self.replica.playlist_by_id(id), "get_playlist_by_id")
            .await
    }

    /// Create an empty playlist. A user's playlist names are unique; a
    /// duplicate yields [`WriteOutcome::Conflict`].
    pub async fn create_playlist(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<WriteOutcome<Playlist>, StorageError> {
        require_non_empty("playlist name", name)?;
        let row = PlaylistRow {
            id: PlaylistId::new(),
            user_id: user_id.to_owned(),
            name: name.trim().to_owned(),
            created_at: Utc::now(),
        };
        self.on_replica(self.replica.create_playlist(&row), "create_playlist")
            .await
    }

    /// Append tracks to a playlist and return it with all its tracks.
    pub async fn add_tracks_to_playlist(
        &self,
        id: PlaylistId,
        tracks: &[NewTrack],
    ) -> Result<Playlist, StorageError> {
        self.on_replica(self.replica.add_tracks(id, tracks), "add_tracks_to_playlist")
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "playlist",
                id: id.to_string(),
            })
    }

    /// Remove one track entry. Returns whether it existed.
    pub async fn remove_song(
        &self,
        id: PlaylistId,
        track_id: PlaylistTrackId,
    ) -> Result<bool, StorageError> {
        self.on_replica(self.replica.remove_track(id, track_id), "remove_song")
            .await
    }

    /// Delete a playlist and its tracks. Returns whether it existed.
    pub async fn delete_playlist(&self, id: PlaylistId) -> Result<bool, StorageError> {
        self.on_replica(self.replica.delete_playlist(id), "delete_playlist")
            .await
    }

    // =====================================================================
    // Liked songs (replica only)
    // =====================================================================

    /// Like a song. Returns `false` if the user already liked this url.
    pub async fn like_song(
        &self,
        user_id: &str,
        url: &str,
        title: &str,
        author: &str,
    ) -> Result<bool, StorageError> {
        require_non_empty("url", url)?;
        let song = LikedSong {
            id: LikedSongId::new(),
            user_id: user_id.to_owned(),
            url: url.to_owned(),
            title: title.to_owned(),
            author: author.to_owned(),
            liked_at: Utc::now(),
        };
        let outcome = self
            .on_replica(self.replica.like_song(&song), "like_song")
            .await?;
        Ok(outcome.is_written())
    }

    /// Remove a like. Returns whether it existed.
    pub async fn unlike_song(&self, user_id: &str, url: &str) -> Result<bool, StorageError> {
        self.on_replica(self.replica.unlike_song(user_id, url), "unlike_song")
            .await
    }

    /// A user's liked songs, newest first.
    pub async fn get_liked_songs(&self, user_id: &str) -> Result<Vec<LikedSong>, StorageError> {
        self.on_replica(self.replica.liked_songs(user_id), "get_liked_songs")
            .await
    }

    // =====================================================================
    // Maintenance
    // =====================================================================

    /// Drop every cached guild.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop one cached guild.
    pub fn evict_guild(&self, guild_id: &str) -> bool {
        self.cache.delete(guild_id)
    }

    /// Counters of the background replay worker.
    pub fn sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }

    /// Subscribe to background replay failures.
    pub fn subscribe_sync_failures(&self) -> broadcast::Receiver<SyncFailure> {
        self.sync.subscribe()
    }

    /// Wait for every replay scheduled so far to finish.
    pub async fn flush_sync(&self) {
        self.sync.flush().await;
    }

    /// Copy the replica into the primary, then drop the cache (it may hold
    /// values the copy replaced).
    ///
    /// Must not run concurrently with live writes; call it at boot before
    /// serving traffic.
    pub async fn full_resync(&self) -> ResyncReport {
        let report = FullResync::new(&self.primary, &self.replica)
            .with_batch_size(self.settings.resync_batch_size)
            .sync()
            .await;
        self.cache.clear();
        report
    }

    // =====================================================================
    // Internals
    // =====================================================================

    /// Read a guild through both stores, cache its resolved settings and
    /// return them.
    async fn load_guild(&self, guild_id: &str, label: &str) -> Result<CachedGuild, StorageError> {
        let row = self.read_guild(guild_id, label).await?;

        let resolved = self.resolve(row.as_ref());
        self.cache.populate(guild_id, resolved.clone());
        Ok(resolved)
    }

    /// Read a guild row through both stores. A row only the replica had is
    /// queued for insertion into the primary.
    async fn read_guild(
        &self,
        guild_id: &str,
        label: &str,
    ) -> Result<Option<GuildConfig>, StorageError> {
        let (row, served) = fallback::execute_read_through(
            self.primary.get_guild(guild_id),
            self.replica.get_guild(guild_id),
            label,
        )
        .await?;

        if let (Some(found), Served::ReplicaAfterMiss) = (&row, served) {
            let primary = self.primary.clone();
            let seed = found.clone();
            self.sync.schedule("backfill_guild", async move {
                primary.backfill_guild(&seed, None).await.map(drop)
            });
        }

        Ok(row)
    }

    /// Settings with defaults filled in for what the row does not set.
    fn resolve(&self, row: Option<&GuildConfig>) -> CachedGuild {
        CachedGuild {
            locale: Some(
                row.and_then(|g| g.locale.clone())
                    .unwrap_or_else(|| self.settings.default_locale.clone()),
            ),
            prefix: Some(
                row.and_then(|g| g.prefix.clone())
                    .unwrap_or_else(|| self.settings.default_prefix.clone()),
            ),
            default_volume: Some(
                row.and_then(|g| g.default_volume)
                    .unwrap_or(self.settings.default_volume),
            ),
            setup: Some(row.and_then(GuildConfig::setup)),
        }
    }

    /// Oldest `last_played` kept by a stats write at `now`.
    fn stats_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.settings.stats_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Upsert a guild field group on the primary (falling back to the
    /// replica) and replay it on the replica.
    ///
    /// When the write created the row, the replica's copy of the guild is
    /// merged into it before the replay, in the same background task.
    async fn write_guild(
        &self,
        guild_id: &str,
        update: &GuildUpdate,
        label: &str,
    ) -> Result<GuildConfig, StorageError> {
        let now = Utc::now();
        let written = fallback::execute(
            self.primary.update_guild(guild_id, update, now),
            self.replica.update_guild(guild_id, update, now),
            label,
        )
        .await?;

        let created = written.created_at == written.updated_at;
        let stamp = written.updated_at;
        let primary = self.primary.clone();
        let replica = self.replica.clone();
        let guild_id = guild_id.to_owned();
        let update = update.clone();
        self.sync.schedule(label, async move {
            if created {
                seed_from_replica(&primary, &replica, &guild_id, &update, stamp).await;
            }
            replica.update_guild(&guild_id, &update, now).await.map(drop)
        });

        Ok(written)
    }

    async fn add_grant(
        &self,
        user_id: &str,
        kind: VoteKind,
        duration: Duration,
        label: &str,
    ) -> Result<UserVote, StorageError> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(duration)
            .filter(|at| is_storable(*at))
            .ok_or_else(|| {
                StorageError::InvalidInput("premium would expire after year 9999".to_owned())
            })?;
        let vote = UserVote {
            id: VoteId::new(),
            user_id: user_id.to_owned(),
            kind,
            voted_at: now,
            expires_at,
        };

        let replica = self.replica.clone();
        let replay_vote = vote.clone();
        self.sync
            .execute_write_with_sync(
                self.primary.add_vote(&vote),
                move || {
                    let replica = replica.clone();
                    let vote = replay_vote.clone();
                    async move { replica.add_vote(&vote).await }
                },
                label,
            )
            .await
    }

    async fn on_replica<T>(
        &self,
        operation: impl Future<Output = Result<T, DbError>>,
        label: &str,
    ) -> Result<T, StorageError> {
        fallback::single(self.replica.name(), operation, label).await
    }
}

impl<P, R> std::fmt::Debug for BotStorage<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotStorage")
            .field("settings", &self.settings)
            .field("cached_guilds", &self.cache.len())
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

/// Merge the replica's row of a guild into a row the primary just created.
///
/// `update` is applied to the replica row first so the write that created
/// the local row wins. Only rows still carrying `stamp` are touched; a
/// later local write means the merge is stale. Failures are logged: the
/// replay that follows does not depend on them.
async fn seed_from_replica<P: Store, R: Store>(
    primary: &P,
    replica: &R,
    guild_id: &str,
    update: &GuildUpdate,
    stamp: DateTime<Utc>,
) {
    let mut merged = match replica.get_guild(guild_id).await {
        Ok(Some(row)) => row,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(guild_id, error = %e, "Could not read replica row to seed primary");
            return;
        }
    };

    update.apply(&mut merged);
    match primary.backfill_guild(&merged, Some(stamp)).await {
        Ok(true) => tracing::debug!(guild_id, "Seeded new primary row from replica"),
        Ok(false) => tracing::debug!(guild_id, "Primary row changed before seeding, skipped"),
        Err(e) => tracing::warn!(guild_id, error = %e, "Seeding primary row from replica failed"),
    }
}

fn non_empty(votes: Vec<UserVote>) -> Option<Vec<UserVote>> {
    (!votes.is_empty()).then_some(votes)
}

fn require_non_empty(what: &str, value: &str) -> Result<(), StorageError> {
    if value.trim().is_empty() {
        return Err(StorageError::InvalidInput(format!("{what} must not be empty")));
    }
    Ok(())
}
