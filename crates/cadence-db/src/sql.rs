//! SQL-backed store used for both the primary and the replica.
//!
//! The primary is an embedded SQLite file opened by this process; the
//! replica is a networked `PostgreSQL` database reachable from every
//! process. Both are driven through the [`sqlx::Any`] driver with the same
//! runtime-built queries: the schemas are kept type-identical (`TEXT` ids
//! and timestamps, `INTEGER`/`BIGINT` counters), upserts use the
//! `ON CONFLICT ... DO UPDATE` form both dialects accept, and numbered
//! `$N` placeholders work on both.
//!
//! Queries are built at runtime (not compile-time checked) to avoid
//! requiring live databases at build time. All values are bound as
//! parameters.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use cadence_types::{
    GuildConfig, GuildPlays, LikedSong, NewTrack, Playlist, PlaylistId, PlaylistTrack,
    PlaylistTrackId, TrackPlay, TrackStats, UserStats, UserVote, parse_timestamp, to_timestamp,
};
use chrono::{DateTime, Utc};
use sqlx::any::{AnyArguments, AnyPoolOptions};
use sqlx::migrate::Migrator;
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, AnyPool};

use crate::error::DbError;
use crate::store::{
    GuildUpdate, PlaylistRow, Record, Store, Table, WriteOutcome, check_vote_times,
};

/// Default maximum number of pooled connections for the embedded primary.
const DEFAULT_PRIMARY_MAX_CONNECTIONS: u32 = 4;

/// Default maximum number of pooled connections for the replica.
const DEFAULT_REPLICA_MAX_CONNECTIONS: u32 = 10;

/// Default connection acquire timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default idle timeout in seconds.
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

static SQLITE_MIGRATOR: Migrator = sqlx::migrate!("./migrations/sqlite");
static POSTGRES_MIGRATOR: Migrator = sqlx::migrate!("./migrations/postgres");

const GUILD_COLUMNS: &str = "guild_id, locale, prefix, default_volume, enabled_247, \
    channel_247_id, text_247_id, setup_channel_id, setup_message_id, voice_status_enabled, \
    created_at, updated_at";
const VOTE_COLUMNS: &str = "id, user_id, kind, voted_at, expires_at";
const PLAYLIST_COLUMNS: &str = "id, user_id, name, created_at";
const TRACK_COLUMNS: &str = "id, playlist_id, position, url, info";
const LIKED_COLUMNS: &str = "id, user_id, url, title, author, liked_at";
const TRACK_STATS_COLUMNS: &str =
    "track_id, guild_id, title, author, uri, play_count, last_played";
const USER_STATS_COLUMNS: &str = "user_id, guild_id, play_count, last_played";

// =========================================================================
// Configuration
// =========================================================================

/// Which side of the dual store a [`SqlStore`] plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    /// The embedded, process-local store tried first.
    Primary,
    /// The networked store used as fallback and as resync source.
    Replica,
}

impl StoreRole {
    /// Name used in logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Replica => "replica",
        }
    }
}

/// SQL dialect behind a connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Embedded SQLite.
    Sqlite,
    /// Networked `PostgreSQL`.
    Postgres,
}

impl Dialect {
    /// Detect the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Result<Self, DbError> {
        if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else {
            Err(DbError::Config(format!(
                "unsupported database URL scheme: {}",
                url.split(':').next().unwrap_or_default()
            )))
        }
    }

    const fn migrator(self) -> &'static Migrator {
        match self {
            Self::Sqlite => &SQLITE_MIGRATOR,
            Self::Postgres => &POSTGRES_MIGRATOR,
        }
    }
}

/// Connection settings for one [`SqlStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Connection URL (`sqlite://path?mode=rwc` or `postgresql://...`).
    pub url: String,
    /// Primary or replica.
    pub role: StoreRole,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// How long to wait for a pooled connection.
    pub connect_timeout: Duration,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
}

impl StoreConfig {
    /// Create a configuration from a raw URL with default pool settings.
    pub fn new(url: &str, role: StoreRole) -> Self {
        let max_connections = match role {
            StoreRole::Primary => DEFAULT_PRIMARY_MAX_CONNECTIONS,
            StoreRole::Replica => DEFAULT_REPLICA_MAX_CONNECTIONS,
        };
        Self {
            url: url.to_owned(),
            role,
            max_connections,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }

    /// Primary store backed by a SQLite file, created if missing.
    pub fn primary(path: &Path) -> Self {
        Self::new(&format!("sqlite://{}?mode=rwc", path.display()), StoreRole::Primary)
    }

    /// Replica store from a URL and an auth token.
    ///
    /// Both are required. For `PostgreSQL` URLs the token is applied as the
    /// connection password; SQLite URLs (local development) ignore it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if either value is empty, the URL
    /// scheme is unsupported, or the token cannot be applied.
    pub fn replica(url: &str, auth_token: &str) -> Result<Self, DbError> {
        if url.trim().is_empty() {
            return Err(DbError::Config("replica URL is required".to_owned()));
        }
        if auth_token.trim().is_empty() {
            return Err(DbError::Config("replica auth token is required".to_owned()));
        }

        let url = match Dialect::from_url(url)? {
            Dialect::Postgres => {
                let mut parsed = url::Url::parse(url)
                    .map_err(|e| DbError::Config(format!("invalid replica URL: {e}")))?;
                parsed.set_password(Some(auth_token)).map_err(|()| {
                    DbError::Config("replica URL cannot carry credentials".to_owned())
                })?;
                parsed.to_string()
            }
            Dialect::Sqlite => url.to_owned(),
        };

        Ok(Self::new(&url, StoreRole::Replica))
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

// =========================================================================
// Store
// =========================================================================

/// Pooled SQL store.
///
/// Cloning is cheap: clones share the underlying pool.
#[derive(Clone)]
pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
    role: StoreRole,
}

impl SqlStore {
    /// Open a store.
    ///
    /// The primary connects eagerly, so a broken local file fails boot.
    /// The replica connects lazily: an unreachable network database must
    /// not keep the process from starting, since every replica call is
    /// either a fallback or best-effort.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL is unsupported.
    /// Returns [`DbError::Sql`] if the primary cannot be opened.
    pub async fn connect(config: &StoreConfig) -> Result<Self, DbError> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_url(&config.url)?;

        let options = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout);

        let pool = match config.role {
            StoreRole::Primary => options.connect(&config.url).await?,
            StoreRole::Replica => options.connect_lazy(&config.url)?,
        };

        tracing::info!(
            role = config.role.name(),
            dialect = ?dialect,
            max_connections = config.max_connections,
            "Opened store"
        );

        Ok(Self {
            pool,
            dialect,
            role: config.role,
        })
    }

    /// The dialect behind this store.
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Return a reference to the underlying [`AnyPool`].
    pub const fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn tracks_for_playlist(&self, id: PlaylistId) -> Result<Vec<PlaylistTrack>, DbError> {
        let rows = sqlx::query_as::<_, TrackRow>(&format!(
            "SELECT {TRACK_COLUMNS} FROM playlist_tracks WHERE playlist_id = $1 ORDER BY position"
        ))
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TrackRow::into_track).collect()
    }
}

impl Store for SqlStore {
    fn name(&self) -> &str {
        self.role.name()
    }

    async fn migrate(&self) -> Result<(), DbError> {
        self.dialect.migrator().run(&self.pool).await?;
        tracing::info!(role = self.role.name(), "Store migrations completed");
        Ok(())
    }

    async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!(role = self.role.name(), "Store pool closed");
    }

    // -- guilds ------------------------------------------------------------

    async fn get_guild(&self, guild_id: &str) -> Result<Option<GuildConfig>, DbError> {
        let row = sqlx::query_as::<_, GuildRow>(&format!(
            "SELECT {GUILD_COLUMNS} FROM guilds WHERE guild_id = $1"
        ))
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(GuildRow::into_config).transpose()
    }

    async fn update_guild(
        &self,
        guild_id: &str,
        update: &GuildUpdate,
        now: DateTime<Utc>,
    ) -> Result<GuildConfig, DbError> {
        let assignments = guild_assignments(update);

        let columns: Vec<&str> = assignments.iter().map(|(column, _)| *column).collect();
        let placeholders: Vec<String> = (0..columns.len())
            .map(|i| format!("${}", i.saturating_add(3)))
            .collect();
        let updates: Vec<String> = columns
            .iter()
            .map(|column| format!("{column} = excluded.{column}"))
            .collect();

        // $1 = guild_id, $2 = now (created_at and updated_at), $3.. = values
        let sql = format!(
            "INSERT INTO guilds (guild_id, created_at, updated_at, {columns})
             VALUES ($1, $2, $2, {placeholders})
             ON CONFLICT (guild_id) DO UPDATE SET {updates}, updated_at = excluded.updated_at
             RETURNING {GUILD_COLUMNS}",
            columns = columns.join(", "),
            placeholders = placeholders.join(", "),
            updates = updates.join(", "),
        );

        let mut query = sqlx::query_as::<_, GuildRow>(&sql)
            .bind(guild_id)
            .bind(to_timestamp(now));
        for (_, value) in assignments {
            query = match value {
                BindValue::Text(text) => query.bind(text),
                BindValue::Int(int) => query.bind(int),
            };
        }

        let row = query.fetch_one(&self.pool).await?;
        row.into_config()
    }

    async fn backfill_guild(
        &self,
        row: &GuildConfig,
        if_updated_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DbError> {
        let result = match if_updated_at {
            None => {
                let sql = format!(
                    "INSERT INTO guilds ({GUILD_COLUMNS})
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                     ON CONFLICT (guild_id) DO NOTHING"
                );
                bind_guild(&sql, row).execute(&self.pool).await?
            }
            Some(updated_at) => {
                // $12 is the guard: only a row untouched since `updated_at`
                // is merged. SET expressions see the old column values.
                let mut guarded = row.clone();
                guarded.updated_at = updated_at;
                let sql = "UPDATE guilds SET
                     locale = COALESCE(locale, $2),
                     prefix = COALESCE(prefix, $3),
                     default_volume = COALESCE(default_volume, $4),
                     enabled_247 = $5,
                     channel_247_id = $6,
                     text_247_id = $7,
                     setup_channel_id = CASE
                         WHEN setup_channel_id IS NULL AND setup_message_id IS NULL THEN $8
                         ELSE setup_channel_id END,
                     setup_message_id = CASE
                         WHEN setup_channel_id IS NULL AND setup_message_id IS NULL THEN $9
                         ELSE setup_message_id END,
                     voice_status_enabled = $10,
                     created_at = $11
                 WHERE guild_id = $1 AND updated_at = $12";
                bind_guild(sql, &guarded).execute(&self.pool).await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    async fn delete_guild(&self, guild_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM guilds WHERE guild_id = $1")
            .bind(guild_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- votes -------------------------------------------------------------

    async fn add_vote(&self, vote: &UserVote) -> Result<UserVote, DbError> {
        check_vote_times(vote)?;
        let mut tx = self.pool.begin().await?;

        // Extend (never shorten) the active row of the same kind.
        let extended = sqlx::query_as::<_, VoteRow>(&format!(
            "UPDATE user_votes
             SET expires_at = CASE WHEN expires_at < $1 THEN $1 ELSE expires_at END
             WHERE user_id = $2 AND kind = $3 AND expires_at > $4
             RETURNING {VOTE_COLUMNS}"
        ))
        .bind(to_timestamp(vote.expires_at))
        .bind(&vote.user_id)
        .bind(vote.kind.as_str())
        .bind(to_timestamp(vote.voted_at))
        .fetch_all(&mut *tx)
        .await?;

        let row = if let Some(row) = extended.into_iter().next() {
            row
        } else {
            sqlx::query_as::<_, VoteRow>(&format!(
                "INSERT INTO user_votes ({VOTE_COLUMNS}) VALUES ($1, $2, $3, $4, $5)
                 RETURNING {VOTE_COLUMNS}"
            ))
            .bind(vote.id.to_string())
            .bind(&vote.user_id)
            .bind(vote.kind.as_str())
            .bind(to_timestamp(vote.voted_at))
            .bind(to_timestamp(vote.expires_at))
            .fetch_one(&mut *tx)
            .await?
        };

        tx.commit().await?;
        row.into_vote()
    }

    async fn active_votes(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserVote>, DbError> {
        let rows = sqlx::query_as::<_, VoteRow>(&format!(
            "SELECT {VOTE_COLUMNS} FROM user_votes
             WHERE user_id = $1 AND expires_at > $2
             ORDER BY expires_at DESC"
        ))
        .bind(user_id)
        .bind(to_timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(VoteRow::into_vote).collect()
    }

    // -- playlists ---------------------------------------------------------

    async fn playlists_for_user(&self, user_id: &str) -> Result<Vec<Playlist>, DbError> {
        let headers = sqlx::query_as::<_, PlaylistDbRow>(&format!(
            "SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE user_id = $1 ORDER BY created_at, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let track_rows = sqlx::query_as::<_, TrackRow>(
            r"SELECT t.id, t.playlist_id, t.position, t.url, t.info
              FROM playlist_tracks t
              JOIN playlists p ON p.id = t.playlist_id
              WHERE p.user_id = $1
              ORDER BY t.playlist_id, t.position",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut tracks: HashMap<PlaylistId, Vec<PlaylistTrack>> = HashMap::new();
        for row in track_rows {
            let track = row.into_track()?;
            tracks.entry(track.playlist_id).or_default().push(track);
        }

        headers
            .into_iter()
            .map(|header| {
                let header = header.into_row()?;
                let own = tracks.remove(&header.id).unwrap_or_default();
                Ok(header.with_tracks(own))
            })
            .collect()
    }

    async fn playlist_by_id(&self, id: PlaylistId) -> Result<Option<Playlist>, DbError> {
        let header = sqlx::query_as::<_, PlaylistDbRow>(&format!(
            "SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(header) = header else {
            return Ok(None);
        };
        let tracks = self.tracks_for_playlist(id).await?;
        Ok(Some(header.into_row()?.with_tracks(tracks)))
    }

    async fn create_playlist(&self, row: &PlaylistRow) -> Result<WriteOutcome<Playlist>, DbError> {
        let result = sqlx::query(&format!(
            "INSERT INTO playlists ({PLAYLIST_COLUMNS}) VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, name) DO NOTHING"
        ))
        .bind(row.id.to_string())
        .bind(&row.user_id)
        .bind(&row.name)
        .bind(to_timestamp(row.created_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(WriteOutcome::Conflict);
        }
        Ok(WriteOutcome::Written(row.clone().with_tracks(Vec::new())))
    }

    async fn add_tracks(
        &self,
        id: PlaylistId,
        tracks: &[NewTrack],
    ) -> Result<Option<Playlist>, DbError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM playlists WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let last: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), -1) FROM playlist_tracks WHERE playlist_id = $1",
        )
        .bind(id.to_string())
        .fetch_one(&mut *tx)
        .await?;

        let mut position = last;
        for track in tracks {
            position = position.saturating_add(1);
            sqlx::query(&format!(
                "INSERT INTO playlist_tracks ({TRACK_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
            ))
            .bind(PlaylistTrackId::new().to_string())
            .bind(id.to_string())
            .bind(position)
            .bind(&track.url)
            .bind(serde_json::to_string(&track.info)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(playlist_id = %id, added = tracks.len(), "Appended playlist tracks");
        self.playlist_by_id(id).await
    }

    async fn remove_track(&self, id: PlaylistId, track_id: PlaylistTrackId) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM playlist_tracks WHERE id = $1 AND playlist_id = $2")
            .bind(track_id.to_string())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_playlist(&self, id: PlaylistId) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;

        // Explicit child delete: foreign-key enforcement is a per-connection
        // setting in SQLite and cannot be relied on for the cascade.
        sqlx::query("DELETE FROM playlist_tracks WHERE playlist_id = $1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM playlists WHERE id = $1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // -- liked songs -------------------------------------------------------

    async fn like_song(&self, song: &LikedSong) -> Result<WriteOutcome<LikedSong>, DbError> {
        let result = sqlx::query(&format!(
            "INSERT INTO liked_songs ({LIKED_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (user_id, url) DO NOTHING"
        ))
        .bind(song.id.to_string())
        .bind(&song.user_id)
        .bind(&song.url)
        .bind(&song.title)
        .bind(&song.author)
        .bind(to_timestamp(song.liked_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(WriteOutcome::Conflict);
        }
        Ok(WriteOutcome::Written(song.clone()))
    }

    async fn unlike_song(&self, user_id: &str, url: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM liked_songs WHERE user_id = $1 AND url = $2")
            .bind(user_id)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn liked_songs(&self, user_id: &str) -> Result<Vec<LikedSong>, DbError> {
        let rows = sqlx::query_as::<_, LikedRow>(&format!(
            "SELECT {LIKED_COLUMNS} FROM liked_songs WHERE user_id = $1 ORDER BY liked_at DESC, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LikedRow::into_song).collect()
    }

    // -- statistics --------------------------------------------------------

    async fn record_track_play(
        &self,
        guild_id: &str,
        play: &TrackPlay,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<TrackStats, DbError> {
        let mut tx = self.pool.begin().await?;

        let evicted = sqlx::query("DELETE FROM track_stats WHERE last_played < $1")
            .bind(to_timestamp(cutoff))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let row = sqlx::query_as::<_, TrackStatsRow>(&format!(
            "INSERT INTO track_stats ({TRACK_STATS_COLUMNS}) VALUES ($1, $2, $3, $4, $5, 1, $6)
             ON CONFLICT (track_id, guild_id) DO UPDATE SET
               title = excluded.title,
               author = excluded.author,
               uri = excluded.uri,
               play_count = track_stats.play_count + 1,
               last_played = excluded.last_played
             RETURNING {TRACK_STATS_COLUMNS}"
        ))
        .bind(&play.track_id)
        .bind(guild_id)
        .bind(&play.title)
        .bind(&play.author)
        .bind(&play.uri)
        .bind(to_timestamp(now))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        if evicted > 0 {
            tracing::debug!(evicted, "Evicted stale track stats");
        }
        row.into_stats()
    }

    async fn record_user_play(
        &self,
        guild_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<UserStats, DbError> {
        let mut tx = self.pool.begin().await?;

        let evicted = sqlx::query("DELETE FROM user_stats WHERE last_played < $1")
            .bind(to_timestamp(cutoff))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let row = sqlx::query_as::<_, UserStatsRow>(&format!(
            "INSERT INTO user_stats ({USER_STATS_COLUMNS}) VALUES ($1, $2, 1, $3)
             ON CONFLICT (user_id, guild_id) DO UPDATE SET
               play_count = user_stats.play_count + 1,
               last_played = excluded.last_played
             RETURNING {USER_STATS_COLUMNS}"
        ))
        .bind(user_id)
        .bind(guild_id)
        .bind(to_timestamp(now))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        if evicted > 0 {
            tracing::debug!(evicted, "Evicted stale user stats");
        }
        row.into_stats()
    }

    async fn top_tracks(&self, guild_id: &str, limit: u32) -> Result<Vec<TrackStats>, DbError> {
        let rows = sqlx::query_as::<_, TrackStatsRow>(&format!(
            "SELECT {TRACK_STATS_COLUMNS} FROM track_stats
             WHERE guild_id = $1
             ORDER BY play_count DESC, last_played DESC
             LIMIT $2"
        ))
        .bind(guild_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TrackStatsRow::into_stats).collect()
    }

    async fn top_users(&self, guild_id: &str, limit: u32) -> Result<Vec<UserStats>, DbError> {
        let rows = sqlx::query_as::<_, UserStatsRow>(&format!(
            "SELECT {USER_STATS_COLUMNS} FROM user_stats
             WHERE guild_id = $1
             ORDER BY play_count DESC, last_played DESC
             LIMIT $2"
        ))
        .bind(guild_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserStatsRow::into_stats).collect()
    }

    async fn top_guilds(&self, limit: u32) -> Result<Vec<GuildPlays>, DbError> {
        // SUM(BIGINT) is NUMERIC in PostgreSQL; cast back so both dialects
        // decode the same integer type.
        let rows = sqlx::query_as::<_, GuildPlaysRow>(
            r"SELECT guild_id, CAST(SUM(play_count) AS BIGINT) AS total_plays
              FROM track_stats
              GROUP BY guild_id
              ORDER BY total_plays DESC, guild_id
              LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| GuildPlays {
                guild_id: row.guild_id,
                play_count: to_count(row.total_plays),
            })
            .collect())
    }

    // -- bulk copy ---------------------------------------------------------

    async fn read_table(&self, table: Table) -> Result<Vec<Record>, DbError> {
        let records = match table {
            Table::Guilds => sqlx::query_as::<_, GuildRow>(&format!(
                "SELECT {GUILD_COLUMNS} FROM guilds ORDER BY guild_id"
            ))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.into_config().map(Record::Guild))
            .collect::<Result<Vec<_>, _>>()?,
            Table::UserVotes => sqlx::query_as::<_, VoteRow>(&format!(
                "SELECT {VOTE_COLUMNS} FROM user_votes ORDER BY id"
            ))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.into_vote().map(Record::Vote))
            .collect::<Result<Vec<_>, _>>()?,
            Table::Playlists => sqlx::query_as::<_, PlaylistDbRow>(&format!(
                "SELECT {PLAYLIST_COLUMNS} FROM playlists ORDER BY id"
            ))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.into_row().map(Record::Playlist))
            .collect::<Result<Vec<_>, _>>()?,
            Table::PlaylistTracks => sqlx::query_as::<_, TrackRow>(&format!(
                "SELECT {TRACK_COLUMNS} FROM playlist_tracks ORDER BY playlist_id, position"
            ))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.into_track().map(Record::PlaylistTrack))
            .collect::<Result<Vec<_>, _>>()?,
            Table::LikedSongs => sqlx::query_as::<_, LikedRow>(&format!(
                "SELECT {LIKED_COLUMNS} FROM liked_songs ORDER BY id"
            ))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.into_song().map(Record::LikedSong))
            .collect::<Result<Vec<_>, _>>()?,
            Table::TrackStats => sqlx::query_as::<_, TrackStatsRow>(&format!(
                "SELECT {TRACK_STATS_COLUMNS} FROM track_stats ORDER BY guild_id, track_id"
            ))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.into_stats().map(Record::TrackStats))
            .collect::<Result<Vec<_>, _>>()?,
            Table::UserStats => sqlx::query_as::<_, UserStatsRow>(&format!(
                "SELECT {USER_STATS_COLUMNS} FROM user_stats ORDER BY guild_id, user_id"
            ))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.into_stats().map(Record::UserStats))
            .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(records)
    }

    async fn clear_table(&self, table: Table) -> Result<u64, DbError> {
        let result = sqlx::query(&format!("DELETE FROM {}", table.name()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_records(&self, records: &[Record]) -> Result<u64, DbError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted: u64 = 0;
        for record in records {
            insert_record(&mut tx, record).await?;
            inserted = inserted.saturating_add(1);
        }
        tx.commit().await?;

        Ok(inserted)
    }
}

// =========================================================================
// Verbatim inserts (resync)
// =========================================================================

/// Bind every guild column, in [`GUILD_COLUMNS`] order, as `$1..$12`.
fn bind_guild<'q>(sql: &'q str, guild: &'q GuildConfig) -> Query<'q, Any, AnyArguments<'q>> {
    sqlx::query(sql)
        .bind(&guild.guild_id)
        .bind(guild.locale.as_deref())
        .bind(guild.prefix.as_deref())
        .bind(guild.default_volume.map(i64::from))
        .bind(i64::from(guild.enabled_247))
        .bind(guild.channel_247_id.as_deref())
        .bind(guild.text_247_id.as_deref())
        .bind(guild.setup_channel_id.as_deref())
        .bind(guild.setup_message_id.as_deref())
        .bind(i64::from(guild.voice_status_enabled))
        .bind(to_timestamp(guild.created_at))
        .bind(to_timestamp(guild.updated_at))
}

async fn insert_record(conn: &mut AnyConnection, record: &Record) -> Result<(), DbError> {
    match record {
        Record::Guild(guild) => {
            let sql = format!(
                "INSERT INTO guilds ({GUILD_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
            );
            bind_guild(&sql, guild).execute(&mut *conn).await?;
        }
        Record::Vote(vote) => {
            check_vote_times(vote)?;
            sqlx::query(&format!(
                "INSERT INTO user_votes ({VOTE_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
            ))
            .bind(vote.id.to_string())
            .bind(&vote.user_id)
            .bind(vote.kind.as_str())
            .bind(to_timestamp(vote.voted_at))
            .bind(to_timestamp(vote.expires_at))
            .execute(&mut *conn)
            .await?;
        }
        Record::Playlist(playlist) => {
            sqlx::query(&format!(
                "INSERT INTO playlists ({PLAYLIST_COLUMNS}) VALUES ($1, $2, $3, $4)"
            ))
            .bind(playlist.id.to_string())
            .bind(&playlist.user_id)
            .bind(&playlist.name)
            .bind(to_timestamp(playlist.created_at))
            .execute(&mut *conn)
            .await?;
        }
        Record::PlaylistTrack(track) => {
            sqlx::query(&format!(
                "INSERT INTO playlist_tracks ({TRACK_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
            ))
            .bind(track.id.to_string())
            .bind(track.playlist_id.to_string())
            .bind(i64::from(track.position))
            .bind(&track.url)
            .bind(serde_json::to_string(&track.info)?)
            .execute(&mut *conn)
            .await?;
        }
        Record::LikedSong(song) => {
            sqlx::query(&format!(
                "INSERT INTO liked_songs ({LIKED_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
            ))
            .bind(song.id.to_string())
            .bind(&song.user_id)
            .bind(&song.url)
            .bind(&song.title)
            .bind(&song.author)
            .bind(to_timestamp(song.liked_at))
            .execute(&mut *conn)
            .await?;
        }
        Record::TrackStats(stats) => {
            sqlx::query(&format!(
                "INSERT INTO track_stats ({TRACK_STATS_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7)"
            ))
            .bind(&stats.track_id)
            .bind(&stats.guild_id)
            .bind(&stats.title)
            .bind(&stats.author)
            .bind(&stats.uri)
            .bind(i64::try_from(stats.play_count).unwrap_or(i64::MAX))
            .bind(to_timestamp(stats.last_played))
            .execute(&mut *conn)
            .await?;
        }
        Record::UserStats(stats) => {
            sqlx::query(&format!(
                "INSERT INTO user_stats ({USER_STATS_COLUMNS}) VALUES ($1, $2, $3, $4)"
            ))
            .bind(&stats.user_id)
            .bind(&stats.guild_id)
            .bind(i64::try_from(stats.play_count).unwrap_or(i64::MAX))
            .bind(to_timestamp(stats.last_played))
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

// =========================================================================
// Guild upsert assignments
// =========================================================================

/// A value bound into a guild upsert.
enum BindValue {
    Text(Option<String>),
    Int(Option<i64>),
}

/// Columns written by a [`GuildUpdate`], paired with their values.
fn guild_assignments(update: &GuildUpdate) -> Vec<(&'static str, BindValue)> {
    match update {
        GuildUpdate::Locale(locale) => vec![("locale", BindValue::Text(locale.clone()))],
        GuildUpdate::Prefix(prefix) => vec![("prefix", BindValue::Text(prefix.clone()))],
        GuildUpdate::DefaultVolume(volume) => {
            vec![("default_volume", BindValue::Int(volume.map(i64::from)))]
        }
        GuildUpdate::Setup(setup) => vec![
            (
                "setup_channel_id",
                BindValue::Text(setup.as_ref().map(|s| s.channel_id.clone())),
            ),
            (
                "setup_message_id",
                BindValue::Text(setup.as_ref().map(|s| s.message_id.clone())),
            ),
        ],
        GuildUpdate::Mode247(mode) => vec![
            ("enabled_247", BindValue::Int(Some(i64::from(mode.enabled)))),
            ("channel_247_id", BindValue::Text(mode.voice_channel_id.clone())),
            ("text_247_id", BindValue::Text(mode.text_channel_id.clone())),
        ],
        GuildUpdate::VoiceStatus(enabled) => vec![(
            "voice_status_enabled",
            BindValue::Int(Some(i64::from(*enabled))),
        )],
    }
}

// =========================================================================
// Row mapping
// =========================================================================

fn parse_time(column: &str, value: &str) -> Result<DateTime<Utc>, DbError> {
    parse_timestamp(value).map_err(|e| DbError::invalid(column, e))
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[derive(sqlx::FromRow)]
struct GuildRow {
    guild_id: String,
    locale: Option<String>,
    prefix: Option<String>,
    default_volume: Option<i64>,
    enabled_247: i64,
    channel_247_id: Option<String>,
    text_247_id: Option<String>,
    setup_channel_id: Option<String>,
    setup_message_id: Option<String>,
    voice_status_enabled: i64,
    created_at: String,
    updated_at: String,
}

impl GuildRow {
    fn into_config(self) -> Result<GuildConfig, DbError> {
        let default_volume = self
            .default_volume
            .map(u8::try_from)
            .transpose()
            .map_err(|e| DbError::invalid("guilds.default_volume", e))?;

        Ok(GuildConfig {
            created_at: parse_time("guilds.created_at", &self.created_at)?,
            updated_at: parse_time("guilds.updated_at", &self.updated_at)?,
            guild_id: self.guild_id,
            locale: self.locale,
            prefix: self.prefix,
            default_volume,
            enabled_247: self.enabled_247 != 0,
            channel_247_id: self.channel_247_id,
            text_247_id: self.text_247_id,
            setup_channel_id: self.setup_channel_id,
            setup_message_id: self.setup_message_id,
            voice_status_enabled: self.voice_status_enabled != 0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VoteRow {
    id: String,
    user_id: String,
    kind: String,
    voted_at: String,
    expires_at: String,
}

impl VoteRow {
    fn into_vote(self) -> Result<UserVote, DbError> {
        Ok(UserVote {
            id: self
                .id
                .parse()
                .map_err(|e| DbError::invalid("user_votes.id", e))?,
            kind: self
                .kind
                .parse()
                .map_err(|e| DbError::invalid("user_votes.kind", e))?,
            voted_at: parse_time("user_votes.voted_at", &self.voted_at)?,
            expires_at: parse_time("user_votes.expires_at", &self.expires_at)?,
            user_id: self.user_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PlaylistDbRow {
    id: String,
    user_id: String,
    name: String,
    created_at: String,
}

impl PlaylistDbRow {
    fn into_row(self) -> Result<PlaylistRow, DbError> {
        Ok(PlaylistRow {
            id: self
                .id
                .parse()
                .map_err(|e| DbError::invalid("playlists.id", e))?,
            created_at: parse_time("playlists.created_at", &self.created_at)?,
            user_id: self.user_id,
            name: self.name,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrackRow {
    id: String,
    playlist_id: String,
    position: i64,
    url: String,
    info: String,
}

impl TrackRow {
    fn into_track(self) -> Result<PlaylistTrack, DbError> {
        Ok(PlaylistTrack {
            id: self
                .id
                .parse()
                .map_err(|e| DbError::invalid("playlist_tracks.id", e))?,
            playlist_id: self
                .playlist_id
                .parse()
                .map_err(|e| DbError::invalid("playlist_tracks.playlist_id", e))?,
            position: u32::try_from(self.position)
                .map_err(|e| DbError::invalid("playlist_tracks.position", e))?,
            info: serde_json::from_str(&self.info)?,
            url: self.url,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LikedRow {
    id: String,
    user_id: String,
    url: String,
    title: String,
    author: String,
    liked_at: String,
}

impl LikedRow {
    fn into_song(self) -> Result<LikedSong, DbError> {
        Ok(LikedSong {
            id: self
                .id
                .parse()
                .map_err(|e| DbError::invalid("liked_songs.id", e))?,
            liked_at: parse_time("liked_songs.liked_at", &self.liked_at)?,
            user_id: self.user_id,
            url: self.url,
            title: self.title,
            author: self.author,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrackStatsRow {
    track_id: String,
    guild_id: String,
    title: String,
    author: String,
    uri: String,
    play_count: i64,
    last_played: String,
}

impl TrackStatsRow {
    fn into_stats(self) -> Result<TrackStats, DbError> {
        Ok(TrackStats {
            last_played: parse_time("track_stats.last_played", &self.last_played)?,
            play_count: to_count(self.play_count),
            track_id: self.track_id,
            guild_id: self.guild_id,
            title: self.title,
            author: self.author,
            uri: self.uri,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserStatsRow {
    user_id: String,
    guild_id: String,
    play_count: i64,
    last_played: String,
}

impl UserStatsRow {
    fn into_stats(self) -> Result<UserStats, DbError> {
        Ok(UserStats {
            last_played: parse_time("user_stats.last_played", &self.last_played)?,
            play_count: to_count(self.play_count),
            user_id: self.user_id,
            guild_id: self.guild_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct GuildPlaysRow {
    guild_id: String,
    total_plays: i64,
}
